//! Orchestrator: drives a registered submission through routing, metadata
//! extraction, file normalization, collection resolution, and the downstream
//! deposit, recording every outcome in the store.
//!
//! Submissions for the same `group_name` are serialized through a per-key
//! async mutex so concurrent re-submissions cannot interleave their
//! downstream writes. The advisory `locked` flag is persisted around the
//! critical section for operator visibility.

use junction_common::{retry::retry, GatewayError, RetryPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::avalon::AvalonClient;
use crate::collections::CollectionResolver;
use crate::files;
use crate::mods;
use crate::payload::build_payload;
use crate::request::IngestRequest;
use crate::router::{Router, RoutingTarget};
use crate::store::{RecordChanges, StoreError, SubmissionRecord, SubmissionStatus, SubmissionStore};

pub struct Orchestrator {
    store: Arc<dyn SubmissionStore>,
    collections: CollectionResolver,
    router: Router,
    client: Arc<AvalonClient>,
    retry: RetryPolicy,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        collections: CollectionResolver,
        router: Router,
        client: Arc<AvalonClient>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            collections,
            router,
            client,
            retry,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Record (or reset) the submission row for a validated request and
    /// return its registration snapshot.
    pub async fn register(
        &self,
        request: &IngestRequest,
        raw_body: &str,
    ) -> Result<SubmissionRecord, GatewayError> {
        let record = retry(&self.retry, StoreError::is_transient, || {
            self.store.upsert_registration(&request.group_name, raw_body)
        })
        .await
        .map_err(GatewayError::from)?;
        info!(group_name = %request.group_name, "registered submission");
        Ok(record)
    }

    /// Current stored state for a `group_name`, if any.
    pub async fn status(&self, group_name: &str) -> Result<Option<SubmissionRecord>, GatewayError> {
        retry(&self.retry, StoreError::is_transient, || {
            self.store.find(group_name)
        })
        .await
        .map_err(GatewayError::from)
    }

    /// Run the full submission pipeline for a registered request.
    ///
    /// On any failure the stored record is moved to `failed` with the error
    /// message before the error propagates, so the status endpoint and the
    /// caller agree on the outcome.
    pub async fn submit(&self, request: &IngestRequest) -> Result<SubmissionRecord, GatewayError> {
        let group_name = &request.group_name;
        let key_lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(group_name.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = key_lock.lock().await;

        self.set_locked(group_name, true).await;
        let outcome = self.run_pipeline(request).await;
        self.set_locked(group_name, false).await;

        drop(guard);
        drop(key_lock);
        // Evict the entry unless another submit still holds a clone; checking
        // the strong count under the map lock is race-free because any new
        // waiter must clone through the map first.
        {
            let mut locks = self.locks.lock().await;
            if locks
                .get(group_name)
                .is_some_and(|entry| Arc::strong_count(entry) == 1)
            {
                locks.remove(group_name);
            }
        }

        match outcome {
            Ok(record) => Ok(record),
            Err(e) => self.fail(group_name, e).await,
        }
    }

    #[cfg(test)]
    pub(crate) async fn group_lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }

    async fn run_pipeline(
        &self,
        request: &IngestRequest,
    ) -> Result<SubmissionRecord, GatewayError> {
        let group_name = &request.group_name;
        let target = self.router.select_target(request)?;

        let extracted = mods::extract_fields(request)?;
        let masterfiles = files::normalize_files(request, &extracted.file_format)?;

        let unit = request
            .metadata
            .unit
            .as_deref()
            .ok_or_else(|| GatewayError::data("no unit specified for object"))?;
        let collection_id = self.collections.resolve(unit, &target).await?;

        // An object previously deposited at this target is updated in place
        // unless the downstream no longer knows the stored pid, in which
        // case it is recreated with the old pid preserved as lineage.
        let stored_pid = self.submitted_pid_at(group_name, &target).await?;

        let mut update_pid = None;
        let mut prior_pid = None;
        if let Some(pid) = stored_pid {
            match self.probe_media_object(&target, &pid).await? {
                Some(current) => {
                    if current != pid {
                        info!(group_name, old = %pid, new = %current,
                            "downstream identifier changed, refreshing stored pid");
                        self.update_record(
                            group_name,
                            RecordChanges {
                                avalon_pid: Some(current.clone()),
                                avalon_url: Some(display_url(&target, &current)),
                                ..Default::default()
                            },
                        )
                        .await?;
                    }
                    update_pid = Some(current);
                }
                None => {
                    warn!(group_name, pid = %pid,
                        "downstream no longer has the object, recreating with prior identifier");
                    prior_pid = Some(pid);
                }
            }
        }

        let payload = build_payload(extracted.fields, masterfiles, collection_id, prior_pid);
        let response = match &update_pid {
            Some(pid) => {
                self.client
                    .update_media_object(&target, pid, &payload)
                    .await?
            }
            None => self.client.create_media_object(&target, &payload).await?,
        };
        if response.status != 200 {
            return Err(GatewayError::Rejected {
                status: response.status,
                body: response.body,
            });
        }
        let pid = response.id().ok_or_else(|| {
            GatewayError::data(format!(
                "downstream accepted the object but returned no id: {}",
                response.body
            ))
        })?;

        self.update_record(
            group_name,
            RecordChanges {
                status: Some(SubmissionStatus::Deposited),
                error: Some(false),
                message: Some("successfully submitted".to_string()),
                avalon_chosen: Some(target.url.clone()),
                avalon_pid: Some(pid.clone()),
                avalon_url: Some(display_url(&target, &pid)),
                ..Default::default()
            },
        )
        .await?;
        info!(group_name, pid = %pid, target = %target.url, "deposited media object");

        self.find_record(group_name).await?.ok_or_else(|| {
            GatewayError::data(format!("submission '{group_name}' vanished after deposit"))
        })
    }

    /// Whether this request's `group_name` already holds a downstream
    /// identity at the target the request currently routes to.
    pub async fn already_submitted_at_current_target(
        &self,
        request: &IngestRequest,
    ) -> Result<bool, GatewayError> {
        let target = self.router.select_target(request)?;
        Ok(self
            .submitted_pid_at(&request.group_name, &target)
            .await?
            .is_some())
    }

    /// Stored downstream pid for `group_name`, but only when it was deposited
    /// at this target.
    async fn submitted_pid_at(
        &self,
        group_name: &str,
        target: &RoutingTarget,
    ) -> Result<Option<String>, GatewayError> {
        Ok(self
            .find_record(group_name)
            .await?
            .filter(|r| !r.avalon_pid.is_empty() && r.avalon_chosen == target.url)
            .map(|r| r.avalon_pid))
    }

    /// Ask the downstream whether it still has `pid`. `Some(current_id)`
    /// when it does, `None` when the object is gone or unreadable there.
    async fn probe_media_object(
        &self,
        target: &RoutingTarget,
        pid: &str,
    ) -> Result<Option<String>, GatewayError> {
        let response = self.client.get_media_object(target, pid).await?;
        if response.status != 200 || response.reports_errors() {
            return Ok(None);
        }
        Ok(response.id())
    }

    /// Move the record to `failed`, then propagate the error.
    async fn fail(
        &self,
        group_name: &str,
        err: GatewayError,
    ) -> Result<SubmissionRecord, GatewayError> {
        let message = match &err {
            GatewayError::Rejected { status, body } => format!(
                "Failed to submit object to target avalon, target returned result of {status} and {body}"
            ),
            other => other.to_string(),
        };
        error!(group_name, error = %message, "submission failed");
        let written = self
            .update_record(
                group_name,
                RecordChanges {
                    status: Some(SubmissionStatus::Failed),
                    error: Some(true),
                    message: Some(message),
                    ..Default::default()
                },
            )
            .await;
        if let Err(store_err) = written {
            error!(group_name, error = %store_err, "could not record failure state");
        }
        Err(err)
    }

    async fn find_record(
        &self,
        group_name: &str,
    ) -> Result<Option<SubmissionRecord>, GatewayError> {
        retry(&self.retry, StoreError::is_transient, || {
            self.store.find(group_name)
        })
        .await
        .map_err(GatewayError::from)
    }

    async fn update_record(
        &self,
        group_name: &str,
        changes: RecordChanges,
    ) -> Result<(), GatewayError> {
        retry(&self.retry, StoreError::is_transient, || {
            self.store.update(group_name, changes.clone())
        })
        .await
        .map_err(GatewayError::from)
    }

    /// Persist the advisory in-flight marker; failure here is logged and
    /// tolerated since the per-key mutex is what actually serializes.
    async fn set_locked(&self, group_name: &str, locked: bool) {
        let result = self
            .update_record(
                group_name,
                RecordChanges {
                    locked: Some(locked),
                    ..Default::default()
                },
            )
            .await;
        if let Err(e) = result {
            warn!(group_name, locked, error = %e, "could not persist lock marker");
        }
    }
}

fn display_url(target: &RoutingTarget, pid: &str) -> String {
    format!("{}/media_objects/{pid}", target.url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn orchestrator() -> Orchestrator {
        let store = Arc::new(MemoryStore::new());
        let retry = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let client = Arc::new(
            AvalonClient::with_timeout(retry.clone(), Duration::from_secs(1)).unwrap(),
        );
        let collections =
            CollectionResolver::new(store.clone(), client.clone(), HashMap::new(), retry.clone());
        Orchestrator::new(store, collections, Router::new(HashMap::new()), client, retry)
    }

    #[tokio::test]
    async fn submit_releases_its_group_lock_entry() {
        let orch = orchestrator();
        let request =
            IngestRequest::parse(r#"{"group_name": "GR1", "target_avalon": "nowhere"}"#).unwrap();
        orch.register(&request, "{}").await.unwrap();

        // Routing fails fast, but the per-key lock was still taken; the map
        // entry must not outlive the submission.
        assert!(orch.submit(&request).await.is_err());
        assert_eq!(orch.group_lock_count().await, 0);
    }
}
