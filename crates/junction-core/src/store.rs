//! Persistence seams for submission state and the collection cache.
//!
//! The store is the only shared mutable resource in the pipeline; all access
//! is whole-row create/find/update/destroy keyed by `group_name` (or by
//! `(name, url)` for collections). The traits are constructor-injected so
//! the orchestrator and resolver can run against [`MemoryStore`] in tests
//! and against SQLite in the server.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use junction_common::GatewayError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Store operation errors. `Unavailable` marks transient connectivity
/// trouble, which callers retry through the shared policy.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => GatewayError::Transient(msg),
            StoreError::Query(msg) => GatewayError::Data(msg),
            StoreError::NotFound(msg) => GatewayError::NotFound(msg),
        }
    }
}

/// Submission lifecycle: `received → deposited` or `received → failed`.
/// `failed` is terminal, but a fresh registration resets it to `received`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Received,
    Deposited,
    Failed,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Received => "received",
            SubmissionStatus::Deposited => "deposited",
            SubmissionStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(SubmissionStatus::Received),
            "deposited" => Ok(SubmissionStatus::Deposited),
            "failed" => Ok(SubmissionStatus::Failed),
            other => Err(format!("unknown submission status '{other}'")),
        }
    }
}

/// Persistent processing state for one `group_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub group_name: String,
    pub status: SubmissionStatus,
    pub error: bool,
    pub message: String,
    pub created: String,
    pub last_modified: String,
    /// Resolved target URL once routing has happened.
    pub avalon_chosen: String,
    /// Downstream object identifier once deposited.
    pub avalon_pid: String,
    /// Computed display URL once deposited.
    pub avalon_url: String,
    /// Advisory in-flight marker.
    pub locked: bool,
    /// Verbatim last-submitted request body, used to recover prior
    /// identifiers across migrations.
    pub api_hash: String,
}

/// Partial update applied to a [`SubmissionRecord`]; unset fields keep their
/// stored value.
#[derive(Debug, Clone, Default)]
pub struct RecordChanges {
    pub status: Option<SubmissionStatus>,
    pub error: Option<bool>,
    pub message: Option<String>,
    pub avalon_chosen: Option<String>,
    pub avalon_pid: Option<String>,
    pub avalon_url: Option<String>,
    pub locked: Option<bool>,
}

impl SubmissionRecord {
    /// Apply a partial update, refreshing `last_modified`.
    pub fn apply(&mut self, changes: RecordChanges) {
        if let Some(status) = changes.status {
            self.status = status;
        }
        if let Some(error) = changes.error {
            self.error = error;
        }
        if let Some(message) = changes.message {
            self.message = message;
        }
        if let Some(chosen) = changes.avalon_chosen {
            self.avalon_chosen = chosen;
        }
        if let Some(pid) = changes.avalon_pid {
            self.avalon_pid = pid;
        }
        if let Some(url) = changes.avalon_url {
            self.avalon_url = url;
        }
        if let Some(locked) = changes.locked {
            self.locked = locked;
        }
        self.last_modified = now_utc();
    }
}

/// Cached downstream collection, composite-keyed by `(name, avalon_url)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub name: String,
    pub pid: String,
    pub avalon_url: String,
    pub fullname: String,
}

/// Current UTC time in the string form the store keeps.
pub fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Create or reset the record for `group_name` to status `received`.
    /// Idempotent: re-registering updates the existing row in place.
    async fn upsert_registration(
        &self,
        group_name: &str,
        api_hash: &str,
    ) -> Result<SubmissionRecord, StoreError>;

    async fn find(&self, group_name: &str) -> Result<Option<SubmissionRecord>, StoreError>;

    async fn update(&self, group_name: &str, changes: RecordChanges) -> Result<(), StoreError>;

    async fn delete(&self, group_name: &str) -> Result<(), StoreError>;

    async fn any_locked(&self) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn find(&self, name: &str, url: &str)
        -> Result<Option<CollectionRecord>, StoreError>;

    async fn insert(&self, record: CollectionRecord) -> Result<(), StoreError>;

    async fn update_pid(&self, name: &str, url: &str, pid: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// In-process store used by tests and substitutable anywhere the traits are.
#[derive(Debug, Default)]
pub struct MemoryStore {
    submissions: Mutex<HashMap<String, SubmissionRecord>>,
    collections: Mutex<HashMap<(String, String), CollectionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn upsert_registration(
        &self,
        group_name: &str,
        api_hash: &str,
    ) -> Result<SubmissionRecord, StoreError> {
        let mut submissions = self
            .submissions
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let now = now_utc();
        let record = submissions
            .entry(group_name.to_string())
            .and_modify(|existing| {
                existing.status = SubmissionStatus::Received;
                existing.error = false;
                existing.message = "object received".to_string();
                existing.last_modified = now.clone();
                existing.api_hash = api_hash.to_string();
            })
            .or_insert_with(|| SubmissionRecord {
                group_name: group_name.to_string(),
                status: SubmissionStatus::Received,
                error: false,
                message: "object received".to_string(),
                created: now.clone(),
                last_modified: now.clone(),
                avalon_chosen: String::new(),
                avalon_pid: String::new(),
                avalon_url: String::new(),
                locked: false,
                api_hash: api_hash.to_string(),
            });
        Ok(record.clone())
    }

    async fn find(&self, group_name: &str) -> Result<Option<SubmissionRecord>, StoreError> {
        let submissions = self
            .submissions
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(submissions.get(group_name).cloned())
    }

    async fn update(&self, group_name: &str, changes: RecordChanges) -> Result<(), StoreError> {
        let mut submissions = self
            .submissions
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let record = submissions
            .get_mut(group_name)
            .ok_or_else(|| StoreError::NotFound(format!("submission '{group_name}'")))?;
        record.apply(changes);
        Ok(())
    }

    async fn delete(&self, group_name: &str) -> Result<(), StoreError> {
        let mut submissions = self
            .submissions
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))?;
        submissions.remove(group_name);
        Ok(())
    }

    async fn any_locked(&self) -> Result<bool, StoreError> {
        let submissions = self
            .submissions
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(submissions.values().any(|r| r.locked))
    }
}

#[async_trait]
impl CollectionStore for MemoryStore {
    async fn find(
        &self,
        name: &str,
        url: &str,
    ) -> Result<Option<CollectionRecord>, StoreError> {
        let collections = self
            .collections
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(collections.get(&(name.to_string(), url.to_string())).cloned())
    }

    async fn insert(&self, record: CollectionRecord) -> Result<(), StoreError> {
        let mut collections = self
            .collections
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))?;
        collections.insert((record.name.clone(), record.avalon_url.clone()), record);
        Ok(())
    }

    async fn update_pid(&self, name: &str, url: &str, pid: &str) -> Result<(), StoreError> {
        let mut collections = self
            .collections
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let record = collections
            .get_mut(&(name.to_string(), url.to_string()))
            .ok_or_else(|| StoreError::NotFound(format!("collection '{name}'")))?;
        record.pid = pid.to_string();
        Ok(())
    }
}
