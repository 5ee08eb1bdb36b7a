//! Collection Resolver: maps a holding unit to a downstream collection pid.
//!
//! Resolution is cache-first. A cached pid is still revalidated against the
//! downstream instance on every use, because collections can be deleted or
//! recreated out-of-band; a stale cache entry self-heals when the downstream
//! reports a different current id. On a miss the collection is created with
//! the unit's configured display name and the standing access groups.

use junction_common::{retry::retry, GatewayError, RetryPolicy};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::avalon::AvalonClient;
use crate::router::RoutingTarget;
use crate::store::{CollectionRecord, CollectionStore, StoreError};

/// Prefix of the read group granted on every collection we create; the unit
/// abbreviation is appended.
pub const READ_GROUP_PREFIX: &str = "BL-LDLP-MDPI-MANAGERS-";

#[derive(Debug, Serialize)]
struct CollectionPayload<'a> {
    admin_collection: AdminCollection<'a>,
}

#[derive(Debug, Serialize)]
struct AdminCollection<'a> {
    name: &'a str,
    description: String,
    unit: &'a str,
    managers: &'a [String],
    default_read_groups: Vec<String>,
}

/// Resolves and provisions downstream collections, one per holding unit per
/// target instance.
pub struct CollectionResolver {
    store: Arc<dyn CollectionStore>,
    client: Arc<AvalonClient>,
    /// Unit abbreviation to display name, configuration-derived.
    units: HashMap<String, String>,
    retry: RetryPolicy,
}

impl CollectionResolver {
    pub fn new(
        store: Arc<dyn CollectionStore>,
        client: Arc<AvalonClient>,
        units: HashMap<String, String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            client,
            units,
            retry,
        }
    }

    /// Return the downstream collection pid for `unit` on `target`, creating
    /// the collection if needed. Any failure on this path fails the whole
    /// submission.
    pub async fn resolve(
        &self,
        unit: &str,
        target: &RoutingTarget,
    ) -> Result<String, GatewayError> {
        let cached = retry(&self.retry, StoreError::is_transient, || {
            self.store.find(unit, &target.url)
        })
        .await
        .map_err(GatewayError::from)?;

        if let Some(record) = cached {
            if let Some(pid) = self.revalidate(&record, target).await? {
                return Ok(pid);
            }
            warn!(
                unit,
                target = %target.url,
                pid = %record.pid,
                "cached collection no longer valid downstream, recreating"
            );
        }

        self.create(unit, target).await
    }

    /// Check a cached pid against the downstream instance. Returns the
    /// current pid when the collection still exists (healing the cache if
    /// the id moved), `None` when the cache entry should be discarded.
    async fn revalidate(
        &self,
        record: &CollectionRecord,
        target: &RoutingTarget,
    ) -> Result<Option<String>, GatewayError> {
        let response = match self.client.get_collection(target, &record.pid).await {
            Ok(response) => response,
            Err(e) => {
                warn!(pid = %record.pid, error = %e, "collection lookup failed downstream");
                return Ok(None);
            }
        };
        if response.status != 200 || response.reports_errors() {
            return Ok(None);
        }
        let Some(current) = response.id() else {
            return Ok(None);
        };
        if current != record.pid {
            info!(
                name = %record.name,
                old = %record.pid,
                new = %current,
                "collection pid changed downstream, updating cache"
            );
            retry(&self.retry, StoreError::is_transient, || {
                self.store.update_pid(&record.name, &target.url, &current)
            })
            .await
            .map_err(GatewayError::from)?;
        }
        Ok(Some(current))
    }

    async fn create(&self, unit: &str, target: &RoutingTarget) -> Result<String, GatewayError> {
        let fullname = self
            .units
            .get(unit)
            .cloned()
            .unwrap_or_else(|| unit.to_string());
        let payload = CollectionPayload {
            admin_collection: AdminCollection {
                name: &fullname,
                description: format!("Collection of {fullname} digitized media"),
                unit: &fullname,
                managers: &target.default_managers,
                default_read_groups: vec![format!("{READ_GROUP_PREFIX}{unit}")],
            },
        };

        let response = self.client.create_collection(target, &payload).await?;
        if !(200..300).contains(&response.status) || response.reports_errors() {
            return Err(GatewayError::data(format!(
                "could not create collection for unit '{unit}' on {}: status {} body {}",
                target.url, response.status, response.body
            )));
        }
        let pid = response.id().ok_or_else(|| {
            GatewayError::data(format!(
                "collection creation response from {} carried no id: {}",
                target.url, response.body
            ))
        })?;
        info!(unit, target = %target.url, pid = %pid, "created downstream collection");

        let record = CollectionRecord {
            name: unit.to_string(),
            pid: pid.clone(),
            avalon_url: target.url.clone(),
            fullname,
        };
        retry(&self.retry, StoreError::is_transient, || {
            self.store.insert(record.clone())
        })
        .await
        .map_err(GatewayError::from)?;

        Ok(pid)
    }
}
