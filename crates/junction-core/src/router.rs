//! Router: resolves which downstream repository instance a request goes to.
//!
//! Routing policy is deliberately static today: an explicit `target_avalon`
//! override is looked up in the configured table, anything else gets the
//! `default` entry. An unconfigured override name is a fatal configuration
//! error, rejected immediately and never retried.

use crate::request::IngestRequest;
use crate::store::SubmissionStore;
use junction_common::GatewayError;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Table key for the target used when no override is given.
pub const DEFAULT_TARGET: &str = "default";

/// One configured downstream repository instance.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingTarget {
    /// Base URL of the downstream API.
    pub url: String,
    /// API key sent with every call to this target.
    pub api_token: String,
    /// Managers applied to collections Junction creates on this target.
    #[serde(default)]
    pub default_managers: Vec<String>,
}

/// Static routing table, configuration-derived.
#[derive(Debug, Clone)]
pub struct Router {
    targets: HashMap<String, RoutingTarget>,
}

impl Router {
    pub fn new(targets: HashMap<String, RoutingTarget>) -> Self {
        Self { targets }
    }

    /// Resolve the downstream target for a request.
    pub fn select_target(&self, request: &IngestRequest) -> Result<RoutingTarget, GatewayError> {
        match request.target_avalon.as_deref() {
            Some(name) => self.targets.get(name).cloned().ok_or_else(|| {
                GatewayError::Routing(format!("target avalon '{name}' is not configured"))
            }),
            None => self.targets.get(DEFAULT_TARGET).cloned().ok_or_else(|| {
                GatewayError::Routing("no default target is configured".to_string())
            }),
        }
    }

    /// Whether any persisted submission is currently marked in flight.
    pub async fn submission_in_progress(
        &self,
        store: &Arc<dyn SubmissionStore>,
    ) -> Result<bool, GatewayError> {
        store.any_locked().await.map_err(GatewayError::from)
    }
}
