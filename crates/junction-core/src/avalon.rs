//! HTTP client for the downstream media-repository API.
//!
//! Owns the per-call headers, the long request timeout downstream ingestion
//! needs, and the retry classification: transport timeouts and HTTP 408/504
//! are retried through the shared policy, everything else is returned to the
//! caller as-is (non-200 statuses are data for the orchestrator to judge,
//! not transport failures).

use junction_common::{retry::retry, GatewayError, RetryPolicy};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::router::RoutingTarget;

/// Header carrying the target-specific API key.
pub const API_KEY_HEADER: &str = "Avalon-Api-Key";

/// Downstream ingestion can be very slow; a call either completes, times
/// out (triggering retry), or exhausts retries.
pub const DOWNSTREAM_TIMEOUT: Duration = Duration::from_secs(45 * 60);

/// A completed downstream exchange. Non-200 statuses are kept, body
/// verbatim, for the caller to classify.
#[derive(Debug, Clone)]
pub struct AvalonResponse {
    pub status: u16,
    pub body: String,
}

impl AvalonResponse {
    fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// The `id` field of the response body, if any.
    pub fn id(&self) -> Option<String> {
        match self.json()?.get("id")? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// True when the body carries a non-empty `errors` field.
    pub fn reports_errors(&self) -> bool {
        self.json()
            .and_then(|v| v.get("errors").cloned())
            .is_some_and(|errors| match errors {
                serde_json::Value::Null => false,
                serde_json::Value::Array(a) => !a.is_empty(),
                serde_json::Value::String(s) => !s.is_empty(),
                _ => true,
            })
    }
}

/// Client for one or more downstream repository instances; the target (URL
/// plus credential) is supplied per call by the router.
#[derive(Debug, Clone)]
pub struct AvalonClient {
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl AvalonClient {
    pub fn new(retry: RetryPolicy) -> Result<Self, GatewayError> {
        Self::with_timeout(retry, DOWNSTREAM_TIMEOUT)
    }

    pub fn with_timeout(retry: RetryPolicy, timeout: Duration) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::data(format!("failed to build downstream client: {e}")))?;
        Ok(Self { http, retry })
    }

    pub async fn get_media_object(
        &self,
        target: &RoutingTarget,
        pid: &str,
    ) -> Result<AvalonResponse, GatewayError> {
        let url = format!("{}/media_objects/{pid}.json", target.url);
        self.execute(|| self.request(Method::GET, &url, target))
            .await
    }

    pub async fn create_media_object<T: Serialize>(
        &self,
        target: &RoutingTarget,
        payload: &T,
    ) -> Result<AvalonResponse, GatewayError> {
        let url = format!("{}/media_objects.json", target.url);
        self.execute(|| self.request(Method::POST, &url, target).json(payload))
            .await
    }

    pub async fn update_media_object<T: Serialize>(
        &self,
        target: &RoutingTarget,
        pid: &str,
        payload: &T,
    ) -> Result<AvalonResponse, GatewayError> {
        let url = format!("{}/media_objects/{pid}.json", target.url);
        self.execute(|| self.request(Method::PUT, &url, target).json(payload))
            .await
    }

    pub async fn create_collection<T: Serialize>(
        &self,
        target: &RoutingTarget,
        payload: &T,
    ) -> Result<AvalonResponse, GatewayError> {
        let url = format!("{}/admin/collections", target.url);
        self.execute(|| self.request(Method::POST, &url, target).json(payload))
            .await
    }

    pub async fn get_collection(
        &self,
        target: &RoutingTarget,
        pid: &str,
    ) -> Result<AvalonResponse, GatewayError> {
        let url = format!("{}/admin/collections/{pid}.json", target.url);
        self.execute(|| self.request(Method::GET, &url, target))
            .await
    }

    fn request(&self, method: Method, url: &str, target: &RoutingTarget) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header(API_KEY_HEADER, &target.api_token)
    }

    /// Send a request, retrying timeout conditions per the policy.
    async fn execute(
        &self,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<AvalonResponse, GatewayError> {
        retry(&self.retry, GatewayError::is_transient, || {
            let request = build();
            async move {
                let response = request.send().await.map_err(|e| {
                    if e.is_timeout() {
                        GatewayError::transient(format!("downstream request timed out: {e}"))
                    } else {
                        GatewayError::data(format!("downstream request failed: {e}"))
                    }
                })?;

                let status = response.status();
                let body = response.text().await.map_err(|e| {
                    GatewayError::data(format!("failed to read downstream response: {e}"))
                })?;
                debug!(status = status.as_u16(), "downstream call completed");

                if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
                    return Err(GatewayError::transient(format!(
                        "downstream reported timeout status {status}: {body}"
                    )));
                }
                Ok(AvalonResponse {
                    status: status.as_u16(),
                    body,
                })
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> AvalonResponse {
        AvalonResponse {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn extracts_string_and_numeric_ids() {
        assert_eq!(
            response(200, r#"{"id": "avalon:123"}"#).id().as_deref(),
            Some("avalon:123")
        );
        assert_eq!(response(200, r#"{"id": 42}"#).id().as_deref(), Some("42"));
        assert_eq!(response(200, "not json").id(), None);
        assert_eq!(response(200, "{}").id(), None);
    }

    #[test]
    fn error_bodies_are_recognized() {
        assert!(response(200, r#"{"errors": ["not found"]}"#).reports_errors());
        assert!(response(200, r#"{"errors": "boom"}"#).reports_errors());
        assert!(!response(200, r#"{"errors": []}"#).reports_errors());
        assert!(!response(200, r#"{"id": "x"}"#).reports_errors());
        assert!(!response(200, "garbage").reports_errors());
    }
}
