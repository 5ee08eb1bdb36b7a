//! HTTP routes.
//!
//! `POST /media_objects/create` authenticates, validates, registers, and
//! returns the registration snapshot immediately; the submission itself runs
//! in a background task and its outcome is observable through
//! `GET /media_objects/status/:group_name`.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use junction_common::GatewayError;
use junction_core::orchestrator::Orchestrator;
use junction_core::request::IngestRequest;
use junction_core::store::SubmissionRecord;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::AppError;

/// Request header carrying the caller's token.
pub const API_TOKEN_HEADER: &str = "Api-Token";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub api_tokens: HashSet<String>,
}

/// Create the application router with all routes and middleware
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/status", get(service_status))
        .route("/media_objects/create", post(create_media_object))
        .route("/media_objects/status/:group_name", get(media_object_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "name": "junction",
        "description": "media metadata routing gateway",
    }))
}

async fn service_status() -> &'static str {
    "Functional"
}

async fn create_media_object(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<SubmissionRecord>, AppError> {
    authorize(&state, &headers)?;

    let request = IngestRequest::parse(&body)?;
    let record = state.orchestrator.register(&request, &body).await?;

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.submit(&request).await {
            error!(group_name = %request.group_name, error = %e, "submission failed");
        }
    });

    Ok(Json(record))
}

async fn media_object_status(
    State(state): State<AppState>,
    Path(group_name): Path<String>,
) -> Result<Json<SubmissionRecord>, AppError> {
    match state.orchestrator.status(&group_name).await? {
        Some(record) => Ok(Json(record)),
        None => Err(AppError::from(GatewayError::NotFound(format!(
            "no media object found for group name '{group_name}'"
        )))),
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let token = headers
        .get(API_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    if !state.api_tokens.contains(token) {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}
