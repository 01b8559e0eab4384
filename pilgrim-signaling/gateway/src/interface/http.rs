//! HTTP 路由：`/ws`、`/healthz`、`/metrics`，以及通话历史查询

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pilgrim_core::metrics::render_metrics;
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::error;

use super::ws::ws_handler;
use crate::application::{CallHistoryService, SessionCoordinator};
use crate::domain::model::CallRecord;
use crate::domain::value_object::UserId;
use crate::infrastructure::RoomRegistry;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: SessionCoordinator,
    pub registry: Arc<RoomRegistry>,
    pub history: CallHistoryService,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/calls/{user_id}/history", get(call_history))
        .route("/calls/{user_id}/missed/unread", get(unread_missed))
        .route("/calls/{user_id}/missed/read", post(mark_missed_read))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let connections = state.registry.connection_count().await;
    (StatusCode::OK, format!("ok connections={connections}"))
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render_metrics(),
    )
}

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn call_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let Some(user_id) = UserId::parse(&user_id) else {
        return bad_user_id();
    };
    match state.history.history_for(&user_id, query.limit).await {
        Ok(records) => {
            let calls: Vec<Value> = records.iter().map(record_view).collect();
            Json(json!({ "calls": calls })).into_response()
        }
        Err(err) => internal_error("failed to load call history", err),
    }
}

async fn unread_missed(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    let Some(user_id) = UserId::parse(&user_id) else {
        return bad_user_id();
    };
    match state.history.unread_missed_count(&user_id).await {
        Ok(count) => Json(json!({ "count": count })).into_response(),
        Err(err) => internal_error("failed to count unread missed calls", err),
    }
}

async fn mark_missed_read(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    let Some(user_id) = UserId::parse(&user_id) else {
        return bad_user_id();
    };
    match state.history.mark_missed_read(&user_id).await {
        Ok(changed) => Json(json!({ "updated": changed })).into_response(),
        Err(err) => internal_error("failed to mark missed calls read", err),
    }
}

fn record_view(record: &CallRecord) -> Value {
    json!({
        "id": record.id.as_str(),
        "caller_id": record.caller_id.as_str(),
        "receiver_id": record.receiver_id.as_str(),
        "call_type": record.call_type.as_str(),
        "status": record.status.as_str(),
        "started_at": record.started_at.map(|t| t.to_rfc3339()),
        "ended_at": record.ended_at.map(|t| t.to_rfc3339()),
        "duration": record.duration,
        "is_read": record.is_read,
        "created_at": record.created_at.to_rfc3339(),
    })
}

fn bad_user_id() -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid user id" }))).into_response()
}

fn internal_error(context: &str, err: pilgrim_core::error::PilgrimError) -> Response {
    error!(error = %err, "{context}");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": context }))).into_response()
}
