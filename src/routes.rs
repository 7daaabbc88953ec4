//! HTTP surface wiring: the full route table, layered with the
//! `TraceLayer` + `CompressionLayer` middleware stack.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::AppError;
use crate::ingress::{blackbox, http as http_ingress, parse_uuid, sms, Ingress};
use crate::session::SessionApi;

#[derive(Clone)]
pub struct AppState {
    pub ingress: Arc<Ingress>,
    pub session: Arc<SessionApi>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    time: DateTime<Utc>,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", service: "safetrace", time: state.clock.now() })
}

async fn user_status(State(state): State<AppState>, Path(raw_id): Path<String>) -> impl IntoResponse {
    let user_id = match parse_uuid(&raw_id, "user_id") {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };
    match state.session.get_status(user_id).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn resolve_alert(State(state): State<AppState>, Path(raw_id): Path<String>) -> impl IntoResponse {
    let alert_id = match parse_uuid(&raw_id, "alert_id") {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };
    match state.session.resolve_alert(alert_id).await {
        Ok(alert) => Json(alert).into_response(),
        Err(e) => e.into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/heartbeat", post(http_ingress::heartbeat))
        .route("/v1/sms/webhook", post(sms::sms_webhook))
        .route("/v1/user/:id/status", get(user_status))
        .route("/v1/alert/:id/resolve", post(resolve_alert))
        .route("/v1/blackbox/upload", post(blackbox::upload))
        .route("/v1/blackbox/trails/:user_id", get(blackbox::list_trails))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CompressionLayer::new()))
}
