//! Structured JSON heartbeat ingest: `POST /v1/heartbeat`.

use axum::{extract::State, http::StatusCode, Json};
use chrono::DateTime;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::model::{CellInfo, HeartbeatSource, RawHeartbeat};
use crate::routes::AppState;

use super::{Ingress, RATE_LIMIT_MAX, RATE_LIMIT_WINDOW};

/// Mirrors the canonical structured-signing payload: the same fixed key set
/// the Signer hashes over, plus the base64 signature.
#[derive(Clone, Debug, Deserialize)]
pub struct HttpHeartbeatRequest {
    pub user_id: Uuid,
    /// Unix seconds.
    pub timestamp: i64,
    pub lat: f64,
    pub lng: f64,
    pub accuracy_m: f64,
    pub cell_info: CellInfo,
    #[serde(default)]
    pub battery_pct: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub last_gasp: bool,
    pub signature: String,
}

impl Ingress {
    /// Rate-limit, resolve, verify, persist, and hand off to the evaluator
    /// (decode/parse-uuid are the Json extractor's job).
    pub async fn ingest_http(&self, req: HttpHeartbeatRequest) -> Result<Uuid, AppError> {
        let now = self.clock.now();

        // Step 3 — rate limit: at most one heartbeat every 30s per user.
        if !self.cache.check_rate_limit(req.user_id, RATE_LIMIT_WINDOW, RATE_LIMIT_MAX, now).await? {
            return Err(AppError::RateLimited);
        }

        // Step 4 — resolve user; absence surfaces NotFound via the From impl.
        self.store.get_user(req.user_id).await?;

        // Step 5 — verify structured signature.
        let timestamp = DateTime::from_timestamp(req.timestamp, 0)
            .ok_or_else(|| AppError::BadRequest("invalid timestamp".into()))?;
        self.signer.verify_structured(
            req.user_id,
            timestamp,
            req.lat,
            req.lng,
            req.accuracy_m,
            &req.cell_info,
            req.battery_pct,
            req.speed,
            req.last_gasp,
            &req.signature,
        )?;

        let raw = RawHeartbeat {
            user_id: req.user_id,
            source: HeartbeatSource::Http,
            lat: req.lat,
            lng: req.lng,
            accuracy_m: req.accuracy_m,
            cell_info: req.cell_info,
            battery_pct: req.battery_pct,
            speed_kmh: req.speed,
            last_gasp: req.last_gasp,
            client_timestamp: timestamp,
            signature: req.signature,
        };

        // Steps 6-8 are the shared tail both transports converge on.
        self.persist_and_handoff(raw, now).await
    }
}

/// `POST /v1/heartbeat`. The response does not wait on evaluation.
#[tracing::instrument(skip_all, fields(user_id = %req.user_id))]
pub async fn heartbeat(State(state): State<AppState>, Json(req): Json<HttpHeartbeatRequest>) -> Result<StatusCode, AppError> {
    state.ingress.ingest_http(req).await?;
    Ok(StatusCode::OK)
}
