//! Offline trail ("blackbox") summary upload and listing. Bulk sensor data
//! is stored externally (object storage, out of scope here); the core only
//! persists and serves the summary row.

use axum::{extract::{Path, State}, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::model::BlackboxTrail;
use crate::routes::AppState;

use super::{parse_uuid, Ingress};

#[derive(Deserialize)]
pub struct BlackboxUploadRequest {
    pub user_id: Uuid,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub data_point_count: u64,
    pub file_url: String,
}

#[derive(Serialize)]
pub struct BlackboxUploadResponse {
    pub id: Uuid,
    pub uploaded_at: DateTime<Utc>,
}

impl Ingress {
    pub async fn upload_blackbox_trail(&self, req: BlackboxUploadRequest) -> Result<BlackboxUploadResponse, AppError> {
        self.store.get_user(req.user_id).await?;

        let now = self.clock.now();
        let trail = BlackboxTrail {
            id: Uuid::new_v4(),
            user_id: req.user_id,
            start_ts: req.start_ts,
            end_ts: req.end_ts,
            data_point_count: req.data_point_count,
            file_url: req.file_url,
            uploaded_at: now,
        };
        self.store.insert_blackbox_trail(trail.clone()).await?;
        Ok(BlackboxUploadResponse { id: trail.id, uploaded_at: trail.uploaded_at })
    }

    /// Trails older than `BlackboxRetention` are omitted from listings but
    /// never deleted — the core owns no deletion policy.
    pub async fn list_blackbox_trails(&self, user_id: Uuid) -> Result<Vec<BlackboxTrail>, AppError> {
        let now = self.clock.now();
        let retention = chrono::Duration::from_std(self.thresholds.blackbox_retention)
            .unwrap_or_else(|_| chrono::Duration::hours(12));
        let since = now - retention;
        Ok(self.store.list_blackbox_trails(user_id, since).await?)
    }
}

/// `POST /v1/blackbox/upload`.
pub async fn upload(
    State(state): State<AppState>,
    Json(req): Json<BlackboxUploadRequest>,
) -> Result<(StatusCode, Json<BlackboxUploadResponse>), AppError> {
    let resp = state.ingress.upload_blackbox_trail(req).await?;
    Ok((StatusCode::OK, Json(resp)))
}

/// `GET /v1/blackbox/trails/:user_id`.
pub async fn list_trails(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<BlackboxTrail>>, AppError> {
    let user_id = parse_uuid(&user_id, "user_id")?;
    let trails = state.ingress.list_blackbox_trails(user_id).await?;
    Ok(Json(trails))
}
