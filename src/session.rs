//! Read-side session API: current state per user, alert resolution.

use std::sync::Arc;
use uuid::Uuid;

use crate::alert::AlertOrchestrator;
use crate::error::AppError;
use crate::model::{Alert, UserState};
use crate::ports::StateCache;

/// `GetStatus(user_id)` response shape: either the full `UserState` record,
/// or `{state: "UNKNOWN"}` when the cache has nothing for this user.
#[derive(Clone, Debug, serde::Serialize, PartialEq)]
#[serde(untagged)]
pub enum StatusResponse {
    Known(UserState),
    Unknown { state: &'static str },
}

impl StatusResponse {
    fn unknown() -> Self {
        StatusResponse::Unknown { state: "UNKNOWN" }
    }
}

pub struct SessionApi {
    cache: Arc<dyn StateCache>,
    orchestrator: Arc<AlertOrchestrator>,
}

impl SessionApi {
    pub fn new(cache: Arc<dyn StateCache>, orchestrator: Arc<AlertOrchestrator>) -> Self {
        Self { cache, orchestrator }
    }

    /// Current cached state for a user, or `UNKNOWN` if none is cached.
    pub async fn get_status(&self, user_id: Uuid) -> Result<StatusResponse, AppError> {
        match self.cache.get_user_state(user_id).await? {
            Some(state) => Ok(StatusResponse::Known(state)),
            None => Ok(StatusResponse::unknown()),
        }
    }

    /// Marks an alert resolved and notifies contacts.
    pub async fn resolve_alert(&self, alert_id: Uuid) -> Result<Alert, AppError> {
        self.orchestrator.resolve_alert(alert_id).await
    }
}
