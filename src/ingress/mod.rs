//! Accept HTTP and SMS heartbeats, authenticate, rate-limit, persist, then
//! hand off to the Evaluator. Both transports converge on a single internal
//! [`RawHeartbeat`] after authentication — only the verification step
//! differs.

pub mod blackbox;
pub mod http;
pub mod sms;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::alert::AlertOrchestrator;
use crate::clock::Clock;
use crate::config::Thresholds;
use crate::error::AppError;
use crate::evaluator::Evaluator;
use crate::last_gasp::LastGaspTracker;
use crate::model::{Heartbeat, HeartbeatSource, RawHeartbeat};
use crate::ports::{StateCache, Store};
use crate::signer::Signer;

/// Fixed-window rate limit applied to HTTP heartbeats: at most one per user
/// every 30 seconds.
pub const RATE_LIMIT_WINDOW: chrono::Duration = chrono::Duration::seconds(30);
pub const RATE_LIMIT_MAX: u32 = 1;

pub struct Ingress {
    store: Arc<dyn Store>,
    cache: Arc<dyn StateCache>,
    signer: Arc<Signer>,
    last_gasp: Arc<LastGaspTracker>,
    evaluator: Arc<Evaluator>,
    orchestrator: Arc<AlertOrchestrator>,
    clock: Arc<dyn Clock>,
    thresholds: Thresholds,
}

impl Ingress {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn StateCache>,
        signer: Arc<Signer>,
        last_gasp: Arc<LastGaspTracker>,
        evaluator: Arc<Evaluator>,
        orchestrator: Arc<AlertOrchestrator>,
        clock: Arc<dyn Clock>,
        thresholds: Thresholds,
    ) -> Self {
        Self { store, cache, signer, last_gasp, evaluator, orchestrator, clock, thresholds }
    }

    /// Shared tail of both transports: persist the heartbeat, record a
    /// LastGasp marker if flagged, and spawn a detached evaluator run. The
    /// caller's response does not wait on this task.
    async fn persist_and_handoff(&self, raw: RawHeartbeat, now: DateTime<Utc>) -> Result<Uuid, AppError> {
        let heartbeat_id = Uuid::new_v4();
        let heartbeat = Heartbeat {
            id: heartbeat_id,
            user_id: raw.user_id,
            source: raw.source,
            lat: raw.lat,
            lng: raw.lng,
            accuracy_m: raw.accuracy_m,
            cell_info: raw.cell_info.clone(),
            battery_pct: raw.battery_pct,
            speed_kmh: raw.speed_kmh,
            last_gasp: raw.last_gasp,
            client_timestamp: raw.client_timestamp,
            signature: raw.signature.clone(),
            server_received_at: now,
        };
        self.store.insert_heartbeat(heartbeat).await?;

        if raw.last_gasp {
            let timeout = chrono::Duration::from_std(self.thresholds.last_gasp_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600));
            self.last_gasp
                .record(raw.user_id, raw.lat, raw.lng, raw.accuracy_m, raw.cell_info, now, timeout)
                .await?;
        }

        self.spawn_evaluation(raw.user_id);
        Ok(heartbeat_id)
    }

    /// Independent task carrying a detached context — it survives handler
    /// return and honors only process shutdown. Failures are logged, never
    /// surfaced, since the request has already responded.
    fn spawn_evaluation(&self, user_id: Uuid) {
        let evaluator = self.evaluator.clone();
        tokio::spawn(async move {
            if let Err(e) = evaluator.evaluate(user_id).await {
                tracing::error!(%user_id, error = %e, "evaluator_run_failed");
            }
        });
    }

    pub fn orchestrator(&self) -> &Arc<AlertOrchestrator> {
        &self.orchestrator
    }
}

pub(crate) fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("invalid {field}: not a UUID")))
}
