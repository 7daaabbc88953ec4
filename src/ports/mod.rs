//! Capability traits for the external collaborators this crate treats as
//! interfaces only: relational persistence, volatile per-user state, and
//! outbound dispatch. Passed by constructor injection rather than reached
//! for as ambient globals.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{CacheError, NotifierError, StoreError};
use crate::model::{Alert, BlackboxTrail, Heartbeat, LastGasp, User, UserState};

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, user_id: Uuid) -> Result<User, StoreError>;

    async fn insert_heartbeat(&self, heartbeat: Heartbeat) -> Result<(), StoreError>;
    async fn latest_heartbeat(&self, user_id: Uuid) -> Result<Option<Heartbeat>, StoreError>;
    /// Newest-first, capped at `limit`. Used by the sudden-stop/tower-jump
    /// detectors, which reason over the two most recent heartbeats.
    async fn recent_heartbeats(&self, user_id: Uuid, limit: usize) -> Result<Vec<Heartbeat>, StoreError>;

    async fn insert_last_gasp(&self, last_gasp: LastGasp) -> Result<(), StoreError>;
    /// Newest row with `expiry_ts > now`; expired rows are filtered out, not
    /// swept.
    async fn active_last_gasp(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<LastGasp>, StoreError>;

    async fn insert_alert(&self, alert: Alert) -> Result<(), StoreError>;
    async fn get_alert(&self, alert_id: Uuid) -> Result<Alert, StoreError>;
    async fn resolve_alert(&self, alert_id: Uuid, resolved_at: DateTime<Utc>) -> Result<Alert, StoreError>;
    async fn mark_alert_sent_to(&self, alert_id: Uuid, sent_to: Vec<String>) -> Result<(), StoreError>;

    async fn insert_blackbox_trail(&self, trail: BlackboxTrail) -> Result<(), StoreError>;
    async fn list_blackbox_trails(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<BlackboxTrail>, StoreError>;
}

#[async_trait]
pub trait StateCache: Send + Sync {
    async fn get_user_state(&self, user_id: Uuid) -> Result<Option<UserState>, CacheError>;
    async fn put_user_state(&self, state: UserState) -> Result<(), CacheError>;

    /// Fixed-window rate limiter: `CheckRateLimit(user_id, window, limit)`.
    /// Returns `true` if the call is within the limit (and counts against
    /// it), `false` if the limit was already reached this window.
    async fn check_rate_limit(
        &self,
        user_id: Uuid,
        window: chrono::Duration,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, CacheError>;

    async fn is_alert_sent(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<bool, CacheError>;
    async fn mark_alert_sent(&self, user_id: Uuid, ttl: chrono::Duration, now: DateTime<Utc>) -> Result<(), CacheError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_sms(&self, phone: &str, body: &str) -> Result<(), NotifierError>;
    async fn send_whatsapp(&self, phone: &str, body: &str) -> Result<(), NotifierError>;
    async fn send_push(&self, push_token: &str, body: &str) -> Result<(), NotifierError>;
}
