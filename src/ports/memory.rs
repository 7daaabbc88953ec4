//! In-memory reference implementations of the capability traits, built on
//! `dashmap`-backed concurrent maps. Usable as a development backend and as
//! the double behind every test in this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{CacheError, NotifierError, StoreError};
use crate::model::{Alert, BlackboxTrail, Heartbeat, LastGasp, User, UserState};

use super::{Notifier, StateCache, Store};

#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<Uuid, User>,
    heartbeats: DashMap<Uuid, Vec<Heartbeat>>,
    last_gasps: DashMap<Uuid, Vec<LastGasp>>,
    alerts: DashMap<Uuid, Alert>,
    trails: DashMap<Uuid, Vec<BlackboxTrail>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_user(&self, user: User) {
        self.users.insert(user.id, user);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, user_id: Uuid) -> Result<User, StoreError> {
        self.users.get(&user_id).map(|u| u.clone()).ok_or(StoreError::NotFound)
    }

    async fn insert_heartbeat(&self, heartbeat: Heartbeat) -> Result<(), StoreError> {
        self.heartbeats.entry(heartbeat.user_id).or_default().push(heartbeat);
        Ok(())
    }

    async fn latest_heartbeat(&self, user_id: Uuid) -> Result<Option<Heartbeat>, StoreError> {
        Ok(self
            .heartbeats
            .get(&user_id)
            .and_then(|list| list.iter().max_by_key(|h| h.client_timestamp).cloned()))
    }

    async fn recent_heartbeats(&self, user_id: Uuid, limit: usize) -> Result<Vec<Heartbeat>, StoreError> {
        let Some(list) = self.heartbeats.get(&user_id) else {
            return Ok(Vec::new());
        };
        let mut sorted: Vec<Heartbeat> = list.clone();
        sorted.sort_by_key(|h| std::cmp::Reverse(h.client_timestamp));
        sorted.truncate(limit);
        Ok(sorted)
    }

    async fn insert_last_gasp(&self, last_gasp: LastGasp) -> Result<(), StoreError> {
        self.last_gasps.entry(last_gasp.user_id).or_default().push(last_gasp);
        Ok(())
    }

    async fn active_last_gasp(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<LastGasp>, StoreError> {
        Ok(self.last_gasps.get(&user_id).and_then(|list| {
            list.iter()
                .filter(|lg| lg.is_active(now))
                .max_by_key(|lg| lg.created_at)
                .cloned()
        }))
    }

    async fn insert_alert(&self, alert: Alert) -> Result<(), StoreError> {
        self.alerts.insert(alert.id, alert);
        Ok(())
    }

    async fn get_alert(&self, alert_id: Uuid) -> Result<Alert, StoreError> {
        self.alerts.get(&alert_id).map(|a| a.clone()).ok_or(StoreError::NotFound)
    }

    async fn resolve_alert(&self, alert_id: Uuid, resolved_at: DateTime<Utc>) -> Result<Alert, StoreError> {
        let mut entry = self.alerts.get_mut(&alert_id).ok_or(StoreError::NotFound)?;
        entry.resolved_at = Some(resolved_at);
        Ok(entry.clone())
    }

    async fn mark_alert_sent_to(&self, alert_id: Uuid, sent_to: Vec<String>) -> Result<(), StoreError> {
        let mut entry = self.alerts.get_mut(&alert_id).ok_or(StoreError::NotFound)?;
        entry.sent_to = sent_to;
        Ok(())
    }

    async fn insert_blackbox_trail(&self, trail: BlackboxTrail) -> Result<(), StoreError> {
        self.trails.entry(trail.user_id).or_default().push(trail);
        Ok(())
    }

    async fn list_blackbox_trails(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<BlackboxTrail>, StoreError> {
        Ok(self
            .trails
            .get(&user_id)
            .map(|list| list.iter().filter(|t| t.uploaded_at >= since).cloned().collect())
            .unwrap_or_default())
    }
}

struct RateEntry {
    count: u32,
    window_start: DateTime<Utc>,
}

struct SentMark {
    expiry: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryStateCache {
    states: DashMap<Uuid, UserState>,
    rate_limits: DashMap<Uuid, RateEntry>,
    alerts_sent: DashMap<Uuid, SentMark>,
}

impl MemoryStateCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateCache for MemoryStateCache {
    async fn get_user_state(&self, user_id: Uuid) -> Result<Option<UserState>, CacheError> {
        Ok(self.states.get(&user_id).map(|s| s.clone()))
    }

    async fn put_user_state(&self, state: UserState) -> Result<(), CacheError> {
        self.states.insert(state.user_id, state);
        Ok(())
    }

    async fn check_rate_limit(
        &self,
        user_id: Uuid,
        window: chrono::Duration,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, CacheError> {
        let mut entry = self
            .rate_limits
            .entry(user_id)
            .or_insert_with(|| RateEntry { count: 0, window_start: now });
        if now - entry.window_start >= window {
            entry.count = 1;
            entry.window_start = now;
            return Ok(true);
        }
        if entry.count < limit {
            entry.count += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn is_alert_sent(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<bool, CacheError> {
        Ok(self.alerts_sent.get(&user_id).map(|m| m.expiry > now).unwrap_or(false))
    }

    async fn mark_alert_sent(&self, user_id: Uuid, ttl: chrono::Duration, now: DateTime<Utc>) -> Result<(), CacheError> {
        self.alerts_sent.insert(user_id, SentMark { expiry: now + ttl });
        Ok(())
    }
}

/// In-memory notifier double: records every send attempt so tests can
/// assert on dispatch bursts without a real SMS/WhatsApp/push provider.
#[derive(Default)]
pub struct MemoryNotifier {
    pub sent: Mutex<Vec<(String, String, String)>>, // (channel, phone_or_token, body)
    pub fail_sms_for: Mutex<Vec<String>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send_sms(&self, phone: &str, body: &str) -> Result<(), NotifierError> {
        if self.fail_sms_for.lock().unwrap().iter().any(|p| p == phone) {
            return Err(NotifierError::Sms { phone: phone.to_string(), reason: "simulated failure".into() });
        }
        self.sent.lock().unwrap().push(("sms".into(), phone.into(), body.into()));
        Ok(())
    }

    async fn send_whatsapp(&self, phone: &str, body: &str) -> Result<(), NotifierError> {
        self.sent.lock().unwrap().push(("whatsapp".into(), phone.into(), body.into()));
        Ok(())
    }

    async fn send_push(&self, push_token: &str, body: &str) -> Result<(), NotifierError> {
        self.sent.lock().unwrap().push(("push".into(), push_token.into(), body.into()));
        Ok(())
    }
}
