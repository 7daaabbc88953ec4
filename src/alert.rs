//! Deduplicate, persist, and fan out alerts to trusted contacts; acknowledge
//! resolutions.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::AppError;
use crate::model::{Alert, AlertState, User};
use crate::ports::{Notifier, StateCache, Store};

/// The 5-minute window during which repeat AT_RISK/ALERT alerts for one user
/// are suppressed.
pub const DEDUP_WINDOW: chrono::Duration = chrono::Duration::minutes(5);

pub struct AlertOrchestrator {
    store: Arc<dyn Store>,
    cache: Arc<dyn StateCache>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    map_token: Option<String>,
}

impl AlertOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn StateCache>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        map_token: Option<String>,
    ) -> Self {
        Self { store, cache, notifier, clock, map_token }
    }

    /// Entry point from Evaluator Step G. `state` is one of
    /// {CAUTION, AT_RISK, ALERT}.
    pub async fn handle_transition(
        &self,
        user_id: Uuid,
        state: AlertState,
        score: u8,
        reason: &str,
    ) -> Result<(), AppError> {
        match state {
            AlertState::Caution => {
                self.send_silent_prompt(user_id).await;
                Ok(())
            }
            AlertState::AtRisk | AlertState::Alert => self.dispatch_alert(user_id, state, score, reason).await,
        }
    }

    /// CAUTION policy: a silent "are you safe?" push. No-op (not an error)
    /// when the user has no push token on file.
    async fn send_silent_prompt(&self, user_id: Uuid) {
        let Ok(user) = self.store.get_user(user_id).await else {
            tracing::warn!(%user_id, "silent_prompt_user_lookup_failed");
            return;
        };
        let Some(token) = user.push_token.as_deref() else {
            tracing::debug!(%user_id, "silent_prompt_skipped_no_push_token");
            return;
        };
        if let Err(e) = self.notifier.send_push(token, "Are you safe? Tap to confirm.").await {
            tracing::warn!(%user_id, error=%e, "silent_prompt_failed");
        }
    }

    async fn dispatch_alert(&self, user_id: Uuid, state: AlertState, score: u8, reason: &str) -> Result<(), AppError> {
        let now = self.clock.now();
        if self.cache.is_alert_sent(user_id, now).await? {
            tracing::info!(%user_id, "alert_dedup_drop");
            return Ok(());
        }

        let user = self.store.get_user(user_id).await?;
        let latest = self.store.latest_heartbeat(user_id).await?;

        let alert_id = Uuid::new_v4();
        let alert = Alert {
            id: alert_id,
            user_id,
            state,
            score,
            reason: reason.to_string(),
            sent_to: Vec::new(),
            created_at: now,
            resolved_at: None,
        };
        self.store.insert_alert(alert).await?;

        let body = self.build_message(&user, score, reason, latest.as_ref().map(|h| (h.lat, h.lng, h.accuracy_m)), now);

        let mut sent_to = Vec::new();
        let mut sms_failures = Vec::new();
        for contact in &user.trusted_contacts {
            match self.notifier.send_sms(&contact.phone, &body).await {
                Ok(()) => sent_to.push(contact.phone.clone()),
                Err(e) => sms_failures.push(e),
            }
            // WhatsApp is best-effort: failures are logged, never fatal, and
            // never block SMS delivery to the remaining contacts.
            if let Err(e) = self.notifier.send_whatsapp(&contact.phone, &body).await {
                tracing::warn!(%user_id, contact=%contact.phone, error=%e, "whatsapp_best_effort_failed");
            }
        }

        self.store.mark_alert_sent_to(alert_id, sent_to).await?;

        // Mark sent AFTER dispatch completes: a race can produce up to two
        // concurrent dispatch bursts within the window, which is an accepted
        // trade-off in favor of false positives over missed alerts.
        self.cache.mark_alert_sent(user_id, DEDUP_WINDOW, now).await?;

        if !sms_failures.is_empty() {
            let joined = sms_failures.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
            tracing::error!(%user_id, failures = %joined, "alert_sms_partial_failure");
            return Err(AppError::NotifierFailure(joined));
        }
        Ok(())
    }

    fn build_message(
        &self,
        user: &User,
        score: u8,
        reason: &str,
        location: Option<(f64, f64, f64)>,
        now: DateTime<Utc>,
    ) -> String {
        let (lat, lng, acc) = location.unwrap_or((0.0, 0.0, 0.0));
        let map_url = match &self.map_token {
            Some(token) => format!(
                "https://api.mapbox.com/styles/v1/mapbox/streets-v12/static/pin-s+f00({lng},{lat})/{lng},{lat},14/400x300?access_token={token}"
            ),
            None => format!("https://www.google.com/maps?q={lat},{lng}"),
        };
        format!(
            "\u{1F6A8} SAFETRACE ALERT\n\n{} may be in danger.\n\nLast seen: {}\nLocation: {}, {} (\u{00B1}{}m)\nConfidence: {}%\nReason: {}\n\nMap: {}\n\nPlease check on them immediately.\nContact: {}",
            user.name,
            now.format("%b %-d, %-I:%M %p"),
            lat,
            lng,
            acc as i64,
            score,
            reason,
            map_url,
            user.phone,
        )
    }

    /// `ResolveAlert(alert_id)` — sets `resolved_at = now`. Best-effort
    /// notifies contacts of resolution.
    pub async fn resolve_alert(&self, alert_id: Uuid) -> Result<Alert, AppError> {
        let now = self.clock.now();
        let alert = self.store.resolve_alert(alert_id, now).await?;
        if let Ok(user) = self.store.get_user(alert.user_id).await {
            let body = format!("{} has been marked safe. Thank you for checking.", user.name);
            for phone in &alert.sent_to {
                if let Err(e) = self.notifier.send_sms(phone, &body).await {
                    tracing::warn!(contact=%phone, error=%e, "resolution_notice_failed");
                }
            }
        }
        Ok(alert)
    }
}
