//! Compressed SMS webhook ingest: `POST /v1/sms/webhook`. Always responds
//! 200 — the upstream SMS provider retries on non-2xx, which is
//! undesirable — and communicates problems via an XML acknowledgement body
//! instead of a status code.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Form};
use serde::Deserialize;

use crate::model::{HeartbeatSource, RawHeartbeat};
use crate::routes::AppState;
use crate::sms_codec;

use super::Ingress;

#[derive(Deserialize)]
pub struct SmsWebhookForm {
    #[serde(rename = "Body")]
    pub body: String,
}

/// Outcome of an SMS ingest attempt. Never surfaced as a non-200 status;
/// only the acknowledgement body differs.
#[derive(Debug, PartialEq)]
pub enum SmsAckOutcome {
    Accepted,
    Rejected { note: String },
}

impl Ingress {
    /// Parse, verify, resolve, and persist. Every failure is logged and
    /// folded into `Rejected`, never propagated to the caller.
    pub async fn ingest_sms(&self, body: &str) -> SmsAckOutcome {
        let now = self.clock.now();

        let parsed = match sms_codec::parse(body) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "sms_invalid_format");
                return SmsAckOutcome::Rejected { note: e.to_string() };
            }
        };

        if let Err(e) = self.signer.verify_raw(parsed.signed_prefix.as_bytes(), &parsed.signature) {
            tracing::warn!(uid = %parsed.fields.uid, error = %e, "sms_signature_invalid");
            return SmsAckOutcome::Rejected { note: "signature verification failed".into() };
        }

        if let Err(e) = self.store.get_user(parsed.fields.uid).await {
            tracing::warn!(uid = %parsed.fields.uid, error = %e, "sms_unknown_user");
            return SmsAckOutcome::Rejected { note: "unknown user".into() };
        }

        let raw = RawHeartbeat {
            user_id: parsed.fields.uid,
            source: HeartbeatSource::Sms,
            lat: parsed.fields.lat,
            lng: parsed.fields.lng,
            accuracy_m: parsed.fields.acc as f64,
            cell_info: parsed.fields.cell,
            battery_pct: parsed.fields.bat.map(f64::from),
            speed_kmh: parsed.fields.spd,
            last_gasp: parsed.fields.lg,
            client_timestamp: parsed.fields.ts,
            signature: parsed.signature,
        };

        match self.persist_and_handoff(raw, now).await {
            Ok(_) => SmsAckOutcome::Accepted,
            Err(e) => {
                tracing::error!(error = %e, "sms_persist_failed");
                SmsAckOutcome::Rejected { note: "internal error".into() }
            }
        }
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn twiml(outcome: &SmsAckOutcome) -> String {
    match outcome {
        SmsAckOutcome::Accepted => {
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response></Response>".to_string()
        }
        SmsAckOutcome::Rejected { note } => format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Message>{}</Message></Response>",
            xml_escape(note)
        ),
    }
}

/// `POST /v1/sms/webhook`. Form-encoded body, single field `Body`. Always 200.
#[tracing::instrument(skip_all)]
pub async fn sms_webhook(State(state): State<AppState>, form: Option<Form<SmsWebhookForm>>) -> impl IntoResponse {
    let outcome = match form {
        Some(Form(form)) => state.ingress.ingest_sms(&form.body).await,
        None => SmsAckOutcome::Rejected { note: "missing Body field".into() },
    };
    (StatusCode::OK, [(axum::http::header::CONTENT_TYPE, "application/xml")], twiml(&outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertOrchestrator;
    use crate::clock::TestClock;
    use crate::config::Thresholds;
    use crate::evaluator::Evaluator;
    use crate::last_gasp::LastGaspTracker;
    use crate::model::{CellInfo, Contact, User, UserSettings};
    use crate::ports::memory::{MemoryNotifier, MemoryStateCache, MemoryStore};
    use crate::signer::Signer;
    use chrono::Utc;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Harness {
        store: Arc<MemoryStore>,
        signer: Arc<Signer>,
        ingress: Ingress,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryStateCache::new());
        let clock = Arc::new(TestClock::new(Utc::now()));
        let signer = Arc::new(Signer::new("s3cr3t"));
        let notifier = Arc::new(MemoryNotifier::new());
        let last_gasp = Arc::new(LastGaspTracker::new(store.clone()));
        let orchestrator =
            Arc::new(AlertOrchestrator::new(store.clone(), cache.clone(), notifier, clock.clone(), None));
        let evaluator =
            Evaluator::new(store.clone(), cache.clone(), clock.clone(), Thresholds::default(), orchestrator.clone());
        let ingress = Ingress::new(
            store.clone(),
            cache,
            signer.clone(),
            last_gasp,
            Arc::new(evaluator),
            orchestrator,
            clock,
            Thresholds::default(),
        );
        Harness { store, signer, ingress }
    }

    fn put_user(store: &MemoryStore, user_id: Uuid) {
        store.put_user(User {
            id: user_id,
            phone: "+2348000000000".into(),
            name: "Ada".into(),
            trusted_contacts: vec![],
            settings: UserSettings { heartbeat_interval_secs: 180, silent_prompt_timeout_secs: 10, policy_flags: vec![] },
            push_token: None,
        });
    }

    #[tokio::test]
    async fn valid_sms_is_accepted_and_persisted() {
        let h = harness();
        let uid = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        put_user(&h.store, uid);

        let fields = sms_codec::SmsFields {
            uid,
            ts: Utc::now(),
            lat: 6.5244,
            lng: 3.3792,
            acc: 200,
            cell: CellInfo { mcc: 621, mnc: 20, cid: 12345, lac: 678, rssi: -85, network_type: String::new(), neighbors: vec![] },
            bat: None,
            spd: None,
            lg: false,
        };
        let body = sms_codec::emit(&fields, &h.signer);

        let outcome = h.ingress.ingest_sms(&body).await;
        assert_eq!(outcome, SmsAckOutcome::Accepted);
        assert!(h.store.latest_heartbeat(uid).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn malformed_sms_is_rejected_not_errored() {
        let h = harness();
        let outcome = h.ingress.ingest_sms("garbage-no-sig").await;
        assert!(matches!(outcome, SmsAckOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn sms_with_bad_signature_is_rejected() {
        let h = harness();
        let uid = Uuid::new_v4();
        put_user(&h.store, uid);
        let other_signer = Signer::new("wrong-secret");
        let fields = sms_codec::SmsFields {
            uid,
            ts: Utc::now(),
            lat: 1.0,
            lng: 2.0,
            acc: 10,
            cell: CellInfo { mcc: 1, mnc: 1, cid: 1, lac: 1, rssi: -70, network_type: String::new(), neighbors: vec![] },
            bat: None,
            spd: None,
            lg: false,
        };
        let body = sms_codec::emit(&fields, &other_signer);

        let outcome = h.ingress.ingest_sms(&body).await;
        assert!(matches!(outcome, SmsAckOutcome::Rejected { .. }));
    }

    #[test]
    fn twiml_accepted_has_empty_response() {
        assert_eq!(twiml(&SmsAckOutcome::Accepted), "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response></Response>");
    }

    #[test]
    fn twiml_rejected_carries_escaped_note() {
        let body = twiml(&SmsAckOutcome::Rejected { note: "missing field: <uid>".into() });
        assert!(body.contains("&lt;uid&gt;"));
    }
}
