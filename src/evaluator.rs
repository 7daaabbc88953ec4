//! Per-user safety decision: deterministic rules + composite score → state
//! and reason. The core of the pipeline.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::alert::AlertOrchestrator;
use crate::clock::Clock;
use crate::config::Thresholds;
use crate::error::AppError;
use crate::geo;
use crate::model::{AlertState, Heartbeat, SafetyDecision, SafetyState, UserState};
use crate::ports::{StateCache, Store};

pub struct Evaluator {
    store: Arc<dyn Store>,
    cache: Arc<dyn StateCache>,
    clock: Arc<dyn Clock>,
    thresholds: Thresholds,
    orchestrator: Arc<AlertOrchestrator>,
}

impl Evaluator {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn StateCache>,
        clock: Arc<dyn Clock>,
        thresholds: Thresholds,
        orchestrator: Arc<AlertOrchestrator>,
    ) -> Self {
        Self { store, cache, clock, thresholds, orchestrator }
    }

    /// `EvaluateUserSafety(user_id) → {state, score, reason}`.
    pub async fn evaluate(&self, user_id: Uuid) -> Result<SafetyDecision, AppError> {
        let now = self.clock.now();
        let decision = self.compute_decision(user_id, now).await?;

        // Step F — persist state (24h TTL is the StateCache's concern, not
        // modeled explicitly here since the port takes the record, not a
        // TTL parameter — the in-memory double treats UserState as
        // overwrite-on-write with no separate expiry sweep).
        let previous = self.cache.get_user_state(user_id).await?;
        self.cache
            .put_user_state(UserState {
                user_id,
                state: decision.state,
                score: decision.score,
                last_heartbeat_ts: self.store.latest_heartbeat(user_id).await?.map(|h| h.client_timestamp),
                last_gasp_active: decision.state == SafetyState::WaitLastGasp,
                last_gasp_expiry: self.store.active_last_gasp(user_id, now).await?.map(|lg| lg.expiry_ts),
                updated_at: now,
            })
            .await?;

        // Step G — transition handling.
        self.handle_transition(user_id, previous.as_ref().map(|p| p.state), &decision).await;

        Ok(decision)
    }

    async fn compute_decision(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<SafetyDecision, AppError> {
        // Step A — LastGasp short-circuit.
        if let Some(active) = self.store.active_last_gasp(user_id, now).await? {
            let _ = active;
            return Ok(SafetyDecision {
                state: SafetyState::WaitLastGasp,
                score: 0,
                reason: "LastGasp active — monitoring connectivity".to_string(),
            });
        }

        // Step B — bootstrap.
        let Some(latest) = self.store.latest_heartbeat(user_id).await? else {
            return Ok(SafetyDecision { state: SafetyState::Safe, score: 100, reason: "No heartbeat data yet".to_string() });
        };

        let age = now - latest.client_timestamp;

        // Step C — deterministic rules, first match wins.
        if age < self.thresholds.heartbeat_window_chrono() && latest.last_gasp {
            return Ok(SafetyDecision {
                state: SafetyState::Caution,
                score: 60,
                reason: "LastGasp received — monitoring".to_string(),
            });
        }
        if age >= self.thresholds.heartbeat_window_chrono() {
            let minutes = age.num_minutes();
            return Ok(SafetyDecision {
                state: SafetyState::AtRisk,
                score: 30,
                reason: format!("No heartbeat for {minutes} minutes"),
            });
        }
        // Sudden-stop promotion: an additional deterministic rule evaluated
        // after the two rules above, still ahead of composite scoring.
        let recent = self.store.recent_heartbeats(user_id, 2).await?;
        if let [latest_hb, prev_hb] = recent.as_slice() {
            if geo::sudden_stop(prev_hb, latest_hb) {
                return Ok(SafetyDecision {
                    state: SafetyState::AtRisk,
                    score: 20,
                    reason: "Sudden stop detected".to_string(),
                });
            }
        }

        // Step D — composite score.
        let score = composite_score(&latest, now);

        // Step E — state mapping.
        let (state, reason) = map_score(score);
        Ok(SafetyDecision { state, score, reason })
    }

    async fn handle_transition(&self, user_id: Uuid, previous: Option<SafetyState>, decision: &SafetyDecision) {
        let unchanged_and_not_alert = previous == Some(decision.state) && decision.state != SafetyState::Alert;
        if unchanged_and_not_alert {
            return;
        }

        let Some(alert_state) = to_alert_state(decision.state) else {
            return; // SAFE / WAIT_LASTGASP never reach the orchestrator.
        };

        if let Err(e) = self.orchestrator.handle_transition(user_id, alert_state, decision.score, &decision.reason).await {
            // Evaluator errors from downstream dispatch are logged, never
            // surfaced — the triggering request has already responded.
            tracing::error!(%user_id, error=%e, "alert_orchestrator_failed");
        }
    }
}

fn to_alert_state(state: SafetyState) -> Option<AlertState> {
    match state {
        SafetyState::Caution => Some(AlertState::Caution),
        SafetyState::AtRisk => Some(AlertState::AtRisk),
        SafetyState::Alert => Some(AlertState::Alert),
        SafetyState::Safe | SafetyState::WaitLastGasp => None,
    }
}

impl Thresholds {
    fn heartbeat_window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.heartbeat_window).unwrap_or_else(|_| chrono::Duration::seconds(600))
    }
}

fn map_score(score: u8) -> (SafetyState, String) {
    if score >= 80 {
        (SafetyState::Safe, "Recent heartbeat, good signal quality".to_string())
    } else if score >= 50 {
        (SafetyState::Caution, "Heartbeat signal degraded".to_string())
    } else {
        (SafetyState::AtRisk, "Heartbeat signal critically degraded".to_string())
    }
}

/// Composite score: integer 0..100, summed then clamped.
pub fn composite_score(hb: &Heartbeat, now: DateTime<Utc>) -> u8 {
    let age_minutes = (now - hb.client_timestamp).num_seconds() as f64 / 60.0;

    let recency = if age_minutes < 5.0 {
        30
    } else if age_minutes < 10.0 {
        20
    } else if age_minutes < 15.0 {
        10
    } else {
        0
    };

    let accuracy = if hb.accuracy_m < 50.0 {
        20
    } else if hb.accuracy_m < 200.0 {
        15
    } else if hb.accuracy_m < 500.0 {
        10
    } else {
        5
    };

    let movement = match hb.speed_kmh {
        Some(v) if (0.0..100.0).contains(&v) => 20,
        Some(_) => 10,
        None => 15,
    };

    let signal = if hb.cell_info.rssi > -70 {
        10
    } else if hb.cell_info.rssi > -90 {
        5
    } else {
        0
    };

    let source = match hb.source {
        crate::model::HeartbeatSource::Http => 5,
        crate::model::HeartbeatSource::Sms => 3,
    };

    let battery = match hb.battery_pct {
        Some(b) if b > 20.0 => 15,
        Some(b) if b > 5.0 => 10,
        Some(_) => 5,
        None => 10,
    };

    let total = recency + accuracy + movement + signal + source + battery;
    total.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::model::{CellInfo, HeartbeatSource, LastGasp};
    use crate::ports::memory::{MemoryNotifier, MemoryStateCache, MemoryStore};
    use crate::ports::Notifier as _;

    fn cell(rssi: i32) -> CellInfo {
        CellInfo { mcc: 1, mnc: 1, cid: 1, lac: 1, rssi, network_type: "LTE".into(), neighbors: vec![] }
    }

    fn heartbeat(
        user_id: Uuid,
        age_secs: i64,
        accuracy_m: f64,
        speed_kmh: Option<f64>,
        rssi: i32,
        battery_pct: Option<f64>,
        source: HeartbeatSource,
        now: DateTime<Utc>,
    ) -> Heartbeat {
        Heartbeat {
            id: Uuid::new_v4(),
            user_id,
            source,
            lat: 6.5,
            lng: 3.3,
            accuracy_m,
            cell_info: cell(rssi),
            battery_pct,
            speed_kmh,
            last_gasp: false,
            client_timestamp: now - chrono::Duration::seconds(age_secs),
            signature: String::new(),
            server_received_at: now,
        }
    }

    fn harness() -> (Arc<MemoryStore>, Arc<MemoryStateCache>, Arc<TestClock>, Evaluator) {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryStateCache::new());
        let clock = Arc::new(TestClock::new(Utc::now()));
        let notifier = Arc::new(MemoryNotifier::new());
        let orchestrator = Arc::new(AlertOrchestrator::new(store.clone(), cache.clone(), notifier, clock.clone(), None));
        let evaluator = Evaluator::new(store.clone(), cache.clone(), clock.clone(), Thresholds::default(), orchestrator);
        (store, cache, clock, evaluator)
    }

    fn put_user(store: &MemoryStore, user_id: Uuid) {
        store.put_user(crate::model::User {
            id: user_id,
            phone: "+2348000000000".into(),
            name: "Ada".into(),
            trusted_contacts: vec![],
            settings: crate::model::UserSettings { heartbeat_interval_secs: 180, silent_prompt_timeout_secs: 10, policy_flags: vec![] },
            push_token: None,
        });
    }

    #[tokio::test]
    async fn bootstrap_with_no_heartbeat_is_safe_100() {
        let (store, _cache, _clock, evaluator) = harness();
        let uid = Uuid::new_v4();
        put_user(&store, uid);
        let decision = evaluator.evaluate(uid).await.unwrap();
        assert_eq!(decision.state, SafetyState::Safe);
        assert_eq!(decision.score, 100);
    }

    #[tokio::test]
    async fn fresh_heartbeat_good_signal_is_safe_100() {
        let (store, _cache, clock, evaluator) = harness();
        let uid = Uuid::new_v4();
        put_user(&store, uid);
        let now = clock.now();
        let hb = heartbeat(uid, 30, 20.0, Some(5.0), -60, Some(80.0), HeartbeatSource::Http, now);
        store.insert_heartbeat(hb).await.unwrap();

        let decision = evaluator.evaluate(uid).await.unwrap();
        assert_eq!(decision.score, 100);
        assert_eq!(decision.state, SafetyState::Safe);
    }

    #[tokio::test]
    async fn degraded_sms_is_caution_58() {
        let (store, _cache, clock, evaluator) = harness();
        let uid = Uuid::new_v4();
        put_user(&store, uid);
        let now = clock.now();
        let hb = heartbeat(uid, 8 * 60, 300.0, None, -95, Some(10.0), HeartbeatSource::Sms, now);
        store.insert_heartbeat(hb).await.unwrap();

        let decision = evaluator.evaluate(uid).await.unwrap();
        assert_eq!(decision.score, 58);
        assert_eq!(decision.state, SafetyState::Caution);
    }

    #[tokio::test]
    async fn stale_heartbeat_overrides_to_at_risk() {
        let (store, _cache, clock, evaluator) = harness();
        let uid = Uuid::new_v4();
        put_user(&store, uid);
        let now = clock.now();
        let hb = heartbeat(uid, 15 * 60, 10.0, Some(5.0), -60, Some(90.0), HeartbeatSource::Http, now);
        store.insert_heartbeat(hb).await.unwrap();

        let decision = evaluator.evaluate(uid).await.unwrap();
        assert_eq!(decision.state, SafetyState::AtRisk);
        assert_eq!(decision.reason, "No heartbeat for 15 minutes");
    }

    #[tokio::test]
    async fn last_gasp_flag_then_active_wait_last_gasp() {
        let (store, _cache, clock, evaluator) = harness();
        let uid = Uuid::new_v4();
        put_user(&store, uid);
        let now = clock.now();
        let mut hb = heartbeat(uid, 60, 10.0, Some(5.0), -60, Some(90.0), HeartbeatSource::Http, now);
        hb.last_gasp = true;
        store.insert_heartbeat(hb).await.unwrap();

        let first = evaluator.evaluate(uid).await.unwrap();
        assert_eq!(first.state, SafetyState::Caution);
        assert_eq!(first.score, 60);

        store
            .insert_last_gasp(LastGasp {
                id: Uuid::new_v4(),
                user_id: uid,
                lat: 6.5,
                lng: 3.3,
                accuracy_m: 10.0,
                cell_info: cell(-60),
                created_at: now,
                expiry_ts: now + chrono::Duration::seconds(3600),
            })
            .await
            .unwrap();

        let second = evaluator.evaluate(uid).await.unwrap();
        assert_eq!(second.state, SafetyState::WaitLastGasp);
    }

    #[tokio::test]
    async fn last_gasp_dominates_regardless_of_heartbeat() {
        let (store, _cache, clock, evaluator) = harness();
        let uid = Uuid::new_v4();
        put_user(&store, uid);
        let now = clock.now();
        // A perfectly healthy heartbeat...
        let hb = heartbeat(uid, 5, 10.0, Some(5.0), -60, Some(90.0), HeartbeatSource::Http, now);
        store.insert_heartbeat(hb).await.unwrap();
        // ...but an active LastGasp still dominates.
        store
            .insert_last_gasp(LastGasp {
                id: Uuid::new_v4(),
                user_id: uid,
                lat: 6.5,
                lng: 3.3,
                accuracy_m: 10.0,
                cell_info: cell(-60),
                created_at: now,
                expiry_ts: now + chrono::Duration::seconds(100),
            })
            .await
            .unwrap();

        let decision = evaluator.evaluate(uid).await.unwrap();
        assert_eq!(decision.state, SafetyState::WaitLastGasp);
        assert_eq!(decision.score, 0);
    }

    #[tokio::test]
    async fn score_is_always_within_bounds() {
        let (store, _cache, clock, evaluator) = harness();
        let now = clock.now();
        let cases = [
            (0i64, 1.0, Some(0.0), -50, Some(100.0), HeartbeatSource::Http),
            (20 * 60, 1000.0, None, -120, None, HeartbeatSource::Sms),
            (3 * 60, 45.0, Some(150.0), -80, Some(3.0), HeartbeatSource::Http),
        ];
        for (age, acc, spd, rssi, bat, src) in cases {
            let uid = Uuid::new_v4();
            put_user(&store, uid);
            let hb = heartbeat(uid, age, acc, spd, rssi, bat, src, now);
            store.insert_heartbeat(hb).await.unwrap();
            let decision = evaluator.evaluate(uid).await.unwrap();
            assert!(decision.score <= 100);
        }
    }

    #[tokio::test]
    async fn score_never_increases_as_staleness_increases() {
        let (store, _cache, clock, evaluator) = harness();
        let now = clock.now();

        let mut previous_score = 255u16;
        for age in [0i64, 4 * 60, 9 * 60, 14 * 60] {
            let uid = Uuid::new_v4();
            put_user(&store, uid);
            let hb = heartbeat(uid, age, 20.0, Some(5.0), -60, Some(80.0), HeartbeatSource::Http, now);
            store.insert_heartbeat(hb).await.unwrap();
            let decision = evaluator.evaluate(uid).await.unwrap();
            assert!(decision.score as u16 <= previous_score, "score increased with staleness");
            previous_score = decision.score as u16;
        }
    }

    #[tokio::test]
    async fn scoring_is_deterministic_given_same_inputs() {
        let (store, _cache, clock, evaluator) = harness();
        let now = clock.now();
        let uid1 = Uuid::new_v4();
        let uid2 = Uuid::new_v4();
        put_user(&store, uid1);
        put_user(&store, uid2);
        let hb1 = heartbeat(uid1, 60, 100.0, Some(40.0), -75, Some(30.0), HeartbeatSource::Http, now);
        let hb2 = heartbeat(uid2, 60, 100.0, Some(40.0), -75, Some(30.0), HeartbeatSource::Http, now);
        store.insert_heartbeat(hb1).await.unwrap();
        store.insert_heartbeat(hb2).await.unwrap();

        let d1 = evaluator.evaluate(uid1).await.unwrap();
        let d2 = evaluator.evaluate(uid2).await.unwrap();
        assert_eq!(d1.score, d2.score);
        assert_eq!(d1.state, d2.state);
    }

    #[tokio::test]
    async fn alert_dedup_within_five_minutes_yields_one_notifier_burst() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryStateCache::new());
        let clock = Arc::new(TestClock::new(Utc::now()));
        let notifier = Arc::new(MemoryNotifier::new());
        let orchestrator = Arc::new(AlertOrchestrator::new(store.clone(), cache.clone(), notifier.clone(), clock.clone(), None));
        let evaluator = Evaluator::new(store.clone(), cache.clone(), clock.clone(), Thresholds::default(), orchestrator);

        let uid = Uuid::new_v4();
        store.put_user(crate::model::User {
            id: uid,
            phone: "+2348000000000".into(),
            name: "Ada".into(),
            trusted_contacts: vec![crate::model::Contact { id: Uuid::new_v4(), name: "mom".into(), phone: "+2348100000000".into() }],
            settings: crate::model::UserSettings { heartbeat_interval_secs: 180, silent_prompt_timeout_secs: 10, policy_flags: vec![] },
            push_token: None,
        });

        let now = clock.now();
        let hb1 = heartbeat(uid, 20 * 60, 20.0, Some(5.0), -60, Some(80.0), HeartbeatSource::Http, now);
        store.insert_heartbeat(hb1).await.unwrap();
        evaluator.evaluate(uid).await.unwrap();

        clock.advance(chrono::Duration::seconds(30));
        let now2 = clock.now();
        let hb2 = heartbeat(uid, 20 * 60, 20.0, Some(5.0), -60, Some(80.0), HeartbeatSource::Http, now2);
        store.insert_heartbeat(hb2).await.unwrap();
        evaluator.evaluate(uid).await.unwrap();

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.iter().filter(|(ch, ..)| ch == "sms").count(), 1, "exactly one SMS burst within the dedup window");
    }
}
