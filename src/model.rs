//! Data model. `serde`-derived so the same structs cross the Signer's
//! canonical-JSON boundary and the Store ports' JSON columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatSource {
    Http,
    Sms,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserSettings {
    pub heartbeat_interval_secs: u32,
    pub silent_prompt_timeout_secs: u32,
    #[serde(default)]
    pub policy_flags: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub phone: String,
    pub name: String,
    pub trusted_contacts: Vec<Contact>,
    pub settings: UserSettings,
    /// Push-notification token for the silent "are you safe?" prompt, if any.
    #[serde(default)]
    pub push_token: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CellInfo {
    pub mcc: u32,
    pub mnc: u32,
    pub cid: u64,
    pub lac: u32,
    pub rssi: i32,
    pub network_type: String,
    #[serde(default)]
    pub neighbors: Vec<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Heartbeat {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source: HeartbeatSource,
    pub lat: f64,
    pub lng: f64,
    pub accuracy_m: f64,
    pub cell_info: CellInfo,
    pub battery_pct: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub last_gasp: bool,
    pub client_timestamp: DateTime<Utc>,
    pub signature: String,
    pub server_received_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LastGasp {
    pub id: Uuid,
    pub user_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub accuracy_m: f64,
    pub cell_info: CellInfo,
    pub created_at: DateTime<Utc>,
    pub expiry_ts: DateTime<Utc>,
}

impl LastGasp {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expiry_ts > now
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Caution,
    AtRisk,
    Alert,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub user_id: Uuid,
    pub state: AlertState,
    pub score: u8,
    pub reason: String,
    pub sent_to: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyState {
    Safe,
    Caution,
    AtRisk,
    Alert,
    WaitLastGasp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserState {
    pub user_id: Uuid,
    pub state: SafetyState,
    pub score: u8,
    pub last_heartbeat_ts: Option<DateTime<Utc>>,
    pub last_gasp_active: bool,
    pub last_gasp_expiry: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlackboxTrail {
    pub id: Uuid,
    pub user_id: Uuid,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub data_point_count: u64,
    pub file_url: String,
    pub uploaded_at: DateTime<Utc>,
}

/// The decision returned by the Evaluator.
#[derive(Clone, Debug, PartialEq)]
pub struct SafetyDecision {
    pub state: SafetyState,
    pub score: u8,
    pub reason: String,
}

/// The post-authentication record both transports converge on after
/// verification, regardless of whether they arrived as HTTP JSON or SMS
/// key-value pairs.
#[derive(Clone, Debug)]
pub struct RawHeartbeat {
    pub user_id: Uuid,
    pub source: HeartbeatSource,
    pub lat: f64,
    pub lng: f64,
    pub accuracy_m: f64,
    pub cell_info: CellInfo,
    pub battery_pct: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub last_gasp: bool,
    pub client_timestamp: DateTime<Utc>,
    pub signature: String,
}
