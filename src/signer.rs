//! HMAC-SHA256 signing and constant-time verification.
//!
//! Two modes: structured (canonical JSON over a fixed key set) and raw
//! (caller-supplied bytes). The service currently uses a single process-wide
//! secret rather than a per-user one.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::AppError;
use crate::model::CellInfo;

type HmacSha256 = Hmac<Sha256>;

/// The fixed canonical key set signed over in structured mode.
#[derive(Serialize)]
struct CanonicalPayload<'a> {
    user_id: Uuid,
    timestamp: i64,
    lat: f64,
    lng: f64,
    accuracy_m: f64,
    cell_info: &'a CellInfo,
    battery_pct: Option<f64>,
    speed: Option<f64>,
    last_gasp: bool,
}

pub struct Signer {
    secret: Vec<u8>,
}

impl Signer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into().into_bytes() }
    }

    fn mac(&self) -> HmacSha256 {
        // A secret is plain process configuration, not derived from untrusted
        // input, so construction cannot fail in practice; HMAC itself accepts
        // any key length.
        HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length")
    }

    fn canonical_bytes(
        user_id: Uuid,
        timestamp: DateTime<Utc>,
        lat: f64,
        lng: f64,
        accuracy_m: f64,
        cell_info: &CellInfo,
        battery_pct: Option<f64>,
        speed: Option<f64>,
        last_gasp: bool,
    ) -> Vec<u8> {
        let payload = CanonicalPayload {
            user_id,
            timestamp: timestamp.timestamp(),
            lat,
            lng,
            accuracy_m,
            cell_info,
            battery_pct,
            speed,
            last_gasp,
        };
        serde_json::to_vec(&payload).expect("canonical payload is always serializable")
    }

    /// Sign the canonical structured form. Returns base64.
    #[allow(clippy::too_many_arguments)]
    pub fn sign_structured(
        &self,
        user_id: Uuid,
        timestamp: DateTime<Utc>,
        lat: f64,
        lng: f64,
        accuracy_m: f64,
        cell_info: &CellInfo,
        battery_pct: Option<f64>,
        speed: Option<f64>,
        last_gasp: bool,
    ) -> String {
        let bytes = Self::canonical_bytes(
            user_id, timestamp, lat, lng, accuracy_m, cell_info, battery_pct, speed, last_gasp,
        );
        let mut mac = self.mac();
        mac.update(&bytes);
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Verify a structured-form signature. Constant-time; fails closed on any
    /// malformed base64.
    #[allow(clippy::too_many_arguments)]
    pub fn verify_structured(
        &self,
        user_id: Uuid,
        timestamp: DateTime<Utc>,
        lat: f64,
        lng: f64,
        accuracy_m: f64,
        cell_info: &CellInfo,
        battery_pct: Option<f64>,
        speed: Option<f64>,
        last_gasp: bool,
        signature_b64: &str,
    ) -> Result<(), AppError> {
        let bytes = Self::canonical_bytes(
            user_id, timestamp, lat, lng, accuracy_m, cell_info, battery_pct, speed, last_gasp,
        );
        self.verify_raw(&bytes, signature_b64)
    }

    /// Sign an arbitrary byte string (raw mode). Returns base64.
    pub fn sign_raw(&self, bytes: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(bytes);
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Verify an arbitrary byte string against a base64 signature, in
    /// constant time. `Mac::verify_slice` compares digests in constant time.
    pub fn verify_raw(&self, bytes: &[u8], signature_b64: &str) -> Result<(), AppError> {
        let sig = STANDARD
            .decode(signature_b64.trim())
            .map_err(|_| AppError::Unauthorized)?;
        let mut mac = self.mac();
        mac.update(bytes);
        mac.verify_slice(&sig).map_err(|_| AppError::Unauthorized)
    }
}
