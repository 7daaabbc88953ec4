//! Compressed semicolon-delimited SMS heartbeat wire format.
//!
//! Wire form: `k1=v1;k2=v2;...;sig=<base64>`. Verification is performed
//! against the exact substring preceding `;sig=` — the signed bytes are the
//! SMS body with the signature suffix stripped.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::model::CellInfo;

#[derive(Clone, Debug, PartialEq)]
pub struct SmsFields {
    pub uid: Uuid,
    pub ts: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
    pub acc: u32,
    pub cell: CellInfo,
    pub bat: Option<u8>,
    pub spd: Option<f64>,
    pub lg: bool,
}

/// A parsed SMS message: the decoded fields, the base64 signature, and the
/// exact byte-for-byte prefix that was signed (everything before `;sig=`).
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedSms {
    pub fields: SmsFields,
    pub signature: String,
    pub signed_prefix: String,
}

fn parse_cell(raw: &str) -> Option<CellInfo> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 5 {
        return None;
    }
    Some(CellInfo {
        mcc: parts[0].trim().parse().ok()?,
        mnc: parts[1].trim().parse().ok()?,
        cid: parts[2].trim().parse().ok()?,
        lac: parts[3].trim().parse().ok()?,
        rssi: parts[4].trim().parse().ok()?,
        network_type: String::new(),
        neighbors: Vec::new(),
    })
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw, "1" | "true" | "True" | "TRUE")
}

/// Parse the SMS body. Unknown keys are ignored; duplicate keys: last
/// occurrence wins. Missing `uid`/`ts`/`sig` or a numeric parse failure
/// surfaces `InvalidFormat` naming the offending field.
pub fn parse(body: &str) -> Result<ParsedSms, AppError> {
    let sig_marker = ";sig=";
    let sig_pos = body
        .find(sig_marker)
        .ok_or_else(|| AppError::InvalidFormat("missing field: sig".into()))?;
    let signed_prefix = body[..sig_pos].to_string();
    let signature = body[sig_pos + sig_marker.len()..].to_string();
    if signature.is_empty() {
        return Err(AppError::InvalidFormat("missing field: sig".into()));
    }

    let mut kv: HashMap<&str, &str> = HashMap::new();
    for pair in signed_prefix.split(';') {
        if pair.is_empty() {
            continue;
        }
        if let Some((k, v)) = pair.split_once('=') {
            kv.insert(k, v); // last occurrence wins: later inserts overwrite.
        }
    }

    let uid_raw = kv.get("uid").ok_or_else(|| AppError::InvalidFormat("missing field: uid".into()))?;
    let uid = Uuid::parse_str(uid_raw).map_err(|_| AppError::InvalidFormat("invalid field: uid".into()))?;

    let ts_raw = kv.get("ts").ok_or_else(|| AppError::InvalidFormat("missing field: ts".into()))?;
    let ts = DateTime::parse_from_rfc3339(ts_raw)
        .map_err(|_| AppError::InvalidFormat("invalid field: ts".into()))?
        .with_timezone(&Utc);

    let lat = kv
        .get("lat")
        .ok_or_else(|| AppError::InvalidFormat("missing field: lat".into()))?
        .parse::<f64>()
        .map_err(|_| AppError::InvalidFormat("invalid field: lat".into()))?;

    let lng = kv
        .get("lng")
        .ok_or_else(|| AppError::InvalidFormat("missing field: lng".into()))?
        .parse::<f64>()
        .map_err(|_| AppError::InvalidFormat("invalid field: lng".into()))?;

    let acc = kv
        .get("acc")
        .ok_or_else(|| AppError::InvalidFormat("missing field: acc".into()))?
        .parse::<u32>()
        .map_err(|_| AppError::InvalidFormat("invalid field: acc".into()))?;

    let cell_raw = kv.get("cell").ok_or_else(|| AppError::InvalidFormat("missing field: cell".into()))?;
    let cell = parse_cell(cell_raw).ok_or_else(|| AppError::InvalidFormat("invalid field: cell".into()))?;

    let bat = match kv.get("bat") {
        Some(v) => Some(v.parse::<u8>().map_err(|_| AppError::InvalidFormat("invalid field: bat".into()))?),
        None => None,
    };

    let spd = match kv.get("spd") {
        Some(v) => Some(v.parse::<f64>().map_err(|_| AppError::InvalidFormat("invalid field: spd".into()))?),
        None => None,
    };

    let lg = kv.get("lg").map(|v| parse_bool(v)).unwrap_or(false);

    Ok(ParsedSms {
        fields: SmsFields { uid, ts, lat, lng, acc, cell, bat, spd, lg },
        signature,
        signed_prefix,
    })
}

/// Emit the signed-prefix form of the given fields (everything before
/// `;sig=`). Numbers: 6 decimals for coordinates, 1 decimal for speed;
/// optional fields are emitted only when set.
pub fn emit_prefix(f: &SmsFields) -> String {
    let mut out = format!(
        "uid={};ts={};lat={:.6};lng={:.6};acc={}",
        f.uid,
        f.ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        f.lat,
        f.lng,
        f.acc,
    );
    out.push_str(&format!(
        ";cell={},{},{},{},{}",
        f.cell.mcc, f.cell.mnc, f.cell.cid, f.cell.lac, f.cell.rssi
    ));
    if let Some(bat) = f.bat {
        out.push_str(&format!(";bat={bat}"));
    }
    if let Some(spd) = f.spd {
        out.push_str(&format!(";spd={spd:.1}"));
    }
    if f.lg {
        out.push_str(";lg=1");
    }
    out
}

/// Emit the full wire form, appending the base64 signature over the prefix.
pub fn emit(f: &SmsFields, signer: &crate::signer::Signer) -> String {
    let prefix = emit_prefix(f);
    let sig = signer.sign_raw(prefix.as_bytes());
    format!("{prefix};sig={sig}")
}
