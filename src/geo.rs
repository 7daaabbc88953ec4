//! Haversine distance and the sudden-stop / tower-jump auxiliary detectors.
//! Not inlined into the composite score.

use crate::model::Heartbeat;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points, in kilometres.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (lat1r, lat2r) = (lat1.to_radians(), lat2.to_radians());
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1r.cos() * lat2r.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Sudden stop: given the two most recent heartbeats within 5 minutes, both
/// with speed, `prev > 40 km/h`, `latest < 5 km/h`, `Δt < 60s`, and implied
/// deceleration > 6 m/s².
pub fn sudden_stop(prev: &Heartbeat, latest: &Heartbeat) -> bool {
    let dt = (latest.client_timestamp - prev.client_timestamp).num_milliseconds() as f64 / 1000.0;
    if dt <= 0.0 || dt >= 60.0 {
        return false;
    }
    let (Some(v_prev), Some(v_latest)) = (prev.speed_kmh, latest.speed_kmh) else {
        return false;
    };
    if !(v_prev > 40.0 && v_latest < 5.0) {
        return false;
    }
    let delta_v_ms = (v_prev - v_latest) * 1000.0 / 3600.0;
    let decel = delta_v_ms / dt;
    decel > 6.0
}

/// Tower jump: two most recent heartbeats within 5 min, different CID,
/// haversine distance > 5 km, Δt < 2 min.
pub fn tower_jump(prev: &Heartbeat, latest: &Heartbeat) -> bool {
    let dt_secs = (latest.client_timestamp - prev.client_timestamp).num_seconds();
    if dt_secs.abs() >= 120 {
        return false;
    }
    if prev.cell_info.cid == latest.cell_info.cid {
        return false;
    }
    let distance = haversine_km(prev.lat, prev.lng, latest.lat, latest.lng);
    distance > 5.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellInfo, HeartbeatSource};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn cell(cid: u64) -> CellInfo {
        CellInfo { mcc: 1, mnc: 1, cid, lac: 1, rssi: -70, network_type: "LTE".into(), neighbors: vec![] }
    }

    fn hb(lat: f64, lng: f64, speed: Option<f64>, ts: chrono::DateTime<Utc>, cid: u64) -> Heartbeat {
        Heartbeat {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            source: HeartbeatSource::Http,
            lat,
            lng,
            accuracy_m: 10.0,
            cell_info: cell(cid),
            battery_pct: Some(50.0),
            speed_kmh: speed,
            last_gasp: false,
            client_timestamp: ts,
            signature: String::new(),
            server_received_at: ts,
        }
    }

    #[test]
    fn haversine_distance_to_self_is_zero() {
        assert!(haversine_km(6.5, 3.3, 6.5, 3.3) < 1e-9);
    }

    #[test]
    fn haversine_is_symmetric() {
        let d1 = haversine_km(6.5244, 3.3792, 9.0765, 7.3986);
        let d2 = haversine_km(9.0765, 7.3986, 6.5244, 3.3792);
        assert!((d1 - d2).abs() < 1e-9);
    }

    #[test]
    fn haversine_known_reference_lagos_abuja() {
        // Lagos (6.5244, 3.3792) to Abuja (9.0765, 7.3986) ≈ 534 km.
        let d = haversine_km(6.5244, 3.3792, 9.0765, 7.3986);
        let expected = 534.0;
        assert!((d - expected).abs() / expected < 0.02, "got {d} km, expected ~{expected} km");
    }

    #[test]
    fn sudden_stop_detects_hard_braking() {
        let t0 = Utc::now();
        let prev = hb(6.5, 3.3, Some(60.0), t0, 1);
        let latest = hb(6.5001, 3.3001, Some(2.0), t0 + Duration::seconds(10), 1);
        assert!(sudden_stop(&prev, &latest));
    }

    #[test]
    fn sudden_stop_not_triggered_by_gradual_slowdown() {
        let t0 = Utc::now();
        let prev = hb(6.5, 3.3, Some(45.0), t0, 1);
        let latest = hb(6.5001, 3.3001, Some(40.0), t0 + Duration::seconds(10), 1);
        assert!(!sudden_stop(&prev, &latest));
    }

    #[test]
    fn tower_jump_detects_implausible_displacement() {
        let t0 = Utc::now();
        let prev = hb(6.5, 3.3, None, t0, 100);
        let latest = hb(6.6, 3.5, None, t0 + Duration::seconds(30), 200);
        assert!(tower_jump(&prev, &latest));
    }

    #[test]
    fn tower_jump_not_triggered_when_cid_unchanged() {
        let t0 = Utc::now();
        let prev = hb(6.5, 3.3, None, t0, 100);
        let latest = hb(6.6, 3.5, None, t0 + Duration::seconds(30), 100);
        assert!(!tower_jump(&prev, &latest));
    }
}
