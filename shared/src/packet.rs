use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::callsign::Callsign;

/// The normalizer's output: a canonical telemetry record ready for the
/// Persister. An alternative numeric `serial` identity is carried
/// alongside `callsign` for satellite-originated packets that have not
/// yet been resolved to a callsign (see the `serial` provisioning
/// decision in DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub callsign: Option<Callsign>,
    pub serial: Option<i64>,
    pub latitude: f64,
    pub longitude: f64,
    pub data_time: DateTime<Utc>,
    pub accuracy: Option<f64>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub battery: Option<f64>,
    pub extra: Map<String, serde_json::Value>,
}

impl Packet {
    /// §4.4 identifier invariant: at least one of callsign or serial.
    pub fn has_identifier(&self) -> bool {
        self.callsign.is_some() || self.serial.is_some()
    }
}

/// `PositionEvent`, emitted by a Protocol Worker on a successful insert
/// (§4.3 step 9) and consumed by the Realtime Dispatcher (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionEvent {
    pub telemetry_id: uuid::Uuid,
    pub payload_id: i64,
    pub lat: f64,
    pub lon: f64,
    pub ts: DateTime<Utc>,
}
