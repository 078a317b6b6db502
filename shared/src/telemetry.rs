use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;

/// A persisted telemetry row, as returned to Viewport API clients.
/// Mirrors the `telemetry` table contract in §3/§4.5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRow {
    pub id: uuid::Uuid,
    pub payload_id: i64,
    pub callsign: String,
    pub data_time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub battery: Option<f64>,
    pub extra: Map<String, serde_json::Value>,
    pub last_updated: DateTime<Utc>,
}
