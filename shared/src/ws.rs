use serde::{Deserialize, Serialize};

use crate::telemetry::TelemetryRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bbox {
    #[serde(rename = "minLat")]
    pub min_lat: f64,
    #[serde(rename = "minLon")]
    pub min_lon: f64,
    #[serde(rename = "maxLat")]
    pub max_lat: f64,
    #[serde(rename = "maxLon")]
    pub max_lon: f64,
}

/// Client→server envelope: `{type, payload, request_id?}` (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEnvelope {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetInitialDataPayload {
    pub bbox: Bbox,
    pub history_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateViewportPayload {
    pub bbox: Bbox,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetTelemetryPayload {
    #[serde(rename = "payloadId")]
    pub payload_id: i64,
    pub timestamp: String,
}

/// Server->client envelope: `{type, data?, error?, request_id?}` (§6).
#[derive(Debug, Clone, Serialize)]
pub struct ServerEnvelope {
    #[serde(rename = "type")]
    pub ty: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ServerEnvelope {
    pub fn data(ty: &'static str, data: serde_json::Value, request_id: Option<String>) -> Self {
        Self {
            ty,
            data: Some(data),
            error: None,
            request_id,
        }
    }

    pub fn error(ty: &'static str, error: impl Into<String>, request_id: Option<String>) -> Self {
        Self {
            ty,
            data: None,
            error: Some(error.into()),
            request_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPositionData {
    pub payload_id: i64,
    pub telemetry_id: uuid::Uuid,
    pub lat: f64,
    pub lon: f64,
    pub ts: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryResponseData {
    #[serde(rename = "payloadId")]
    pub payload_id: i64,
    pub timestamp: String,
    pub telemetry: Option<TelemetryRow>,
}
