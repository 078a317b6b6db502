use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use groundstation_shared::{IngestMethod, QueueName, RawEnvelope, TransmitMethod};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::IngressError;
use crate::jwt;
use crate::state::AppState;
use crate::workers::aprs;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/aprs", post(post_aprs))
        .route("/lora", post(post_lora))
        .route("/iridium", post(post_iridium))
        .route("/manual/aprs", post(post_manual_aprs))
        .route("/manual/lora", post(post_manual_lora))
        .route("/manual/prediction/{payload_id}", get(get_manual_prediction))
        .route("/manual/path/{payload_id}", get(get_manual_path))
        .route("/telemetry", get(get_telemetry))
        .route("/health", get(get_health))
}

#[derive(Debug, Serialize)]
struct Accepted {
    queue_number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    decode_success: Option<bool>,
}

/// §4.1 step (d)/(e): append to the transport's list, reply 202 with the
/// new list length. Enqueue failure (broker unavailable) is a 503.
async fn enqueue(
    state: &AppState,
    queue: QueueName,
    envelope: RawEnvelope,
    decode_success: Option<bool>,
) -> Result<impl IntoResponse + use<>, IngressError> {
    let serialized =
        serde_json::to_string(&envelope).map_err(|_| IngressError::Serialization)?;
    let queue_number = state
        .broker
        .push(queue, serialized)
        .await
        .map_err(|_| IngressError::BrokerUnavailable)?;
    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(Accepted {
            queue_number,
            decode_success,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct AprsOrLoraRequest {
    #[serde(default)]
    sender: Option<String>,
    raw_data: Value,
    #[serde(default)]
    #[allow(dead_code)]
    timestamp: Option<DateTime<Utc>>,
}

async fn post_aprs(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AprsOrLoraRequest>,
) -> Result<impl IntoResponse, IngressError> {
    let frame = body
        .raw_data
        .as_str()
        .ok_or_else(|| IngressError::invalid("raw_data", "must be a string APRS frame"))?;
    let decode_success = aprs::decode_frame(frame).is_ok();

    let envelope = RawEnvelope::new(
        body.sender.unwrap_or_else(|| "UMICH-BALLOONS".to_string()),
        Value::String(frame.to_string()),
        IngestMethod::Http,
        Some(TransmitMethod::Aprs),
    );
    enqueue(&state, QueueName::Aprs, envelope, Some(decode_success)).await
}

async fn post_lora(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AprsOrLoraRequest>,
) -> Result<impl IntoResponse, IngressError> {
    let (payload, decode_success) = coerce_json_object(body.raw_data);

    let envelope = RawEnvelope::new(
        body.sender.unwrap_or_else(|| "UMICH-BALLOONS".to_string()),
        payload,
        IngestMethod::Http,
        Some(TransmitMethod::LoRa),
    );
    enqueue(&state, QueueName::Lora, envelope, Some(decode_success)).await
}

async fn post_iridium(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, IngressError> {
    let token = body
        .get("JWT")
        .and_then(Value::as_str)
        .ok_or(IngressError::Unauthorized)?;
    jwt::verify_ground_control_jwt(token, &state.config.jwt_public_key_pem)
        .map_err(|_| IngressError::Unauthorized)?;

    let sender = body
        .get("imei")
        .and_then(Value::as_str)
        .unwrap_or("unknown-imei")
        .to_string();

    let decode_success = body
        .get("data")
        .and_then(Value::as_str)
        .map(|hex_data| hex::decode(hex_data).is_ok())
        .unwrap_or(false);

    let envelope = RawEnvelope::new(
        sender,
        body,
        IngestMethod::Http,
        Some(TransmitMethod::Iridium),
    );
    enqueue(&state, QueueName::Iridium, envelope, Some(decode_success)).await
}

async fn post_manual_aprs(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<impl IntoResponse, IngressError> {
    let decode_success = aprs::decode_frame(&body).is_ok();
    let envelope = RawEnvelope::new(
        "manual",
        Value::String(body),
        IngestMethod::Http,
        Some(TransmitMethod::Aprs),
    );
    enqueue(&state, QueueName::Aprs, envelope, Some(decode_success)).await
}

async fn post_manual_lora(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<impl IntoResponse, IngressError> {
    let (payload, decode_success) = coerce_json_object(
        serde_json::from_str(&body).unwrap_or(Value::String(body)),
    );
    let envelope = RawEnvelope::new(
        "manual",
        payload,
        IngestMethod::Http,
        Some(TransmitMethod::LoRa),
    );
    enqueue(&state, QueueName::Lora, envelope, Some(decode_success)).await
}

/// Interprets `raw_data` as the LoRa/HTTP-JSON worker eventually will:
/// an object passes through unchanged; a string is given one chance to
/// parse as JSON; anything else is reported as a decode failure but
/// still forwarded so the worker (and the persisted `RawMessage`) can
/// record the attempt.
fn coerce_json_object(raw: Value) -> (Value, bool) {
    match &raw {
        Value::Object(_) => (raw, true),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed) if parsed.is_object() => (parsed, true),
            _ => (raw, false),
        },
        _ => (raw, false),
    }
}

#[derive(Debug, Serialize)]
struct ManualTriggerBody {
    sender: &'static str,
    payload: i64,
    timestamp: DateTime<Utc>,
}

async fn get_manual_prediction(
    State(state): State<Arc<AppState>>,
    Path(payload_id): Path<i64>,
) -> Result<impl IntoResponse, IngressError> {
    push_manual_trigger(&state, QueueName::PredictFlight, payload_id).await
}

async fn get_manual_path(
    State(state): State<Arc<AppState>>,
    Path(payload_id): Path<i64>,
) -> Result<impl IntoResponse, IngressError> {
    push_manual_trigger(&state, QueueName::GetPath, payload_id).await
}

async fn push_manual_trigger(
    state: &AppState,
    queue: QueueName,
    payload_id: i64,
) -> Result<impl IntoResponse + use<>, IngressError> {
    let body = ManualTriggerBody {
        sender: "manual",
        payload: payload_id,
        timestamp: Utc::now(),
    };
    let serialized = serde_json::to_string(&body).map_err(|_| IngressError::Serialization)?;
    let queue_number = state
        .broker
        .push(queue, serialized)
        .await
        .map_err(|_| IngressError::BrokerUnavailable)?;
    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(Accepted {
            queue_number,
            decode_success: None,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct TelemetryQuery {
    #[serde(rename = "payloadId")]
    payload_id: i64,
    timestamp: DateTime<Utc>,
}

async fn get_telemetry(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TelemetryQuery>,
) -> Result<impl IntoResponse, IngressError> {
    let row = state
        .store
        .get_telemetry(query.payload_id, query.timestamp)
        .await
        .map_err(|_| IngressError::BrokerUnavailable)?;
    Ok(Json(row))
}

async fn get_health() -> impl IntoResponse {
    axum::http::StatusCode::OK
}
