pub mod aprs;
pub mod iridium;
pub mod lora;

use std::sync::Arc;

use chrono::Utc;
use groundstation_shared::{IngestMethod, Packet, PositionEvent, TransmitMethod};
use serde_json::Map;

use crate::error::NormalizeError;
use crate::normalizer;
use crate::state::AppState;

/// §4.2 failure taxonomy: transient failures (broker/DB unavailable) are
/// retried by the dispatcher; terminal failures (bad input) are logged
/// and dropped without retry.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("transient: {0}")]
    Transient(#[from] anyhow::Error),
    #[error("terminal: {0}")]
    Terminal(String),
}

impl From<NormalizeError> for DispatchError {
    fn from(e: NormalizeError) -> Self {
        DispatchError::Terminal(e.to_string())
    }
}

/// The shared per-worker template (§4.3 steps 1-9). `decode` turns the
/// transport-specific wire payload into the dict the Normalizer expects,
/// plus the per-message relay identifier (the APRS digipeater path, the
/// Iridium serial, ...) when the transport carries one; everything else
/// (raw-message persistence, clamp-to-envelope-time, payload resolution,
/// upsert, provenance link-back, publish) is common across
/// APRS/Iridium/LoRa/HTTP-JSON. All of this worker's DB writes are
/// tracked as in-flight so graceful shutdown can drain them.
pub async fn process_envelope(
    state: &Arc<AppState>,
    ingest_method: IngestMethod,
    transmit_method: Option<TransmitMethod>,
    sender: String,
    raw_payload: serde_json::Value,
    envelope_timestamp: chrono::DateTime<Utc>,
    decode: impl FnOnce(
        &serde_json::Value,
    ) -> Result<(Map<String, serde_json::Value>, Option<String>), DispatchError>,
) -> Result<(), DispatchError> {
    state.begin_db_write();
    let result = process_envelope_writes(
        state,
        ingest_method,
        transmit_method,
        sender,
        raw_payload,
        envelope_timestamp,
        decode,
    )
    .await;
    state.end_db_write();
    result
}

async fn process_envelope_writes(
    state: &Arc<AppState>,
    ingest_method: IngestMethod,
    transmit_method: Option<TransmitMethod>,
    sender: String,
    raw_payload: serde_json::Value,
    envelope_timestamp: chrono::DateTime<Utc>,
    decode: impl FnOnce(
        &serde_json::Value,
    ) -> Result<(Map<String, serde_json::Value>, Option<String>), DispatchError>,
) -> Result<(), DispatchError> {
    let raw_data_str = raw_payload.to_string();
    let raw_msg_id = state
        .store
        .insert_raw_message(
            &sender,
            &raw_data_str,
            ingest_method_str(ingest_method),
            transmit_method.map(|t| t.as_str()),
        )
        .await
        .map_err(DispatchError::Transient)?;

    let (decoded, relay) = decode(&raw_payload)?;
    let relay = relay.unwrap_or_else(|| sender.clone());
    let mut packet: Packet = normalizer::normalize(&decoded)?;

    // §4.3 step 5: a packet cannot be from the future of its own relay.
    if packet.data_time > envelope_timestamp {
        let skew_ms = (packet.data_time - envelope_timestamp).num_milliseconds();
        metrics::histogram!("telemetry_clock_skew_ms").record(skew_ms as f64);
        tracing::warn!(skew_ms, "clamping packet data_time to envelope timestamp");
        packet.data_time = envelope_timestamp;
    }

    let callsign = resolve_identity(state, &packet).await?;

    let payload_id = state
        .store
        .get_or_create_payload(&callsign)
        .await
        .map_err(DispatchError::Transient)?;

    let (telemetry_id, was_inserted) = state
        .store
        .upsert_telemetry(&packet, payload_id)
        .await
        .map_err(DispatchError::Transient)?;

    state
        .store
        .link_raw_to_telemetry(raw_msg_id, telemetry_id, callsign.as_str(), &relay)
        .await
        .map_err(DispatchError::Transient)?;

    if was_inserted {
        let event = PositionEvent {
            telemetry_id,
            payload_id,
            lat: packet.latitude,
            lon: packet.longitude,
            ts: packet.data_time,
        };
        let message = serde_json::to_string(&event).map_err(|e| anyhow::anyhow!(e))?;
        state
            .broker
            .publish("realtime-updates", message)
            .await
            .map_err(DispatchError::Transient)?;
    }

    Ok(())
}

/// Resolves the packet's owning callsign, applying the `serial`
/// provisioning decision (DESIGN.md open question #1): a packet with no
/// callsign but a provisioned `serial` resolves through the provisioning
/// table; an unprovisioned serial is rejected as bad input.
async fn resolve_identity(
    state: &Arc<AppState>,
    packet: &Packet,
) -> Result<groundstation_shared::Callsign, DispatchError> {
    if let Some(callsign) = &packet.callsign {
        return Ok(callsign.clone());
    }
    let serial = packet
        .serial
        .ok_or_else(|| DispatchError::Terminal("packet has neither callsign nor serial".into()))?;

    state
        .store
        .resolve_serial(serial)
        .await
        .map_err(DispatchError::Transient)?
        .ok_or_else(|| {
            DispatchError::Terminal(format!("serial {serial} has no callsign provisioning"))
        })
}

fn ingest_method_str(method: IngestMethod) -> &'static str {
    match method {
        IngestMethod::Http => "HTTP",
    }
}
