use std::sync::Arc;

use groundstation_shared::{IngestMethod, RawEnvelope, TransmitMethod};
use serde_json::{Map, Value};

use crate::state::AppState;

use super::{process_envelope, DispatchError};

/// Decodes the satellite transport's request body (§4.3 "Iridium
/// worker"): the JWT has already been checked by the Ingress API, so by
/// the time this runs the envelope is trusted. `data` is a hex string
/// whose decoded UTF-8 bytes are the balloon's JSON telemetry; `serial`
/// and `transmit_time`, when present on the outer body, ride along as
/// extras since the Normalizer has no canonical field for either. The
/// serial, stringified, doubles as the message's relay identifier.
pub fn decode_body(body: &Value) -> Result<(Map<String, Value>, Option<String>), DispatchError> {
    let obj = body
        .as_object()
        .ok_or_else(|| DispatchError::Terminal("Iridium body must be a JSON object".into()))?;

    let hex_data = obj
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::Terminal("Iridium body missing `data`".into()))?;

    let bytes = hex::decode(hex_data)
        .map_err(|e| DispatchError::Terminal(format!("`data` is not valid hex: {e}")))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| DispatchError::Terminal(format!("decoded `data` is not utf-8: {e}")))?;

    let inner: Value = serde_json::from_str(&text)
        .map_err(|e| DispatchError::Terminal(format!("decoded `data` is not JSON: {e}")))?;
    let mut map = inner
        .as_object()
        .cloned()
        .ok_or_else(|| DispatchError::Terminal("decoded `data` is not a JSON object".into()))?;

    let mut extra = match map.remove("extra") {
        Some(Value::Object(existing)) => existing,
        _ => Map::new(),
    };
    let relay = obj.get("serial").map(|serial| {
        extra.entry("serial").or_insert_with(|| serial.clone());
        match serial {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    });
    if let Some(transmit_time) = obj.get("transmit_time") {
        extra
            .entry("transmit_time")
            .or_insert_with(|| transmit_time.clone());
    }
    if !extra.is_empty() {
        map.insert("extra".into(), Value::Object(extra));
    }

    Ok((map, relay))
}

pub async fn process(
    state: &Arc<AppState>,
    envelope_json: &str,
) -> Result<(), DispatchError> {
    let envelope: RawEnvelope =
        serde_json::from_str(envelope_json).map_err(|e| DispatchError::Terminal(e.to_string()))?;

    process_envelope(
        state,
        IngestMethod::Http,
        Some(TransmitMethod::Iridium),
        envelope.sender.clone(),
        envelope.payload.clone(),
        envelope.timestamp,
        |raw| decode_body(raw),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_hex_json_body_and_carries_serial() {
        let inner = serde_json::json!({"callsign": "K8XYZ", "latitude": 42.0, "longitude": -83.0});
        let hex_data = hex::encode(inner.to_string());
        let body = serde_json::json!({"data": hex_data, "serial": 123, "transmit_time": "2026-01-01T00:00:00Z"});

        let (map, relay) = decode_body(&body).unwrap();
        assert_eq!(map["callsign"], "K8XYZ");
        assert_eq!(map["extra"]["serial"], 123);
        assert_eq!(map["extra"]["transmit_time"], "2026-01-01T00:00:00Z");
        assert_eq!(relay.as_deref(), Some("123"));
    }

    #[test]
    fn rejects_non_hex_data() {
        let body = serde_json::json!({"data": "not hex!!"});
        assert!(decode_body(&body).is_err());
    }
}
