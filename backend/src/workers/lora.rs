use std::sync::Arc;

use groundstation_shared::{IngestMethod, RawEnvelope, TransmitMethod};
use serde_json::{Map, Value};

use crate::state::AppState;

use super::{process_envelope, DispatchError};

/// LoRa and generic direct-HTTP-JSON traffic share this work list: both
/// arrive already as a JSON object, so there is nothing transport-specific
/// to decode. The two are distinguished downstream only by whether
/// `transmit_method` is `Some(LoRa)` or `None` on the persisted raw
/// message. Neither transport carries its own relay identifier, so the
/// caller falls back to the envelope's sender.
pub fn decode_body(body: &Value) -> Result<(Map<String, Value>, Option<String>), DispatchError> {
    let object = body
        .as_object()
        .cloned()
        .ok_or_else(|| DispatchError::Terminal("LoRa/HTTP-JSON payload must be a JSON object".into()))?;
    Ok((object, None))
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
        envelope.transmit_method,
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
    fn passes_through_json_object() {
        let body = serde_json::json!({"callsign": "K8XYZ", "latitude": 42.0, "longitude": -83.0});
        let (map, relay) = decode_body(&body).unwrap();
        assert_eq!(map["callsign"], "K8XYZ");
        assert_eq!(relay, None);
    }

    #[test]
    fn rejects_non_object_payload() {
        let body = serde_json::json!("not an object");
        assert!(decode_body(&body).is_err());
    }
}
