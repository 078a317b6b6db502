use std::sync::Arc;
use std::sync::LazyLock;

use groundstation_shared::{IngestMethod, RawEnvelope, TransmitMethod};
use regex::Regex;
use serde_json::{Map, Value};

use crate::state::AppState;
use crate::units;

use super::{process_envelope, DispatchError};

static FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<src>[^>]+)>(?P<dest>[^,:]+),(?P<path>[^:]+):(?P<info>.*)$").unwrap()
});

static POSITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^!
        (?P<lat_deg>\d{2})(?P<lat_min>\d{2}\.\d+)(?P<lat_dir>[NSns])
        (?P<table>.)
        (?P<lon_deg>\d{3})(?P<lon_min>\d{2}\.\d+)(?P<lon_dir>[EWew])
        (?P<symbol>.)
        (?:(?P<course>\d{3})/(?P<speed>\d{3}))?
        (?P<comment>.*)$
        ",
    )
    .unwrap()
});

static ALTITUDE_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<feet>\d+)\s*ft").unwrap());

/// Parses an APRS text frame (`SRC>DEST,PATH:INFO`) into the dict the
/// Normalizer expects (§4.3 "APRS worker"), plus the digipeater path as
/// the message's relay identifier. Handles the `!`-prefixed position
/// report without timestamp; `@`/`/`-prefixed timestamped reports and
/// compressed position formats are out of scope for this exercise's
/// fixture set.
pub fn decode_frame(raw: &str) -> Result<(Map<String, Value>, Option<String>), DispatchError> {
    let caps = FRAME_RE
        .captures(raw.trim())
        .ok_or_else(|| DispatchError::Terminal("not a valid APRS frame".into()))?;

    let src = caps["src"].to_string();
    let dest = caps["dest"].to_string();
    let path = caps["path"].to_string();
    let info = &caps["info"];

    let pos = POSITION_RE
        .captures(info)
        .ok_or_else(|| DispatchError::Terminal("unsupported APRS info field".into()))?;

    let lat_deg: f64 = pos["lat_deg"].parse().unwrap_or(0.0);
    let lat_min: f64 = pos["lat_min"].parse().unwrap_or(0.0);
    let mut lat = lat_deg + lat_min / 60.0;
    if matches!(&pos["lat_dir"], "S" | "s") {
        lat = -lat;
    }

    let lon_deg: f64 = pos["lon_deg"].parse().unwrap_or(0.0);
    let lon_min: f64 = pos["lon_min"].parse().unwrap_or(0.0);
    let mut lon = lon_deg + lon_min / 60.0;
    if matches!(&pos["lon_dir"], "W" | "w") {
        lon = -lon;
    }

    let mut map = Map::new();
    map.insert("callsign".into(), Value::String(src.clone()));
    map.insert("latitude".into(), serde_json::json!(lat));
    map.insert("longitude".into(), serde_json::json!(lon));

    if let (Some(course), Some(speed_knots)) = (pos.name("course"), pos.name("speed")) {
        let course: f64 = course.as_str().parse().unwrap_or(0.0);
        let speed_knots: f64 = speed_knots.as_str().parse().unwrap_or(0.0);
        map.insert("course".into(), serde_json::json!(course));
        map.insert(
            "speed".into(),
            serde_json::json!(units::knots_to_mps(speed_knots)),
        );
    }

    let comment = pos["comment"].to_string();
    if let Some(alt_caps) = ALTITUDE_COMMENT_RE.captures(&comment) {
        let feet: f64 = alt_caps["feet"].parse().unwrap_or(0.0);
        map.insert(
            "altitude".into(),
            serde_json::json!(units::feet_to_meters(feet)),
        );
    }

    let mut extra = Map::new();
    extra.insert("destination".into(), Value::String(dest));
    extra.insert("path".into(), Value::String(path.clone()));
    extra.insert(
        "symbol_table".into(),
        Value::String(pos["table"].to_string()),
    );
    extra.insert(
        "symbol_id".into(),
        Value::String(pos["symbol"].to_string()),
    );
    extra.insert("comment".into(), Value::String(comment));
    map.insert("extra".into(), Value::Object(extra));

    Ok((map, Some(path)))
}

pub async fn process(
    state: &Arc<AppState>,
    envelope_json: &str,
) -> Result<(), DispatchError> {
    let envelope: RawEnvelope =
        serde_json::from_str(envelope_json).map_err(|e| DispatchError::Terminal(e.to_string()))?;

    let frame = envelope
        .payload
        .as_str()
        .ok_or_else(|| DispatchError::Terminal("APRS payload must be a string".into()))?
        .to_string();

    process_envelope(
        state,
        IngestMethod::Http,
        Some(TransmitMethod::Aprs),
        envelope.sender.clone(),
        envelope.payload.clone(),
        envelope.timestamp,
        move |_raw| decode_frame(&frame),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_boundary_test_frame() {
        let frame = "KF8ABL-11>APRS,WIDE2-1:!4217.67N/08342.78WO010/005100 ft";
        let (map, relay) = decode_frame(frame).unwrap();
        assert_eq!(map["callsign"], "KF8ABL-11");
        assert!((map["latitude"].as_f64().unwrap() - 42.2945).abs() < 1e-3);
        assert!((map["longitude"].as_f64().unwrap() - -83.713).abs() < 1e-3);
        assert_eq!(map["course"], 10.0);
        assert!((map["speed"].as_f64().unwrap() - (5.0 * 1852.0 / 3600.0)).abs() < 1e-6);
        assert!((map["altitude"].as_f64().unwrap() - 30.48).abs() < 1e-6);
        assert_eq!(relay.as_deref(), Some("WIDE2-1"));
    }
}
