use chrono::{DateTime, Utc};
use groundstation_shared::{Callsign, Packet};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use crate::error::NormalizeError;

/// `canonical -> {aliases}`, consulted once per field at parse time
/// (§4.4, §9 "Dynamic alias resolution"). Every alias plus the
/// canonical name itself is treated as "known" when collecting extras.
struct FieldAliases {
    canonical: &'static str,
    aliases: &'static [&'static str],
}

const ALIAS_TABLE: &[FieldAliases] = &[
    FieldAliases { canonical: "callsign", aliases: &["call"] },
    FieldAliases { canonical: "serial", aliases: &[] },
    FieldAliases {
        canonical: "latitude",
        aliases: &["lat", "latitude_deg", "lat_deg", "lat_dd"],
    },
    FieldAliases {
        canonical: "longitude",
        aliases: &["lon", "lng", "longitude_deg", "lon_deg", "lon_dd"],
    },
    FieldAliases { canonical: "accuracy", aliases: &["acc", "hdop", "cep"] },
    FieldAliases {
        canonical: "altitude",
        aliases: &["alt", "elevation", "elev", "height", "hgt"],
    },
    FieldAliases { canonical: "speed", aliases: &["spd"] },
    FieldAliases {
        canonical: "course",
        aliases: &["heading", "hdg", "cse", "direction", "dir"],
    },
    FieldAliases {
        canonical: "battery",
        aliases: &["battery_voltage", "voltage", "batt_v", "vbatt", "bat", "volt", "v"],
    },
    FieldAliases { canonical: "data_time", aliases: &["timestamp", "time"] },
    FieldAliases { canonical: "extra", aliases: &["telem", "telemetry"] },
];

fn find_field<'a>(map: &'a Map<String, Value>, canonical: &str) -> Option<&'a Value> {
    if let Some(v) = map.get(canonical) {
        return Some(v);
    }
    let entry = ALIAS_TABLE.iter().find(|e| e.canonical == canonical)?;
    entry.aliases.iter().find_map(|alias| map.get(*alias))
}

fn is_known_key(key: &str) -> bool {
    ALIAS_TABLE
        .iter()
        .any(|e| e.canonical == key || e.aliases.contains(&key))
}

/// Partitions unknown top-level keys plus an explicit `extra` map into a
/// single extras map. On key clash, the explicit `extra` entry wins over
/// a top-level sibling (§4.4), matching `collect_extra_fields_revised`.
fn collect_extras(map: &Map<String, Value>) -> Map<String, Value> {
    let mut extras = Map::new();
    for (k, v) in map {
        if !is_known_key(k) {
            extras.insert(k.clone(), v.clone());
        }
    }
    if let Some(Value::Object(explicit)) = find_field(map, "extra") {
        for (k, v) in explicit {
            extras.insert(k.clone(), v.clone());
        }
    }
    extras
}

static DMS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?x)
        ^\s*
        (?P<deg>\d+(?:\.\d+)?)
        [:\s°]+
        (?:(?P<min>\d+(?:\.\d+)?)[:\s'"]*)?
        (?:(?P<sec>\d+(?:\.\d+)?)[:\s'"]*)?
        \s*(?P<dir>[NSEWnsew])?\s*$
        "#,
    )
    .unwrap()
});

pub fn parse_coordinate(value: &Value, is_latitude: bool) -> Result<f64, NormalizeError> {
    let field = if is_latitude { "latitude" } else { "longitude" };
    let parsed = match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                // an integer input is decimal degrees / 10,000 (§4.4).
                i as f64 / 10_000.0
            } else if let Some(f) = n.as_f64() {
                f
            } else {
                return Err(NormalizeError::field(field, "unsupported numeric value"));
            }
        }
        Value::String(s) => parse_dms_or_plain(s, field, is_latitude)?,
        _ => return Err(NormalizeError::field(field, "must be a number or string")),
    };

    let (lo, hi) = if is_latitude { (-90.0, 90.0) } else { (-180.0, 180.0) };
    if parsed < lo || parsed > hi {
        return Err(NormalizeError::field(field, "out of range"));
    }
    Ok(parsed)
}

fn parse_dms_or_plain(s: &str, field: &str, is_latitude: bool) -> Result<f64, NormalizeError> {
    if let Some(caps) = DMS_RE.captures(s.trim()) {
        let deg: f64 = caps["deg"].parse().unwrap_or(0.0);
        let min: f64 = caps
            .name("min")
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0.0);
        let sec: f64 = caps
            .name("sec")
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0.0);
        if min >= 60.0 || sec >= 60.0 {
            return Err(NormalizeError::field(field, "minutes/seconds must be < 60"));
        }

        let mut value = deg + min / 60.0 + sec / 3600.0;
        if let Some(dir) = caps.name("dir") {
            let dir = dir.as_str().to_ascii_uppercase();
            if is_latitude && !matches!(dir.as_str(), "N" | "S") {
                return Err(NormalizeError::field(field, "direction must be N or S for latitude"));
            }
            if !is_latitude && !matches!(dir.as_str(), "E" | "W") {
                return Err(NormalizeError::field(field, "direction must be E or W for longitude"));
            }
            if matches!(dir.as_str(), "S" | "W") {
                value = -value;
            }
        }
        return Ok(value);
    }
    s.trim()
        .parse::<f64>()
        .map_err(|_| NormalizeError::field(field, "could not parse as coordinate"))
}

/// Battery-voltage coercion heuristic (§4.4, §9). Order matters:
/// negative is rejected before the millivolt/decivolt heuristics run.
pub fn normalize_voltage(value: &Value) -> Result<Option<f64>, NormalizeError> {
    if value.is_null() {
        return Ok(None);
    }
    let is_integer = value.is_i64() || value.is_u64();
    let raw = value
        .as_f64()
        .ok_or_else(|| NormalizeError::field("battery", "must be numeric"))?;

    if raw < 0.0 {
        return Err(NormalizeError::field("battery", "must be non-negative"));
    }
    if raw > 1000.0 {
        return Ok(Some(raw / 1000.0));
    }
    if is_integer && (20.0..=60.0).contains(&raw) {
        tracing::warn!(value = raw, "battery heuristic: interpreting as tenths of a volt");
        return Ok(Some(raw / 10.0));
    }
    Ok(Some(raw))
}

fn as_f64(value: &Value, field: &str) -> Result<f64, NormalizeError> {
    value
        .as_f64()
        .ok_or_else(|| NormalizeError::field(field, "must be numeric"))
}

/// Normalizes an arbitrary-cased, alias-heavy dict into a canonical
/// `Packet` (§4.4). `callsign`/`serial` identifier enforcement and
/// `serial` provisioning are handled by the caller (worker), since
/// resolving `serial -> callsign` requires a database round trip the
/// Normalizer itself has no access to.
pub fn normalize(map: &Map<String, Value>) -> Result<Packet, NormalizeError> {
    let callsign = match find_field(map, "callsign") {
        Some(Value::String(s)) => Some(
            Callsign::parse(s)
                .map_err(|e| NormalizeError::field("callsign", e.to_string()))?,
        ),
        Some(Value::Null) | None => None,
        Some(_) => return Err(NormalizeError::field("callsign", "must be a string")),
    };

    let serial = match find_field(map, "serial") {
        Some(v) if !v.is_null() => Some(
            v.as_i64()
                .ok_or_else(|| NormalizeError::field("serial", "must be an integer"))?,
        ),
        _ => None,
    };

    if callsign.is_none() && serial.is_none() {
        return Err(NormalizeError::NoIdentifier);
    }

    let latitude = find_field(map, "latitude")
        .ok_or_else(|| NormalizeError::field("latitude", "missing"))
        .and_then(|v| parse_coordinate(v, true))?;
    let longitude = find_field(map, "longitude")
        .ok_or_else(|| NormalizeError::field("longitude", "missing"))
        .and_then(|v| parse_coordinate(v, false))?;

    let data_time = match find_field(map, "data_time") {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| NormalizeError::field("data_time", e.to_string()))?,
        _ => Utc::now(),
    };

    let accuracy = match find_field(map, "accuracy") {
        Some(v) if !v.is_null() => Some(as_f64(v, "accuracy")?),
        _ => None,
    };

    let altitude = match find_field(map, "altitude") {
        Some(v) if !v.is_null() => Some(as_f64(v, "altitude")?),
        _ => None,
    };

    let speed = match find_field(map, "speed") {
        Some(v) if !v.is_null() => Some(as_f64(v, "speed")?),
        _ => None,
    };

    let course = match find_field(map, "course") {
        Some(v) if !v.is_null() => {
            let c = as_f64(v, "course")?;
            Some(c.rem_euclid(360.0))
        }
        _ => None,
    };

    let battery = match find_field(map, "battery") {
        Some(v) => normalize_voltage(v)?,
        None => None,
    };

    let extra = collect_extras(map);

    Ok(Packet {
        callsign,
        serial,
        latitude,
        longitude,
        data_time,
        accuracy,
        altitude,
        speed,
        course,
        battery,
        extra,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn voltage_millivolts() {
        assert_eq!(normalize_voltage(&json!(3892)).unwrap(), Some(3.892));
    }

    #[test]
    fn voltage_decivolt_heuristic() {
        assert_eq!(normalize_voltage(&json!(38)).unwrap(), Some(3.8));
    }

    #[test]
    fn voltage_plain_float_in_heuristic_range_is_not_converted() {
        // 38.0 is a float, not an int, so the tenths-of-a-volt heuristic
        // must not apply even though it falls in [20,60].
        assert_eq!(normalize_voltage(&json!(38.0)).unwrap(), Some(38.0));
    }

    #[test]
    fn voltage_direct_volts() {
        assert_eq!(normalize_voltage(&json!(3.8)).unwrap(), Some(3.8));
    }

    #[test]
    fn voltage_negative_rejected() {
        assert!(normalize_voltage(&json!(-1)).is_err());
    }

    #[test]
    fn dms_latitude() {
        let v = parse_coordinate(&json!("42:17.67N"), true).unwrap();
        assert!((v - 42.2945).abs() < 1e-3);
    }

    #[test]
    fn dms_longitude() {
        let v = parse_coordinate(&json!("083:42.78W"), false).unwrap();
        assert!((v - -83.713).abs() < 1e-3);
    }

    #[test]
    fn integer_coordinate_is_divided_by_10000() {
        let v = parse_coordinate(&json!(423000), true).unwrap();
        assert!((v - 42.3).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_rejected() {
        assert!(parse_coordinate(&json!(95.0), true).is_err());
    }

    #[test]
    fn dms_minutes_over_60_rejected() {
        assert!(parse_coordinate(&json!("40 70 00 N"), true).is_err());
    }

    #[test]
    fn dms_seconds_over_60_rejected() {
        assert!(parse_coordinate(&json!("40 10 70 N"), true).is_err());
    }

    #[test]
    fn dms_direction_must_match_axis() {
        assert!(parse_coordinate(&json!("42:17.67N"), false).is_err());
        assert!(parse_coordinate(&json!("083:42.78W"), true).is_err());
    }

    #[test]
    fn extras_collect_siblings_and_explicit_map_with_explicit_winning() {
        let map: Map<String, Value> = serde_json::from_value(json!({
            "callsign": "KD2XYZ",
            "lat": 40.0,
            "lon": -75.0,
            "foo": "sibling",
            "extra": { "foo": "explicit", "bar": 1 }
        }))
        .unwrap();
        let packet = normalize(&map).unwrap();
        assert_eq!(packet.extra.get("foo").unwrap(), "explicit");
        assert_eq!(packet.extra.get("bar").unwrap(), 1);
    }

    #[test]
    fn course_is_clamped_into_0_360() {
        let map: Map<String, Value> = serde_json::from_value(json!({
            "callsign": "KD2XYZ",
            "lat": 40.0,
            "lon": -75.0,
            "course": 370.0
        }))
        .unwrap();
        let packet = normalize(&map).unwrap();
        assert_eq!(packet.course, Some(10.0));
    }

    #[test]
    fn missing_identifier_is_rejected() {
        let map: Map<String, Value> = serde_json::from_value(json!({
            "lat": 40.0,
            "lon": -75.0,
        }))
        .unwrap();
        assert!(normalize(&map).is_err());
    }
}
