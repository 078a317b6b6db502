use async_trait::async_trait;
use chrono::{DateTime, Utc};
use groundstation_shared::{Callsign, Packet, TelemetryRow};
use serde_json::Map;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use groundstation_shared::ws::Bbox;

/// A single time-bucketed line segment from the path materialized view
/// (§3, §4.5, §4.8).
#[derive(Debug, Clone)]
pub struct PathSegmentFeature {
    pub payload_id: i64,
    pub segment_start_time: DateTime<Utc>,
    pub segment_end_time: DateTime<Utc>,
    /// `(lon, lat)` points of the line geometry, in order.
    pub points: Vec<(f64, f64)>,
}

/// The Persister's operation surface (§4.5). `PgStore` is the real
/// Postgres/PostGIS implementation; `InMemoryStore` backs tests that
/// don't have a live database (this exercise's constraint).
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_or_create_payload(&self, callsign: &Callsign) -> anyhow::Result<i64>;

    /// `serial -> callsign` provisioning lookup (DESIGN.md open-question
    /// decision). Returns `None` when the serial has not been
    /// provisioned, in which case the caller rejects the packet.
    async fn resolve_serial(&self, serial: i64) -> anyhow::Result<Option<Callsign>>;

    async fn insert_raw_message(
        &self,
        sender: &str,
        raw_data: &str,
        ingest_method: &str,
        transmit_method: Option<&str>,
    ) -> anyhow::Result<i64>;

    /// Upsert contract (§4.5 central invariant). Returns
    /// `(telemetry_id, was_inserted)`.
    async fn upsert_telemetry(
        &self,
        packet: &Packet,
        payload_id: i64,
    ) -> anyhow::Result<(Uuid, bool)>;

    async fn link_raw_to_telemetry(
        &self,
        raw_msg_id: i64,
        telemetry_id: Uuid,
        source_id: &str,
        relay: &str,
    ) -> anyhow::Result<()>;

    async fn refresh_path_view(&self) -> anyhow::Result<()>;

    async fn get_telemetry(
        &self,
        payload_id: i64,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<Option<TelemetryRow>>;

    async fn path_segments(
        &self,
        bbox: Bbox,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PathSegmentFeature>>;
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, min: u32, max: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(min)
            .max_connections(max)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .test_before_acquire(true)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_or_create_payload(&self, callsign: &Callsign) -> anyhow::Result<i64> {
        // Single statement with a unique constraint on `callsign`
        // (§4.5), unlike the get-then-insert pattern in the original
        // implementation.
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO payloads (callsign)
            VALUES ($1)
            ON CONFLICT (callsign) DO UPDATE SET callsign = EXCLUDED.callsign
            RETURNING id
            "#,
        )
        .bind(callsign.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn resolve_serial(&self, serial: i64) -> anyhow::Result<Option<Callsign>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT callsign FROM serial_provisions WHERE serial = $1")
                .bind(serial)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((callsign,)) => Ok(Some(Callsign::parse(&callsign)?)),
            None => Ok(None),
        }
    }

    async fn insert_raw_message(
        &self,
        sender: &str,
        raw_data: &str,
        ingest_method: &str,
        transmit_method: Option<&str>,
    ) -> anyhow::Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO raw_messages (source_id, sources, raw_data, ingest_method, transmit_method, relay)
            VALUES ($1, ARRAY[$1, 'UMICH-BALLOONS'], $2, $3, $4, $1)
            RETURNING id
            "#,
        )
        .bind(sender)
        .bind(raw_data)
        .bind(ingest_method)
        .bind(transmit_method)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn upsert_telemetry(
        &self,
        packet: &Packet,
        payload_id: i64,
    ) -> anyhow::Result<(Uuid, bool)> {
        let extra = serde_json::Value::Object(packet.extra.clone());
        // `xmax = 0` is Postgres's own tell for "this tuple was created
        // by the current command", i.e. the INSERT branch fired rather
        // than the ON CONFLICT UPDATE branch (grounded on the original
        // implementation's upload_telemetry upsert).
        let row: (Uuid, bool) = sqlx::query_as(
            r#"
            INSERT INTO telemetry
                (payload_id, data_time, position, accuracy, altitude, speed, course, battery, extra, last_updated)
            VALUES
                ($1, $2, ST_SetSRID(ST_MakePoint($4, $3), 4326), $5, $6, $7, $8, $9, $10, now() AT TIME ZONE 'utc')
            ON CONFLICT (payload_id, data_time) DO UPDATE SET
                position = CASE
                    WHEN EXCLUDED.accuracy IS NOT NULL
                     AND (telemetry.accuracy IS NULL OR EXCLUDED.accuracy < telemetry.accuracy)
                    THEN EXCLUDED.position ELSE telemetry.position END,
                accuracy = CASE
                    WHEN EXCLUDED.accuracy IS NOT NULL
                     AND (telemetry.accuracy IS NULL OR EXCLUDED.accuracy < telemetry.accuracy)
                    THEN EXCLUDED.accuracy ELSE telemetry.accuracy END,
                altitude = CASE WHEN telemetry.altitude IS NULL AND EXCLUDED.altitude IS NOT NULL THEN EXCLUDED.altitude ELSE telemetry.altitude END,
                speed = CASE WHEN telemetry.speed IS NULL AND EXCLUDED.speed IS NOT NULL THEN EXCLUDED.speed ELSE telemetry.speed END,
                course = CASE WHEN telemetry.course IS NULL AND EXCLUDED.course IS NOT NULL THEN EXCLUDED.course ELSE telemetry.course END,
                battery = CASE WHEN telemetry.battery IS NULL AND EXCLUDED.battery IS NOT NULL THEN EXCLUDED.battery ELSE telemetry.battery END,
                extra = CASE WHEN telemetry.extra IS NULL AND EXCLUDED.extra IS NOT NULL THEN EXCLUDED.extra ELSE telemetry.extra END,
                last_updated = now() AT TIME ZONE 'utc'
            RETURNING id, (xmax = 0) AS was_inserted
            "#,
        )
        .bind(payload_id)
        .bind(packet.data_time)
        .bind(packet.latitude)
        .bind(packet.longitude)
        .bind(packet.accuracy)
        .bind(packet.altitude)
        .bind(packet.speed)
        .bind(packet.course)
        .bind(packet.battery)
        .bind(extra)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn link_raw_to_telemetry(
        &self,
        raw_msg_id: i64,
        telemetry_id: Uuid,
        source_id: &str,
        relay: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE raw_messages
            SET source_id = $2,
                telemetry_id = $3,
                sources = ARRAY[$2, $4] || sources,
                relay = $4
            WHERE id = $1
            "#,
        )
        .bind(raw_msg_id)
        .bind(source_id)
        .bind(telemetry_id)
        .bind(relay)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn refresh_path_view(&self) -> anyhow::Result<()> {
        sqlx::query("REFRESH MATERIALIZED VIEW CONCURRENTLY mv_payload_path_segments")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_telemetry(
        &self,
        payload_id: i64,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<Option<TelemetryRow>> {
        let row: Option<(
            Uuid,
            i64,
            String,
            DateTime<Utc>,
            f64,
            f64,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<serde_json::Value>,
            DateTime<Utc>,
        )> = sqlx::query_as(
            r#"
            SELECT t.id, t.payload_id, p.callsign, t.data_time,
                   ST_Y(t.position::geometry), ST_X(t.position::geometry),
                   t.accuracy, t.altitude, t.speed, t.course, t.battery, t.extra, t.last_updated
            FROM telemetry t
            JOIN payloads p ON p.id = t.payload_id
            WHERE t.payload_id = $1 AND t.data_time = $2
            "#,
        )
        .bind(payload_id)
        .bind(timestamp)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(id, payload_id, callsign, data_time, lat, lon, accuracy, altitude, speed, course, battery, extra, last_updated)| {
                TelemetryRow {
                    id,
                    payload_id,
                    callsign,
                    data_time,
                    latitude: lat,
                    longitude: lon,
                    accuracy,
                    altitude,
                    speed,
                    course,
                    battery,
                    extra: extra
                        .and_then(|v| v.as_object().cloned())
                        .unwrap_or_default(),
                    last_updated,
                }
            },
        ))
    }

    async fn path_segments(
        &self,
        bbox: Bbox,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PathSegmentFeature>> {
        let rows: Vec<(i64, DateTime<Utc>, DateTime<Utc>, Vec<(f64, f64)>)> = sqlx::query_as(
            r#"
            SELECT payload_id, segment_start_time, segment_end_time,
                   array_agg(ARRAY[ST_X(pt.geom), ST_Y(pt.geom)] ORDER BY path_order) AS points
            FROM mv_payload_path_segments,
                 LATERAL ST_DumpPoints(path_segment::geometry) AS pt(path_order, geom)
            WHERE segment_end_time >= $1
              AND path_segment::geometry && ST_MakeEnvelope($2, $3, $4, $5, 4326)
            GROUP BY payload_id, segment_start_time, segment_end_time
            "#,
        )
        .bind(since)
        .bind(bbox.min_lon)
        .bind(bbox.min_lat)
        .bind(bbox.max_lon)
        .bind(bbox.max_lat)
        .fetch_all(&self.pool)
        .await
        .unwrap_or_default();

        Ok(rows
            .into_iter()
            .map(|(payload_id, start, end, points)| PathSegmentFeature {
                payload_id,
                segment_start_time: start,
                segment_end_time: end,
                points,
            })
            .collect())
    }
}

/// Encodes a `PathSegmentFeature` list as a GeoJSON `FeatureCollection`
/// of `LineString` features (§6, §4.8).
pub fn path_segments_to_geojson(segments: &[PathSegmentFeature]) -> serde_json::Value {
    let features: Vec<serde_json::Value> = segments
        .iter()
        .map(|seg| {
            serde_json::json!({
                "type": "Feature",
                "geometry": {
                    "type": "LineString",
                    "coordinates": seg.points.iter().map(|(lon, lat)| vec![*lon, *lat]).collect::<Vec<_>>(),
                },
                "properties": {
                    "payload_id": seg.payload_id,
                    "segment_start_time": seg.segment_start_time.to_rfc3339(),
                    "segment_end_time": seg.segment_end_time.to_rfc3339(),
                },
            })
        })
        .collect();
    serde_json::json!({ "type": "FeatureCollection", "features": features })
}

/// In-memory `Store` fake for tests (§10.4): exercises the upsert
/// contract and provenance linking without a live Postgres instance.
pub struct InMemoryStore {
    inner: std::sync::Mutex<InMemoryStoreInner>,
}

#[derive(Default)]
struct InMemoryStoreInner {
    next_payload_id: i64,
    payloads: Map<String, serde_json::Value>,
    serials: std::collections::HashMap<i64, String>,
    next_raw_id: i64,
    raw_messages: std::collections::HashMap<i64, RawMessageRow>,
    telemetry: std::collections::HashMap<(i64, DateTime<Utc>), TelemetryRow>,
}

#[derive(Clone)]
struct RawMessageRow {
    pub telemetry_id: Option<Uuid>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(InMemoryStoreInner {
                next_payload_id: 1,
                ..Default::default()
            }),
        }
    }

    pub fn provision_serial(&self, serial: i64, callsign: &str) {
        self.inner
            .lock()
            .unwrap()
            .serials
            .insert(serial, callsign.to_string());
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_or_create_payload(&self, callsign: &Callsign) -> anyhow::Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner.payloads.get(callsign.as_str()) {
            return Ok(id.as_i64().unwrap());
        }
        let id = inner.next_payload_id;
        inner.next_payload_id += 1;
        inner
            .payloads
            .insert(callsign.as_str().to_string(), serde_json::json!(id));
        Ok(id)
    }

    async fn resolve_serial(&self, serial: i64) -> anyhow::Result<Option<Callsign>> {
        let inner = self.inner.lock().unwrap();
        Ok(match inner.serials.get(&serial) {
            Some(callsign) => Some(Callsign::parse(callsign)?),
            None => None,
        })
    }

    async fn insert_raw_message(
        &self,
        _sender: &str,
        _raw_data: &str,
        _ingest_method: &str,
        _transmit_method: Option<&str>,
    ) -> anyhow::Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_raw_id;
        inner.next_raw_id += 1;
        inner
            .raw_messages
            .insert(id, RawMessageRow { telemetry_id: None });
        Ok(id)
    }

    async fn upsert_telemetry(
        &self,
        packet: &Packet,
        payload_id: i64,
    ) -> anyhow::Result<(Uuid, bool)> {
        let mut inner = self.inner.lock().unwrap();
        let key = (payload_id, packet.data_time);
        if let Some(existing) = inner.telemetry.get(&key).cloned() {
            let better_accuracy = match (packet.accuracy, existing.accuracy) {
                (Some(new), Some(old)) => new < old,
                (Some(_), None) => true,
                _ => false,
            };
            let mut updated = existing.clone();
            if better_accuracy {
                updated.latitude = packet.latitude;
                updated.longitude = packet.longitude;
                updated.accuracy = packet.accuracy;
            }
            if updated.altitude.is_none() {
                updated.altitude = packet.altitude;
            }
            if updated.speed.is_none() {
                updated.speed = packet.speed;
            }
            if updated.course.is_none() {
                updated.course = packet.course;
            }
            if updated.battery.is_none() {
                updated.battery = packet.battery;
            }
            if updated.extra.is_empty() {
                updated.extra = packet.extra.clone();
            }
            updated.last_updated = Utc::now();
            let id = updated.id;
            inner.telemetry.insert(key, updated);
            Ok((id, false))
        } else {
            let id = Uuid::new_v4();
            inner.telemetry.insert(
                key,
                TelemetryRow {
                    id,
                    payload_id,
                    callsign: String::new(),
                    data_time: packet.data_time,
                    latitude: packet.latitude,
                    longitude: packet.longitude,
                    accuracy: packet.accuracy,
                    altitude: packet.altitude,
                    speed: packet.speed,
                    course: packet.course,
                    battery: packet.battery,
                    extra: packet.extra.clone(),
                    last_updated: Utc::now(),
                },
            );
            Ok((id, true))
        }
    }

    async fn link_raw_to_telemetry(
        &self,
        raw_msg_id: i64,
        telemetry_id: Uuid,
        _source_id: &str,
        _relay: &str,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(row) = inner.raw_messages.get_mut(&raw_msg_id) {
            row.telemetry_id = Some(telemetry_id);
        }
        Ok(())
    }

    async fn refresh_path_view(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_telemetry(
        &self,
        payload_id: i64,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<Option<TelemetryRow>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .telemetry
            .get(&(payload_id, timestamp))
            .cloned())
    }

    async fn path_segments(
        &self,
        _bbox: Bbox,
        _since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PathSegmentFeature>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map as JsonMap;

    fn packet(lat: f64, lon: f64, accuracy: Option<f64>, altitude: Option<f64>) -> Packet {
        Packet {
            callsign: Some(Callsign::parse("KD2XYZ").unwrap()),
            serial: None,
            latitude: lat,
            longitude: lon,
            data_time: DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            accuracy,
            altitude,
            speed: None,
            course: None,
            battery: None,
            extra: JsonMap::new(),
        }
    }

    #[tokio::test]
    async fn upsert_idempotence() {
        let store = InMemoryStore::new();
        let p = packet(40.0, -75.0, Some(10.0), Some(100.0));
        let (id1, inserted1) = store.upsert_telemetry(&p, 1).await.unwrap();
        assert!(inserted1);
        let (id2, inserted2) = store.upsert_telemetry(&p, 1).await.unwrap();
        assert_eq!(id1, id2);
        assert!(!inserted2);
    }

    #[tokio::test]
    async fn upsert_merge_prefers_better_accuracy_and_fills_forward() {
        let store = InMemoryStore::new();
        let first = packet(40.0, -75.0, Some(50.0), None);
        let second = packet(40.1, -75.1, Some(10.0), Some(1000.0));

        let (id1, _) = store.upsert_telemetry(&first, 1).await.unwrap();
        let (id2, inserted) = store.upsert_telemetry(&second, 1).await.unwrap();
        assert_eq!(id1, id2);
        assert!(!inserted);

        let row = store
            .get_telemetry(1, first.data_time)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.accuracy, Some(10.0));
        assert_eq!(row.latitude, 40.1);
        assert_eq!(row.altitude, Some(1000.0));
    }

    #[tokio::test]
    async fn worse_accuracy_does_not_overwrite_position() {
        let store = InMemoryStore::new();
        let good = packet(40.0, -75.0, Some(10.0), None);
        let worse = packet(41.0, -76.0, Some(50.0), None);

        store.upsert_telemetry(&good, 1).await.unwrap();
        store.upsert_telemetry(&worse, 1).await.unwrap();

        let row = store
            .get_telemetry(1, good.data_time)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.accuracy, Some(10.0));
        assert_eq!(row.latitude, 40.0);
    }
}
