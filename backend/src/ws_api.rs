use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use groundstation_shared::ws::{
    ClientEnvelope, GetInitialDataPayload, GetTelemetryPayload, ServerEnvelope,
    TelemetryResponseData, UpdateViewportPayload,
};
use tokio::sync::mpsc;

use crate::persister::path_segments_to_geojson;
use crate::state::AppState;

const DEFAULT_CATCHUP_HISTORY_SECONDS: i64 = 300;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(upgrade))
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-client lifecycle (§4.8): register an empty subscription set on
/// accept, drive its outgoing half off an mpsc channel fed by both this
/// client's own request/reply loop and the Realtime Dispatcher's
/// broadcasts, and unregister on disconnect regardless of how the
/// connection ended.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEnvelope>(64);
    let reply_tx = tx.clone();
    let client_id = state.registry.connect(tx);

    let mut shutdown = state.shutdown_subscribe();
    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                match outgoing {
                    Some(envelope) => {
                        let Ok(text) = serde_json::to_string(&envelope) else { continue };
                        if ws_tx.send(Message::Text(Utf8Bytes::from(text))).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&state, client_id, &text, &reply_tx).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            _ = shutdown.recv() => break,
        }
    }

    state.registry.disconnect(client_id);
}

async fn handle_client_message(
    state: &Arc<AppState>,
    client_id: crate::subscription::ClientId,
    text: &str,
    reply_to: &mpsc::Sender<ServerEnvelope>,
) {
    let envelope: ClientEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            let _ = reply_to
                .send(ServerEnvelope::error("error", err.to_string(), None))
                .await;
            return;
        }
    };

    let reply = match envelope.ty.as_str() {
        "getInitialData" => handle_get_initial_data(state, client_id, envelope).await,
        "updateViewport" => handle_update_viewport(state, client_id, envelope).await,
        "getTelemetry" => handle_get_telemetry(state, envelope).await,
        other => ServerEnvelope::error(
            "unknownResponse",
            format!("unknown message type: {other}"),
            None,
        ),
    };
    let _ = reply_to.send(reply).await;
}

async fn handle_get_initial_data(
    state: &Arc<AppState>,
    client_id: crate::subscription::ClientId,
    envelope: ClientEnvelope,
) -> ServerEnvelope {
    let request_id = envelope.request_id.clone();
    let payload: GetInitialDataPayload = match serde_json::from_value(envelope.payload) {
        Ok(payload) => payload,
        Err(err) => return ServerEnvelope::error("error", err.to_string(), request_id),
    };

    let cells = match state.cell_indexer.cells_for_bbox(payload.bbox) {
        Ok(cells) => cells.into_iter().collect(),
        Err(err) => return ServerEnvelope::error("error", err.to_string(), request_id),
    };
    state.registry.update_subscriptions(client_id, cells);

    let since = Utc::now() - chrono::Duration::seconds(payload.history_seconds.max(0));
    match state.store.path_segments(payload.bbox, since).await {
        Ok(segments) => ServerEnvelope::data(
            "initialPathSegments",
            path_segments_to_geojson(&segments),
            request_id,
        ),
        Err(err) => ServerEnvelope::error("error", err.to_string(), request_id),
    }
}

async fn handle_update_viewport(
    state: &Arc<AppState>,
    client_id: crate::subscription::ClientId,
    envelope: ClientEnvelope,
) -> ServerEnvelope {
    let request_id = envelope.request_id.clone();
    let payload: UpdateViewportPayload = match serde_json::from_value(envelope.payload) {
        Ok(payload) => payload,
        Err(err) => return ServerEnvelope::error("error", err.to_string(), request_id),
    };

    let cells = match state.cell_indexer.cells_for_bbox(payload.bbox) {
        Ok(cells) => cells.into_iter().collect(),
        Err(err) => return ServerEnvelope::error("error", err.to_string(), request_id),
    };
    let (joined, _left) = state.registry.update_subscriptions(client_id, cells);

    if joined.is_empty() {
        // No new cells: nothing to catch up on. The caller still holds
        // its prior subscriptions, so this is not an error condition.
        return ServerEnvelope::data(
            "catchUpPathSegments",
            serde_json::json!({ "type": "FeatureCollection", "features": [] }),
            request_id,
        );
    }

    let since = Utc::now() - chrono::Duration::seconds(DEFAULT_CATCHUP_HISTORY_SECONDS);
    match state.store.path_segments(payload.bbox, since).await {
        Ok(segments) => ServerEnvelope::data(
            "catchUpPathSegments",
            path_segments_to_geojson(&segments),
            request_id,
        ),
        Err(err) => ServerEnvelope::error("error", err.to_string(), request_id),
    }
}

async fn handle_get_telemetry(state: &Arc<AppState>, envelope: ClientEnvelope) -> ServerEnvelope {
    let request_id = envelope.request_id.clone();
    let payload: GetTelemetryPayload = match serde_json::from_value(envelope.payload) {
        Ok(payload) => payload,
        Err(err) => return ServerEnvelope::error("error", err.to_string(), request_id),
    };

    let cache_key = format!("telemetry:{}:{}", payload.payload_id, payload.timestamp);
    if let Ok(Some(cached)) = state.broker.kv_get(&cache_key).await {
        let telemetry = serde_json::from_str(&cached).ok();
        return ServerEnvelope::data(
            "telemetryResponse",
            serde_json::to_value(TelemetryResponseData {
                payload_id: payload.payload_id,
                timestamp: payload.timestamp,
                telemetry,
            })
            .unwrap_or(serde_json::Value::Null),
            request_id,
        );
    }

    let timestamp = match chrono::DateTime::parse_from_rfc3339(&payload.timestamp) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(err) => return ServerEnvelope::error("error", err.to_string(), request_id),
    };

    let telemetry = match state.store.get_telemetry(payload.payload_id, timestamp).await {
        Ok(row) => row,
        Err(err) => return ServerEnvelope::error("error", err.to_string(), request_id),
    };

    let to_cache = serde_json::to_string(&telemetry).unwrap_or("null".to_string());
    let _ = state
        .broker
        .kv_set(&cache_key, to_cache, state.config.telemetry_cache_ttl)
        .await;

    ServerEnvelope::data(
        "telemetryResponse",
        serde_json::to_value(TelemetryResponseData {
            payload_id: payload.payload_id,
            timestamp: payload.timestamp,
            telemetry,
        })
        .unwrap_or(serde_json::Value::Null),
        request_id,
    )
}
