use std::sync::Arc;
use std::time::Duration;

use groundstation_shared::ws::{NewPositionData, ServerEnvelope};
use groundstation_shared::PositionEvent;

use crate::state::AppState;

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(2);

/// Single process-wide subscriber on the realtime-updates fan-out
/// channel (§4.7). Resubscribes with fixed backoff on broker
/// disconnect, leaving client subscription state in the registry
/// untouched.
pub async fn run(state: Arc<AppState>) {
    let mut shutdown = state.shutdown_subscribe();
    loop {
        let mut rx = match state.broker.subscribe("realtime-updates").await {
            Ok(rx) => rx,
            Err(err) => {
                tracing::error!(error = %err, "failed to subscribe to realtime-updates, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(RESUBSCRIBE_BACKOFF) => continue,
                    _ = shutdown.recv() => return,
                }
            }
        };

        loop {
            tokio::select! {
                message = rx.recv() => {
                    match message {
                        Some(message) => handle_message(&state, &message).await,
                        None => {
                            tracing::warn!("realtime-updates channel closed, resubscribing");
                            tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
    }
}

async fn handle_message(state: &Arc<AppState>, message: &str) {
    let event: PositionEvent = match serde_json::from_str(message) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(error = %err, "malformed PositionEvent on realtime-updates");
            return;
        }
    };

    let cell = match state.cell_indexer.cell_for_point(event.lat, event.lon) {
        Ok(cell) => cell,
        Err(err) => {
            tracing::warn!(error = %err, "could not index PositionEvent for broadcast");
            return;
        }
    };

    let data = NewPositionData {
        payload_id: event.payload_id,
        telemetry_id: event.telemetry_id,
        lat: event.lat,
        lon: event.lon,
        ts: event.ts,
    };
    let envelope = ServerEnvelope::data(
        "newPosition",
        serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        None,
    );
    state.registry.broadcast_to_cell(cell, envelope).await;
}
