use std::sync::Arc;

use groundstation_shared::QueueName;
use serde::Deserialize;

use crate::state::AppState;
use crate::workers::DispatchError;

const QUEUE_DEPTH_REPORT_INTERVAL: tokio::time::Duration = tokio::time::Duration::from_secs(10);

/// Payload shape for the `predict_flight`/`get_path` manual-trigger
/// lists (§4.6): `{sender, payload: <payload_id>, timestamp}`.
#[derive(Debug, Deserialize)]
struct ManualTrigger {
    #[allow(dead_code)]
    sender: String,
    payload: i64,
    #[allow(dead_code)]
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// Spawns the two periodic ticks (§4.6): path-view refresh on its own
/// cadence, and the flight-prediction hook on an hourly cadence. Both
/// run until the shared shutdown signal fires.
pub async fn run(state: Arc<AppState>) {
    let path_view = tokio::spawn(run_path_view_tick(state.clone()));
    let flight_prediction = tokio::spawn(run_flight_prediction_tick(state.clone()));
    let queue_depth = tokio::spawn(run_queue_depth_report(state.clone()));
    let _ = tokio::join!(path_view, flight_prediction, queue_depth);
}

async fn run_path_view_tick(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(state.config.path_view_refresh_interval);
    let mut shutdown = state.shutdown_subscribe();
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = refresh_path_view(&state).await {
                    tracing::error!(error = %err, "scheduled path view refresh failed");
                }
            }
            _ = shutdown.recv() => return,
        }
    }
}

async fn run_flight_prediction_tick(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(state.config.flight_prediction_interval);
    let mut shutdown = state.shutdown_subscribe();
    loop {
        tokio::select! {
            _ = interval.tick() => run_flight_prediction_hook(),
            _ = shutdown.recv() => return,
        }
    }
}

/// §4.6: frequent, idempotent; never called from the hot ingest path.
async fn refresh_path_view(state: &Arc<AppState>) -> anyhow::Result<()> {
    state.begin_db_write();
    let result = state.store.refresh_path_view().await;
    state.end_db_write();
    result
}

/// Reports the depth of every protocol and scheduler list every 10s
/// (§11 "Queue depth reporting"), the same cadence hut8-soar's `run.rs`
/// reporter task uses for its own worker-pool gauges.
async fn run_queue_depth_report(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(QUEUE_DEPTH_REPORT_INTERVAL);
    let mut shutdown = state.shutdown_subscribe();
    let lists: Vec<QueueName> = QueueName::PROTOCOL_LISTS
        .iter()
        .chain(QueueName::SCHEDULER_LISTS)
        .copied()
        .collect();
    loop {
        tokio::select! {
            _ = interval.tick() => {
                for queue in &lists {
                    match state.broker.len(*queue).await {
                        Ok(depth) => {
                            metrics::gauge!("queue_depth", "queue" => queue.as_str()).set(depth as f64);
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, queue = queue.as_str(), "failed to read queue depth");
                        }
                    }
                }
            }
            _ = shutdown.recv() => return,
        }
    }
}

/// Deliberately out-of-scope stub (§4.6): trajectory prediction is not
/// part of this system.
fn run_flight_prediction_hook() {
    tracing::debug!("flight prediction hook fired (stub)");
}

/// Handles a manual trigger on the `get_path` list (§4.6): routes to the
/// same refresh handler a scheduled tick would use. `payload_id` is
/// accepted but unused since the view refresh is global, matching the
/// original implementation's `path_generator.py` manual-trigger path.
pub async fn handle_get_path_trigger(
    state: &Arc<AppState>,
    envelope_json: &str,
) -> Result<(), DispatchError> {
    let _trigger: ManualTrigger =
        serde_json::from_str(envelope_json).map_err(|e| DispatchError::Terminal(e.to_string()))?;
    refresh_path_view(state).await.map_err(DispatchError::Transient)
}

/// Handles a manual trigger on the `predict_flight` list (§4.6).
pub async fn handle_predict_flight_trigger(
    _state: &Arc<AppState>,
    envelope_json: &str,
) -> Result<(), DispatchError> {
    let trigger: ManualTrigger =
        serde_json::from_str(envelope_json).map_err(|e| DispatchError::Terminal(e.to_string()))?;
    tracing::debug!(payload_id = trigger.payload, "manual flight prediction trigger (stub)");
    Ok(())
}
