use std::sync::Arc;
use std::time::Duration;

use groundstation_shared::QueueName;

use crate::scheduler;
use crate::state::AppState;
use crate::workers::{aprs, iridium, lora, DispatchError};

/// An item that exhausted its retries, recorded on the dead-letter list
/// for operator inspection (SPEC_FULL §11).
#[derive(serde::Serialize)]
struct DeadLetter<'a> {
    queue: &'a str,
    attempts: u32,
    error: String,
    payload: String,
}

/// Blocks on the union of every protocol and scheduler work list and
/// hands each popped item to its worker on its own task, so one slow
/// item never stalls the others draining (§4.2, §5). Runs until the
/// shared shutdown signal fires.
pub async fn run(state: Arc<AppState>) {
    let lists: Vec<QueueName> = QueueName::PROTOCOL_LISTS
        .iter()
        .chain(QueueName::SCHEDULER_LISTS.iter())
        .copied()
        .collect();

    let mut shutdown = state.shutdown_subscribe();
    loop {
        let popped = tokio::select! {
            popped = state.broker.pop_any(&lists) => popped,
            _ = shutdown.recv() => {
                tracing::info!("dispatcher shutting down");
                return;
            }
        };

        let (queue, payload) = match popped {
            Ok(item) => item,
            Err(err) => {
                tracing::error!(error = %err, "broker pop_any failed, retrying shortly");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let state = state.clone();
        tokio::spawn(async move {
            dispatch_with_retry(&state, queue, payload).await;
        });
    }
}

async fn dispatch_with_retry(state: &Arc<AppState>, queue: QueueName, payload: String) {
    let max_attempts = state.config.dispatcher_retry_max_attempts;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let result = run_once(state, queue, &payload).await;

        match result {
            Ok(()) => return,
            Err(DispatchError::Terminal(reason)) => {
                tracing::warn!(queue = queue.as_str(), reason, "dropping terminal failure");
                return;
            }
            Err(DispatchError::Transient(err)) => {
                if attempt >= max_attempts {
                    tracing::error!(
                        queue = queue.as_str(),
                        attempt,
                        error = %err,
                        "exhausted retries, moving to dead letter"
                    );
                    send_to_dead_letter(state, queue, attempt, &err.to_string(), &payload).await;
                    return;
                }
                let backoff = state.config.dispatcher_retry_base
                    * state.config.dispatcher_retry_factor.pow(attempt - 1);
                tracing::warn!(
                    queue = queue.as_str(),
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    error = %err,
                    "transient failure, retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

async fn run_once(
    state: &Arc<AppState>,
    queue: QueueName,
    payload: &str,
) -> Result<(), DispatchError> {
    match queue {
        QueueName::Aprs => aprs::process(state, payload).await,
        QueueName::Iridium => iridium::process(state, payload).await,
        QueueName::Lora => lora::process(state, payload).await,
        QueueName::PredictFlight => scheduler::handle_predict_flight_trigger(state, payload).await,
        QueueName::GetPath => scheduler::handle_get_path_trigger(state, payload).await,
        QueueName::DeadLetter => {
            Err(DispatchError::Terminal("dead_letter is not consumed".into()))
        }
    }
}

async fn send_to_dead_letter(
    state: &Arc<AppState>,
    queue: QueueName,
    attempts: u32,
    error: &str,
    payload: &str,
) {
    let record = DeadLetter {
        queue: queue.as_str(),
        attempts,
        error: error.to_string(),
        payload: payload.to_string(),
    };
    let Ok(serialized) = serde_json::to_string(&record) else {
        return;
    };
    if let Err(err) = state.broker.push(QueueName::DeadLetter, serialized).await {
        tracing::error!(error = %err, "failed to push to dead_letter list");
    }
}
