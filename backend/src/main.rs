mod broker;
mod config;
mod dispatcher;
mod error;
mod ingress;
mod jwt;
mod normalizer;
mod persister;
mod realtime;
mod scheduler;
mod spatial;
mod state;
mod subscription;
mod units;
mod workers;
mod ws_api;

use std::sync::Arc;

use axum::Router;

use broker::{Broker, InMemoryBroker, RedisBroker};
use config::Config;
use persister::{InMemoryStore, PgStore, Store};
use state::AppState;

async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            eprintln!("Failed to install Ctrl+C handler: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                eprintln!("Failed to install SIGTERM handler: {err}");
            }
        }
    };

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    #[cfg(not(unix))]
    ctrl_c.await;

    state.request_shutdown();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let broker: Arc<dyn Broker> = if cfg!(feature = "testing") {
        Arc::new(InMemoryBroker::new())
    } else {
        Arc::new(RedisBroker::connect(&config.broker_url).await?)
    };

    let store: Arc<dyn Store> = if cfg!(feature = "testing") {
        Arc::new(InMemoryStore::new())
    } else {
        Arc::new(
            PgStore::connect(&config.database_url, config.db_pool_min, config.db_pool_max).await?,
        )
    };

    let config = Arc::new(config);
    let state = Arc::new(AppState::new(broker, store, config.clone()));

    let dispatcher_handle = tokio::spawn(dispatcher::run(state.clone()));
    let realtime_handle = tokio::spawn(realtime::run(state.clone()));
    let scheduler_handle = tokio::spawn(scheduler::run(state.clone()));

    let app: Router = Router::new()
        .merge(ingress::router())
        .merge(ws_api::router())
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    state.request_shutdown();
    state.wait_for_db_writes(tokio::time::Duration::from_secs(10)).await;

    for handle in [dispatcher_handle, realtime_handle, scheduler_handle] {
        handle.abort();
    }

    Ok(())
}
