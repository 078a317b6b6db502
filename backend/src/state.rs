use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Notify};
use tokio::time::{Duration, Instant};

use crate::broker::Broker;
use crate::config::Config;
use crate::persister::Store;
use crate::spatial::CellIndexer;
use crate::subscription::SubscriptionRegistry;

/// Shared handles every task (dispatcher, realtime dispatcher, scheduler,
/// ingress routes, WebSocket handler) reaches through: cheaply
/// `Clone`able, background tasks signaled off one `shutdown_tx`,
/// in-flight async DB writes tracked so shutdown can drain them before
/// the process exits.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<dyn Broker>,
    pub store: Arc<dyn Store>,
    pub registry: Arc<SubscriptionRegistry>,
    pub cell_indexer: CellIndexer,
    pub config: Arc<Config>,

    /// Broadcast shutdown notifications to long-running background tasks.
    pub shutdown_tx: broadcast::Sender<()>,

    /// Number of in-flight async DB writes (upserts, raw-message inserts).
    pub pending_db_writes: Arc<AtomicUsize>,

    /// Notifies waiters when pending DB writes changes.
    pub db_write_notify: Arc<Notify>,
}

impl AppState {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn Store>,
        config: Arc<Config>,
    ) -> Self {
        let cell_indexer = CellIndexer::new(config.h3_resolution);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            broker,
            store,
            registry: Arc::new(SubscriptionRegistry::new()),
            cell_indexer,
            config,
            shutdown_tx,
            pending_db_writes: Arc::new(AtomicUsize::new(0)),
            db_write_notify: Arc::new(Notify::new()),
        }
    }

    pub fn shutdown_subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn begin_db_write(&self) {
        self.pending_db_writes.fetch_add(1, Ordering::SeqCst);
    }

    pub fn end_db_write(&self) {
        if self.pending_db_writes.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.db_write_notify.notify_waiters();
        }
    }

    pub fn pending_db_write_count(&self) -> usize {
        self.pending_db_writes.load(Ordering::SeqCst)
    }

    pub async fn wait_for_db_writes(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.pending_db_write_count() == 0 {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            let remaining = deadline.saturating_duration_since(now);
            if tokio::time::timeout(remaining, self.db_write_notify.notified())
                .await
                .is_err()
            {
                return self.pending_db_write_count() == 0;
            }
        }
    }
}
