use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use groundstation_shared::QueueName;
use tokio::sync::mpsc;

/// The Queue Broker external dependency (§2, §6): durable ordered lists
/// per protocol, a fan-out publish/subscribe channel, and an ephemeral
/// KV cache. One implementation backed by a real Redis service, one
/// in-memory implementation for tests behind the `testing` feature.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Appends `payload` to `queue`, returning the list's new length.
    async fn push(&self, queue: QueueName, payload: String) -> anyhow::Result<i64>;

    /// Blocks until an element is available on any of `queues`, returning
    /// the list it came from and the popped payload. This is the union
    /// pop the Dispatcher blocks on (§4.2, §5).
    async fn pop_any(&self, queues: &[QueueName]) -> anyhow::Result<(QueueName, String)>;

    /// Publishes `message` on the fan-out channel (§4.7).
    async fn publish(&self, channel: &str, message: String) -> anyhow::Result<()>;

    /// Subscribes to the fan-out channel, returning a receiver that
    /// yields messages as they arrive. Reconnection on broker disconnect
    /// is the caller's responsibility (§4.7 "resubscribe with fixed
    /// backoff").
    async fn subscribe(&self, channel: &str) -> anyhow::Result<mpsc::Receiver<String>>;

    async fn kv_get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn kv_set(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()>;

    /// Approximate current depth of `queue`, used by the queue-depth
    /// reporter (SPEC_FULL §11).
    async fn len(&self, queue: QueueName) -> anyhow::Result<i64>;
}

pub struct RedisBroker {
    client: redis::Client,
    manager: redis::aio::ConnectionManager,
}

impl RedisBroker {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { client, manager })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push(&self, queue: QueueName, payload: String) -> anyhow::Result<i64> {
        let mut conn = self.manager.clone();
        let len: i64 = redis::cmd("RPUSH")
            .arg(queue.as_str())
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn pop_any(&self, queues: &[QueueName]) -> anyhow::Result<(QueueName, String)> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("BLPOP");
        for q in queues {
            cmd.arg(q.as_str());
        }
        // block indefinitely (§4.2 "no deadline"); interruptible by the
        // caller's own select over a shutdown signal.
        cmd.arg(0);
        let (list, payload): (String, String) = cmd.query_async(&mut conn).await?;
        let queue = queues
            .iter()
            .copied()
            .find(|q| q.as_str() == list)
            .ok_or_else(|| anyhow::anyhow!("BLPOP returned unknown list {list}"))?;
        Ok((queue, payload))
    }

    async fn publish(&self, channel: &str, message: String) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(message)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> anyhow::Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(256);
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        tokio::spawn(async move {
            use futures::StreamExt;
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn kv_get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn kv_set(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn len(&self, queue: QueueName) -> anyhow::Result<i64> {
        let mut conn = self.manager.clone();
        let len: i64 = redis::cmd("LLEN")
            .arg(queue.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }
}

/// In-memory broker used by integration tests and the `testing` feature.
#[derive(Default)]
pub struct InMemoryBroker {
    lists: Mutex<std::collections::HashMap<String, VecDeque<String>>>,
    subscribers: Mutex<std::collections::HashMap<String, Vec<mpsc::Sender<String>>>>,
    kv: Mutex<std::collections::HashMap<String, String>>,
    notify: tokio::sync::Notify,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn push(&self, queue: QueueName, payload: String) -> anyhow::Result<i64> {
        let len = {
            let mut lists = self.lists.lock().unwrap();
            let list = lists.entry(queue.as_str().to_string()).or_default();
            list.push_back(payload);
            list.len() as i64
        };
        self.notify.notify_waiters();
        Ok(len)
    }

    async fn pop_any(&self, queues: &[QueueName]) -> anyhow::Result<(QueueName, String)> {
        loop {
            {
                let mut lists = self.lists.lock().unwrap();
                for q in queues {
                    if let Some(list) = lists.get_mut(q.as_str()) {
                        if let Some(item) = list.pop_front() {
                            return Ok((*q, item));
                        }
                    }
                }
            }
            self.notify.notified().await;
        }
    }

    async fn publish(&self, channel: &str, message: String) -> anyhow::Result<()> {
        let subs = self.subscribers.lock().unwrap().get(channel).cloned();
        if let Some(subs) = subs {
            for sub in subs {
                let _ = sub.send(message.clone()).await;
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> anyhow::Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(256);
        self.subscribers
            .lock()
            .unwrap()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn kv_get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.kv.lock().unwrap().get(key).cloned())
    }

    async fn kv_set(&self, key: &str, value: String, _ttl: Duration) -> anyhow::Result<()> {
        self.kv.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn len(&self, queue: QueueName) -> anyhow::Result<i64> {
        Ok(self
            .lists
            .lock()
            .unwrap()
            .get(queue.as_str())
            .map(|l| l.len() as i64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_pop_any_returns_fifo_order() {
        let broker = InMemoryBroker::new();
        broker.push(QueueName::Aprs, "one".into()).await.unwrap();
        broker.push(QueueName::Aprs, "two".into()).await.unwrap();
        let (q, payload) = broker.pop_any(&[QueueName::Aprs]).await.unwrap();
        assert_eq!(q, QueueName::Aprs);
        assert_eq!(payload, "one");
    }

    #[tokio::test]
    async fn kv_roundtrip() {
        let broker = InMemoryBroker::new();
        broker
            .kv_set("k", "v".into(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(broker.kv_get("k").await.unwrap(), Some("v".to_string()));
    }
}
