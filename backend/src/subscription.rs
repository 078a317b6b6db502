use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::{DashMap, DashSet};
use h3o::CellIndex;
use groundstation_shared::ws::ServerEnvelope;
use tokio::sync::mpsc;

pub type ClientId = u64;

/// The Subscription Registry (§4.9): `room_connections: cell -> {conn}`
/// and its inverse `socket_subscriptions: conn -> {cell}`, kept
/// consistent by `update_subscriptions`. Grounded on the original
/// implementation's `ConnectionManager`, translated from asyncio
/// coroutines guarded by nothing (single event loop) into concurrent
/// maps guarded per-entry by `dashmap`.
#[derive(Default)]
pub struct SubscriptionRegistry {
    room_connections: DashMap<CellIndex, DashSet<ClientId>>,
    socket_subscriptions: DashMap<ClientId, HashSet<CellIndex>>,
    senders: DashMap<ClientId, mpsc::Sender<ServerEnvelope>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new client connection with an empty subscription set
    /// (§4.8 "on accept, register an empty cell subscription set").
    pub fn connect(&self, sender: mpsc::Sender<ServerEnvelope>) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.senders.insert(id, sender);
        self.socket_subscriptions.insert(id, HashSet::new());
        id
    }

    /// Computes `joined = new - old`, `left = old - new`, mutates both
    /// maps, and returns `(joined, left)` (§4.9).
    pub fn update_subscriptions(
        &self,
        client: ClientId,
        new_cells: HashSet<CellIndex>,
    ) -> (Vec<CellIndex>, Vec<CellIndex>) {
        let mut current = self
            .socket_subscriptions
            .get_mut(&client)
            .expect("update_subscriptions called on unknown client");

        let joined: Vec<CellIndex> = new_cells.difference(&current).copied().collect();
        let left: Vec<CellIndex> = current.difference(&new_cells).copied().collect();

        for cell in &left {
            if let Some(room) = self.room_connections.get(cell) {
                room.remove(&client);
                if room.is_empty() {
                    drop(room);
                    self.room_connections.remove(cell);
                }
            }
        }
        for cell in &joined {
            self.room_connections
                .entry(*cell)
                .or_default()
                .insert(client);
        }

        *current = new_cells;
        (joined, left)
    }

    /// Removes `client` from every cell it held and drops its sender
    /// (§4.9: "remove the connection from every cell it held; drop cells
    /// that become empty").
    pub fn disconnect(&self, client: ClientId) {
        if let Some((_, cells)) = self.socket_subscriptions.remove(&client) {
            for cell in cells {
                if let Some(room) = self.room_connections.get(&cell) {
                    room.remove(&client);
                    if room.is_empty() {
                        drop(room);
                        self.room_connections.remove(&cell);
                    }
                }
            }
        }
        self.senders.remove(&client);
    }

    /// Snapshots the cell's member set before iterating so mid-iteration
    /// disconnects are safe; sockets that fail mid-broadcast are
    /// collected and torn down after the loop completes (§4.9).
    pub async fn broadcast_to_cell(&self, cell: CellIndex, message: ServerEnvelope) {
        let Some(room) = self.room_connections.get(&cell) else {
            return;
        };
        let members: Vec<ClientId> = room.iter().map(|m| *m).collect();
        drop(room);

        let mut failed = Vec::new();
        for client in members {
            let Some(sender) = self.senders.get(&client) else {
                continue;
            };
            if sender.send(message.clone()).await.is_err() {
                failed.push(client);
            }
        }
        for client in failed {
            self.disconnect(client);
        }
    }

    pub fn current_cells(&self, client: ClientId) -> HashSet<CellIndex> {
        self.socket_subscriptions
            .get(&client)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn room_members(&self, cell: CellIndex) -> HashSet<ClientId> {
        self.room_connections
            .get(&cell)
            .map(|r| r.iter().map(|m| *m).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use h3o::{LatLng, Resolution};

    fn cell(lat: f64, lon: f64) -> CellIndex {
        LatLng::new(lat, lon).unwrap().to_cell(Resolution::Seven)
    }

    #[tokio::test]
    async fn invariant_symmetry_holds_after_subscribe_and_disconnect() {
        let registry = SubscriptionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        let client = registry.connect(tx);

        let a = cell(40.0, -75.0);
        let b = cell(41.0, -76.0);
        let mut cells = HashSet::new();
        cells.insert(a);
        cells.insert(b);

        registry.update_subscriptions(client, cells.clone());
        for c in &cells {
            assert!(registry.room_members(*c).contains(&client));
        }

        registry.disconnect(client);
        for c in &cells {
            assert!(!registry.room_members(*c).contains(&client));
        }
        assert!(registry.current_cells(client).is_empty());
    }

    #[tokio::test]
    async fn update_subscriptions_reports_joined_and_left() {
        let registry = SubscriptionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        let client = registry.connect(tx);

        let a = cell(40.0, -75.0);
        let b = cell(41.0, -76.0);

        let mut first = HashSet::new();
        first.insert(a);
        let (joined, left) = registry.update_subscriptions(client, first);
        assert_eq!(joined, vec![a]);
        assert!(left.is_empty());

        let mut second = HashSet::new();
        second.insert(b);
        let (joined, left) = registry.update_subscriptions(client, second);
        assert_eq!(joined, vec![b]);
        assert_eq!(left, vec![a]);
    }
}
