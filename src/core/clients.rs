use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::protocol::wire::ClientsResponse;

/// Point-in-time view of connected Modbus-TCP consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub count: usize,
    pub peers: Vec<SocketAddr>,
}

impl From<ClientSnapshot> for ClientsResponse {
    fn from(snapshot: ClientSnapshot) -> Self {
        ClientsResponse {
            count: snapshot.count,
            ips: snapshot
                .peers
                .iter()
                .map(|peer| peer.ip().to_string())
                .collect(),
        }
    }
}

/// Live registry of TCP connections. Nothing here is persisted.
#[derive(Default)]
pub struct ClientRegistry {
    next_id: AtomicU64,
    peers: Mutex<BTreeMap<u64, SocketAddr>>,
}

impl ClientRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records a new connection; the returned guard removes it again when
    /// the connection task ends.
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> ClientGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.peers.lock().insert(id, peer);
        log::info!("Modbus-TCP client connected: {peer}");
        ClientGuard {
            registry: Arc::clone(self),
            id,
        }
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        let peers: Vec<SocketAddr> = self.peers.lock().values().copied().collect();
        ClientSnapshot {
            count: peers.len(),
            peers,
        }
    }

    pub fn count(&self) -> usize {
        self.peers.lock().len()
    }
}

pub struct ClientGuard {
    registry: Arc<ClientRegistry>,
    id: u64,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        if let Some(peer) = self.registry.peers.lock().remove(&self.id) {
            log::info!("Modbus-TCP client disconnected: {peer}");
        }
    }
}
