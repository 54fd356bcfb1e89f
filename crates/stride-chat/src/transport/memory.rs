//! In-process pub/sub network.
//!
//! Every `MemoryNode` made from the same `MemoryNetwork` shares one store and
//! one set of topic subscriptions, the way clients of a single relay would.
//! The network can be taken offline or partitioned to exercise failure paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::trace;
use uuid::Uuid;

use stride_types::relay::{CHAT_PROTOCOLS, MAX_PAGE_SIZE, Protocol};

use super::node::{HistoryPage, PageRequest, PeerInfo, PubSubNode};
use crate::error::NodeError;

#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

struct NetworkInner {
    node_id: Uuid,
    peer_tx: watch::Sender<Option<PeerInfo>>,
    partitioned: AtomicBool,
    state: Mutex<NetworkState>,
    next_node_id: AtomicU64,
    /// nodes currently connected
    attached: AtomicUsize,
}

#[derive(Default)]
struct NetworkState {
    next_seq: i64,
    /// topic -> (seq, payload), oldest first
    store: HashMap<String, Vec<(i64, Vec<u8>)>>,
    /// topic -> (owning node, sender)
    subscribers: HashMap<String, Vec<(u64, mpsc::UnboundedSender<Vec<u8>>)>>,
}

impl MemoryNetwork {
    /// A network with a relay online offering every chat protocol.
    pub fn new() -> Self {
        let node_id = Uuid::new_v4();
        let (peer_tx, _) = watch::channel(Some(PeerInfo {
            node_id,
            protocols: CHAT_PROTOCOLS.to_vec(),
        }));
        Self {
            inner: Arc::new(NetworkInner {
                node_id,
                peer_tx,
                partitioned: AtomicBool::new(false),
                state: Mutex::new(NetworkState {
                    next_seq: 1,
                    ..Default::default()
                }),
                next_node_id: AtomicU64::new(1),
                attached: AtomicUsize::new(0),
            }),
        }
    }

    /// A network where no relay is reachable until `set_online(true)`.
    pub fn offline() -> Self {
        let network = Self::new();
        network.set_online(false);
        network
    }

    pub fn node(&self) -> MemoryNode {
        MemoryNode {
            id: self.inner.next_node_id.fetch_add(1, Ordering::Relaxed),
            network: self.clone(),
            connected: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.advertise(if online { CHAT_PROTOCOLS.to_vec() } else { Vec::new() });
    }

    /// Change what the relay offers. An empty list takes it offline.
    pub fn advertise(&self, protocols: Vec<Protocol>) {
        let peer = (!protocols.is_empty()).then(|| PeerInfo {
            node_id: self.inner.node_id,
            protocols,
        });
        self.inner.peer_tx.send_replace(peer);
    }

    /// While partitioned every publish and query fails.
    pub fn set_partitioned(&self, partitioned: bool) {
        self.inner.partitioned.store(partitioned, Ordering::Release);
    }

    /// Publish raw bytes as some other client would.
    pub fn inject(&self, topic: &str, payload: Vec<u8>) {
        self.deliver(topic, payload);
    }

    /// Close every live subscription, as if the relay connection dropped.
    pub fn drop_subscriptions(&self) {
        self.inner.state.lock().subscribers.clear();
    }

    pub fn stored_count(&self, topic: &str) -> usize {
        self.inner.state.lock().store.get(topic).map_or(0, Vec::len)
    }

    /// Open live subscriptions on `topic` across all nodes.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .state
            .lock()
            .subscribers
            .get(topic)
            .map_or(0, |subs| subs.iter().filter(|(_, tx)| !tx.is_closed()).count())
    }

    /// Nodes connected right now.
    pub fn attached_count(&self) -> usize {
        self.inner.attached.load(Ordering::Acquire)
    }

    fn deliver(&self, topic: &str, payload: Vec<u8>) {
        let mut state = self.inner.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state
            .store
            .entry(topic.to_string())
            .or_default()
            .push((seq, payload.clone()));

        if let Some(subs) = state.subscribers.get_mut(topic) {
            subs.retain(|(_, tx)| tx.send(payload.clone()).is_ok());
        }
        trace!("memory network stored seq {} on {}", seq, topic);
    }

    fn page(&self, topic: &str, page: PageRequest) -> HistoryPage {
        let limit = page.page_size.clamp(1, MAX_PAGE_SIZE) as usize;
        let state = self.inner.state.lock();
        let Some(messages) = state.store.get(topic) else {
            return HistoryPage::default();
        };

        let mut older: Vec<&(i64, Vec<u8>)> = messages
            .iter()
            .rev()
            .filter(|(seq, _)| page.cursor.is_none_or(|c| *seq < c))
            .take(limit + 1)
            .collect();

        let has_more = older.len() > limit;
        older.truncate(limit);
        HistoryPage {
            next_cursor: if has_more { older.last().map(|(seq, _)| *seq) } else { None },
            payloads: older.into_iter().map(|(_, p)| p.clone()).collect(),
        }
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One client's attachment to a `MemoryNetwork`.
pub struct MemoryNode {
    id: u64,
    network: MemoryNetwork,
    connected: AtomicBool,
    shut_down: AtomicBool,
}

impl MemoryNode {
    fn check_usable(&self) -> Result<(), NodeError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(NodeError::Closed);
        }
        if !self.connected.load(Ordering::Acquire) || self.network.inner.partitioned.load(Ordering::Acquire) {
            return Err(NodeError::Disconnected);
        }
        Ok(())
    }

    fn detach(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.network.inner.attached.fetch_sub(1, Ordering::AcqRel);
        }
        let mut state = self.network.inner.state.lock();
        for subs in state.subscribers.values_mut() {
            subs.retain(|(owner, _)| *owner != self.id);
        }
    }
}

#[async_trait]
impl PubSubNode for MemoryNode {
    async fn connect(&self) -> Result<(), NodeError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(NodeError::Closed);
        }
        if !self.connected.swap(true, Ordering::AcqRel) {
            self.network.inner.attached.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    async fn wait_for_peer(&self, required: &[Protocol]) -> Result<PeerInfo, NodeError> {
        let mut rx = self.network.inner.peer_tx.subscribe();
        let peer = rx
            .wait_for(|peer| peer.as_ref().is_some_and(|p| p.supports(required)))
            .await
            .map_err(|_| NodeError::Closed)?;
        peer.clone().ok_or(NodeError::Disconnected)
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, NodeError> {
        self.check_usable()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.network
            .inner
            .state
            .lock()
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push((self.id, tx));
        Ok(rx)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NodeError> {
        self.check_usable()?;
        self.network.deliver(topic, payload);
        Ok(())
    }

    async fn query(&self, topic: &str, page: PageRequest) -> Result<HistoryPage, NodeError> {
        self.check_usable()?;
        Ok(self.network.page(topic, page))
    }

    async fn disconnect(&self) {
        self.detach();
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        self.detach();
    }
}
