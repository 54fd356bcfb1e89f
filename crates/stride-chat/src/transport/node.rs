use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use stride_types::relay::Protocol;

use crate::error::NodeError;

/// A relay the node is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub node_id: Uuid,
    pub protocols: Vec<Protocol>,
}

impl PeerInfo {
    pub fn supports(&self, required: &[Protocol]) -> bool {
        required.iter().all(|p| self.protocols.contains(p))
    }
}

/// One store query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page_size: u32,
    /// `None` for the newest page.
    pub cursor: Option<i64>,
}

/// One page of stored payloads, newest first.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub payloads: Vec<Vec<u8>>,
    pub next_cursor: Option<i64>,
}

/// The pub/sub network client the transport adapter drives.
#[async_trait]
pub trait PubSubNode: Send + Sync + 'static {
    async fn connect(&self) -> Result<(), NodeError>;

    /// Resolves once a peer offering every protocol in `required` is reachable.
    /// Callers bound this with their own timeout.
    async fn wait_for_peer(&self, required: &[Protocol]) -> Result<PeerInfo, NodeError>;

    /// Live payloads on `topic`. The receiver closes when the connection is lost.
    /// Unbounded: a live payload is never dropped for a slow consumer.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, NodeError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NodeError>;

    async fn query(&self, topic: &str, page: PageRequest) -> Result<HistoryPage, NodeError>;

    /// Drop the current connection and its subscriptions. The node may
    /// `connect` again afterwards.
    async fn disconnect(&self);

    /// Release everything for good. Further calls fail with `NodeError::Closed`.
    async fn shutdown(&self);
}
