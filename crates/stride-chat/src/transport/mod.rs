//! Transport adapter: owns the connection to the shared chat topic.
//!
//! Live messages and store replay both flow through one decode-and-dispatch
//! path into the `ConversationRouter`. Per-message failures are logged and
//! dropped; they never end the subscription.

pub mod memory;
pub mod node;
pub mod ws;

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use stride_types::Envelope;
use stride_types::relay::CHAT_PROTOCOLS;

use crate::codec::MessageCodec;
use crate::config::ChatConfig;
use crate::error::{CodecError, NodeError, TransportError};
use crate::notice::{Notice, NoticeSink, TracingNoticeSink};
use crate::router::ConversationRouter;

pub use memory::{MemoryNetwork, MemoryNode};
pub use node::{HistoryPage, PageRequest, PeerInfo, PubSubNode};
pub use ws::WsNode;

/// `Uninitialized -> Connecting -> Connected -> Stopped`, with
/// `Connecting -> Uninitialized` when no relay is reachable.
/// `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Uninitialized,
    Connecting,
    Connected,
    Stopped,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub struct TransportAdapter<N: PubSubNode> {
    node: Arc<N>,
    router: ConversationRouter,
    codec: Arc<MessageCodec>,
    config: ChatConfig,
    notices: Arc<dyn NoticeSink>,
    state_tx: watch::Sender<TransportState>,
    /// Serializes `start` and `stop`; holds the spawned pump tasks.
    lifecycle: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

/// Decode-and-dispatch, shared by the live pump and the history pager.
#[derive(Clone)]
struct Inbound {
    codec: Arc<MessageCodec>,
    router: ConversationRouter,
}

impl Inbound {
    fn deliver(&self, bytes: &[u8], source: &str) {
        match self.codec.open(bytes, self.router.local_user()) {
            Ok(envelope) => {
                let outcome = self.router.dispatch(envelope);
                trace!("{} payload: {:?}", source, outcome);
            }
            Err(CodecError::NotAddressed(_)) => {
                trace!("{} payload sealed for someone else", source);
            }
            Err(e) => {
                warn!("dropping {} payload ({} bytes): {}", source, bytes.len(), e);
            }
        }
    }
}

impl<N: PubSubNode> TransportAdapter<N> {
    pub fn new(node: N, router: ConversationRouter, codec: MessageCodec, config: ChatConfig) -> Self {
        let (state_tx, _) = watch::channel(TransportState::Uninitialized);
        Self {
            node: Arc::new(node),
            router,
            codec: Arc::new(codec),
            config,
            notices: Arc::new(TracingNoticeSink),
            state_tx,
            lifecycle: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_notice_sink(mut self, sink: Arc<dyn NoticeSink>) -> Self {
        self.notices = sink;
        self
    }

    pub fn state(&self) -> TransportState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<TransportState> {
        self.state_tx.subscribe()
    }

    pub fn router(&self) -> &ConversationRouter {
        &self.router
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    fn set_state(&self, state: TransportState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("transport {} -> {}", previous, state);
        }
    }

    /// Connect, subscribe to the chat topic and start store replay.
    ///
    /// Idempotent: once connected, further calls return `Ok` without a second
    /// subscription. On `Unavailable` the adapter is back in `Uninitialized`
    /// and `start` may be retried.
    pub async fn start(&self, local_user: &str) -> Result<(), TransportError> {
        let mut tasks = self.lifecycle.lock().await;

        if local_user != self.router.local_user() {
            return Err(TransportError::IdentityMismatch {
                expected: self.router.local_user().to_string(),
                got: local_user.to_string(),
            });
        }
        match self.state() {
            TransportState::Connected => return Ok(()),
            TransportState::Stopped => return Err(TransportError::Stopped),
            TransportState::Uninitialized | TransportState::Connecting => {}
        }
        if self.cancel.is_cancelled() {
            return Err(TransportError::Stopped);
        }

        self.set_state(TransportState::Connecting);
        info!(
            "starting transport for {} on {} (protection: {})",
            local_user,
            self.config.content_topic,
            self.codec.protection().name()
        );

        let node = self.node.clone();
        let ready = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TransportError::Stopped),
            r = tokio::time::timeout(self.config.peer_timeout, async move {
                node.connect().await?;
                node.wait_for_peer(&CHAT_PROTOCOLS).await
            }) => r,
        };

        let peer = match ready {
            Ok(Ok(peer)) => peer,
            Ok(Err(e)) => return Err(self.start_failed(e.to_string()).await),
            Err(_) => {
                return Err(self
                    .start_failed(format!(
                        "no relay offering store, filter and light push within {:?}",
                        self.config.peer_timeout
                    ))
                    .await);
            }
        };
        info!("using relay {}", peer.node_id);

        let live = match self.node.subscribe(&self.config.content_topic).await {
            Ok(rx) => rx,
            Err(e) => return Err(self.start_failed(e.to_string()).await),
        };

        let inbound = Inbound {
            codec: self.codec.clone(),
            router: self.router.clone(),
        };

        tasks.push(tokio::spawn(pump_live(
            live,
            inbound.clone(),
            self.cancel.clone(),
            self.notices.clone(),
        )));
        tasks.push(tokio::spawn(replay_history(
            self.node.clone(),
            self.config.clone(),
            inbound,
            self.cancel.clone(),
        )));

        self.set_state(TransportState::Connected);
        Ok(())
    }

    /// A failed start leaves no connection behind, so a later `start` begins clean.
    async fn start_failed(&self, reason: String) -> TransportError {
        warn!("transport start failed: {}", reason);
        self.node.disconnect().await;
        self.set_state(TransportState::Uninitialized);
        self.notices.notify(Notice::ConnectionFailed { reason: reason.clone() });
        TransportError::Unavailable(reason)
    }

    /// Publish an envelope from the local user.
    ///
    /// Returns `false` instead of erroring: not connected, a foreign sender,
    /// a publish failure and a timeout are all expected conditions. On
    /// success the envelope is echoed to local listeners straight away.
    pub async fn send(&self, envelope: Envelope) -> bool {
        let state = self.state();
        if state != TransportState::Connected {
            self.send_failed(&envelope, format!("transport is {}", state));
            return false;
        }
        if envelope.sender() != self.router.local_user() {
            self.send_failed(
                &envelope,
                format!("sender {} is not the local user", envelope.sender()),
            );
            return false;
        }

        let bytes = match self.codec.seal(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.send_failed(&envelope, e.to_string());
                return false;
            }
        };

        let publish = tokio::time::timeout(
            self.config.send_timeout,
            self.node.publish(&self.config.content_topic, bytes),
        );
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(NodeError::Closed),
            r = publish => r.unwrap_or_else(|_| Err(NodeError::Rejected("publish timed out".into()))),
        };

        match result {
            Ok(()) => {
                debug!("sent {} to {}", envelope.id(), envelope.receiver());
                self.router.dispatch(envelope);
                true
            }
            Err(e) => {
                self.send_failed(&envelope, e.to_string());
                false
            }
        }
    }

    /// Compose and send a text message from the local user.
    pub async fn send_text(&self, receiver: &str, content: &str) -> bool {
        let envelope = Envelope::compose(self.router.local_user(), receiver, content);
        self.send(envelope).await
    }

    fn send_failed(&self, envelope: &Envelope, reason: String) {
        self.notices.notify(Notice::SendFailed {
            message_id: envelope.id().to_string(),
            reason,
        });
    }

    /// Shut down. Idempotent. After this returns no listener is invoked,
    /// any history fetch is cancelled and `send` returns `false`.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.router.close();

        let mut tasks = self.lifecycle.lock().await;
        if self.state() == TransportState::Stopped {
            return;
        }
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        self.node.shutdown().await;
        self.set_state(TransportState::Stopped);
        info!("transport for {} stopped", self.router.local_user());
    }
}

async fn pump_live(
    mut live: mpsc::UnboundedReceiver<Vec<u8>>,
    inbound: Inbound,
    cancel: CancellationToken,
    notices: Arc<dyn NoticeSink>,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = live.recv() => match msg {
                Some(bytes) => inbound.deliver(&bytes, "live"),
                None => {
                    if !cancel.is_cancelled() {
                        warn!("live subscription ended");
                        notices.notify(Notice::ConnectionLost);
                    }
                    break;
                }
            },
        }
    }
}

/// Fetch stored pages newest-first, then deliver them oldest-first so
/// replayed buckets read in send order.
async fn replay_history<N: PubSubNode>(
    node: Arc<N>,
    config: ChatConfig,
    inbound: Inbound,
    cancel: CancellationToken,
) {
    let mut pages: Vec<Vec<Vec<u8>>> = Vec::new();
    let mut cursor = None;

    for _ in 0..config.history_max_pages {
        let request = PageRequest {
            page_size: config.history_page_size,
            cursor,
        };
        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            r = node.query(&config.content_topic, request) => r,
        };

        match page {
            Ok(page) => {
                debug!("history page: {} payloads", page.payloads.len());
                pages.push(page.payloads);
                match page.next_cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
            Err(e) => {
                warn!("history query failed: {}", e);
                break;
            }
        }
    }

    let total: usize = pages.iter().map(Vec::len).sum();
    for payload in pages.iter().rev().flat_map(|page| page.iter().rev()) {
        if cancel.is_cancelled() {
            return;
        }
        inbound.deliver(payload, "history");
    }
    info!("replayed {} stored payloads", total);
}
