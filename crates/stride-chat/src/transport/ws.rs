//! WebSocket client for a `stride-relay` node.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use stride_types::relay::{Protocol, RelayCommand, RelayEvent, StoredMessage};

use super::node::{HistoryPage, PageRequest, PeerInfo, PubSubNode};
use crate::error::NodeError;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

type PendingPublish = oneshot::Sender<Result<(), NodeError>>;
type PendingQuery = oneshot::Sender<Result<HistoryPage, NodeError>>;

pub struct WsNode {
    url: String,
    inner: Arc<WsInner>,
}

struct WsInner {
    /// Present while the socket is open.
    outgoing: Mutex<Option<mpsc::UnboundedSender<RelayCommand>>>,
    peer_tx: watch::Sender<Option<PeerInfo>>,
    pending_publish: Mutex<HashMap<u64, PendingPublish>>,
    pending_query: Mutex<HashMap<u64, PendingQuery>>,
    subscriptions: Mutex<HashMap<String, mpsc::UnboundedSender<Vec<u8>>>>,
    next_request_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl WsNode {
    pub fn new(url: impl Into<String>) -> Self {
        let (peer_tx, _) = watch::channel(None);
        Self {
            url: url.into(),
            inner: Arc::new(WsInner {
                outgoing: Mutex::new(None),
                peer_tx,
                pending_publish: Mutex::new(HashMap::new()),
                pending_query: Mutex::new(HashMap::new()),
                subscriptions: Mutex::new(HashMap::new()),
                next_request_id: AtomicU64::new(1),
                tasks: Mutex::new(Vec::new()),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.inner.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Writer sends Close once its channel drains; give the relay a moment to answer.
    async fn join_tasks(&self) {
        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for mut task in tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
    }
}

impl WsInner {
    fn send_command(&self, cmd: RelayCommand) -> Result<(), NodeError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(NodeError::Closed);
        }
        let outgoing = self.outgoing.lock();
        let tx = outgoing.as_ref().ok_or(NodeError::Disconnected)?;
        tx.send(cmd).map_err(|_| NodeError::Disconnected)
    }

    fn handle_event(&self, event: RelayEvent) {
        match event {
            RelayEvent::Ready { node_id, protocols } => {
                info!("relay {} ready ({:?})", node_id, protocols);
                self.peer_tx.send_replace(Some(PeerInfo { node_id, protocols }));
            }

            RelayEvent::Message(msg) => {
                let tx = self.subscriptions.lock().get(&msg.content_topic).cloned();
                let Some(tx) = tx else {
                    trace!("message on unsubscribed topic {}", msg.content_topic);
                    return;
                };
                match B64.decode(&msg.payload) {
                    Ok(bytes) => {
                        if tx.send(bytes).is_err() {
                            trace!("subscriber for {} went away", msg.content_topic);
                        }
                    }
                    Err(e) => warn!("relay sent non-base64 payload seq {}: {}", msg.seq, e),
                }
            }

            RelayEvent::PublishAck { request_id, ok, error } => {
                if let Some(waiter) = self.pending_publish.lock().remove(&request_id) {
                    let result = if ok {
                        Ok(())
                    } else {
                        Err(NodeError::Rejected(error.unwrap_or_else(|| "publish rejected".into())))
                    };
                    let _ = waiter.send(result);
                }
            }

            RelayEvent::QueryPage {
                request_id,
                messages,
                next_cursor,
            } => {
                if let Some(waiter) = self.pending_query.lock().remove(&request_id) {
                    let _ = waiter.send(decode_page(messages, next_cursor));
                }
            }

            RelayEvent::Error { request_id, message } => {
                warn!("relay error (request {:?}): {}", request_id, message);
                let Some(id) = request_id else { return };
                if let Some(waiter) = self.pending_publish.lock().remove(&id) {
                    let _ = waiter.send(Err(NodeError::Rejected(message)));
                } else if let Some(waiter) = self.pending_query.lock().remove(&id) {
                    let _ = waiter.send(Err(NodeError::Rejected(message)));
                }
            }
        }
    }

    /// Tear down per-connection state. Outgoing goes first so no request can
    /// register after the pending maps are drained.
    fn connection_ended(&self, reason: fn() -> NodeError) {
        self.outgoing.lock().take();
        self.peer_tx.send_replace(None);
        for (_, waiter) in self.pending_publish.lock().drain() {
            let _ = waiter.send(Err(reason()));
        }
        for (_, waiter) in self.pending_query.lock().drain() {
            let _ = waiter.send(Err(reason()));
        }
        self.subscriptions.lock().clear();
    }
}

fn decode_page(messages: Vec<StoredMessage>, next_cursor: Option<i64>) -> Result<HistoryPage, NodeError> {
    let payloads = messages
        .into_iter()
        .map(|m| B64.decode(&m.payload))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| NodeError::Protocol(format!("non-base64 payload in page: {}", e)))?;
    Ok(HistoryPage { payloads, next_cursor })
}

#[async_trait]
impl PubSubNode for WsNode {
    async fn connect(&self) -> Result<(), NodeError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(NodeError::Closed);
        }
        if self.inner.outgoing.lock().is_some() {
            return Ok(());
        }

        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| NodeError::Connect(format!("{}: {}", self.url, e)))?;
        info!("connected to relay at {}", self.url);

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<RelayCommand>();
        *self.inner.outgoing.lock() = Some(cmd_tx);

        let writer = tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                let text = match serde_json::to_string(&cmd) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("failed to serialize relay command: {}", e);
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let inner = self.inner.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<RelayEvent>(&text) {
                        Ok(event) => inner.handle_event(event),
                        Err(e) => warn!(
                            "unparseable relay event: {} -- raw: {}",
                            e,
                            text.chars().take(200).collect::<String>()
                        ),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("relay socket error: {}", e);
                        break;
                    }
                }
            }
            // `disconnect` and `shutdown` clear outgoing before the socket closes.
            if inner.outgoing.lock().is_some() {
                warn!("relay connection lost");
            }
            inner.connection_ended(|| NodeError::Disconnected);
        });

        let mut tasks = self.inner.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(writer);
        tasks.push(reader);
        Ok(())
    }

    async fn wait_for_peer(&self, required: &[Protocol]) -> Result<PeerInfo, NodeError> {
        let mut rx = self.inner.peer_tx.subscribe();
        let peer = rx
            .wait_for(|peer| peer.as_ref().is_some_and(|p| p.supports(required)))
            .await
            .map_err(|_| NodeError::Closed)?;
        peer.clone().ok_or(NodeError::Disconnected)
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, NodeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscriptions.lock().insert(topic.to_string(), tx);
        if let Err(e) = self.inner.send_command(RelayCommand::Subscribe {
            content_topic: topic.to_string(),
        }) {
            self.inner.subscriptions.lock().remove(topic);
            return Err(e);
        }
        debug!("subscribed to {}", topic);
        Ok(rx)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NodeError> {
        let request_id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.inner.pending_publish.lock().insert(request_id, tx);

        trace!("publish {} ({} bytes) to {}", request_id, payload.len(), topic);
        if let Err(e) = self.inner.send_command(RelayCommand::Publish {
            request_id,
            content_topic: topic.to_string(),
            payload: B64.encode(&payload),
        }) {
            self.inner.pending_publish.lock().remove(&request_id);
            return Err(e);
        }

        rx.await.map_err(|_| NodeError::Disconnected)?
    }

    async fn query(&self, topic: &str, page: PageRequest) -> Result<HistoryPage, NodeError> {
        let request_id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.inner.pending_query.lock().insert(request_id, tx);

        if let Err(e) = self.inner.send_command(RelayCommand::Query {
            request_id,
            content_topic: topic.to_string(),
            page_size: page.page_size,
            cursor: page.cursor,
        }) {
            self.inner.pending_query.lock().remove(&request_id);
            return Err(e);
        }

        rx.await.map_err(|_| NodeError::Disconnected)?
    }

    async fn disconnect(&self) {
        self.inner.connection_ended(|| NodeError::Disconnected);
        self.join_tasks().await;
        debug!("disconnected from {}", self.url);
    }

    async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.connection_ended(|| NodeError::Closed);
        self.join_tasks().await;
        info!("relay client for {} shut down", self.url);
    }
}
