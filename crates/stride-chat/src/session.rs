use std::sync::Arc;

use tokio::sync::watch;

use stride_types::Envelope;

use crate::codec::MessageCodec;
use crate::config::ChatConfig;
use crate::error::TransportError;
use crate::notice::NoticeSink;
use crate::router::{ConversationRouter, ListenerId};
use crate::transport::{PubSubNode, TransportAdapter, TransportState, WsNode};

/// Everything chat needs for one signed-in user.
///
/// Build one when the auth layer yields a user id and drop it (after `stop`)
/// on sign-out. A stopped session cannot be restarted; build a new one.
pub struct ChatSession<N: PubSubNode> {
    local_user: String,
    transport: TransportAdapter<N>,
}

impl<N: PubSubNode> ChatSession<N> {
    pub fn new(local_user: impl Into<String>, node: N, codec: MessageCodec, config: ChatConfig) -> Self {
        let local_user = local_user.into();
        let router = ConversationRouter::new(local_user.clone());
        Self {
            transport: TransportAdapter::new(node, router, codec, config),
            local_user,
        }
    }

    pub fn with_notice_sink(mut self, sink: Arc<dyn NoticeSink>) -> Self {
        self.transport = self.transport.with_notice_sink(sink);
        self
    }

    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    pub fn router(&self) -> &ConversationRouter {
        self.transport.router()
    }

    pub fn transport(&self) -> &TransportAdapter<N> {
        &self.transport
    }

    pub async fn start(&self) -> Result<(), TransportError> {
        self.transport.start(&self.local_user).await
    }

    pub async fn send_text(&self, receiver: &str, content: &str) -> bool {
        self.transport.send_text(receiver, content).await
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.router().subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.router().unsubscribe(id)
    }

    pub fn conversation(&self, counterparty: &str) -> Vec<Envelope> {
        self.router().get_conversation(counterparty)
    }

    pub fn counterparties(&self) -> Vec<String> {
        self.router().counterparties()
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<TransportState> {
        self.transport.watch_state()
    }

    pub async fn stop(&self) {
        self.transport.stop().await;
    }
}

impl ChatSession<WsNode> {
    /// Session talking to the relay at `config.relay_url`.
    pub fn over_websocket(local_user: impl Into<String>, codec: MessageCodec, config: ChatConfig) -> Self {
        let node = WsNode::new(config.relay_url.clone());
        Self::new(local_user, node, codec, config)
    }
}
