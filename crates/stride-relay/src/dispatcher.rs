use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};
use uuid::Uuid;

use stride_db::Database;
use stride_db::models::MessageRow;
use stride_types::relay::{CHAT_PROTOCOLS, MAX_PAGE_SIZE, Protocol, StoredMessage};

/// One page of a store query.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub messages: Vec<StoredMessage>,
    pub next_cursor: Option<i64>,
}

/// Stores published messages and fans them out to every connection.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    node_id: Uuid,

    /// Broadcast channel for published messages; connections filter by topic
    broadcast_tx: broadcast::Sender<StoredMessage>,

    /// Message store for history queries
    db: Arc<Database>,

    connections: AtomicUsize,
}

impl Dispatcher {
    pub fn new(db: Database) -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                node_id: Uuid::new_v4(),
                broadcast_tx,
                db: Arc::new(db),
                connections: AtomicUsize::new(0),
            }),
        }
    }

    pub fn node_id(&self) -> Uuid {
        self.inner.node_id
    }

    pub fn protocols(&self) -> Vec<Protocol> {
        CHAT_PROTOCOLS.to_vec()
    }

    /// Subscribe to every published message. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<StoredMessage> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Store a payload and broadcast it to all connections.
    pub async fn publish(&self, content_topic: String, payload: Vec<u8>) -> anyhow::Result<StoredMessage> {
        // Run blocking DB insert off the async runtime
        let db = self.inner.db.clone();
        let row = tokio::task::spawn_blocking(move || db.insert_message(&content_topic, &payload))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                anyhow::anyhow!("store task failed")
            })??;

        let message = to_stored_message(row);
        debug!(
            "stored message seq={} topic={}",
            message.seq, message.content_topic
        );

        // No receivers is fine: nobody is subscribed right now.
        let _ = self.inner.broadcast_tx.send(message.clone());
        Ok(message)
    }

    /// Fetch one newest-first page of stored messages.
    pub async fn query(
        &self,
        content_topic: String,
        page_size: u32,
        cursor: Option<i64>,
    ) -> anyhow::Result<HistoryPage> {
        let limit = page_size.clamp(1, MAX_PAGE_SIZE);

        let db = self.inner.db.clone();
        // One extra row tells us whether an older page exists.
        let mut rows = tokio::task::spawn_blocking(move || {
            db.get_messages(&content_topic, limit + 1, cursor)
        })
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            anyhow::anyhow!("store task failed")
        })??;

        let has_more = rows.len() > limit as usize;
        rows.truncate(limit as usize);
        let next_cursor = if has_more { rows.last().map(|r| r.seq) } else { None };

        Ok(HistoryPage {
            messages: rows.into_iter().map(to_stored_message).collect(),
            next_cursor,
        })
    }

    pub fn connection_opened(&self) -> usize {
        self.inner.connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn connection_closed(&self) -> usize {
        self.inner.connections.fetch_sub(1, Ordering::Relaxed).saturating_sub(1)
    }
}

fn to_stored_message(row: MessageRow) -> StoredMessage {
    let timestamp = row
        .received_at
        .parse::<chrono::DateTime<chrono::Utc>>()
        .unwrap_or_else(|e| {
            warn!("Corrupt received_at '{}' on message {}: {}", row.received_at, row.seq, e);
            chrono::DateTime::default()
        });

    StoredMessage {
        seq: row.seq,
        content_topic: row.content_topic,
        payload: B64.encode(&row.payload),
        timestamp,
    }
}
