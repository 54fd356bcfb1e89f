use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content topic shared by every chat client. Routing to the right
/// conversation happens client-side.
pub const DEFAULT_CONTENT_TOPIC: &str = "/stride/1/chat/json";

/// Page size used for store replay.
pub const HISTORY_PAGE_SIZE: u32 = 25;

/// Upper bound the relay enforces on a single store page.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Capabilities a relay node advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Historical message queries.
    Store,
    /// Live per-topic subscriptions.
    Filter,
    /// Publishing on behalf of a client.
    LightPush,
}

/// Everything a chat client needs from a relay.
pub const CHAT_PROTOCOLS: [Protocol; 3] = [Protocol::Store, Protocol::Filter, Protocol::LightPush];

/// A message as kept in the relay store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub seq: i64,
    pub content_topic: String,
    /// Base64 payload bytes.
    pub payload: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Commands sent FROM client TO relay over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RelayCommand {
    /// Start receiving live messages for a topic
    Subscribe { content_topic: String },

    /// Stop receiving live messages for a topic
    Unsubscribe { content_topic: String },

    /// Publish a payload to a topic; answered by `PublishAck`
    Publish {
        request_id: u64,
        content_topic: String,
        payload: String,
    },

    /// Fetch one page of stored messages, newest first; answered by `QueryPage`
    Query {
        request_id: u64,
        content_topic: String,
        page_size: u32,
        cursor: Option<i64>,
    },
}

/// Events sent FROM relay TO client over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RelayEvent {
    /// Sent once right after the connection opens
    Ready {
        node_id: Uuid,
        protocols: Vec<Protocol>,
    },

    /// A live message on a subscribed topic
    Message(StoredMessage),

    PublishAck {
        request_id: u64,
        ok: bool,
        error: Option<String>,
    },

    QueryPage {
        request_id: u64,
        messages: Vec<StoredMessage>,
        /// Pass back as `cursor` to fetch the next (older) page.
        next_cursor: Option<i64>,
    },

    /// A command could not be understood or a query failed
    Error {
        request_id: Option<u64>,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_tagged_json() {
        let cmd = RelayCommand::Subscribe {
            content_topic: DEFAULT_CONTENT_TOPIC.to_string(),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "Subscribe");
        assert_eq!(json["data"]["content_topic"], DEFAULT_CONTENT_TOPIC);
    }

    #[test]
    fn ready_lists_protocols_in_snake_case() {
        let event = RelayEvent::Ready {
            node_id: Uuid::nil(),
            protocols: CHAT_PROTOCOLS.to_vec(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json["data"]["protocols"],
            serde_json::json!(["store", "filter", "light_push"])
        );
    }
}
