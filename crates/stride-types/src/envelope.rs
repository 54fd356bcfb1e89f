use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of the random base36 suffix appended to message ids.
const ID_SUFFIX_LEN: usize = 9;

/// One chat message as exchanged between peers.
///
/// Field order is the canonical wire order. Envelopes are immutable once
/// built; fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    id: String,
    timestamp: u64,
    sender: String,
    receiver: String,
    content: String,
}

impl Envelope {
    pub fn new(
        id: impl Into<String>,
        timestamp: u64,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            sender: sender.into(),
            receiver: receiver.into(),
            content: content.into(),
        }
    }

    /// Build a fresh outgoing envelope stamped with the current time and a new id.
    pub fn compose(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let timestamp = now_millis();
        Self::new(new_message_id(timestamp), timestamp, sender, receiver, content)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// The end of the conversation that is not `local_user`.
    ///
    /// Returns `None` when neither end is the local user. A note-to-self
    /// resolves to the local user.
    pub fn counterparty(&self, local_user: &str) -> Option<&str> {
        if self.sender == local_user {
            Some(&self.receiver)
        } else if self.receiver == local_user {
            Some(&self.sender)
        } else {
            None
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// `<timestamp>-<9 random base36 chars>`
pub fn new_message_id(timestamp_ms: u64) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .filter_map(|_| std::char::from_digit(rng.random_range(0..36), 36))
        .collect();
    format!("{}-{}", timestamp_ms, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counterparty_resolves_either_end() {
        let env = Envelope::new("1-a", 1, "u1", "u2", "hi");
        assert_eq!(env.counterparty("u1"), Some("u2"));
        assert_eq!(env.counterparty("u2"), Some("u1"));
        assert_eq!(env.counterparty("u3"), None);
    }

    #[test]
    fn note_to_self_resolves_to_self() {
        let env = Envelope::new("1-a", 1, "u1", "u1", "memo");
        assert_eq!(env.counterparty("u1"), Some("u1"));
    }

    #[test]
    fn message_id_has_timestamp_and_suffix() {
        let id = new_message_id(1_700_000_000_000);
        let (ts, suffix) = id.split_once('-').unwrap();
        assert_eq!(ts, "1700000000000");
        assert_eq!(suffix.len(), ID_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn composed_ids_are_unique() {
        let a = Envelope::compose("u1", "u2", "x");
        let b = Envelope::compose("u1", "u2", "x");
        assert_ne!(a.id(), b.id());
        assert!(a.timestamp() > 0);
    }

    #[test]
    fn serializes_in_wire_order() {
        let env = Envelope::new("42-abc", 42, "u1", "u2", "hello");
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(
            json,
            r#"{"id":"42-abc","timestamp":42,"sender":"u1","receiver":"u2","content":"hello"}"#
        );
    }
}
