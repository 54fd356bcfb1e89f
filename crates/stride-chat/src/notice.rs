use std::fmt;

/// User-facing conditions the UI layer should surface.
///
/// A single bad incoming message never produces a notice; those are only
/// logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// `start` could not reach a relay.
    ConnectionFailed { reason: String },
    /// The live subscription ended while connected.
    ConnectionLost,
    /// A message could not be published.
    SendFailed { message_id: String, reason: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { reason } => write!(f, "connection_failed: {}", reason),
            Self::ConnectionLost => write!(f, "connection_lost"),
            Self::SendFailed { message_id, reason } => {
                write!(f, "send_failed id={}: {}", message_id, reason)
            }
        }
    }
}

/// Where notices go. Implementations can toast in a UI, write to tracing,
/// or discard them.
pub trait NoticeSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Sink that uses the `tracing` crate.
pub struct TracingNoticeSink;

impl NoticeSink for TracingNoticeSink {
    fn notify(&self, notice: Notice) {
        tracing::warn!(component = "chat", "{}", notice);
    }
}

/// No-op sink that discards all notices.
pub struct NullNoticeSink;

impl NoticeSink for NullNoticeSink {
    fn notify(&self, _notice: Notice) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_compact() {
        let notice = Notice::SendFailed {
            message_id: "1-abc".into(),
            reason: "timed out".into(),
        };
        assert_eq!(notice.to_string(), "send_failed id=1-abc: timed out");
        assert_eq!(Notice::ConnectionLost.to_string(), "connection_lost");
    }
}
