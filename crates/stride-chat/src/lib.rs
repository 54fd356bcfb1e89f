/// Stride Chat Client
///
/// End-to-end messaging over one shared pub/sub topic:
/// - `codec`: envelope JSON plus optional payload protection
/// - `transport`: connection lifecycle, live pump and store replay
/// - `router`: per-counterparty buckets, dedup and listener fan-out
/// - `session`: one context object per signed-in user

pub mod codec;
pub mod config;
pub mod error;
pub mod notice;
pub mod router;
pub mod session;
pub mod transport;

pub use codec::{KeyDirectory, MessageCodec, PayloadProtection};
pub use config::ChatConfig;
pub use error::{CodecError, NodeError, TransportError};
pub use notice::{Notice, NoticeSink, NullNoticeSink, TracingNoticeSink};
pub use router::{ConversationRouter, DispatchOutcome, ListenerId};
pub use session::ChatSession;
pub use transport::{MemoryNetwork, MemoryNode, PubSubNode, TransportAdapter, TransportState, WsNode};
