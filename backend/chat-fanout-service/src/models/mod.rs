pub mod comment;
pub mod message;

pub use comment::Comment;
pub use message::{BrokerEnvelope, ChatMessage};

use crate::error::FanoutError;

/// Identity resolved from the handshake; empty string is anonymous.
pub type UserIdentity = String;

/// A value carried on one broker topic and fanned out to connections.
pub trait FanoutMessage: Send + Sync + Sized + 'static {
    /// Metrics/log label for the topic this message type travels on.
    const TOPIC: &'static str;

    /// Decode a raw broker payload.
    fn decode(payload: &str) -> Result<Self, FanoutError>;

    /// Text to write to a connection owned by `viewer`, or `None` when the
    /// message is not addressed to that viewer.
    fn render_for(&self, viewer: &str) -> Result<Option<String>, FanoutError>;
}
