//! Error types for the messaging layer

use skein_core::{Event, SchedError};
use thiserror::Error;

use crate::tag::Tag;

pub type NetResult<T> = Result<T, NetError>;

#[derive(Debug, Error)]
pub enum NetError {
    #[error(transparent)]
    Sched(#[from] SchedError),

    /// A reply arrived for our token carrying some other message
    #[error("received a message with unexpected tag {received} (expected {expected})")]
    UnexpectedTag { expected: Tag, received: Tag },

    /// The peer answered with an error report; the diagnostic is kept verbatim
    #[error("remote error: {0}")]
    Remote(String),

    #[error("tag {0} is already registered")]
    DuplicateTag(Tag),

    #[error("tag {0} is reserved")]
    ReservedTag(Tag),

    #[error("unable to serialize payload: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("unable to deserialize payload: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("channel disconnected")]
    Disconnected,

    #[error("malformed message: {0}")]
    Malformed(String),

    /// The waiter was awakened locally, without a reply, e.g. by a timeout
    #[error("wait on {0} interrupted without a reply")]
    Interrupted(Event),

    /// Raised by application handlers to reject a request
    #[error("handler failed: {0}")]
    Handler(String),

    #[error("no session to reply to")]
    NoSession,
}

impl NetError {
    pub fn handler(reason: impl Into<String>) -> Self {
        NetError::Handler(reason.into())
    }
}
