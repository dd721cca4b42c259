use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionStatus;

/// Broad error category used for UI handling and recovery decisions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatErrorCategory {
    /// Missing or invalid configuration, unsupported state.
    Config,
    /// Pub/sub transport failure.
    Transport,
    /// Wire payload could not be decoded.
    Decode,
    /// Local identity persistence failure.
    Storage,
    /// Engine bug or invariant break.
    Internal,
}

/// Stable error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChatError {
    pub category: ChatErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    pub message: String,
}

impl ChatError {
    pub fn new(
        category: ChatErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: SessionStatus, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ChatErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while session is {current:?}"),
        )
    }

    /// Whether retrying the same command later may succeed.
    pub fn is_recoverable(&self) -> bool {
        self.category == ChatErrorCategory::Transport
    }
}

/// Structured failure kinds reported by the pub/sub transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The node was never started or failed to start.
    NotStarted,
    /// The remote peer no longer knows the subscription.
    NoSubscription,
    /// A history cursor does not match any retrievable page.
    InvalidCursor,
    /// No reachable peer serves the requested protocol.
    Unavailable,
    Other,
}

/// Error returned by transport operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn no_subscription(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NoSubscription, message)
    }

    pub fn invalid_cursor(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::InvalidCursor, message)
    }

    pub fn is_subscription_lost(&self) -> bool {
        self.kind == TransportErrorKind::NoSubscription
    }
}

impl From<TransportError> for ChatError {
    fn from(err: TransportError) -> Self {
        let (category, code) = match err.kind {
            TransportErrorKind::NotStarted => (ChatErrorCategory::Config, "transport_not_started"),
            TransportErrorKind::NoSubscription => (ChatErrorCategory::Transport, "no_subscription"),
            TransportErrorKind::InvalidCursor => (ChatErrorCategory::Transport, "invalid_cursor"),
            TransportErrorKind::Unavailable => {
                (ChatErrorCategory::Transport, "transport_unavailable")
            }
            TransportErrorKind::Other => (ChatErrorCategory::Transport, "transport_error"),
        };
        ChatError::new(category, code, err.message)
    }
}

/// Reasons a frame is dropped by the schema registry or room codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// No known schema version accepts the payload.
    #[error("payload matches no known schema version: {reason}")]
    Malformed { reason: String },
    /// The winning schema decoded a message without an author.
    #[error("payload decoded as version {version} has no author")]
    MissingAuthor { version: u32 },
    /// The frame belongs to another room's topic.
    #[error("frame topic '{actual}' does not match room topic '{expected}'")]
    TopicMismatch { expected: String, actual: String },
}

impl From<DecodeError> for ChatError {
    fn from(err: DecodeError) -> Self {
        ChatError::new(ChatErrorCategory::Decode, "decode_error", err.to_string())
    }
}
