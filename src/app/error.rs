//! Errors crossing the application boundary.

use thiserror::Error;

use super::ScopeKind;

/// A breach of the event-ordering contract by the application.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("response body sent before response start")]
    BodyBeforeStart,
    #[error("response start sent twice")]
    DuplicateStart,
    #[error("event sent after the response completed")]
    AfterComplete,
    #[error("event `{event}` is not valid in a `{scope}` scope")]
    UnexpectedEvent {
        event: &'static str,
        scope: ScopeKind,
    },
    #[error("invalid status code {0}")]
    InvalidStatus(u16),
    #[error("invalid response header `{0}`")]
    InvalidHeader(String),
    #[error("response body length {actual} does not match content-length {declared}")]
    ContentLengthMismatch { declared: u64, actual: u64 },
}

/// Why an [`Outbox::send`](super::Outbox::send) was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The peer (client connection or server lifecycle) is gone.
    #[error("disconnected")]
    Disconnected,
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
}

/// Failure reported by an application call.
#[derive(Debug, Error)]
pub enum AppError {
    /// The application does not implement the given scope type.
    #[error("unsupported scope type `{0}`")]
    UnsupportedScope(ScopeKind),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl AppError {
    pub fn failed(message: impl Into<String>) -> Self {
        AppError::Failed(message.into())
    }
}
