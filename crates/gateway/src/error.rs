use thiserror::Error;

/// Failures the gateway core can observe.
///
/// Everything except a failed batch encoding is handled where it happens
/// (logged, dropped or retried on the next tick). An overflow means the
/// batch envelope no longer fits the configured buffer and is surfaced to
/// `main`.
#[derive(Debug, Error)]
pub(crate) enum GatewayError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("publish to '{topic}' failed: {reason}")]
    PublishFailure { topic: String, reason: String },

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("batch of {size} bytes exceeds the {max} byte envelope")]
    EncodeOverflow { size: usize, max: usize },

    #[error("serial link: {0}")]
    Link(#[from] std::io::Error),
}

/// Failures reported by a [`crate::transport::Transport`] implementation.
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("session lost: {0}")]
    SessionLost(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// True when the broker session is gone and the connection state machine
    /// has to fall back to `Disconnected`.
    pub(crate) fn is_session_loss(&self) -> bool {
        matches!(self, Self::NotConnected | Self::SessionLost(_))
    }
}
