//! Error types for push channels

/// Push channel errors
///
/// None of these are fatal: every variant ends in a scheduled reconnection.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Connection could not be established or broke mid-stream
    #[error("transport error: {0}")]
    Transport(String),

    /// Server answered with a non-success status
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    /// Server closed the stream
    #[error("channel closed by server")]
    Closed,

    /// Server sent a line longer than the decoder accepts
    #[error("event line exceeds {0} bytes")]
    LineTooLong(usize),
}

impl StreamError {
    /// Whether the server actively refused us (as opposed to a network fault)
    #[inline]
    #[must_use]
    pub fn is_refusal(&self) -> bool {
        matches!(self, Self::HttpStatus(code) if (400..500).contains(code))
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::HttpStatus(status.as_u16()),
            None => Self::Transport(err.to_string()),
        }
    }
}
