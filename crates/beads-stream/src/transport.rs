//! Channel transports
//!
//! A transport turns a URL into a stream of raw byte chunks. The reconnecting
//! driver owns framing, parsing and retries, so transports stay dumb.

use crate::error::StreamError;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};

/// Raw chunks of an open channel
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, StreamError>>;

/// Opens push channels
#[async_trait]
pub trait EventTransport: Send + Sync + std::fmt::Debug {
    /// Open the channel at `url`
    ///
    /// # Errors
    /// Any failure to establish the channel; the caller schedules a retry.
    async fn connect(&self, url: &str) -> Result<ByteStream, StreamError>;
}

/// `text/event-stream` over HTTP
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create transport with a default client
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create transport sharing an existing client
    #[inline]
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn connect(&self, url: &str) -> Result<ByteStream, StreamError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::HttpStatus(status.as_u16()));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(StreamError::from))
            .boxed())
    }
}
