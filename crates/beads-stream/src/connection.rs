//! Reconnecting push channel
//!
//! [`StreamConnection::open`] spawns a driver task that:
//! - Connects through an [`EventTransport`]
//! - Decodes frames and forwards typed events in arrival order
//! - Reconnects with exponential backoff when the channel drops
//! - Gives up after the policy's retry ceiling until [`StreamHandle::retry`]
//!
//! Status transitions are delivered in-band on the same queue as events and
//! mirrored into a `watch` cell for aggregation.

use crate::backoff::{Backoff, BackoffPolicy};
use crate::event::StreamEvent;
use crate::sse::SseDecoder;
use crate::transport::{ByteStream, EventTransport};
use crate::DEFAULT_QUEUE_CAPACITY;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Channel connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// First attempt, or attempt after a manual retry
    Connecting,
    /// Channel open
    Connected,
    /// Waiting for the next automatic attempt
    Reconnecting,
    /// Retry ceiling reached; needs a manual retry
    Disconnected,
}

impl ConnectionState {
    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connectivity snapshot for one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Current state
    pub state: ConnectionState,
    /// Retries scheduled since the last successful open
    pub attempt: u32,
    /// Wait before the pending retry (zero unless reconnecting)
    pub delay: Duration,
}

impl ConnectionStatus {
    fn new(state: ConnectionState, attempt: u32, delay: Duration) -> Self {
        Self {
            state,
            attempt,
            delay,
        }
    }
}

/// What a channel delivered
#[derive(Debug, Clone, PartialEq)]
pub enum StreamBody {
    /// A parsed event
    Event(StreamEvent),
    /// A connectivity transition
    Status(ConnectionStatus),
}

/// Message from a named channel
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    /// Channel name given at open
    pub stream: Arc<str>,
    /// Payload
    pub body: StreamBody,
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Retry,
    Stop,
}

enum Exit {
    Failed,
    Retry,
    Stop,
}

/// Handle to a running channel
///
/// Dropping the handle stops the channel.
#[derive(Debug)]
pub struct StreamHandle {
    name: Arc<str>,
    control: mpsc::UnboundedSender<Control>,
    status: watch::Receiver<ConnectionStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamHandle {
    /// Channel name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Latest connectivity
    #[inline]
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Subscribe to connectivity changes
    #[inline]
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Reconnect immediately, whatever the current state
    pub fn retry(&self) {
        let _ = self.control.send(Control::Retry);
    }

    /// Cancel pending timers and close the channel; idempotent
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            let _ = self.control.send(Control::Stop);
            task.abort();
            tracing::debug!(stream = %self.name, "channel stopped");
        }
    }

    /// Whether [`stop`](Self::stop) has been called
    #[inline]
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.task.lock().is_none()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Channel driver
pub struct StreamConnection {
    name: Arc<str>,
    url: String,
    transport: Arc<dyn EventTransport>,
    backoff: Backoff,
    events: mpsc::Sender<StreamMessage>,
    status: watch::Sender<ConnectionStatus>,
    control: mpsc::UnboundedReceiver<Control>,
}

impl StreamConnection {
    /// Open a channel with its own event queue
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn open(
        name: &str,
        url: impl Into<String>,
        transport: Arc<dyn EventTransport>,
        policy: BackoffPolicy,
    ) -> (StreamHandle, mpsc::Receiver<StreamMessage>) {
        let (tx, rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
        let handle = Self::open_with_sender(name, url, transport, Backoff::new(policy), tx);
        (handle, rx)
    }

    /// Open a channel feeding a shared queue
    ///
    /// Several channels may share one sender; messages carry the channel name.
    #[must_use]
    pub fn open_with_sender(
        name: &str,
        url: impl Into<String>,
        transport: Arc<dyn EventTransport>,
        backoff: Backoff,
        events: mpsc::Sender<StreamMessage>,
    ) -> StreamHandle {
        let name: Arc<str> = Arc::from(name);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::new(
            ConnectionState::Connecting,
            0,
            Duration::ZERO,
        ));

        let driver = Self {
            name: Arc::clone(&name),
            url: url.into(),
            transport,
            backoff,
            events,
            status: status_tx,
            control: control_rx,
        };
        let task = tokio::spawn(driver.run());

        StreamHandle {
            name,
            control: control_tx,
            status: status_rx,
            task: Mutex::new(Some(task)),
        }
    }

    async fn run(mut self) {
        tracing::info!(stream = %self.name, url = %self.url, "opening channel");
        self.publish(ConnectionState::Connecting, Duration::ZERO).await;

        loop {
            match self.connect_and_pump().await {
                Exit::Stop => return,
                Exit::Retry => {
                    self.manual_retry().await;
                    continue;
                }
                Exit::Failed => {}
            }

            if let Some(wait) = self.backoff.next_wait() {
                tracing::debug!(
                    stream = %self.name,
                    attempt = self.backoff.attempt(),
                    wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "scheduling reconnect"
                );
                self.publish(ConnectionState::Reconnecting, wait).await;
                tokio::select! {
                    () = tokio::time::sleep(wait) => {}
                    control = self.control.recv() => match control {
                        Some(Control::Retry) => self.manual_retry().await,
                        Some(Control::Stop) | None => return,
                    },
                }
            } else {
                tracing::warn!(
                    stream = %self.name,
                    attempts = self.backoff.attempt(),
                    "giving up on channel until manual retry"
                );
                self.publish(ConnectionState::Disconnected, Duration::ZERO)
                    .await;
                match self.control.recv().await {
                    Some(Control::Retry) => self.manual_retry().await,
                    Some(Control::Stop) | None => return,
                }
            }
        }
    }

    async fn connect_and_pump(&mut self) -> Exit {
        let connected = tokio::select! {
            result = self.transport.connect(&self.url) => result,
            control = self.control.recv() => return Self::exit_for(control),
        };
        let stream = match connected {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(stream = %self.name, error = %err, "channel connect failed");
                return Exit::Failed;
            }
        };

        self.backoff.reset();
        tracing::info!(stream = %self.name, "channel connected");
        self.publish(ConnectionState::Connected, Duration::ZERO).await;
        self.pump(stream).await
    }

    async fn pump(&mut self, mut stream: ByteStream) -> Exit {
        let mut decoder = SseDecoder::new();
        loop {
            tokio::select! {
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        let frames = match decoder.feed(&bytes) {
                            Ok(frames) => frames,
                            Err(err) => {
                                tracing::warn!(
                                    stream = %self.name,
                                    error = %err,
                                    "channel dropped"
                                );
                                return Exit::Failed;
                            }
                        };
                        for frame in frames {
                            let Some(event) = StreamEvent::from_frame(&frame) else {
                                tracing::trace!(stream = %self.name, "dropping malformed payload");
                                continue;
                            };
                            if !self.send(StreamBody::Event(event)).await {
                                return Exit::Stop;
                            }
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!(stream = %self.name, error = %err, "channel dropped");
                        return Exit::Failed;
                    }
                    None => {
                        tracing::warn!(stream = %self.name, "channel closed by server");
                        return Exit::Failed;
                    }
                },
                control = self.control.recv() => return Self::exit_for(control),
            }
        }
    }

    async fn manual_retry(&mut self) {
        tracing::info!(stream = %self.name, "manual retry");
        self.backoff.reset();
        self.publish(ConnectionState::Connecting, Duration::ZERO).await;
    }

    fn exit_for(control: Option<Control>) -> Exit {
        match control {
            Some(Control::Retry) => Exit::Retry,
            Some(Control::Stop) | None => Exit::Stop,
        }
    }

    async fn publish(&mut self, state: ConnectionState, delay: Duration) {
        let status = ConnectionStatus::new(state, self.backoff.attempt(), delay);
        self.status.send_replace(status);
        self.send(StreamBody::Status(status)).await;
    }

    async fn send(&self, body: StreamBody) -> bool {
        self.events
            .send(StreamMessage {
                stream: Arc::clone(&self.name),
                body,
            })
            .await
            .is_ok()
    }
}

impl fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnection")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}
