//! Multi-channel connection manager
//!
//! Several channels (mutation stream, event bus) run side by side, each with
//! independent backoff. The manager:
//! - Opens channels onto one shared queue
//! - Aggregates their states into one connectivity value
//! - Fans out manual retry and teardown

use crate::backoff::{Backoff, BackoffPolicy};
use crate::connection::{
    ConnectionState, ConnectionStatus, StreamConnection, StreamHandle, StreamMessage,
};
use crate::transport::EventTransport;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Combine channel states
///
/// All connected ⇒ connected; any disconnected ⇒ disconnected; otherwise
/// reconnecting if any channel is reconnecting, else connecting. No channels
/// at all counts as disconnected.
#[must_use]
pub fn aggregate_state<I>(states: I) -> ConnectionState
where
    I: IntoIterator<Item = ConnectionState>,
{
    let mut any = false;
    let mut all_connected = true;
    let mut any_reconnecting = false;

    for state in states {
        any = true;
        match state {
            ConnectionState::Disconnected => return ConnectionState::Disconnected,
            ConnectionState::Reconnecting => {
                any_reconnecting = true;
                all_connected = false;
            }
            ConnectionState::Connecting => all_connected = false,
            ConnectionState::Connected => {}
        }
    }

    match (any, all_connected, any_reconnecting) {
        (false, _, _) => ConnectionState::Disconnected,
        (true, true, _) => ConnectionState::Connected,
        (true, false, true) => ConnectionState::Reconnecting,
        (true, false, false) => ConnectionState::Connecting,
    }
}

/// Registry of open channels
#[derive(Debug)]
pub struct ConnectionManager {
    channels: DashMap<Arc<str>, StreamHandle>,
    events: mpsc::Sender<StreamMessage>,
    policy: BackoffPolicy,
}

impl ConnectionManager {
    /// Create manager delivering every channel's messages into `events`
    #[inline]
    #[must_use]
    pub fn new(events: mpsc::Sender<StreamMessage>, policy: BackoffPolicy) -> Self {
        Self {
            channels: DashMap::new(),
            events,
            policy,
        }
    }

    /// Open (or replace) the channel `name`
    pub fn open(&self, name: &str, url: impl Into<String>, transport: Arc<dyn EventTransport>) {
        let handle = StreamConnection::open_with_sender(
            name,
            url,
            transport,
            Backoff::new(self.policy),
            self.events.clone(),
        );
        if let Some(previous) = self.channels.insert(Arc::from(name), handle) {
            previous.stop();
        }
    }

    /// Number of open channels
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel is open
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Status of one channel
    #[must_use]
    pub fn status(&self, name: &str) -> Option<ConnectionStatus> {
        self.channels.get(name).map(|handle| handle.status())
    }

    /// Overall connectivity
    #[must_use]
    pub fn aggregate_state(&self) -> ConnectionState {
        aggregate_state(self.channels.iter().map(|entry| entry.status().state))
    }

    /// Highest retry count across channels
    #[must_use]
    pub fn max_attempt(&self) -> u32 {
        self.channels
            .iter()
            .map(|entry| entry.status().attempt)
            .max()
            .unwrap_or(0)
    }

    /// Force an immediate retry on every channel
    pub fn reconnect_all(&self) {
        tracing::info!(channels = self.channels.len(), "reconnecting all channels");
        for entry in &self.channels {
            entry.value().retry();
        }
    }

    /// Stop and forget every channel
    pub fn stop_all(&self) {
        for entry in &self.channels {
            entry.value().stop();
        }
        self.channels.clear();
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState::{Connected, Connecting, Disconnected, Reconnecting};

    #[test]
    fn aggregate_all_connected() {
        assert_eq!(aggregate_state([Connected, Connected]), Connected);
    }

    #[test]
    fn aggregate_any_disconnected_wins() {
        assert_eq!(aggregate_state([Connected, Disconnected]), Disconnected);
        assert_eq!(aggregate_state([Reconnecting, Disconnected]), Disconnected);
    }

    #[test]
    fn aggregate_mixed_states() {
        assert_eq!(aggregate_state([Connected, Reconnecting]), Reconnecting);
        assert_eq!(aggregate_state([Connected, Connecting]), Connecting);
        assert_eq!(aggregate_state([Connecting, Reconnecting]), Reconnecting);
    }

    #[test]
    fn aggregate_of_nothing_is_disconnected() {
        assert_eq!(aggregate_state(Vec::<ConnectionState>::new()), Disconnected);
    }
}
