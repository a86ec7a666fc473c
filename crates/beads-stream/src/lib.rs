//! Beads Stream - live push channels
//!
//! Self-healing, unidirectional event channels for the beads backend:
//! - Server-sent event framing ([`SseDecoder`])
//! - Typed wire events parsed once at the boundary ([`StreamEvent`])
//! - Exponential backoff with jitter and an attempt ceiling ([`Backoff`])
//! - Per-channel reconnecting drivers ([`StreamConnection`], [`StreamHandle`])
//! - Multi-channel status aggregation ([`ConnectionManager`])
//!
//! # Example
//!
//! ```rust,ignore
//! use beads_stream::{BackoffPolicy, HttpTransport, StreamConnection, StreamBody};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let transport = Arc::new(HttpTransport::new());
//! let (handle, mut rx) = StreamConnection::open(
//!     "mutations",
//!     "http://localhost:8080/api/events/mutations",
//!     transport,
//!     BackoffPolicy::default(),
//! );
//!
//! while let Some(message) = rx.recv().await {
//!     match message.body {
//!         StreamBody::Event(event) => println!("{event:?}"),
//!         StreamBody::Status(status) => println!("{}", status.state),
//!     }
//! }
//! handle.stop();
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod backoff;
pub mod connection;
pub mod error;
pub mod event;
pub mod manager;
pub mod sse;
pub mod transport;

pub use backoff::{Backoff, BackoffPolicy};
pub use connection::{
    ConnectionState, ConnectionStatus, StreamBody, StreamConnection, StreamHandle, StreamMessage,
};
pub use error::StreamError;
pub use event::{BusEvent, Channel, MutationEvent, MutationFields, MutationKind, StreamEvent};
pub use manager::{aggregate_state, ConnectionManager};
pub use sse::{SseDecoder, SseFrame, DEFAULT_MAX_LINE_BYTES};
pub use transport::{ByteStream, EventTransport, HttpTransport};

/// Capacity of the event queue handed out by [`StreamConnection::open`]
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
