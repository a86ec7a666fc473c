//! Beads Sync - live synchronization engine
//!
//! Keeps a [`beads_graph::GraphMirror`] consistent with the beads backend:
//! - Push events patch the mirror immediately where safe ([`MutationReconciler`])
//! - A debounced snapshot refresh reconciles everything else
//! - Snapshot merges preserve layout and freeze it while it settles
//! - User edits apply optimistically and roll back on rejection
//!   ([`OptimisticMutator`])
//!
//! # Example
//!
//! ```rust,ignore
//! use beads_stream::HttpTransport;
//! use beads_sync::{HttpBackend, SyncConfig, SyncEngine, SyncSignal};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), beads_sync::SyncError> {
//! let config = SyncConfig::default().with_base_url("http://localhost:8080");
//! let backend = Arc::new(HttpBackend::new(config.clone()));
//! let engine = SyncEngine::init(
//!     config,
//!     Arc::new(HttpTransport::new()),
//!     backend.clone(),
//!     backend,
//! )?;
//!
//! let mut signals = engine.subscribe();
//! while let Ok(signal) = signals.recv().await {
//!     if let SyncSignal::StructuralChange { added, removed } = signal {
//!         println!("+{} -{}", added.len(), removed.len());
//!     }
//! }
//! engine.teardown().await;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod optimistic;
pub mod reconciler;
pub mod signal;
pub mod task;

pub use backend::{MutationBackend, SnapshotSource};
pub use config::SyncConfig;
pub use engine::{SyncEngine, BUS_STREAM, MUTATION_STREAM, SIGNAL_CAPACITY};
pub use error::SyncError;
pub use http::HttpBackend;
pub use optimistic::OptimisticMutator;
pub use reconciler::{patch_from_fields, MutationReconciler, RefreshPolicy, SharedMirror};
pub use signal::{Connectivity, NoticeLevel, SyncSignal};
pub use task::CancellableTask;
