//! Cancellable deferred messages
//!
//! A [`CancellableTask`] posts one message back to the owning loop after a
//! delay. Rescheduling or cancelling invalidates anything already in flight:
//! every schedule gets a fresh generation, and the loop only acts on a
//! message whose generation is still current ([`CancellableTask::accept`]).
//! This gives debounce semantics without sharing state across tasks.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Single-slot timer posting `make(generation)` on expiry
#[derive(Debug)]
pub struct CancellableTask<M: Send + 'static> {
    tx: mpsc::UnboundedSender<M>,
    make: fn(u64) -> M,
    generation: u64,
    deadline: Option<Instant>,
    timer: Option<JoinHandle<()>>,
}

impl<M: Send + 'static> CancellableTask<M> {
    /// Create an idle task posting into `tx`
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<M>, make: fn(u64) -> M) -> Self {
        Self {
            tx,
            make,
            generation: 0,
            deadline: None,
            timer: None,
        }
    }

    /// (Re)arm the timer; any outstanding schedule is superseded
    ///
    /// Must be called within a tokio runtime.
    pub fn schedule(&mut self, delay: Duration) -> u64 {
        self.abort_timer();
        self.generation += 1;
        let generation = self.generation;
        let message = (self.make)(generation);
        let tx = self.tx.clone();
        self.deadline = Some(Instant::now() + delay);
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(message);
        }));
        generation
    }

    /// Disarm; a message already posted becomes stale
    pub fn cancel(&mut self) {
        self.abort_timer();
        if self.deadline.take().is_some() {
            self.generation += 1;
        }
    }

    /// Consume an expiry message
    ///
    /// Returns `true` exactly once for the current schedule.
    pub fn accept(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.deadline.is_none() {
            return false;
        }
        self.deadline = None;
        self.timer = None;
        true
    }

    /// Whether a schedule is outstanding
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// When the outstanding schedule fires
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Current generation
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn abort_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl<M: Send + 'static> Drop for CancellableTask<M> {
    fn drop(&mut self) {
        self.abort_timer();
    }
}
