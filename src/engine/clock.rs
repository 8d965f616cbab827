//! Time and cancellation primitives for the confirmation loop.
//!
//! The inter-attempt delay goes through the `Clock` trait so tests can run
//! the loop without real time passing. Cancellation is a `watch` channel:
//! the caller keeps a `CancelHandle`, the loop checks its `CancelSignal`
//! every iteration and races it against the delay.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Source of the inter-attempt delay.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real time, backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and records every requested delay.
#[derive(Debug, Default, Clone)]
pub struct InstantClock {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl InstantClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Clock for InstantClock {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Create a connected cancel handle / signal pair.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelSignal(rx))
}

/// Caller side: fires the cancellation.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    /// Another signal observing this handle.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal(self.0.subscribe())
    }
}

/// Loop side: observed once per iteration and during the delay.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        CancelSignal(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation fires. Pends forever if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
