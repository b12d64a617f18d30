//! One-shot readiness gate.
//!
//! Collaborators that need a slow startup (loading a compiler engine, say)
//! hold a gate. Callers suspend on it until it is signaled, then start in
//! the order they arrived. Once started, operations run concurrently.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

#[derive(Clone)]
pub struct ReadyGate {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
    /// Fair lock so queued operations start in call order
    order: Arc<Mutex<()>>,
}

impl ReadyGate {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
            order: Arc::new(Mutex::new(())),
        }
    }

    /// Open the gate. Idempotent.
    pub fn signal(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    /// Suspend until the gate is open.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Wait for readiness, then run `op`.
    ///
    /// Calls that start waiting before the signal are released in call
    /// order. The turn is given up before `op` runs, so a slow operation
    /// never holds back the next one and `op` may itself use the gate.
    pub async fn run<F, T>(&self, op: F) -> T
    where
        F: Future<Output = T>,
    {
        {
            let _turn = self.order.lock().await;
            self.wait().await;
        }
        op.await
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}
