//! Shared application state and the cross-task shutdown flags.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::resolver::RootSet;

/// Shutdown signalling shared between the accept loop and the console
/// coordinator. The drain flag is one-way: once set it stays set.
#[derive(Debug, Default)]
pub struct Shutdown {
    drain: AtomicBool,
    stop_control: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop accepting new connections; in-flight sessions finish normally.
    pub fn request_drain(&self) {
        self.drain.store(true, Ordering::SeqCst);
    }

    pub fn drain_requested(&self) -> bool {
        self.drain.load(Ordering::SeqCst)
    }

    /// Called by the accept loop after teardown to end the console task.
    pub fn stop_control(&self) {
        self.stop_control.notify_one();
    }

    /// Resolves once the accept loop has told the console task to stop.
    pub async fn control_stopped(&self) {
        self.stop_control.notified().await;
    }
}

/// Shared application state, cloned into every task.
#[derive(Clone)]
pub struct AppState {
    pub roots: Arc<RootSet>,
    pub shutdown: Arc<Shutdown>,
}

impl AppState {
    pub fn new(roots: RootSet) -> Self {
        Self {
            roots: Arc::new(roots),
            shutdown: Arc::new(Shutdown::new()),
        }
    }
}
