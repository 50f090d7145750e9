//! Graceful shutdown coordination.
//!
//! Uses a watch channel to broadcast the shutdown signal and tracks open SSE
//! streams so the process can wait for them to drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::metrics;

/// Shutdown coordinator for graceful termination.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<ShutdownInner>,
}

struct ShutdownInner {
    /// Broadcast channel for shutdown signal.
    shutdown_tx: watch::Sender<bool>,
    /// Receiver for shutdown signal (cloned for each stream).
    shutdown_rx: watch::Receiver<bool>,
    /// Open stream count.
    active_streams: AtomicU64,
    /// Waiters for stream drain.
    drain_notify: tokio::sync::Notify,
    /// Next stream ID.
    next_stream_id: AtomicU64,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            inner: Arc::new(ShutdownInner {
                shutdown_tx,
                shutdown_rx,
                active_streams: AtomicU64::new(0),
                drain_notify: tokio::sync::Notify::new(),
                next_stream_id: AtomicU64::new(1),
            }),
        }
    }

    /// Signal shutdown to all streams.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }

    /// Check if shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.inner.shutdown_rx.borrow()
    }

    /// Get a receiver to watch for shutdown.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_rx.clone()
    }

    /// Resolve once shutdown has been signaled.
    pub async fn signalled(&self) {
        wait_for_shutdown(&mut self.subscribe()).await;
    }

    /// Get current open stream count.
    pub fn active_streams(&self) -> u64 {
        self.inner.active_streams.load(Ordering::Relaxed)
    }

    /// Register a new stream and return a guard that decrements on drop.
    pub fn register_stream(&self) -> StreamGuard {
        let id = self.inner.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let new_count = self.inner.active_streams.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_active_streams(new_count);

        StreamGuard {
            coordinator: self.clone(),
            id,
        }
    }

    /// Wait for all streams to drain.
    pub async fn wait_for_drain(&self) {
        loop {
            // Create the notification future before checking the count to avoid
            // missing a notify that happens after the load but before awaiting.
            let notified = self.inner.drain_notify.notified();
            if self.inner.active_streams.load(Ordering::Relaxed) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn unregister_stream(&self, id: u64) {
        let result = self.inner.active_streams.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |curr| curr.checked_sub(1),
        );

        match result {
            Ok(prev) => {
                let new_count = prev - 1;
                metrics::set_active_streams(new_count);
                if new_count == 0 {
                    self.inner.drain_notify.notify_waiters();
                }
            }
            Err(_) => {
                tracing::error!(id, "unregister_stream called with active_streams already at 0");
                metrics::set_active_streams(0);
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until the watched flag turns true. Never resolves if the sender is
/// gone without having signaled.
pub async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stopping| *stopping).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// RAII guard for stream lifecycle tracking.
pub struct StreamGuard {
    coordinator: ShutdownCoordinator,
    id: u64,
}

impl StreamGuard {
    /// Get the stream ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get a receiver to watch for shutdown.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.coordinator.subscribe()
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.coordinator.unregister_stream(self.id);
    }
}
