//! ViewerRegistry - Video Stream Connection Tracking
//!
//! ## Responsibilities
//!
//! - Register each open `/video_feed` connection
//! - Release the entry exactly once when the stream is dropped
//! - Broadcast a shutdown signal that ends every open stream
//!
//! The lease is released from `Drop`, which runs when hyper drops the
//! response body after the client goes away.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use uuid::Uuid;

struct ViewerEntry {
    connected_at: DateTime<Utc>,
    frames_sent: Arc<AtomicU64>,
}

/// ViewerRegistry instance
pub struct ViewerRegistry {
    viewers: Mutex<HashMap<Uuid, ViewerEntry>>,
    total_connections: AtomicU64,
    frames_sent: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl ViewerRegistry {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            viewers: Mutex::new(HashMap::new()),
            total_connections: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            shutdown,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, ViewerEntry>> {
        self.viewers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new viewer; dropping the lease unregisters it
    pub fn register(self: &Arc<Self>) -> ViewerLease {
        let id = Uuid::new_v4();
        let frames_sent = Arc::new(AtomicU64::new(0));
        let viewers = {
            let mut viewers = self.lock();
            viewers.insert(
                id,
                ViewerEntry {
                    connected_at: Utc::now(),
                    frames_sent: frames_sent.clone(),
                },
            );
            viewers.len()
        };
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        tracing::info!(viewer_id = %id, viewers, "Video viewer connected");

        ViewerLease {
            id,
            registry: self.clone(),
            frames_sent,
        }
    }

    fn unregister(&self, id: &Uuid) {
        let (entry, viewers) = {
            let mut viewers = self.lock();
            let entry = viewers.remove(id);
            (entry, viewers.len())
        };

        if let Some(entry) = entry {
            let duration_sec = (Utc::now() - entry.connected_at).num_seconds();
            tracing::info!(
                viewer_id = %id,
                frames_sent = entry.frames_sent.load(Ordering::Relaxed),
                duration_sec,
                viewers,
                "Video viewer disconnected"
            );
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.lock().len()
    }

    /// Connections accepted since startup
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    /// Parts sent across all viewers since startup
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// End every open stream and refuse to keep new ones open
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        tracing::info!(viewers = self.viewer_count(), "Closing video streams");
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

impl Default for ViewerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration of one open stream
pub struct ViewerLease {
    id: Uuid,
    registry: Arc<ViewerRegistry>,
    frames_sent: Arc<AtomicU64>,
}

impl ViewerLease {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn record_frame(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.registry.frames_sent.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for ViewerLease {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_lifecycle() {
        let registry = Arc::new(ViewerRegistry::new());
        let a = registry.register();
        let b = registry.register();
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.viewer_count(), 2);

        a.record_frame();
        a.record_frame();
        b.record_frame();
        assert_eq!(registry.frames_sent(), 3);

        drop(a);
        assert_eq!(registry.viewer_count(), 1);
        drop(b);
        assert_eq!(registry.viewer_count(), 0);

        // Totals outlive the viewers
        assert_eq!(registry.total_connections(), 2);
        assert_eq!(registry.frames_sent(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let registry = ViewerRegistry::new();
        let mut rx = registry.shutdown_signal();
        assert!(!*rx.borrow());

        registry.shutdown();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
