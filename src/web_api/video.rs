//! MJPEG streaming for `/video_feed`
//!
//! Each connection runs its own ticker and sends the latest frame when its
//! sequence number moved past the last one sent. Frames published between
//! two ticks are skipped for that viewer only.

use crate::state_store::StateStore;
use crate::viewer_registry::ViewerLease;
use axum::body::Bytes;
use futures::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Multipart boundary
pub const BOUNDARY: &str = "frame";

pub fn content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={}", BOUNDARY)
}

/// One multipart part carrying a JPEG
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

struct StreamState {
    store: Arc<StateStore>,
    lease: ViewerLease,
    ticker: Interval,
    shutdown: watch::Receiver<bool>,
    last_sequence: u64,
}

/// Endless part stream for one viewer; ends on server shutdown
///
/// Dropping the stream drops the lease, which unregisters the viewer.
pub fn frame_stream(
    store: Arc<StateStore>,
    lease: ViewerLease,
    shutdown: watch::Receiver<bool>,
    period: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let state = StreamState {
        store,
        lease,
        ticker,
        shutdown,
        last_sequence: 0,
    };

    futures::stream::unfold(state, |mut s| async move {
        loop {
            tokio::select! {
                _ = s.ticker.tick() => {}
                changed = s.shutdown.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }

            let stopping = *s.shutdown.borrow();
            if stopping {
                tracing::debug!(viewer_id = %s.lease.id(), "Video stream closed by shutdown");
                return None;
            }

            let Some(frame) = s.store.latest_frame() else {
                continue;
            };
            if frame.sequence <= s.last_sequence {
                continue;
            }

            s.last_sequence = frame.sequence;
            s.lease.record_frame();
            return Some((Ok(mjpeg_part(&frame.jpeg)), s));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewer_registry::ViewerRegistry;
    use chrono::Utc;
    use futures::StreamExt;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x01, 0x02, 0xFF, 0xD9];
    const TICK: Duration = Duration::from_millis(5);

    fn publish(store: &StateStore) -> u64 {
        store.publish_frame(Bytes::from_static(JPEG), Utc::now()).unwrap()
    }

    #[test]
    fn test_part_layout() {
        let part = mjpeg_part(JPEG);
        let expected_head = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 8\r\n\r\n";
        assert!(part.starts_with(expected_head));
        assert_eq!(&part[expected_head.len()..expected_head.len() + 8], JPEG);
        assert!(part.ends_with(b"\r\n"));
        assert_eq!(content_type(), "multipart/x-mixed-replace; boundary=frame");
    }

    #[tokio::test]
    async fn test_no_output_before_first_frame() {
        let store = Arc::new(StateStore::new());
        let registry = Arc::new(ViewerRegistry::new());
        let mut stream = Box::pin(frame_stream(
            store.clone(),
            registry.register(),
            registry.shutdown_signal(),
            TICK,
        ));

        let next = tokio::time::timeout(Duration::from_millis(40), stream.next()).await;
        assert!(next.is_err());

        publish(&store);
        let part = stream.next().await.unwrap().unwrap();
        assert!(part.starts_with(b"--frame\r\n"));
    }

    #[tokio::test]
    async fn test_same_frame_is_sent_once() {
        let store = Arc::new(StateStore::new());
        let registry = Arc::new(ViewerRegistry::new());
        publish(&store);

        let mut stream = Box::pin(frame_stream(
            store.clone(),
            registry.register(),
            registry.shutdown_signal(),
            TICK,
        ));
        stream.next().await.unwrap().unwrap();

        let again = tokio::time::timeout(Duration::from_millis(40), stream.next()).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_dropping_one_viewer_leaves_the_other() {
        let store = Arc::new(StateStore::new());
        let registry = Arc::new(ViewerRegistry::new());
        let mut first = Box::pin(frame_stream(
            store.clone(),
            registry.register(),
            registry.shutdown_signal(),
            TICK,
        ));
        let second = Box::pin(frame_stream(
            store.clone(),
            registry.register(),
            registry.shutdown_signal(),
            TICK,
        ));
        assert_eq!(registry.viewer_count(), 2);

        publish(&store);
        first.next().await.unwrap().unwrap();
        drop(second);
        assert_eq!(registry.viewer_count(), 1);

        for _ in 0..3 {
            publish(&store);
            let part = tokio::time::timeout(Duration::from_secs(1), first.next())
                .await
                .expect("remaining viewer keeps receiving");
            assert!(part.unwrap().unwrap().ends_with(b"\xFF\xD9\r\n"));
        }
        assert_eq!(store.latest_frame().map(|f| f.sequence), Some(4));
    }

    #[tokio::test]
    async fn test_shutdown_ends_stream() {
        let store = Arc::new(StateStore::new());
        let registry = Arc::new(ViewerRegistry::new());
        let mut stream = Box::pin(frame_stream(
            store,
            registry.register(),
            registry.shutdown_signal(),
            Duration::from_secs(10),
        ));

        registry.shutdown();
        assert!(stream.next().await.is_none());
        drop(stream);
        assert_eq!(registry.viewer_count(), 0);
    }
}
