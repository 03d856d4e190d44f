//! FramePublisher - Camera Capture Loop
//!
//! ## Responsibilities
//!
//! - Own the camera handle and read frames continuously
//! - Encode each frame to JPEG and replace the shared frame buffer
//! - Reconnect the camera after a hard failure, with backoff
//!
//! A read timeout skips the cycle and leaves the buffer alone. Capture never
//! waits on viewers; slow streams simply skip frames.

use crate::camera::{
    encode_jpeg, CameraConnector, CameraDevice, CameraError, CameraSettings, DEFAULT_CAMERA,
    JPEG_QUALITY,
};
use crate::state_store::StateStore;
use axum::body::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// FramePublisher configuration
#[derive(Debug, Clone)]
pub struct FramePublisherConfig {
    pub settings: CameraSettings,
    /// Bound on one blocking frame read
    pub read_timeout: Duration,
    /// First pause after a hard failure or failed connect
    pub retry_pause: Duration,
    /// Longest pause between connect attempts
    pub max_backoff: Duration,
    pub jpeg_quality: u8,
}

impl Default for FramePublisherConfig {
    fn default() -> Self {
        Self {
            settings: DEFAULT_CAMERA,
            read_timeout: Duration::from_millis(200),
            retry_pause: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            jpeg_quality: JPEG_QUALITY,
        }
    }
}

/// Outcome of one read + encode
enum Capture {
    Frame(Vec<u8>),
    /// Nothing usable this cycle; keep the handle
    Skip,
    /// Handle is dead
    Lost(String),
}

/// FramePublisher instance
pub struct FramePublisher {
    store: Arc<StateStore>,
    connector: Arc<dyn CameraConnector>,
    config: FramePublisherConfig,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FramePublisher {
    pub fn new(
        store: Arc<StateStore>,
        connector: Arc<dyn CameraConnector>,
        config: FramePublisherConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            connector,
            config,
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Start the capture loop
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            tracing::warn!("Frame publisher already running");
            return;
        }

        self.shutdown.send_replace(false);
        tracing::info!(
            device_index = self.config.settings.device_index,
            width = self.config.settings.width,
            height = self.config.settings.height,
            fps = self.config.settings.fps,
            "Starting frame publisher"
        );

        let store = self.store.clone();
        let connector = self.connector.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown.subscribe();

        *task = Some(tokio::spawn(Self::run(store, connector, config, shutdown)));
    }

    /// Stop the loop and release the camera
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        tracing::info!("Stopping frame publisher");

        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Frame publisher ended abnormally");
            }
        }
    }

    async fn run(
        store: Arc<StateStore>,
        connector: Arc<dyn CameraConnector>,
        config: FramePublisherConfig,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut camera: Option<Box<dyn CameraDevice>> = None;
        let mut backoff = config.retry_pause;

        while !*shutdown.borrow() {
            let device = match camera.take() {
                Some(device) => device,
                None => match Self::connect(connector.clone(), config.settings.clone()).await {
                    Ok(device) => {
                        store.set_camera_connected(true);
                        tracing::info!(
                            device_index = config.settings.device_index,
                            "Camera connected"
                        );
                        device
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            retry_ms = backoff.as_millis() as u64,
                            "Camera connect failed"
                        );
                        Self::pause(&mut shutdown, backoff).await;
                        backoff = (backoff * 2).min(config.max_backoff);
                        continue;
                    }
                },
            };

            let (device, capture) =
                Self::capture(device, config.read_timeout, config.jpeg_quality).await;

            match capture {
                Capture::Frame(jpeg) => {
                    match store.publish_frame(Bytes::from(jpeg), Utc::now()) {
                        Ok(sequence) => tracing::trace!(sequence, "Frame published"),
                        Err(e) => tracing::warn!(error = %e, "Frame dropped"),
                    }
                    backoff = config.retry_pause;
                    camera = device;
                }
                Capture::Skip => camera = device,
                Capture::Lost(reason) => {
                    if let Some(device) = device {
                        Self::release(device).await;
                    }
                    store.set_camera_connected(false);
                    tracing::warn!(
                        reason = %reason,
                        retry_ms = backoff.as_millis() as u64,
                        "Camera lost"
                    );
                    Self::pause(&mut shutdown, backoff).await;
                    backoff = (backoff * 2).min(config.max_backoff);
                }
            }
        }

        if let Some(device) = camera {
            Self::release(device).await;
        }
        store.set_camera_connected(false);
        tracing::info!("Frame publisher stopped");
    }

    async fn connect(
        connector: Arc<dyn CameraConnector>,
        settings: CameraSettings,
    ) -> Result<Box<dyn CameraDevice>, CameraError> {
        tokio::task::spawn_blocking(move || connector.connect(&settings))
            .await
            .map_err(|e| CameraError::Open(e.to_string()))?
    }

    /// Read one frame and encode it on the blocking pool
    async fn capture(
        mut device: Box<dyn CameraDevice>,
        timeout: Duration,
        quality: u8,
    ) -> (Option<Box<dyn CameraDevice>>, Capture) {
        let joined = tokio::task::spawn_blocking(move || {
            let capture = match device.read_frame(timeout) {
                Ok(frame) => match encode_jpeg(&frame, quality) {
                    Ok(jpeg) => Capture::Frame(jpeg),
                    Err(e) => {
                        tracing::warn!(error = %e, "Frame skipped");
                        Capture::Skip
                    }
                },
                Err(CameraError::Timeout(t)) => {
                    tracing::trace!(timeout_ms = t.as_millis() as u64, "No frame this cycle");
                    Capture::Skip
                }
                Err(e) => Capture::Lost(e.to_string()),
            };
            (device, capture)
        })
        .await;

        match joined {
            Ok((device, capture)) => (Some(device), capture),
            Err(e) => (None, Capture::Lost(format!("capture task failed: {}", e))),
        }
    }

    async fn release(mut device: Box<dyn CameraDevice>) {
        if let Err(e) = tokio::task::spawn_blocking(move || device.disconnect()).await {
            tracing::error!(error = %e, "Camera disconnect failed");
        }
    }

    /// Sleep unless shutdown is requested first
    async fn pause(shutdown: &mut watch::Receiver<bool>, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = shutdown.changed() => {}
        }
    }
}
