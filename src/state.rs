//! Application state
//!
//! Holds all shared components and state

use crate::arm_status_tracker::ArmStatusTracker;
use crate::bus_orchestrator::BusOrchestrator;
use crate::camera::{CameraConnector, CameraSettings, DEFAULT_CAMERA};
use crate::frame_publisher::{FramePublisher, FramePublisherConfig};
use crate::models::Arm;
use crate::motor_bus::BusConnector;
use crate::state_store::StateStore;
use crate::telemetry_poller::{TelemetryPoller, DEFAULT_POLL_INTERVAL};
use crate::viewer_registry::ViewerRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Non-empty environment variable
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.parse().ok())
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Serial device of the leader arm
    pub leader_port: Option<String>,
    /// Serial device of the follower arm
    pub follower_port: Option<String>,
    /// Server host
    pub host: String,
    /// First port tried
    pub port: u16,
    /// Number of sequential ports tried
    pub port_attempts: u16,
    /// Telemetry period
    pub poll_interval: Duration,
    /// Wake-up period of each video stream
    pub video_poll_interval: Duration,
    /// Camera capture settings (fixed)
    pub camera: CameraSettings,
}

impl AppConfig {
    pub fn port_for(&self, arm: Arm) -> Option<&str> {
        match arm {
            Arm::Leader => self.leader_port.as_deref(),
            Arm::Follower => self.follower_port.as_deref(),
        }
    }

    /// Arms with a configured serial port
    pub fn configured_arms(&self) -> Vec<Arm> {
        Arm::ALL
            .into_iter()
            .filter(|&arm| self.port_for(arm).is_some())
            .collect()
    }

    fn arm_ports(&self) -> HashMap<Arm, String> {
        Arm::ALL
            .into_iter()
            .filter_map(|arm| self.port_for(arm).map(|p| (arm, p.to_string())))
            .collect()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            leader_port: env_opt("LEADER_ARM_PORT"),
            follower_port: env_opt("FOLLOWER_ARM_PORT"),
            host: env_opt("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_parse("PORT").unwrap_or(5001),
            port_attempts: env_parse("PORT_ATTEMPTS").unwrap_or(100),
            poll_interval: env_parse("POLL_INTERVAL_MS")
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            video_poll_interval: DEFAULT_CAMERA.frame_interval(),
            camera: DEFAULT_CAMERA,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Snapshots, bus slots and frame buffer
    pub store: Arc<StateStore>,
    /// Arm link state (transition logging)
    pub tracker: Arc<ArmStatusTracker>,
    /// TelemetryPoller
    pub poller: Arc<TelemetryPoller>,
    /// FramePublisher (camera owner)
    pub publisher: Arc<FramePublisher>,
    /// BusOrchestrator (reconnect / torque)
    pub orchestrator: Arc<BusOrchestrator>,
    /// Open video streams
    pub viewers: Arc<ViewerRegistry>,
}

impl AppState {
    /// Wire every component; nothing is started or connected yet
    pub fn new(
        config: AppConfig,
        bus_connector: Arc<dyn BusConnector>,
        camera_connector: Arc<dyn CameraConnector>,
    ) -> Self {
        let store = Arc::new(StateStore::new());
        let tracker = Arc::new(ArmStatusTracker::new());

        let poller = Arc::new(TelemetryPoller::new(
            store.clone(),
            tracker.clone(),
            config.poll_interval,
        ));
        let publisher = Arc::new(FramePublisher::new(
            store.clone(),
            camera_connector,
            FramePublisherConfig {
                settings: config.camera.clone(),
                ..FramePublisherConfig::default()
            },
        ));
        let orchestrator = Arc::new(BusOrchestrator::new(
            store.clone(),
            tracker.clone(),
            bus_connector,
            config.arm_ports(),
        ));

        Self {
            config,
            store,
            tracker,
            poller,
            publisher,
            orchestrator,
            viewers: Arc::new(ViewerRegistry::new()),
        }
    }
}
