//! armwatch library
//!
//! Live telemetry and video for a leader/follower pair of SO-101 arms.
//!
//! ## Architecture
//!
//! 1. MotorBus - batched register access per arm (Feetech serial bus)
//! 2. Camera - frame source (ffmpeg/V4L2) and JPEG encoding
//! 3. StateStore - latest snapshots, bus slots and frame buffer
//! 4. TelemetryPoller - periodic sampling of both arms
//! 5. FramePublisher - capture loop feeding the frame buffer
//! 6. BusOrchestrator - reconnect, torque and home commands
//! 7. ViewerRegistry - open video streams
//! 8. WebAPI - dashboard, JSON, MJPEG and command endpoints
//!
//! ## Design Principles
//!
//! - Background loops write, HTTP handlers read; only the orchestrator swaps handles
//! - Every hardware call runs on the blocking pool, bounded by a timeout
//! - A hardware failure becomes a state flag, never a process exit

pub mod arm_status_tracker;
pub mod bus_orchestrator;
pub mod camera;
pub mod error;
pub mod frame_publisher;
pub mod models;
pub mod motor_bus;
pub mod port_probe;
pub mod state;
pub mod state_store;
pub mod telemetry_poller;
pub mod viewer_registry;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
