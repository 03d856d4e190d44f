//! StateStore - Shared Telemetry and Frame State
//!
//! ## Responsibilities
//!
//! - Latest snapshot per arm, replaced wholesale on every publish
//! - Bus handle slot per arm (the exclusive section for hardware I/O)
//! - Latest encoded camera frame
//!
//! ## Synchronization
//!
//! Each data class has its own primitive so a slow video reader never
//! stalls a telemetry writer:
//!
//! - snapshots: one `RwLock<Arc<ArmSnapshot>>` per arm, held only for a
//!   pointer swap or clone
//! - bus handles: one async `Mutex` per arm, held for the duration of one
//!   batched read/write or a reconnect
//! - frames: a blocking `RwLock<Option<Arc<FrameBuffer>>>`, held only for
//!   a pointer swap or clone, so stream ticks never await it

use crate::camera::is_jpeg;
use crate::error::{Error, Result};
use crate::models::Arm;
use crate::motor_bus::MotorBus;
use axum::body::Bytes;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

/// Bus handle of one arm; `None` while disconnected or being swapped
pub type BusSlot = Arc<Mutex<Option<Box<dyn MotorBus>>>>;

/// Raw register values of one motor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorReading {
    pub name: &'static str,
    /// 0.1 V units
    pub voltage: i32,
    /// °C
    pub temp: i32,
    pub load: i32,
    pub current: i32,
    /// 0..=4095
    pub position: i32,
}

/// Published telemetry of one arm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmSnapshot {
    pub connected: bool,
    /// Bus order; empty until the first good read
    pub motors: Vec<MotorReading>,
    pub min_voltage: Option<i32>,
    pub max_temp: Option<i32>,
    pub captured_at: Option<DateTime<Utc>>,
    /// Assigned by the store on publish
    pub sequence: u64,
}

impl ArmSnapshot {
    pub fn never_connected() -> Self {
        Self {
            connected: false,
            motors: Vec::new(),
            min_voltage: None,
            max_temp: None,
            captured_at: None,
            sequence: 0,
        }
    }

    /// Snapshot of one successful read
    pub fn from_readings(motors: Vec<MotorReading>, captured_at: DateTime<Utc>) -> Self {
        let min_voltage = motors.iter().map(|m| m.voltage).min();
        let max_temp = motors.iter().map(|m| m.temp).max();
        Self {
            connected: true,
            motors,
            min_voltage,
            max_temp,
            captured_at: Some(captured_at),
            sequence: 0,
        }
    }

    pub fn has_data(&self) -> bool {
        !self.motors.is_empty()
    }

    /// Same readings, flagged as stale
    pub fn disconnected(&self) -> Self {
        Self {
            connected: false,
            ..self.clone()
        }
    }
}

impl Default for ArmSnapshot {
    fn default() -> Self {
        Self::never_connected()
    }
}

/// One encoded camera frame
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub jpeg: Bytes,
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
}

struct ArmEntry {
    snapshot: RwLock<Arc<ArmSnapshot>>,
    bus: BusSlot,
}

impl ArmEntry {
    fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(ArmSnapshot::never_connected())),
            bus: Arc::new(Mutex::new(None)),
        }
    }
}

/// Shared state, constructed once and handed to every component
pub struct StateStore {
    leader: ArmEntry,
    follower: ArmEntry,
    frame: StdRwLock<Option<Arc<FrameBuffer>>>,
    frames_published: AtomicU64,
    camera_connected: AtomicBool,
    started_at: Instant,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            leader: ArmEntry::new(),
            follower: ArmEntry::new(),
            frame: StdRwLock::new(None),
            frames_published: AtomicU64::new(0),
            camera_connected: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    fn entry(&self, arm: Arm) -> &ArmEntry {
        match arm {
            Arm::Leader => &self.leader,
            Arm::Follower => &self.follower,
        }
    }

    // ========================================
    // Arm snapshots
    // ========================================

    /// Latest published snapshot
    pub async fn snapshot(&self, arm: Arm) -> Arc<ArmSnapshot> {
        self.entry(arm).snapshot.read().await.clone()
    }

    /// Replace the arm's snapshot; returns the assigned sequence number
    pub async fn publish_snapshot(&self, arm: Arm, mut snapshot: ArmSnapshot) -> u64 {
        let mut current = self.entry(arm).snapshot.write().await;
        snapshot.sequence = current.sequence + 1;
        let sequence = snapshot.sequence;
        *current = Arc::new(snapshot);
        sequence
    }

    /// Flag the arm as disconnected, keeping its last readings.
    /// Returns `false` if it already was.
    pub async fn mark_disconnected(&self, arm: Arm) -> bool {
        let mut current = self.entry(arm).snapshot.write().await;
        if !current.connected {
            return false;
        }
        let mut stale = current.disconnected();
        stale.sequence = current.sequence + 1;
        *current = Arc::new(stale);
        true
    }

    pub async fn is_connected(&self, arm: Arm) -> bool {
        self.entry(arm).snapshot.read().await.connected
    }

    /// Bus handle slot of the arm
    pub fn bus_slot(&self, arm: Arm) -> BusSlot {
        self.entry(arm).bus.clone()
    }

    // ========================================
    // Camera frames
    // ========================================

    /// Replace the latest frame; returns its sequence number
    pub fn publish_frame(&self, jpeg: Bytes, captured_at: DateTime<Utc>) -> Result<u64> {
        if !is_jpeg(&jpeg) {
            return Err(Error::InvalidFrame(format!(
                "{} bytes without JPEG header",
                jpeg.len()
            )));
        }

        let mut slot = self.frame.write().unwrap_or_else(|e| e.into_inner());
        let sequence = slot.as_ref().map_or(0, |f| f.sequence) + 1;
        *slot = Some(Arc::new(FrameBuffer {
            jpeg,
            sequence,
            captured_at,
        }));
        drop(slot);

        self.frames_published.fetch_add(1, Ordering::Relaxed);
        Ok(sequence)
    }

    pub fn latest_frame(&self) -> Option<Arc<FrameBuffer>> {
        self.frame.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn frames_published(&self) -> u64 {
        self.frames_published.load(Ordering::Relaxed)
    }

    pub fn set_camera_connected(&self, connected: bool) {
        self.camera_connected.store(connected, Ordering::Relaxed);
    }

    pub fn camera_connected(&self) -> bool {
        self.camera_connected.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor_bus::ARM_MOTORS;

    fn readings(voltages: [i32; 6], temps: [i32; 6]) -> Vec<MotorReading> {
        ARM_MOTORS
            .iter()
            .enumerate()
            .map(|(i, m)| MotorReading {
                name: m.name,
                voltage: voltages[i],
                temp: temps[i],
                load: 0,
                current: 0,
                position: 100 * i as i32,
            })
            .collect()
    }

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];

    #[test]
    fn test_min_max_from_readings() {
        let snapshot = ArmSnapshot::from_readings(
            readings([72, 74, 70, 75, 73, 71], [30, 41, 38, 29, 35, 33]),
            Utc::now(),
        );
        assert_eq!(snapshot.min_voltage, Some(70));
        assert_eq!(snapshot.max_temp, Some(41));
        assert!(snapshot.connected);
    }

    #[tokio::test]
    async fn test_disconnect_keeps_readings() {
        let store = StateStore::new();
        let snapshot = ArmSnapshot::from_readings(readings([70; 6], [30; 6]), Utc::now());
        store.publish_snapshot(Arm::Leader, snapshot).await;
        let before = store.snapshot(Arm::Leader).await;

        assert!(store.mark_disconnected(Arm::Leader).await);
        assert!(!store.mark_disconnected(Arm::Leader).await);

        let after = store.snapshot(Arm::Leader).await;
        assert!(!after.connected);
        assert_eq!(after.motors, before.motors);
        assert_eq!(after.captured_at, before.captured_at);
        assert_eq!(after.sequence, before.sequence + 1);

        // The other arm is untouched
        assert_eq!(*store.snapshot(Arm::Follower).await, ArmSnapshot::never_connected());
    }

    #[tokio::test]
    async fn test_snapshot_sequence_increases() {
        let store = StateStore::new();
        let first = ArmSnapshot::from_readings(readings([70; 6], [30; 6]), Utc::now());
        let second = ArmSnapshot::from_readings(readings([71; 6], [31; 6]), Utc::now());
        let s1 = store.publish_snapshot(Arm::Follower, first).await;
        let s2 = store.publish_snapshot(Arm::Follower, second).await;
        assert!(s2 > s1);
    }

    #[test]
    fn test_publish_frame_rejects_non_jpeg() {
        let store = StateStore::new();
        let result = store.publish_frame(Bytes::from_static(b"\x89PNG\r\n"), Utc::now());
        assert!(matches!(result, Err(Error::InvalidFrame(_))));
        assert!(store.latest_frame().is_none());
        assert_eq!(store.frames_published(), 0);
    }

    #[test]
    fn test_frame_sequence() {
        let store = StateStore::new();

        assert_eq!(store.publish_frame(Bytes::from_static(JPEG), Utc::now()).unwrap(), 1);
        let first = store.latest_frame().expect("frame");
        assert_eq!(first.sequence, 1);

        assert_eq!(store.publish_frame(Bytes::from_static(JPEG), Utc::now()).unwrap(), 2);
        // Readers keep the buffer they already hold
        assert_eq!(first.sequence, 1);
        assert_eq!(store.latest_frame().map(|f| f.sequence), Some(2));
        assert_eq!(store.frames_published(), 2);
    }
}
