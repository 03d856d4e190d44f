//! TelemetryPoller - Periodic Arm Telemetry Sampling
//!
//! ## Responsibilities
//!
//! - One loop per configured arm on a fixed period
//! - One batched read of the telemetry registers for all six motors per tick
//! - Publish a fresh snapshot on success, flag the arm stale on failure
//!
//! A failed tick is never retried early; the next attempt is the next tick.
//! Arms without a configured port get no loop at all.

use crate::arm_status_tracker::ArmStatusTracker;
use crate::models::Arm;
use crate::motor_bus::{
    motor_names, BusError, MotorBus, RegisterKind, ARM_MOTORS, TELEMETRY_REGISTERS,
};
use crate::state_store::{ArmSnapshot, MotorReading, StateStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Default telemetry period
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// New snapshot published with this sequence number
    Published { sequence: u64 },
    /// The batched read failed; the arm is now flagged disconnected
    ReadFailed(String),
    /// No handle in the slot (never connected, or being swapped)
    NoHandle,
}

/// Read every telemetry register of every motor as one batch
pub fn read_telemetry(bus: &mut dyn MotorBus) -> Result<Vec<MotorReading>, BusError> {
    let names = motor_names();
    let readout = bus.read_registers(&TELEMETRY_REGISTERS, &names)?;

    ARM_MOTORS
        .iter()
        .map(|m| {
            Ok(MotorReading {
                name: m.name,
                voltage: readout.require(RegisterKind::PresentVoltage, m.name)?,
                temp: readout.require(RegisterKind::PresentTemperature, m.name)?,
                load: readout.require(RegisterKind::PresentLoad, m.name)?,
                current: readout.require(RegisterKind::PresentCurrent, m.name)?,
                position: readout.require(RegisterKind::PresentPosition, m.name)?,
            })
        })
        .collect()
}

/// TelemetryPoller instance
pub struct TelemetryPoller {
    store: Arc<StateStore>,
    tracker: Arc<ArmStatusTracker>,
    period: Duration,
    running: Arc<RwLock<bool>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TelemetryPoller {
    pub fn new(store: Arc<StateStore>, tracker: Arc<ArmStatusTracker>, period: Duration) -> Self {
        Self {
            store,
            tracker,
            period,
            running: Arc::new(RwLock::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start one polling loop per arm given
    pub async fn start(&self, arms: &[Arm]) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Telemetry poller already running");
                return;
            }
            *running = true;
        }

        let mut tasks = self.tasks.lock().await;
        for &arm in arms {
            tracing::info!(
                arm = %arm,
                period_ms = self.period.as_millis() as u64,
                "Starting telemetry loop"
            );

            let store = self.store.clone();
            let tracker = self.tracker.clone();
            let running = self.running.clone();
            let period = self.period;

            tasks.push(tokio::spawn(async move {
                let mut ticker = interval(period);
                // A slow read pushes the schedule back instead of bursting
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    ticker.tick().await;

                    if !*running.read().await {
                        break;
                    }

                    Self::poll_arm(&store, &tracker, arm).await;
                }

                tracing::info!(arm = %arm, "Telemetry loop stopped");
            }));
        }
    }

    /// Stop every loop and wait for in-flight reads to finish
    pub async fn stop(&self) {
        *self.running.write().await = false;
        tracing::info!("Stopping telemetry poller");

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Telemetry loop ended abnormally");
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Poll one arm once
    ///
    /// The slot lock is held across the read and the publish, so a reconnect
    /// either happens before the read or after the snapshot is published.
    pub async fn poll_arm(store: &StateStore, tracker: &ArmStatusTracker, arm: Arm) -> PollOutcome {
        let mut slot = store.bus_slot(arm).lock_owned().await;
        if slot.is_none() {
            store.mark_disconnected(arm).await;
            return PollOutcome::NoHandle;
        }

        let joined = tokio::task::spawn_blocking(move || {
            let result = match slot.as_mut() {
                Some(bus) => read_telemetry(&mut **bus).map(|r| (r, Utc::now())),
                None => Err(BusError::NotConnected),
            };
            (slot, result)
        })
        .await;

        let (slot, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(arm = %arm, error = %e, "Telemetry read task failed");
                tracker.record_read(arm, false).await;
                store.mark_disconnected(arm).await;
                return PollOutcome::ReadFailed(e.to_string());
            }
        };

        let outcome = match result {
            Ok((readings, captured_at)) => {
                let sequence = store
                    .publish_snapshot(arm, ArmSnapshot::from_readings(readings, captured_at))
                    .await;
                tracker.record_read(arm, true).await;
                tracing::trace!(arm = %arm, sequence, "Telemetry published");
                PollOutcome::Published { sequence }
            }
            Err(e) => {
                tracker.record_read(arm, false).await;
                if store.mark_disconnected(arm).await {
                    tracing::warn!(
                        arm = %arm,
                        error = %e,
                        "Telemetry read failed, arm marked disconnected"
                    );
                } else {
                    tracing::debug!(arm = %arm, error = %e, "Telemetry read failed");
                }
                PollOutcome::ReadFailed(e.to_string())
            }
        };

        drop(slot);
        outcome
    }
}
