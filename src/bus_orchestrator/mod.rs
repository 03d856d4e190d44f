//! BusOrchestrator - Bus Handle Lifecycle
//!
//! ## Responsibilities
//!
//! - Reconnect: tear down and re-open both bus handles
//! - Torque control (relax / hold) through the open handle
//! - Drive an arm back to its folded rest pose
//! - Release every handle on shutdown
//!
//! Handles are swapped under the same per-arm slot lock the poller reads
//! under, so the poller only ever sees a live handle or an empty slot.
//! Reconnects are serialized: a second request waits for the first and then
//! runs its own full cycle.

use crate::arm_status_tracker::ArmStatusTracker;
use crate::error::{Error, Result};
use crate::models::{Arm, ReconnectArms, ReconnectReport};
use crate::motor_bus::{BusConnector, BusError, MotorBus, RegisterKind, ARM_MOTORS};
use crate::state_store::StateStore;
use crate::telemetry_poller::{PollOutcome, TelemetryPoller};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Write Torque_Enable then Lock on all motors (1 = hold, 0 = relax)
fn write_torque(bus: &mut dyn MotorBus, enabled: bool) -> std::result::Result<(), BusError> {
    let value = i32::from(enabled);
    let values: Vec<(&str, i32)> = ARM_MOTORS.iter().map(|m| (m.name, value)).collect();
    bus.write_registers(RegisterKind::TorqueEnable, &values)?;
    bus.write_registers(RegisterKind::Lock, &values)
}

/// Hold every motor, then command the rest pose
fn write_home(bus: &mut dyn MotorBus) -> std::result::Result<(), BusError> {
    let hold: Vec<(&str, i32)> = ARM_MOTORS.iter().map(|m| (m.name, 1)).collect();
    let goals: Vec<(&str, i32)> = ARM_MOTORS.iter().map(|m| (m.name, m.home_position)).collect();
    bus.write_registers(RegisterKind::TorqueEnable, &hold)?;
    bus.write_registers(RegisterKind::GoalPosition, &goals)
}

/// BusOrchestrator instance
pub struct BusOrchestrator {
    store: Arc<StateStore>,
    tracker: Arc<ArmStatusTracker>,
    connector: Arc<dyn BusConnector>,
    /// Serial port per configured arm
    ports: HashMap<Arm, String>,
    reconnect_lock: Mutex<()>,
}

impl BusOrchestrator {
    pub fn new(
        store: Arc<StateStore>,
        tracker: Arc<ArmStatusTracker>,
        connector: Arc<dyn BusConnector>,
        ports: HashMap<Arm, String>,
    ) -> Self {
        Self {
            store,
            tracker,
            connector,
            ports,
            reconnect_lock: Mutex::new(()),
        }
    }

    /// Arms with a configured port
    pub fn configured_arms(&self) -> Vec<Arm> {
        Arm::ALL
            .into_iter()
            .filter(|arm| self.ports.contains_key(arm))
            .collect()
    }

    /// Tear down both handles and re-open the configured ones
    pub async fn reconnect(&self) -> ReconnectReport {
        let _guard = self.reconnect_lock.lock().await;
        tracing::info!("Reconnecting arms");

        for arm in Arm::ALL {
            self.teardown(arm).await;
        }

        let mut arms = ReconnectArms::default();
        for arm in Arm::ALL {
            let Some(port) = self.ports.get(&arm) else {
                tracing::debug!(arm = %arm, "No port configured, skipping");
                continue;
            };

            let status = arms.get_mut(arm);
            status.configured = true;

            if let Err(e) = self.connect(arm, port).await {
                tracing::warn!(arm = %arm, port = %port, error = %e, "Arm connect failed");
                status.error = Some(e.to_string());
                continue;
            }

            // Fresh values before the caller looks at /robot_data again
            match TelemetryPoller::poll_arm(&self.store, &self.tracker, arm).await {
                PollOutcome::Published { .. } => status.connected = true,
                PollOutcome::ReadFailed(e) => status.error = Some(e),
                PollOutcome::NoHandle => status.error = Some(BusError::NotConnected.to_string()),
            }
        }

        let report = ReconnectReport::from_arms(arms);
        tracing::info!(
            status = %report.status,
            leader = report.arms.leader.connected,
            follower = report.arms.follower.connected,
            "Reconnect finished"
        );
        report
    }

    async fn connect(&self, arm: Arm, port: &str) -> Result<()> {
        let connector = self.connector.clone();
        let port_name = port.to_string();
        let bus = tokio::task::spawn_blocking(move || connector.connect(&port_name))
            .await
            .map_err(|e| Error::Internal(format!("connect task failed: {}", e)))??;

        *self.store.bus_slot(arm).lock().await = Some(bus);
        self.tracker.record_connect(arm).await;
        tracing::info!(arm = %arm, port = %port, "Arm bus opened");
        Ok(())
    }

    /// Take the handle out of its slot and close it
    async fn teardown(&self, arm: Arm) {
        let slot = self.store.bus_slot(arm);
        let old = {
            let mut guard = slot.lock().await;
            let old = guard.take();
            self.store.mark_disconnected(arm).await;
            old
        };

        if let Some(mut bus) = old {
            if let Err(e) = tokio::task::spawn_blocking(move || bus.disconnect()).await {
                tracing::error!(arm = %arm, error = %e, "Bus disconnect failed");
            }
            self.tracker.record_teardown(arm).await;
        }
    }

    /// Enable (hold) or disable (relax) torque on every motor of an arm
    pub async fn set_torque(&self, arm: Arm, enabled: bool) -> Result<()> {
        let mut slot = self.store.bus_slot(arm).lock_owned().await;
        if slot.is_none() {
            return Err(Error::ArmNotConnected(arm));
        }

        tokio::task::spawn_blocking(move || match slot.as_mut() {
            Some(bus) => write_torque(&mut **bus, enabled),
            None => Err(BusError::NotConnected),
        })
        .await
        .map_err(|e| Error::Internal(format!("torque task failed: {}", e)))??;

        tracing::info!(arm = %arm, enabled, "Torque updated");
        Ok(())
    }

    /// Enable torque and command every motor of an arm to its home position
    pub async fn move_home(&self, arm: Arm) -> Result<()> {
        let mut slot = self.store.bus_slot(arm).lock_owned().await;
        if slot.is_none() {
            return Err(Error::ArmNotConnected(arm));
        }

        tokio::task::spawn_blocking(move || match slot.as_mut() {
            Some(bus) => write_home(&mut **bus),
            None => Err(BusError::NotConnected),
        })
        .await
        .map_err(|e| Error::Internal(format!("home task failed: {}", e)))??;

        tracing::info!(arm = %arm, "Arm moving to home position");
        Ok(())
    }

    /// Close every handle
    pub async fn shutdown(&self) {
        let _guard = self.reconnect_lock.lock().await;
        for arm in Arm::ALL {
            self.teardown(arm).await;
        }
        tracing::info!("Arm buses closed");
    }
}
