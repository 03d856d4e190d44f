//! MotorBus - Serial Bus Handle per Arm
//!
//! ## Responsibilities
//!
//! - Static motor layout of one SO-101 arm
//! - Register kinds and their control-table location
//! - Batched register read/write contract (`MotorBus`)
//! - Connection factory (`BusConnector`)
//!
//! A batch either succeeds for every requested motor or fails as a whole.
//! Handles never retry on their own; the caller decides what a failure means.

pub mod feetech;
pub mod mock;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use feetech::{FeetechBus, FeetechConnector, FEETECH_BAUD_RATE};

/// Number of motors on one arm
pub const MOTOR_COUNT: usize = 6;

/// Highest raw encoder position (12-bit)
pub const POSITION_MAX: i32 = 4095;

/// Normalization applied by higher layers to raw positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormMode {
    /// -100..100 over the calibrated range
    RangeM100To100,
}

/// Static description of one motor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorDescriptor {
    pub name: &'static str,
    pub id: u8,
    pub model: &'static str,
    pub norm_mode: NormMode,
    /// Raw goal position of the folded rest pose
    pub home_position: i32,
}

const fn sts3215(name: &'static str, id: u8, home_position: i32) -> MotorDescriptor {
    MotorDescriptor {
        name,
        id,
        model: "sts3215",
        norm_mode: NormMode::RangeM100To100,
        home_position,
    }
}

/// Motor layout shared by the leader and the follower arm
pub const ARM_MOTORS: [MotorDescriptor; MOTOR_COUNT] = [
    sts3215("shoulder_pan", 1, 2034),
    sts3215("shoulder_lift", 2, 719),
    sts3215("elbow_flex", 3, 3135),
    sts3215("wrist_flex", 4, 2728),
    sts3215("wrist_roll", 5, 2049),
    sts3215("gripper", 6, 2047),
];

/// Motor names in bus order
pub fn motor_names() -> [&'static str; MOTOR_COUNT] {
    ARM_MOTORS.map(|m| m.name)
}

/// Look up a motor by name
pub fn find_motor(name: &str) -> Option<&'static MotorDescriptor> {
    ARM_MOTORS.iter().find(|m| m.name == name)
}

/// Named hardware attribute read/written as a batch across motors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    TorqueEnable,
    GoalPosition,
    Lock,
    PresentPosition,
    PresentLoad,
    PresentVoltage,
    PresentTemperature,
    PresentCurrent,
}

/// Registers sampled on every telemetry tick
pub const TELEMETRY_REGISTERS: [RegisterKind; 5] = [
    RegisterKind::PresentVoltage,
    RegisterKind::PresentTemperature,
    RegisterKind::PresentLoad,
    RegisterKind::PresentCurrent,
    RegisterKind::PresentPosition,
];

impl RegisterKind {
    /// STS3215 control-table address
    pub fn address(self) -> u8 {
        match self {
            RegisterKind::TorqueEnable => 40,
            RegisterKind::GoalPosition => 42,
            RegisterKind::Lock => 55,
            RegisterKind::PresentPosition => 56,
            RegisterKind::PresentLoad => 60,
            RegisterKind::PresentVoltage => 62,
            RegisterKind::PresentTemperature => 63,
            RegisterKind::PresentCurrent => 69,
        }
    }

    /// Width in bytes (little-endian on the wire)
    pub fn width(self) -> u8 {
        match self {
            RegisterKind::TorqueEnable
            | RegisterKind::Lock
            | RegisterKind::PresentVoltage
            | RegisterKind::PresentTemperature => 1,
            RegisterKind::GoalPosition
            | RegisterKind::PresentPosition
            | RegisterKind::PresentLoad
            | RegisterKind::PresentCurrent => 2,
        }
    }

    /// Register name as printed in the servo documentation
    pub fn as_str(self) -> &'static str {
        match self {
            RegisterKind::TorqueEnable => "Torque_Enable",
            RegisterKind::GoalPosition => "Goal_Position",
            RegisterKind::Lock => "Lock",
            RegisterKind::PresentPosition => "Present_Position",
            RegisterKind::PresentLoad => "Present_Load",
            RegisterKind::PresentVoltage => "Present_Voltage",
            RegisterKind::PresentTemperature => "Present_Temperature",
            RegisterKind::PresentCurrent => "Present_Current",
        }
    }
}

impl std::fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contiguous address span `(start, len)` covering every kind given
pub fn register_span(kinds: &[RegisterKind]) -> Option<(u8, u8)> {
    let start = kinds.iter().map(|k| k.address()).min()?;
    let end = kinds
        .iter()
        .map(|k| k.address() as u16 + k.width() as u16)
        .max()?;
    Some((start, (end - start as u16) as u8))
}

/// Result of one batched read: register -> motor name -> raw value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterReadout {
    values: HashMap<RegisterKind, HashMap<String, i32>>,
}

impl RegisterReadout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: RegisterKind, motor: &str, value: i32) {
        self.values
            .entry(kind)
            .or_default()
            .insert(motor.to_string(), value);
    }

    pub fn get(&self, kind: RegisterKind, motor: &str) -> Option<i32> {
        self.values.get(&kind).and_then(|m| m.get(motor)).copied()
    }

    /// Fetch a value that must be present for the batch to count
    pub fn require(&self, kind: RegisterKind, motor: &str) -> Result<i32, BusError> {
        self.get(kind, motor).ok_or_else(|| BusError::IncompleteReadout {
            register: kind,
            motor: motor.to_string(),
        })
    }
}

/// Bus handle errors
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Serial device could not be opened
    #[error("Failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    /// Handle was already disconnected
    #[error("Bus not connected")]
    NotConnected,

    /// Serial I/O failure (includes read timeouts)
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reply did not follow the packet format
    #[error("Protocol error from motor {id}: {reason}")]
    Protocol { id: u8, reason: String },

    /// Motor name is not part of the arm layout
    #[error("Unknown motor: {0}")]
    UnknownMotor(String),

    /// A requested register/motor pair is missing from the reply
    #[error("Readout missing {register} for {motor}")]
    IncompleteReadout { register: RegisterKind, motor: String },
}

/// Connection to one arm's motor group
///
/// Calls block until the bus answers or its read timeout expires, so async
/// callers run them on the blocking pool.
pub trait MotorBus: Send {
    /// Read every `kinds` register of every motor in `motors` as one batch
    fn read_registers(
        &mut self,
        kinds: &[RegisterKind],
        motors: &[&str],
    ) -> Result<RegisterReadout, BusError>;

    /// Write one register on several motors as one batch
    fn write_registers(&mut self, kind: RegisterKind, values: &[(&str, i32)])
        -> Result<(), BusError>;

    /// Release the serial device
    fn disconnect(&mut self);
}

/// Opens bus handles for a serial port
pub trait BusConnector: Send + Sync {
    fn connect(&self, port: &str) -> Result<Box<dyn MotorBus>, BusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motor_layout() {
        let ids: Vec<u8> = ARM_MOTORS.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);

        let mut names = motor_names().to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), MOTOR_COUNT);
        assert_eq!(find_motor("gripper").map(|m| m.id), Some(6));
        assert!(find_motor("elbow").is_none());

        for motor in ARM_MOTORS {
            assert_eq!(motor.model, "sts3215");
            assert_eq!(motor.norm_mode, NormMode::RangeM100To100);
            assert!((0..=POSITION_MAX).contains(&motor.home_position));
        }
    }

    #[test]
    fn test_telemetry_span_covers_all_registers() {
        let (start, len) = register_span(&TELEMETRY_REGISTERS).unwrap();
        assert_eq!(start, 56);
        // Present_Current is the last one: 69 + 2
        assert_eq!(start as u16 + len as u16, 71);

        for kind in TELEMETRY_REGISTERS {
            assert!(kind.address() >= start);
            assert!(kind.address() + kind.width() <= start + len);
        }
    }

    #[test]
    fn test_span_of_single_register() {
        assert_eq!(register_span(&[RegisterKind::PresentVoltage]), Some((62, 1)));
        assert_eq!(register_span(&[]), None);
    }

    #[test]
    fn test_readout_require() {
        let mut readout = RegisterReadout::new();
        readout.insert(RegisterKind::PresentVoltage, "gripper", 74);

        assert_eq!(readout.require(RegisterKind::PresentVoltage, "gripper").unwrap(), 74);
        assert!(matches!(
            readout.require(RegisterKind::PresentTemperature, "gripper"),
            Err(BusError::IncompleteReadout { .. })
        ));
    }
}
