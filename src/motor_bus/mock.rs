//! In-memory motor bus
//!
//! Scripted stand-in for the serial driver, shared by unit and integration
//! tests. Every value of read number `n` is derived from `n`, so a snapshot
//! mixing two reads is detectable.

use super::{find_motor, BusConnector, BusError, MotorBus, RegisterKind, RegisterReadout};
use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Value the mock reports for `kind` on motor `index` (0-based) at read `tick`
pub fn scripted_value(kind: RegisterKind, index: usize, tick: u64) -> i32 {
    let m = (tick % 50) as i32;
    let i = index as i32;
    match kind {
        RegisterKind::PresentVoltage => 60 + m + i,
        RegisterKind::PresentTemperature => 20 + m,
        RegisterKind::PresentLoad => 2 * m,
        RegisterKind::PresentCurrent => 3 * m + i,
        RegisterKind::PresentPosition => 10 * m + i,
        _ => 0,
    }
}

/// A recorded sync-write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockWrite {
    pub port: String,
    pub kind: RegisterKind,
    pub values: Vec<(String, i32)>,
}

#[derive(Debug, Default)]
struct MockState {
    failing_ports: HashSet<String>,
    fail_reads: bool,
    fail_writes: bool,
    voltages: Option<[i32; 6]>,
    temperatures: Option<[i32; 6]>,
    read_delay: Duration,
    read_attempts: u64,
    ticks: u64,
    connects: u32,
    disconnects: u32,
    writes: Vec<MockWrite>,
}

/// Shared control panel for every mock bus it hands out
#[derive(Debug, Clone, Default)]
pub struct MockHardware {
    state: Arc<Mutex<MockState>>,
}

impl MockHardware {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn connector(&self) -> MockBusConnector {
        MockBusConnector {
            hardware: self.clone(),
        }
    }

    /// Make `connect` fail for a port
    pub fn fail_connect(&self, port: &str, fail: bool) {
        let mut state = self.lock();
        if fail {
            state.failing_ports.insert(port.to_string());
        } else {
            state.failing_ports.remove(port);
        }
    }

    /// Make every subsequent read fail (or succeed again)
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Make every subsequent write fail (or succeed again)
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Report fixed voltages (tenths of a volt) in bus order
    pub fn set_voltages(&self, values: [i32; 6]) {
        self.lock().voltages = Some(values);
    }

    /// Report fixed temperatures in bus order
    pub fn set_temperatures(&self, values: [i32; 6]) {
        self.lock().temperatures = Some(values);
    }

    /// Simulated serial latency per read
    pub fn set_read_delay(&self, delay: Duration) {
        self.lock().read_delay = delay;
    }

    pub fn connects(&self) -> u32 {
        self.lock().connects
    }

    pub fn disconnects(&self) -> u32 {
        self.lock().disconnects
    }

    /// Reads issued on open handles, failed ones included
    pub fn read_attempts(&self) -> u64 {
        self.lock().read_attempts
    }

    /// Number of successful reads so far
    pub fn ticks(&self) -> u64 {
        self.lock().ticks
    }

    pub fn writes(&self) -> Vec<MockWrite> {
        self.lock().writes.clone()
    }
}

/// Hands out `MockBus` handles
#[derive(Debug, Clone)]
pub struct MockBusConnector {
    hardware: MockHardware,
}

impl BusConnector for MockBusConnector {
    fn connect(&self, port: &str) -> Result<Box<dyn MotorBus>, BusError> {
        let mut state = self.hardware.lock();
        if state.failing_ports.contains(port) {
            return Err(BusError::Open {
                port: port.to_string(),
                reason: "No such device".to_string(),
            });
        }
        state.connects += 1;

        Ok(Box::new(MockBus {
            port: port.to_string(),
            hardware: self.hardware.clone(),
            connected: true,
        }))
    }
}

/// Handle returned by `MockBusConnector`
#[derive(Debug)]
pub struct MockBus {
    port: String,
    hardware: MockHardware,
    connected: bool,
}

impl MotorBus for MockBus {
    fn read_registers(
        &mut self,
        kinds: &[RegisterKind],
        motors: &[&str],
    ) -> Result<RegisterReadout, BusError> {
        if !self.connected {
            return Err(BusError::NotConnected);
        }

        let delay = {
            let mut state = self.hardware.lock();
            state.read_attempts += 1;
            state.read_delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.hardware.lock();
        if state.fail_reads {
            return Err(BusError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "mock read timed out",
            )));
        }

        state.ticks += 1;
        let tick = state.ticks;

        let mut readout = RegisterReadout::new();
        for &name in motors {
            let motor = find_motor(name).ok_or_else(|| BusError::UnknownMotor(name.to_string()))?;
            let index = (motor.id - 1) as usize;
            for &kind in kinds {
                let value = match kind {
                    RegisterKind::PresentVoltage => state.voltages.map(|v| v[index]),
                    RegisterKind::PresentTemperature => state.temperatures.map(|t| t[index]),
                    _ => None,
                }
                .unwrap_or_else(|| scripted_value(kind, index, tick));
                readout.insert(kind, name, value);
            }
        }

        Ok(readout)
    }

    fn write_registers(
        &mut self,
        kind: RegisterKind,
        values: &[(&str, i32)],
    ) -> Result<(), BusError> {
        if !self.connected {
            return Err(BusError::NotConnected);
        }
        let mut state = self.hardware.lock();
        if state.fail_writes {
            return Err(BusError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock write failed",
            )));
        }
        state.writes.push(MockWrite {
            port: self.port.clone(),
            kind,
            values: values.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.hardware.lock().disconnects += 1;
        }
    }
}
