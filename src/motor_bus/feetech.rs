//! Feetech STS/SCS serial bus driver
//!
//! Just enough of the protocol for telemetry and torque control: ping,
//! sync-read and sync-write. Packets look like
//! `FF FF <id> <len> <instr|error> <params..> <checksum>` where the checksum
//! is the bitwise NOT of the byte sum from `<id>` onward.

use super::{
    find_motor, register_span, BusConnector, BusError, MotorBus, RegisterKind, RegisterReadout,
    POSITION_MAX,
};
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Factory baud rate of the STS3215
pub const FEETECH_BAUD_RATE: u32 = 1_000_000;

/// Per-read serial timeout
const SERIAL_TIMEOUT: Duration = Duration::from_millis(50);

const HEADER: [u8; 2] = [0xFF, 0xFF];
const BROADCAST_ID: u8 = 0xFE;
const INSTR_PING: u8 = 0x01;
const INSTR_SYNC_READ: u8 = 0x82;
const INSTR_SYNC_WRITE: u8 = 0x83;

/// Present_Load is sign-magnitude with the sign in bit 10
const LOAD_SIGN_BIT: u32 = 10;

/// Bytes of line noise tolerated before a packet header
const MAX_HEADER_SKIP: usize = 64;

pub fn checksum(data: &[u8]) -> u8 {
    !data.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Build a packet. Status packets share the layout with the error byte in
/// place of the instruction.
pub fn build_packet(id: u8, instr: u8, params: &[u8]) -> Vec<u8> {
    let length = (params.len() + 2) as u8;
    let mut pkt = Vec::with_capacity(6 + params.len());
    pkt.extend_from_slice(&HEADER);
    pkt.push(id);
    pkt.push(length);
    pkt.push(instr);
    pkt.extend_from_slice(params);
    pkt.push(checksum(&pkt[2..]));
    pkt
}

/// Reply from a single servo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPacket {
    pub id: u8,
    /// Alarm bits (voltage, angle, overheat, overload, ...)
    pub error: u8,
    pub params: Vec<u8>,
}

/// Read one status packet, skipping leading noise
pub fn read_status<R: Read + ?Sized>(reader: &mut R) -> Result<StatusPacket, BusError> {
    let mut byte = [0u8; 1];
    let mut prev = 0u8;
    let mut skipped = 0usize;
    loop {
        reader.read_exact(&mut byte)?;
        if prev == 0xFF && byte[0] == 0xFF {
            break;
        }
        prev = byte[0];
        skipped += 1;
        if skipped > MAX_HEADER_SKIP {
            return Err(BusError::Protocol {
                id: 0,
                reason: "no packet header".to_string(),
            });
        }
    }

    // An id is never 0xFF, so extra header bytes are padding
    let mut id = 0xFF;
    for _ in 0..MAX_HEADER_SKIP {
        reader.read_exact(&mut byte)?;
        id = byte[0];
        if id != 0xFF {
            break;
        }
    }

    reader.read_exact(&mut byte)?;
    let len = byte[0] as usize;
    if len < 2 {
        return Err(BusError::Protocol {
            id,
            reason: format!("length {} too short", len),
        });
    }

    let mut rest = vec![0u8; len];
    reader.read_exact(&mut rest)?;

    let received = rest[len - 1];
    let mut summed = Vec::with_capacity(len + 1);
    summed.push(id);
    summed.push(len as u8);
    summed.extend_from_slice(&rest[..len - 1]);
    let expected = checksum(&summed);
    if expected != received {
        return Err(BusError::Protocol {
            id,
            reason: format!("checksum 0x{:02x}, expected 0x{:02x}", received, expected),
        });
    }

    Ok(StatusPacket {
        id,
        error: rest[0],
        params: rest[1..len - 1].to_vec(),
    })
}

/// Decode a sign-magnitude value with the sign at `sign_bit`
pub fn decode_sign_magnitude(raw: u32, sign_bit: u32) -> i32 {
    let magnitude = (raw & ((1 << sign_bit) - 1)) as i32;
    if raw & (1 << sign_bit) != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Decode a register from its little-endian bytes
pub fn decode_register(kind: RegisterKind, bytes: &[u8]) -> i32 {
    let raw = bytes
        .iter()
        .rev()
        .fold(0u32, |acc, &b| (acc << 8) | b as u32);
    match kind {
        RegisterKind::PresentLoad => decode_sign_magnitude(raw, LOAD_SIGN_BIT),
        _ => raw as i32,
    }
}

/// Encode a register value to its little-endian bytes
pub fn encode_register(kind: RegisterKind, value: i32) -> Vec<u8> {
    let value = match kind {
        RegisterKind::GoalPosition => value.clamp(0, POSITION_MAX),
        _ => value,
    };
    match kind.width() {
        1 => vec![value.clamp(0, u8::MAX as i32) as u8],
        _ => (value.clamp(0, u16::MAX as i32) as u16).to_le_bytes().to_vec(),
    }
}

/// Collect one status packet per motor after a sync-read of `start..start+len`
pub fn parse_sync_read<R: Read + ?Sized>(
    reader: &mut R,
    kinds: &[RegisterKind],
    motors: &[(&str, u8)],
    start: u8,
    len: u8,
) -> Result<RegisterReadout, BusError> {
    let mut readout = RegisterReadout::new();

    for &(name, id) in motors {
        let status = read_status(reader)?;
        if status.id != id {
            return Err(BusError::Protocol {
                id,
                reason: format!("reply came from motor {}", status.id),
            });
        }
        if status.params.len() != len as usize {
            return Err(BusError::Protocol {
                id,
                reason: format!("{} data bytes, expected {}", status.params.len(), len),
            });
        }
        if status.error != 0 {
            tracing::debug!(motor = name, id = id, alarm = status.error, "Motor alarm bits set");
        }

        for &kind in kinds {
            let offset = (kind.address() - start) as usize;
            let bytes = &status.params[offset..offset + kind.width() as usize];
            readout.insert(kind, name, decode_register(kind, bytes));
        }
    }

    Ok(readout)
}

/// Serial connection to one arm
pub struct FeetechBus {
    port_name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl FeetechBus {
    /// Open the port and ping every motor of the arm
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, BusError> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(SERIAL_TIMEOUT)
            .open()
            .map_err(|e| BusError::Open {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;

        let mut bus = Self {
            port_name: port_name.to_string(),
            port: Some(port),
        };

        for motor in super::ARM_MOTORS.iter() {
            bus.ping(motor.id)?;
        }

        tracing::debug!(port = %port_name, "All motors answered ping");
        Ok(bus)
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, BusError> {
        self.port.as_mut().ok_or(BusError::NotConnected)
    }

    fn send(&mut self, id: u8, instr: u8, params: &[u8]) -> Result<(), BusError> {
        let pkt = build_packet(id, instr, params);
        let port = self.port()?;
        port.clear(ClearBuffer::Input).map_err(io::Error::from)?;
        port.write_all(&pkt)?;
        port.flush()?;
        Ok(())
    }

    fn ping(&mut self, id: u8) -> Result<(), BusError> {
        self.send(id, INSTR_PING, &[])?;
        let status = read_status(self.port()?)?;
        if status.id != id {
            return Err(BusError::Protocol {
                id,
                reason: format!("ping answered by motor {}", status.id),
            });
        }
        Ok(())
    }

    fn motor_ids<'a>(motors: &[&'a str]) -> Result<Vec<(&'a str, u8)>, BusError> {
        motors
            .iter()
            .map(|&name| {
                find_motor(name)
                    .map(|m| (name, m.id))
                    .ok_or_else(|| BusError::UnknownMotor(name.to_string()))
            })
            .collect()
    }
}

impl MotorBus for FeetechBus {
    fn read_registers(
        &mut self,
        kinds: &[RegisterKind],
        motors: &[&str],
    ) -> Result<RegisterReadout, BusError> {
        let Some((start, len)) = register_span(kinds) else {
            return Ok(RegisterReadout::new());
        };
        let ids = Self::motor_ids(motors)?;

        let mut params = vec![start, len];
        params.extend(ids.iter().map(|(_, id)| *id));
        self.send(BROADCAST_ID, INSTR_SYNC_READ, &params)?;

        parse_sync_read(self.port()?, kinds, &ids, start, len)
    }

    fn write_registers(
        &mut self,
        kind: RegisterKind,
        values: &[(&str, i32)],
    ) -> Result<(), BusError> {
        let names: Vec<&str> = values.iter().map(|(name, _)| *name).collect();
        let ids = Self::motor_ids(&names)?;

        let mut params = vec![kind.address(), kind.width()];
        for ((_, id), (_, value)) in ids.iter().zip(values) {
            params.push(*id);
            params.extend(encode_register(kind, *value));
        }

        // Broadcast writes are not acknowledged
        self.send(BROADCAST_ID, INSTR_SYNC_WRITE, &params)
    }

    fn disconnect(&mut self) {
        if self.port.take().is_some() {
            tracing::debug!(port = %self.port_name, "Serial port closed");
        }
    }
}

/// Opens `FeetechBus` handles
#[derive(Debug, Clone)]
pub struct FeetechConnector {
    baud_rate: u32,
}

impl FeetechConnector {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Default for FeetechConnector {
    fn default() -> Self {
        Self::new(FEETECH_BAUD_RATE)
    }
}

impl BusConnector for FeetechConnector {
    fn connect(&self, port: &str) -> Result<Box<dyn MotorBus>, BusError> {
        let bus = FeetechBus::open(port, self.baud_rate)?;
        Ok(Box::new(bus))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor_bus::TELEMETRY_REGISTERS;
    use std::io::Cursor;

    #[test]
    fn test_ping_packet() {
        let pkt = build_packet(1, INSTR_PING, &[]);
        assert_eq!(pkt, vec![0xFF, 0xFF, 0x01, 0x02, 0x01, 0xFB]);
    }

    #[test]
    fn test_read_status_roundtrip() {
        let bytes = build_packet(3, 0x00, &[0x4A]);
        let status = read_status(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(
            status,
            StatusPacket {
                id: 3,
                error: 0,
                params: vec![0x4A]
            }
        );
    }

    #[test]
    fn test_read_status_skips_noise() {
        let mut bytes = vec![0x00, 0x13, 0xFF];
        bytes.extend(build_packet(2, 0x20, &[0x10, 0x01]));
        let status = read_status(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(status.id, 2);
        assert_eq!(status.error, 0x20);
        assert_eq!(status.params, vec![0x10, 0x01]);
    }

    #[test]
    fn test_read_status_bad_checksum() {
        let mut bytes = build_packet(1, 0x00, &[0x4A]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            read_status(&mut Cursor::new(bytes)),
            Err(BusError::Protocol { id: 1, .. })
        ));
    }

    #[test]
    fn test_read_status_truncated_is_io_error() {
        let bytes = build_packet(1, 0x00, &[0x4A, 0x00]);
        let truncated = bytes[..bytes.len() - 2].to_vec();
        assert!(matches!(
            read_status(&mut Cursor::new(truncated)),
            Err(BusError::Io(_))
        ));
    }

    #[test]
    fn test_sign_magnitude_load() {
        assert_eq!(decode_register(RegisterKind::PresentLoad, &[100, 0]), 100);
        let negative = (1u16 << 10) | 100;
        assert_eq!(
            decode_register(RegisterKind::PresentLoad, &negative.to_le_bytes()),
            -100
        );
        assert_eq!(decode_register(RegisterKind::PresentPosition, &[0xFF, 0x0F]), 4095);
        assert_eq!(decode_register(RegisterKind::PresentVoltage, &[74]), 74);
    }

    #[test]
    fn test_encode_clamps_goal_position() {
        assert_eq!(encode_register(RegisterKind::GoalPosition, 5000), vec![0xFF, 0x0F]);
        assert_eq!(encode_register(RegisterKind::GoalPosition, -3), vec![0x00, 0x00]);
        assert_eq!(encode_register(RegisterKind::TorqueEnable, 1), vec![0x01]);
    }

    fn telemetry_reply(id: u8, voltage: u8, temp: u8, position: u16) -> Vec<u8> {
        let (start, len) = register_span(&TELEMETRY_REGISTERS).unwrap();
        let mut data = vec![0u8; len as usize];
        let at = |kind: RegisterKind| (kind.address() - start) as usize;
        data[at(RegisterKind::PresentPosition)..at(RegisterKind::PresentPosition) + 2]
            .copy_from_slice(&position.to_le_bytes());
        data[at(RegisterKind::PresentVoltage)] = voltage;
        data[at(RegisterKind::PresentTemperature)] = temp;
        build_packet(id, 0x00, &data)
    }

    #[test]
    fn test_parse_sync_read() {
        let (start, len) = register_span(&TELEMETRY_REGISTERS).unwrap();
        let mut wire = telemetry_reply(1, 72, 31, 2048);
        wire.extend(telemetry_reply(2, 70, 35, 1000));

        let motors = [("shoulder_pan", 1), ("shoulder_lift", 2)];
        let readout =
            parse_sync_read(&mut Cursor::new(wire), &TELEMETRY_REGISTERS, &motors, start, len)
                .unwrap();

        assert_eq!(readout.get(RegisterKind::PresentVoltage, "shoulder_pan"), Some(72));
        assert_eq!(readout.get(RegisterKind::PresentTemperature, "shoulder_lift"), Some(35));
        assert_eq!(readout.get(RegisterKind::PresentPosition, "shoulder_lift"), Some(1000));
        assert_eq!(readout.get(RegisterKind::PresentLoad, "shoulder_pan"), Some(0));
    }

    #[test]
    fn test_parse_sync_read_missing_motor_fails_batch() {
        let (start, len) = register_span(&TELEMETRY_REGISTERS).unwrap();
        let wire = telemetry_reply(1, 72, 31, 2048);

        let motors = [("shoulder_pan", 1), ("shoulder_lift", 2)];
        let result =
            parse_sync_read(&mut Cursor::new(wire), &TELEMETRY_REGISTERS, &motors, start, len);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_sync_read_wrong_id() {
        let (start, len) = register_span(&TELEMETRY_REGISTERS).unwrap();
        let wire = telemetry_reply(4, 72, 31, 2048);

        let motors = [("shoulder_pan", 1)];
        assert!(matches!(
            parse_sync_read(&mut Cursor::new(wire), &TELEMETRY_REGISTERS, &motors, start, len),
            Err(BusError::Protocol { id: 1, .. })
        ));
    }
}
