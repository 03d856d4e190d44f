//! Shared models and types for armwatch
//!
//! Wire types of the HTTP surface plus the arm identity, kept here so the
//! background services and the web layer do not depend on each other.

use crate::state_store::{ArmSnapshot, MotorReading};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Which of the two arms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arm {
    Leader,
    Follower,
}

impl Arm {
    pub const ALL: [Arm; 2] = [Arm::Leader, Arm::Follower];

    pub fn as_str(self) -> &'static str {
        match self {
            Arm::Leader => "leader",
            Arm::Follower => "follower",
        }
    }
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arm {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "leader" => Ok(Arm::Leader),
            "follower" => Ok(Arm::Follower),
            other => Err(crate::Error::Validation(format!("Unknown arm: {}", other))),
        }
    }
}

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Raw voltage register (0.1 V units) to volts
pub fn raw_to_volts(raw: i32) -> f64 {
    raw as f64 / 10.0
}

/// `GET /robot_data` body
#[derive(Debug, Clone, Serialize)]
pub struct RobotDataResponse {
    pub leader: ArmReport,
    pub follower: ArmReport,
}

/// Latest telemetry of one arm
#[derive(Debug, Clone, Serialize)]
pub struct ArmReport {
    pub connected: bool,
    pub data: ArmData,
}

impl ArmReport {
    /// `data` stays `{}` until the arm has been read at least once
    pub fn from_snapshot(snapshot: &ArmSnapshot) -> Self {
        let data = match TelemetryData::from_snapshot(snapshot) {
            Some(telemetry) => ArmData::Telemetry(telemetry),
            None => ArmData::Empty(EmptyObject {}),
        };
        Self {
            connected: snapshot.connected,
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ArmData {
    Telemetry(TelemetryData),
    Empty(EmptyObject),
}

/// Serializes as `{}`
#[derive(Debug, Clone, Serialize)]
pub struct EmptyObject {}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryData {
    /// Motor name -> values, in bus order
    #[serde(serialize_with = "ordered_motors")]
    pub motors: Vec<(String, MotorTelemetry)>,
    /// Volts
    pub min_voltage: f64,
    pub max_temp: i32,
    /// Unix seconds
    pub timestamp: f64,
}

impl TelemetryData {
    pub fn from_snapshot(snapshot: &ArmSnapshot) -> Option<Self> {
        let captured_at = snapshot.captured_at?;
        let min_voltage = snapshot.min_voltage?;
        let max_temp = snapshot.max_temp?;
        Some(Self {
            motors: snapshot
                .motors
                .iter()
                .map(|m| (m.name.to_string(), MotorTelemetry::from(m)))
                .collect(),
            min_voltage: raw_to_volts(min_voltage),
            max_temp,
            timestamp: captured_at.timestamp_micros() as f64 / 1_000_000.0,
        })
    }
}

fn ordered_motors<S: Serializer>(
    motors: &[(String, MotorTelemetry)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(motors.len()))?;
    for (name, telemetry) in motors {
        map.serialize_entry(name, telemetry)?;
    }
    map.end()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotorTelemetry {
    /// Volts
    pub voltage: f64,
    pub temp: i32,
    pub load: i32,
    pub current: i32,
    pub position: i32,
}

impl From<&MotorReading> for MotorTelemetry {
    fn from(m: &MotorReading) -> Self {
        Self {
            voltage: raw_to_volts(m.voltage),
            temp: m.temp,
            load: m.load,
            current: m.current,
            position: m.position,
        }
    }
}

/// Reconnect outcome for one arm
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmReconnectStatus {
    /// A serial port is configured for the arm
    pub configured: bool,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `POST /reconnect` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectReport {
    /// "ok" when every configured arm connected, "degraded" otherwise
    pub status: String,
    pub arms: ReconnectArms,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectArms {
    pub leader: ArmReconnectStatus,
    pub follower: ArmReconnectStatus,
}

impl ReconnectArms {
    pub fn get(&self, arm: Arm) -> &ArmReconnectStatus {
        match arm {
            Arm::Leader => &self.leader,
            Arm::Follower => &self.follower,
        }
    }

    pub fn get_mut(&mut self, arm: Arm) -> &mut ArmReconnectStatus {
        match arm {
            Arm::Leader => &mut self.leader,
            Arm::Follower => &mut self.follower,
        }
    }
}

impl ReconnectReport {
    pub fn from_arms(arms: ReconnectArms) -> Self {
        let all_up = Arm::ALL.iter().all(|&arm| {
            let s = arms.get(arm);
            !s.configured || s.connected
        });
        Self {
            status: if all_up { "ok" } else { "degraded" }.to_string(),
            arms,
        }
    }
}

/// `POST /api/arms/:arm/torque` body
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TorqueRequest {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TorqueResponse {
    pub arm: Arm,
    pub enabled: bool,
}

/// `POST /api/arms/:arm/home` body
#[derive(Debug, Clone, Serialize)]
pub struct HomeResponse {
    pub arm: Arm,
    /// Motor name -> commanded raw position, in bus order
    #[serde(serialize_with = "ordered_positions")]
    pub goal_positions: Vec<(String, i32)>,
}

fn ordered_positions<S: Serializer>(
    positions: &[(String, i32)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(positions.len()))?;
    for (name, position) in positions {
        map.serialize_entry(name, position)?;
    }
    map.end()
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub leader_connected: bool,
    pub follower_connected: bool,
    pub camera_connected: bool,
    pub video_viewers: usize,
    /// `/video_feed` connections accepted since startup
    pub video_connections_total: u64,
    /// Multipart parts sent across all viewers
    pub video_frames_sent: u64,
    pub frames_published: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor_bus::ARM_MOTORS;
    use chrono::{TimeZone, Utc};

    fn snapshot() -> ArmSnapshot {
        let readings = ARM_MOTORS
            .iter()
            .enumerate()
            .map(|(i, m)| MotorReading {
                name: m.name,
                voltage: [72, 74, 70, 75, 73, 71][i],
                temp: 30 + i as i32,
                load: -5,
                current: 12,
                position: 2048,
            })
            .collect();
        ArmSnapshot::from_readings(readings, Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap())
    }

    #[test]
    fn test_never_connected_report_has_empty_data() {
        let report = ArmReport::from_snapshot(&ArmSnapshot::never_connected());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json, serde_json::json!({"connected": false, "data": {}}));
    }

    #[test]
    fn test_report_shape_and_units() {
        let report = ArmReport::from_snapshot(&snapshot());
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["connected"], true);
        assert_eq!(json["data"]["min_voltage"], 7.0);
        assert_eq!(json["data"]["max_temp"], 35);
        assert_eq!(json["data"]["timestamp"], 1_700_000_000.5);
        assert_eq!(json["data"]["motors"]["elbow_flex"]["voltage"], 7.0);
        assert_eq!(json["data"]["motors"]["gripper"]["load"], -5);
    }

    #[test]
    fn test_motors_serialize_in_bus_order() {
        let text = serde_json::to_string(&ArmReport::from_snapshot(&snapshot())).unwrap();
        let positions: Vec<usize> = ARM_MOTORS
            .iter()
            .map(|m| text.find(&format!("\"{}\"", m.name)).unwrap())
            .collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn test_reconnect_status() {
        let mut arms = ReconnectArms::default();
        assert_eq!(ReconnectReport::from_arms(arms.clone()).status, "ok");

        arms.leader.configured = true;
        arms.leader.error = Some("No such device".to_string());
        assert_eq!(ReconnectReport::from_arms(arms.clone()).status, "degraded");

        arms.leader.connected = true;
        arms.leader.error = None;
        assert_eq!(ReconnectReport::from_arms(arms).status, "ok");
    }

    #[test]
    fn test_arm_parse() {
        assert_eq!("leader".parse::<Arm>().unwrap(), Arm::Leader);
        assert!("left".parse::<Arm>().is_err());
        assert_eq!(serde_json::to_string(&Arm::Follower).unwrap(), "\"follower\"");
    }
}
