//! Scripted camera
//!
//! Plays back queued outcomes (frame, timeout, hard failure) and falls back
//! to a small generated frame once the queue is empty.

use super::{CameraConnector, CameraDevice, CameraError, CameraSettings, ColorMode, RawFrame};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Size of generated frames
pub const MOCK_FRAME_SIZE: u32 = 16;

/// What the next `read_frame` call does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    Frame,
    Timeout,
    HardFailure,
    /// A frame whose buffer does not match its size
    CorruptFrame,
}

#[derive(Debug, Default)]
struct MockCameraState {
    script: VecDeque<MockOutcome>,
    fail_connect: bool,
    fail_next_connects: u32,
    frame_delay: Duration,
    connect_attempts: Vec<Instant>,
    connects: u32,
    disconnects: u32,
    frames: u64,
}

/// Shared control panel for scripted cameras
#[derive(Debug, Clone, Default)]
pub struct MockCameraConnector {
    state: Arc<Mutex<MockCameraState>>,
}

impl MockCameraConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockCameraState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue outcomes for upcoming reads
    pub fn push(&self, outcomes: impl IntoIterator<Item = MockOutcome>) {
        self.lock().script.extend(outcomes);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    /// Fail only the next `count` connects
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().fail_next_connects = count;
    }

    /// Delay before each generated frame
    pub fn set_frame_delay(&self, delay: Duration) {
        self.lock().frame_delay = delay;
    }

    /// When each connect was attempted, failed ones included
    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.lock().connect_attempts.clone()
    }

    pub fn connects(&self) -> u32 {
        self.lock().connects
    }

    pub fn disconnects(&self) -> u32 {
        self.lock().disconnects
    }

    /// Frames delivered so far
    pub fn frames(&self) -> u64 {
        self.lock().frames
    }

    /// Outcomes not consumed yet
    pub fn pending(&self) -> usize {
        self.lock().script.len()
    }
}

impl CameraConnector for MockCameraConnector {
    fn connect(&self, _settings: &CameraSettings) -> Result<Box<dyn CameraDevice>, CameraError> {
        let mut state = self.lock();
        state.connect_attempts.push(Instant::now());
        if state.fail_next_connects > 0 {
            state.fail_next_connects -= 1;
            return Err(CameraError::Open("No such device".to_string()));
        }
        if state.fail_connect {
            return Err(CameraError::Open("No such device".to_string()));
        }
        state.connects += 1;
        Ok(Box::new(MockCamera {
            control: self.clone(),
            connected: true,
        }))
    }
}

/// Handle returned by `MockCameraConnector`
#[derive(Debug)]
pub struct MockCamera {
    control: MockCameraConnector,
    connected: bool,
}

fn generated_frame(seed: u64) -> RawFrame {
    let size = MOCK_FRAME_SIZE;
    let pixels = (0..size * size)
        .flat_map(|i| {
            let v = ((i as u64 + seed) % 256) as u8;
            [v, v, 255 - v]
        })
        .collect();
    RawFrame {
        width: size,
        height: size,
        color: ColorMode::Rgb,
        pixels,
    }
}

impl CameraDevice for MockCamera {
    fn read_frame(&mut self, timeout: Duration) -> Result<RawFrame, CameraError> {
        if !self.connected {
            return Err(CameraError::Disconnected("handle closed".to_string()));
        }

        let (outcome, delay) = {
            let mut state = self.control.lock();
            let outcome = state.script.pop_front().unwrap_or(MockOutcome::Frame);
            (outcome, state.frame_delay)
        };

        match outcome {
            MockOutcome::Frame => {
                if !delay.is_zero() {
                    std::thread::sleep(delay.min(timeout));
                }
                let mut state = self.control.lock();
                state.frames += 1;
                Ok(generated_frame(state.frames))
            }
            MockOutcome::Timeout => Err(CameraError::Timeout(timeout)),
            MockOutcome::HardFailure => {
                Err(CameraError::Disconnected("device unplugged".to_string()))
            }
            MockOutcome::CorruptFrame => {
                let mut frame = generated_frame(0);
                frame.pixels.truncate(7);
                Ok(frame)
            }
        }
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.control.lock().disconnects += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{encode_jpeg, is_jpeg, DEFAULT_CAMERA, JPEG_QUALITY};

    #[test]
    fn test_script_then_generated_frames() {
        let control = MockCameraConnector::new();
        control.push([MockOutcome::Timeout, MockOutcome::HardFailure]);
        let mut camera = control.connect(&DEFAULT_CAMERA).unwrap();
        let timeout = Duration::from_millis(5);

        assert!(matches!(camera.read_frame(timeout), Err(CameraError::Timeout(_))));
        assert!(matches!(
            camera.read_frame(timeout),
            Err(CameraError::Disconnected(_))
        ));

        let frame = camera.read_frame(timeout).unwrap();
        assert!(is_jpeg(&encode_jpeg(&frame, JPEG_QUALITY).unwrap()));
        assert_eq!(control.frames(), 1);
    }

    #[test]
    fn test_connect_failure() {
        let control = MockCameraConnector::new();
        control.fail_connect(true);
        assert!(control.connect(&DEFAULT_CAMERA).is_err());
        assert_eq!(control.connects(), 0);
        assert_eq!(control.connect_attempts().len(), 1);
    }

    #[test]
    fn test_fail_next_connects() {
        let control = MockCameraConnector::new();
        control.fail_next_connects(2);
        assert!(control.connect(&DEFAULT_CAMERA).is_err());
        assert!(control.connect(&DEFAULT_CAMERA).is_err());
        assert!(control.connect(&DEFAULT_CAMERA).is_ok());
        assert_eq!(control.connects(), 1);
        assert_eq!(control.connect_attempts().len(), 3);
    }
}
