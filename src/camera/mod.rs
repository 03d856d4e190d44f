//! Camera - Video Source Handle
//!
//! ## Responsibilities
//!
//! - Fixed capture settings
//! - Blocking "next frame within timeout" contract (`CameraDevice`)
//! - Connection factory (`CameraConnector`)
//! - JPEG encoding of raw frames
//!
//! A timeout is routine and the caller simply tries again; any other read
//! error means the device is gone and has to be reconnected.

pub mod ffmpeg;
pub mod mock;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::time::Duration;

pub use ffmpeg::{FfmpegCamera, FfmpegConnector};

/// JPEG quality used for the video feed
pub const JPEG_QUALITY: u8 = 80;

/// JPEG start-of-image marker followed by the first segment marker byte
pub const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// Pixel layout delivered by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Rgb,
    Gray,
}

impl ColorMode {
    pub fn channels(self) -> usize {
        match self {
            ColorMode::Rgb => 3,
            ColorMode::Gray => 1,
        }
    }
}

/// Capture settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    /// `/dev/video<N>`
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub color: ColorMode,
}

impl CameraSettings {
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * self.color.channels()
    }

    /// Time between two frames at the configured rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / self.fps.max(1) as u64)
    }
}

/// The dashboard camera
pub const DEFAULT_CAMERA: CameraSettings = CameraSettings {
    device_index: 0,
    width: 1920,
    height: 1080,
    fps: 15,
    color: ColorMode::Rgb,
};

/// Uncompressed frame, row-major, no padding
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub color: ColorMode,
    pub pixels: Vec<u8>,
}

/// Camera errors
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// No frame within the timeout; not fatal
    #[error("No frame within {0:?}")]
    Timeout(Duration),

    /// Device vanished or the capture pipeline died
    #[error("Camera disconnected: {0}")]
    Disconnected(String),

    /// Device could not be opened
    #[error("Failed to open camera: {0}")]
    Open(String),

    /// Frame could not be encoded
    #[error("JPEG encoding failed: {0}")]
    Encode(String),
}

/// Connection to the video source
pub trait CameraDevice: Send {
    /// Block until the next frame arrives or `timeout` expires
    fn read_frame(&mut self, timeout: Duration) -> Result<RawFrame, CameraError>;

    /// Release the device
    fn disconnect(&mut self);
}

/// Opens camera handles
pub trait CameraConnector: Send + Sync {
    fn connect(&self, settings: &CameraSettings) -> Result<Box<dyn CameraDevice>, CameraError>;
}

/// Encode a raw frame to JPEG
pub fn encode_jpeg(frame: &RawFrame, quality: u8) -> Result<Vec<u8>, CameraError> {
    let expected = frame.width as usize * frame.height as usize * frame.color.channels();
    if frame.pixels.len() != expected {
        return Err(CameraError::Encode(format!(
            "{} bytes for {}x{} {:?}, expected {}",
            frame.pixels.len(),
            frame.width,
            frame.height,
            frame.color,
            expected
        )));
    }

    let color = match frame.color {
        ColorMode::Rgb => ExtendedColorType::Rgb8,
        ColorMode::Gray => ExtendedColorType::L8,
    };

    let mut out = Vec::with_capacity(expected / 8);
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(&frame.pixels, frame.width, frame.height, color)
        .map_err(|e| CameraError::Encode(e.to_string()))?;
    Ok(out)
}

/// Whether `bytes` starts like a JPEG file
pub fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.starts_with(&JPEG_MAGIC)
}
