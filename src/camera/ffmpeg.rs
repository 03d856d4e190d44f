//! V4L2 capture through an ffmpeg child process
//!
//! ffmpeg decodes whatever the device delivers (MJPEG, YUYV, ...) and writes
//! fixed-size raw frames to stdout. A reader thread cuts the pipe into
//! frames and hands them over through a one-slot channel, which turns the
//! pipe into a "next frame within timeout" source.

use super::{CameraConnector, CameraDevice, CameraError, CameraSettings, ColorMode, RawFrame};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::JoinHandle;
use std::time::Duration;

/// How long a fresh pipeline gets to deliver its first frame
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Running capture pipeline
pub struct FfmpegCamera {
    settings: CameraSettings,
    child: Option<Child>,
    frames: Receiver<std::io::Result<Vec<u8>>>,
    /// Frame received while starting up, handed out by the first read
    first_frame: Option<Vec<u8>>,
    _reader: Option<JoinHandle<()>>,
}

impl FfmpegCamera {
    /// Start ffmpeg on `/dev/video<N>`
    ///
    /// Returns once the first frame arrived, so a missing or busy device
    /// fails here instead of on the first read.
    pub fn spawn(binary: &str, settings: &CameraSettings) -> Result<Self, CameraError> {
        let device = format!("/dev/video{}", settings.device_index);
        if !Path::new(&device).exists() {
            return Err(CameraError::Open(format!("{} not found", device)));
        }

        let size = format!("{}x{}", settings.width, settings.height);
        let fps = settings.fps.to_string();
        let pix_fmt = match settings.color {
            ColorMode::Rgb => "rgb24",
            ColorMode::Gray => "gray",
        };

        let mut command = Command::new(binary);
        command.args([
            "-loglevel",
            "error",
            "-f",
            "v4l2",
            "-framerate",
            fps.as_str(),
            "-video_size",
            size.as_str(),
            "-i",
            device.as_str(),
            "-f",
            "rawvideo",
            "-pix_fmt",
            pix_fmt,
            "-",
        ]);

        let camera = Self::start(command, settings, STARTUP_TIMEOUT).map_err(|e| match e {
            CameraError::Open(reason) => CameraError::Open(format!("{}: {}", device, reason)),
            other => other,
        })?;
        tracing::info!(
            device = %device,
            size = %size,
            fps = settings.fps,
            "Camera capture started"
        );
        Ok(camera)
    }

    /// Run a command writing raw frames to stdout and wait for the first one
    fn start(
        mut command: Command,
        settings: &CameraSettings,
        startup_timeout: Duration,
    ) -> Result<Self, CameraError> {
        let program = command.get_program().to_string_lossy().into_owned();
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CameraError::Open(format!("{} spawn failed: {}", program, e)))?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CameraError::Open(format!("{} stdout not captured", program)));
        };

        let (tx, rx) = mpsc::sync_channel(1);
        let frame_len = settings.frame_len();
        let reader = match std::thread::Builder::new()
            .name("camera-reader".to_string())
            .spawn(move || read_frames(stdout, frame_len, tx))
        {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CameraError::Open(format!("reader thread: {}", e)));
            }
        };

        // Dropping `camera` on any error below kills the child
        let mut camera = Self {
            settings: settings.clone(),
            child: Some(child),
            frames: rx,
            first_frame: None,
            _reader: Some(reader),
        };

        match camera.frames.recv_timeout(startup_timeout) {
            Ok(Ok(pixels)) => {
                camera.first_frame = Some(pixels);
                Ok(camera)
            }
            Ok(Err(e)) => Err(CameraError::Open(format!("no frame from {}: {}", program, e))),
            Err(RecvTimeoutError::Timeout) => Err(CameraError::Open(format!(
                "no frame from {} within {:?}",
                program, startup_timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(CameraError::Open(format!("{} exited before the first frame", program)))
            }
        }
    }

    fn raw_frame(&self, pixels: Vec<u8>) -> RawFrame {
        RawFrame {
            width: self.settings.width,
            height: self.settings.height,
            color: self.settings.color,
            pixels,
        }
    }
}

/// Reader thread body: ends on EOF, read error or when the camera is dropped
fn read_frames<R: Read>(
    mut pipe: R,
    frame_len: usize,
    tx: SyncSender<std::io::Result<Vec<u8>>>,
) {
    loop {
        let mut buf = vec![0u8; frame_len];
        match pipe.read_exact(&mut buf) {
            Ok(()) => {
                if tx.send(Ok(buf)).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}

impl CameraDevice for FfmpegCamera {
    fn read_frame(&mut self, timeout: Duration) -> Result<RawFrame, CameraError> {
        if let Some(pixels) = self.first_frame.take() {
            return Ok(self.raw_frame(pixels));
        }

        match self.frames.recv_timeout(timeout) {
            Ok(Ok(pixels)) => Ok(self.raw_frame(pixels)),
            Ok(Err(e)) => Err(CameraError::Disconnected(e.to_string())),
            Err(RecvTimeoutError::Timeout) => Err(CameraError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(CameraError::Disconnected("capture pipeline ended".to_string()))
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
            tracing::debug!(device_index = self.settings.device_index, "Camera capture stopped");
        }
        // The reader may be parked on a full channel; it exits on its own once
        // the pipe hits EOF or the receiver is dropped, so it is not joined.
        self._reader.take();
    }
}

impl Drop for FfmpegCamera {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Opens `FfmpegCamera` pipelines
#[derive(Debug, Clone)]
pub struct FfmpegConnector {
    binary: String,
}

impl FfmpegConnector {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfmpegConnector {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl CameraConnector for FfmpegConnector {
    fn connect(&self, settings: &CameraSettings) -> Result<Box<dyn CameraDevice>, CameraError> {
        let camera = FfmpegCamera::spawn(&self.binary, settings)?;
        Ok(Box::new(camera))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reader_splits_frames_and_reports_eof() {
        let (tx, rx) = mpsc::sync_channel(4);
        let data: Vec<u8> = (0..10u8).collect();

        read_frames(Cursor::new(data), 4, tx);

        assert_eq!(rx.recv().unwrap().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(rx.recv().unwrap().unwrap(), vec![4, 5, 6, 7]);
        // Two trailing bytes are not a frame
        assert!(rx.recv().unwrap().is_err());
        assert!(rx.recv().is_err());
    }

    const TINY: CameraSettings = CameraSettings {
        device_index: 0,
        width: 4,
        height: 4,
        fps: 15,
        color: ColorMode::Rgb,
    };

    fn open_error(result: Result<FfmpegCamera, CameraError>) -> String {
        match result {
            Err(CameraError::Open(reason)) => reason,
            Err(e) => panic!("expected open error, got {}", e),
            Ok(_) => panic!("expected open error, got a camera"),
        }
    }

    #[test]
    fn test_missing_device_is_open_error() {
        let settings = CameraSettings {
            device_index: 200,
            ..TINY
        };
        let reason = open_error(FfmpegCamera::spawn("ffmpeg", &settings));
        assert!(reason.contains("/dev/video200"), "{}", reason);
    }

    #[test]
    fn test_missing_binary_is_open_error() {
        let command = Command::new("/nonexistent/ffmpeg-binary");
        let reason = open_error(FfmpegCamera::start(command, &TINY, Duration::from_secs(1)));
        assert!(reason.contains("spawn failed"), "{}", reason);
    }

    #[cfg(unix)]
    #[test]
    fn test_pipeline_without_frames_is_open_error() {
        let command = Command::new("true");
        open_error(FfmpegCamera::start(command, &TINY, Duration::from_secs(2)));
    }

    #[cfg(unix)]
    #[test]
    fn test_first_frame_is_kept_for_the_first_read() {
        let mut command = Command::new("sh");
        command.args(["-c", "head -c 48 /dev/zero; exec sleep 5"]);
        let mut camera = FfmpegCamera::start(command, &TINY, Duration::from_secs(2)).unwrap();

        let frame = camera.read_frame(Duration::from_millis(10)).unwrap();
        assert_eq!(frame.pixels.len(), TINY.frame_len());
        assert_eq!((frame.width, frame.height), (4, 4));

        // Nothing more until sleep ends
        assert!(matches!(
            camera.read_frame(Duration::from_millis(20)),
            Err(CameraError::Timeout(_))
        ));
        camera.disconnect();
    }
}
