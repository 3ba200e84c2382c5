//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use image::RgbImage;
use rollcall_core::FrameSource;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Resolution requested by [`Camera::open`].
pub const DEFAULT_RESOLUTION: (u32, u32) = (640, 480);

/// Share of sub-threshold pixels above which a frame counts as dark.
const DARK_THRESHOLD: f32 = 0.95;
/// Raw frames read per `grab` while waiting for a lit one.
const MAX_GRAB_ATTEMPTS: usize = 5;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel layouts the camera can be read in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, two pixels per 4 bytes.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }

    fn to_rgb(self, buf: &[u8], width: u32, height: u32) -> Result<RgbImage, frame::FrameError> {
        match self {
            Self::Yuyv => frame::yuyv_to_rgb(buf, width, height),
            Self::Grey => frame::grey_to_rgb(buf, width, height),
        }
    }
}

/// Color camera opened for attendance capture.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open `device_path` (e.g., "/dev/video0") at [`DEFAULT_RESOLUTION`].
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        Self::open_with_resolution(device_path, DEFAULT_RESOLUTION)
    }

    /// Open `device_path` asking for YUYV at `(width, height)`.
    ///
    /// The driver may pick another size; a GREY fallback is accepted.
    pub fn open_with_resolution(
        device_path: &str,
        (width, height): (u32, u32),
    ) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("busy") || msg.contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut requested = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        requested.fourcc = FourCC::new(b"YUYV");
        requested.width = width;
        requested.height = height;

        let negotiated = device
            .set_format(&requested)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;
        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "driver offered {:?}; need YUYV or GREY",
                negotiated.fourcc
            ))
        })?;

        if (negotiated.width, negotiated.height) != (width, height) {
            tracing::warn!(
                requested_width = width,
                requested_height = height,
                width = negotiated.width,
                height = negotiated.height,
                "driver adjusted resolution"
            );
        }
        tracing::info!(
            device = device_path,
            card = %caps.card,
            driver = %caps.driver,
            width = negotiated.width,
            height = negotiated.height,
            format = ?pixel_format,
            "camera opened"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
            pixel_format,
        })
    }

    /// Capture a single RGB frame.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream = self.stream()?;
        self.read_frame(&mut stream)
    }

    /// Read frames until one is not dark, up to `max_attempts`.
    ///
    /// If every frame is dark the last one is returned anyway.
    pub fn capture_lit_frame(&self, max_attempts: usize) -> Result<Frame, CameraError> {
        let mut stream = self.stream()?;
        let mut frame = self.read_frame(&mut stream)?;
        for _ in 1..max_attempts {
            if !frame.is_dark {
                break;
            }
            tracing::debug!(seq = frame.sequence, "skipping dark frame");
            frame = self.read_frame(&mut stream)?;
        }
        if frame.is_dark {
            tracing::warn!(attempts = max_attempts, "no lit frame; using a dark one");
        }
        Ok(frame)
    }

    /// Read and drop `count` frames so auto exposure can settle.
    pub fn warm_up(&self, count: usize) {
        if count == 0 {
            return;
        }
        match self.stream() {
            Ok(mut stream) => {
                let dropped = (0..count).filter(|_| stream.next().is_ok()).count();
                tracing::info!(dropped, "warmup frames discarded");
            }
            Err(e) => tracing::warn!(error = %e, "warmup skipped"),
        }
    }

    fn stream(&self) -> Result<MmapStream<'_>, CameraError> {
        MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))
    }

    fn read_frame(&self, stream: &mut MmapStream<'_>) -> Result<Frame, CameraError> {
        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let image = self
            .pixel_format
            .to_rgb(buf, self.width, self.height)
            .map_err(|e| CameraError::CaptureFailed(format!("{:?} conversion: {e}", self.pixel_format)))?;

        Ok(Frame {
            is_dark: frame::is_dark_frame(&image, DARK_THRESHOLD),
            image,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
        })
    }

    /// Video capture devices among `/dev/video0` through `/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(probe)
            .collect()
    }
}

fn probe(path: String) -> Option<DeviceInfo> {
    let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
    caps.capabilities
        .contains(Flags::VIDEO_CAPTURE)
        .then(|| DeviceInfo {
            name: caps.card.clone(),
            driver: caps.driver.clone(),
            bus: caps.bus.clone(),
            path,
        })
}

impl FrameSource for Camera {
    type Error = CameraError;

    /// Blocks on the device until a frame is dequeued.
    fn grab(&mut self) -> Result<RgbImage, CameraError> {
        self.capture_lit_frame(MAX_GRAB_ATTEMPTS).map(|f| f.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_pixel_format_conversion_checks_length() {
        assert!(PixelFormat::Grey.to_rgb(&[0; 4], 2, 2).is_ok());
        assert!(PixelFormat::Yuyv.to_rgb(&[0; 4], 2, 2).is_err());
    }

    #[test]
    fn test_open_missing_device() {
        assert!(matches!(
            Camera::open("/dev/rollcall-no-such-camera"),
            Err(CameraError::DeviceNotFound(_))
        ));
    }
}
