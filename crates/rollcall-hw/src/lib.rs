//! rollcall-hw — Camera capture for the attendance kiosk.
//!
//! Opens a V4L2 device, converts YUYV/GREY buffers to RGB and serves
//! frames to a capture session as a `FrameSource`.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
