//! Camera devices and capture sessions.
//!
//! This module provides the device abstraction (a backend that opens
//! handles), the capture configuration, and the [`CaptureSession`] that
//! owns a single open handle and its (re)acquisition policy.

mod config;
mod device;
mod frame;
mod session;
#[cfg(feature = "v4l")]
mod v4l2;

pub use config::{
    CaptureConfig, ConfigError, FileConfig, IoMethod, OutputConfig, PixelFormat,
    DEFAULT_CAMERA_NAME, DEFAULT_DEVICE_PATH,
};
pub use device::{
    read_until_frame, CaptureBackend, DeviceError, DeviceEvent, DeviceHandle, MockBackend,
    MockHandle, OpenRequest, MAX_EMPTY_READS,
};
pub use frame::Frame;
pub use session::{CaptureSession, GrabError, OpenError, SessionState};
#[cfg(feature = "v4l")]
pub use v4l2::{V4lBackend, V4lHandle};
