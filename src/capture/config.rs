//! Camera capture configuration.
//!
//! Parameter names and defaults follow the usb_cam node conventions so that
//! existing launch files translate directly into a `[camera]` table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Device node used when no `video_device` is configured.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/video6";

/// Label used for both `camera_frame_id` and `camera_name` when absent.
pub const DEFAULT_CAMERA_NAME: &str = "head_camera";

/// Buffering strategy used to move frames from the kernel to the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoMethod {
    /// Memory-mapped kernel buffers.
    Mmap,
    /// Plain `read()` on the device node.
    Read,
    /// User-allocated buffers filled by the driver.
    Userptr,
}

impl IoMethod {
    /// Returns the parameter spelling of this method.
    pub fn as_str(&self) -> &'static str {
        match self {
            IoMethod::Mmap => "mmap",
            IoMethod::Read => "read",
            IoMethod::Userptr => "userptr",
        }
    }
}

impl fmt::Display for IoMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IoMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mmap" => Ok(IoMethod::Mmap),
            "read" => Ok(IoMethod::Read),
            "userptr" => Ok(IoMethod::Userptr),
            other => Err(ConfigError::UnknownIoMethod(other.to_string())),
        }
    }
}

/// Pixel format requested from the device. Only MJPEG is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// Motion-JPEG, one complete JPEG per buffer.
    #[default]
    Mjpeg,
}

impl PixelFormat {
    /// V4L2 FourCC code for this format.
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            PixelFormat::Mjpeg => *b"MJPG",
        }
    }
}

/// Configuration for one capture session.
///
/// `io_method` is kept as the raw configured string; it is validated when a
/// session starts so that a bad value halts startup instead of failing
/// during deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device node, e.g. `/dev/video0`.
    #[serde(rename = "video_device")]
    pub device_path: String,
    /// One of `mmap`, `read` or `userptr`.
    pub io_method: String,
    /// Frame width in pixels.
    #[serde(rename = "image_width")]
    pub width: u32,
    /// Frame height in pixels.
    #[serde(rename = "image_height")]
    pub height: u32,
    /// Target frames per second.
    #[serde(rename = "framerate")]
    pub frame_rate: u32,
    /// Enable continuous autofocus after opening.
    pub autofocus: bool,
    /// Frame id stamped into every outbound message header.
    #[serde(rename = "camera_frame_id")]
    pub frame_id: String,
    /// Human readable camera name.
    pub camera_name: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_path: DEFAULT_DEVICE_PATH.to_string(),
            io_method: IoMethod::Mmap.as_str().to_string(),
            width: 640,
            height: 480,
            frame_rate: 30,
            autofocus: false,
            frame_id: DEFAULT_CAMERA_NAME.to_string(),
            camera_name: DEFAULT_CAMERA_NAME.to_string(),
        }
    }
}

impl CaptureConfig {
    /// Creates a default configuration pointing at `device_path`.
    pub fn for_device(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            ..Default::default()
        }
    }

    /// Parses the configured I/O strategy.
    pub fn io_method(&self) -> Result<IoMethod, ConfigError> {
        self.io_method.parse()
    }

    /// Validates the numeric parameters.
    ///
    /// The I/O method is deliberately not checked here; see
    /// [`CaptureConfig::io_method`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.frame_rate == 0 {
            return Err(ConfigError::InvalidFrameRate);
        }
        if self.device_path.is_empty() {
            return Err(ConfigError::EmptyDevicePath);
        }
        Ok(())
    }

    /// Logs every effective parameter at startup.
    pub fn log_summary(&self) {
        tracing::info!("Camera name: {}", self.camera_name);
        tracing::info!("video_device set to [{}]", self.device_path);
        tracing::info!("io_method set to [{}]", self.io_method);
        tracing::info!("image_width set to [{}]", self.width);
        tracing::info!("image_height set to [{}]", self.height);
        tracing::info!("framerate set to [{}]", self.frame_rate);
        tracing::info!("autofocus set to [{}]", self.autofocus);
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Width or height is zero.
    #[error("invalid frame dimensions")]
    InvalidDimensions,
    /// Frame rate is zero.
    #[error("invalid frame rate (must be greater than zero)")]
    InvalidFrameRate,
    /// No device node was given.
    #[error("video_device must not be empty")]
    EmptyDevicePath,
    /// The I/O method name is not mmap, read or userptr.
    #[error("unknown io method: {0}")]
    UnknownIoMethod(String),
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    /// The config file is not valid TOML for this format.
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// `[camera]` table.
    #[serde(default)]
    pub camera: CaptureConfig,
    /// `[output]` table.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { metrics_port: 9090 }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        let config = Self::from_toml(&content)?;
        config.camera.validate()?;
        Ok(config)
    }

    /// Parses configuration from TOML text without validating it.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}
