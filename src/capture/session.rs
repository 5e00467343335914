//! Capture session lifecycle.
//!
//! A [`CaptureSession`] owns at most one open [`DeviceHandle`] and the
//! policy for acquiring it. The handle is released on shutdown, on
//! replacement and when the session is dropped.

use super::device::{CaptureBackend, DeviceError, DeviceHandle, OpenRequest};
use super::{CaptureConfig, ConfigError, Frame, IoMethod, PixelFormat};
use crate::clock::{Clock, BACKOFF};
use crate::params::ParamSource;
use crate::shutdown::Shutdown;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while starting or reopening a session.
#[derive(Debug, Error)]
pub enum OpenError {
    /// The configured I/O strategy is not recognized. Not retryable.
    #[error("unknown io method: {0}")]
    UnknownIoMethod(String),
    /// The numeric configuration is unusable. Not retryable.
    #[error("invalid capture configuration: {0}")]
    InvalidConfig(ConfigError),
    /// The device could not be opened. Retryable.
    #[error("device {path} unavailable: {source}")]
    DeviceUnavailable {
        /// Device node that failed to open.
        path: String,
        /// Backend error.
        #[source]
        source: DeviceError,
    },
    /// Shutdown was requested before the device became available.
    #[error("shutdown requested while waiting for device")]
    Interrupted,
}

impl OpenError {
    /// Returns true if retrying with the same configuration can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OpenError::DeviceUnavailable { .. })
    }
}

/// Errors raised while grabbing a frame.
#[derive(Debug, Error)]
pub enum GrabError {
    /// The device failed or disappeared.
    #[error("device {path} lost: {source}")]
    DeviceLost {
        /// Device node the handle was open on.
        path: String,
        /// Backend error.
        #[source]
        source: DeviceError,
    },
    /// No device handle is open.
    #[error("no device open")]
    NotOpen,
}

/// Lifecycle state of a [`CaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No handle is held.
    Closed,
    /// A handle is open and grabs are allowed.
    Open,
    /// The last grab failed; the handle awaits release.
    Failed,
}

/// Owns the device handle for one camera.
pub struct CaptureSession<B: CaptureBackend> {
    backend: B,
    config: CaptureConfig,
    io_method: IoMethod,
    clock: Arc<dyn Clock>,
    handle: Option<B::Handle>,
    state: SessionState,
    /// Path of the most recent successful open, or the configured path.
    last_path: String,
    sequence: u64,
}

impl<B: CaptureBackend> CaptureSession<B> {
    /// Validates `config` and creates a closed session.
    ///
    /// Fails with [`OpenError::UnknownIoMethod`] before the backend is ever
    /// touched.
    pub fn new(backend: B, config: CaptureConfig, clock: Arc<dyn Clock>) -> Result<Self, OpenError> {
        let io_method = config
            .io_method()
            .map_err(|_| OpenError::UnknownIoMethod(config.io_method.clone()))?;
        config.validate().map_err(OpenError::InvalidConfig)?;

        Ok(Self {
            backend,
            last_path: config.device_path.clone(),
            config,
            io_method,
            clock,
            handle: None,
            state: SessionState::Closed,
            sequence: 0,
        })
    }

    /// Creates a session and makes a single attempt to open the configured
    /// device.
    pub fn start(backend: B, config: CaptureConfig, clock: Arc<dyn Clock>) -> Result<Self, OpenError> {
        let mut session = Self::new(backend, config, clock)?;
        let path = session.config.device_path.clone();
        session.open(&path)?;
        Ok(session)
    }

    /// Creates a session and keeps trying to open the device.
    ///
    /// Between attempts the session waits [`BACKOFF`] and re-reads the
    /// device path from `params`. Only non-retryable errors or a shutdown
    /// request end the loop without an open device.
    pub fn start_with_retry(
        backend: B,
        config: CaptureConfig,
        clock: Arc<dyn Clock>,
        params: &dyn ParamSource,
        shutdown: &Shutdown,
    ) -> Result<Self, OpenError> {
        let mut session = Self::new(backend, config, clock)?;
        let mut path = session.config.device_path.clone();

        loop {
            match session.open(&path) {
                Ok(()) => return Ok(session),
                Err(e) if e.is_retryable() => {
                    if !shutdown.is_running() {
                        return Err(OpenError::Interrupted);
                    }
                    tracing::warn!("{}, retrying in {:?}", e, BACKOFF);
                    session.clock.sleep(BACKOFF);
                    if let Some(current) = params.device_path() {
                        if current != path {
                            tracing::info!(from = %path, to = %current, "Device path changed while waiting");
                        }
                        path = current;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Opens `path`, releasing any currently open handle first.
    ///
    /// On success the session is [`SessionState::Open`] and `path` becomes
    /// the active path. Autofocus failures are logged and ignored.
    pub fn open(&mut self, path: &str) -> Result<(), OpenError> {
        self.release();

        let request = OpenRequest {
            path: path.to_string(),
            io_method: self.io_method,
            pixel_format: PixelFormat::Mjpeg,
            width: self.config.width,
            height: self.config.height,
            frame_rate: self.config.frame_rate,
        };

        let mut handle = self
            .backend
            .open(&request)
            .map_err(|source| OpenError::DeviceUnavailable {
                path: path.to_string(),
                source,
            })?;

        if self.config.autofocus {
            if let Err(e) = handle.set_autofocus(true) {
                tracing::warn!(path, error = %e, "Failed to enable autofocus");
            }
        }

        tracing::info!(path, io_method = %handle.io_method(), "Capture session open");
        self.handle = Some(handle);
        self.state = SessionState::Open;
        self.last_path = path.to_string();
        Ok(())
    }

    /// Grabs one encoded frame, blocking on device I/O.
    ///
    /// A device error moves the session to [`SessionState::Failed`]; the
    /// handle stays owned until [`CaptureSession::release`].
    pub fn grab_frame(&mut self) -> Result<Frame, GrabError> {
        let handle = match (&mut self.handle, self.state) {
            (Some(handle), SessionState::Open) => handle,
            _ => return Err(GrabError::NotOpen),
        };

        match handle.grab() {
            Ok(data) => {
                self.sequence += 1;
                Ok(Frame::new(data, self.clock.now(), self.sequence))
            }
            Err(source) => {
                self.state = SessionState::Failed;
                Err(GrabError::DeviceLost {
                    path: handle.path().to_string(),
                    source,
                })
            }
        }
    }

    /// Drops the current handle, if any, and moves to
    /// [`SessionState::Closed`].
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(path = handle.path(), "Releasing device handle");
        }
        self.state = SessionState::Closed;
    }

    /// Releases the device. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.handle.is_some() {
            tracing::info!(path = %self.last_path, "Shutting down capture session");
        }
        self.release();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true if a handle is open and healthy.
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Path of the open handle; `None` unless the session is open.
    pub fn active_path(&self) -> Option<&str> {
        match self.state {
            SessionState::Open => self.handle.as_ref().map(|h| h.path()),
            _ => None,
        }
    }

    /// Path of the most recent successful open, kept after release so a
    /// lost device can be reopened at the same node.
    pub fn last_path(&self) -> &str {
        &self.last_path
    }

    /// The configuration this session was started with.
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// The validated I/O strategy.
    pub fn io_method(&self) -> IoMethod {
        self.io_method
    }

    /// Clock used for frame stamps and backoff sleeps.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl<B: CaptureBackend> Drop for CaptureSession<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
