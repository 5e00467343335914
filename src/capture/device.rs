//! Device abstraction for frame capture.
//!
//! A [`CaptureBackend`] plays the role of the native capture library: it
//! opens device nodes and hands back owned [`DeviceHandle`]s. Dropping a
//! handle closes the device, so release happens on every exit path.

use super::{IoMethod, PixelFormat};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

/// Consecutive empty reads tolerated before a grab is considered failed.
pub const MAX_EMPTY_READS: u32 = 8;

/// Errors reported by a capture backend or an open handle.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device node could not be opened or configured.
    #[error("failed to open {path}: {reason}")]
    OpenFailed {
        /// Device node.
        path: String,
        /// Backend description of the failure.
        reason: String,
    },
    /// An open device stopped delivering frames.
    #[error("device {path} lost: {reason}")]
    Lost {
        /// Device node.
        path: String,
        /// Backend description of the failure.
        reason: String,
    },
    /// The device does not expose a requested control.
    #[error("control not supported on {path}: {control}")]
    Unsupported {
        /// Device node.
        path: String,
        /// Name of the missing control.
        control: String,
    },
}

/// Arguments of a device open call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    /// Device node to open.
    pub path: String,
    /// Buffer I/O strategy.
    pub io_method: IoMethod,
    /// Requested pixel format.
    pub pixel_format: PixelFormat,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames per second.
    pub frame_rate: u32,
}

/// An open capture device bound to one path and one I/O strategy.
pub trait DeviceHandle {
    /// Device node this handle was opened on.
    fn path(&self) -> &str;

    /// I/O strategy in use.
    fn io_method(&self) -> IoMethod;

    /// Blocks until one encoded frame is available.
    ///
    /// Transient empty reads are retried internally; an error means the
    /// device itself is gone or broken.
    fn grab(&mut self) -> Result<Vec<u8>, DeviceError>;

    /// Enables or disables continuous autofocus.
    fn set_autofocus(&mut self, enabled: bool) -> Result<(), DeviceError>;
}

/// Opens capture devices.
pub trait CaptureBackend {
    /// Handle type produced by this backend.
    type Handle: DeviceHandle;

    /// Opens and configures the device described by `request`.
    fn open(&self, request: &OpenRequest) -> Result<Self::Handle, DeviceError>;
}

/// Polls `read` until it yields a non-empty buffer.
///
/// `Ok(None)` stands for a transient empty read. After
/// [`MAX_EMPTY_READS`] of those in a row the device is reported lost.
pub fn read_until_frame<F>(path: &str, mut read: F) -> Result<Vec<u8>, DeviceError>
where
    F: FnMut() -> Result<Option<Vec<u8>>, DeviceError>,
{
    for attempt in 1..=MAX_EMPTY_READS {
        match read()? {
            Some(data) if !data.is_empty() => return Ok(data),
            _ => tracing::trace!(path, attempt, "Empty read, retrying"),
        }
    }
    Err(DeviceError::Lost {
        path: path.to_string(),
        reason: format!("no data after {} reads", MAX_EMPTY_READS),
    })
}

/// Something that happened to a [`MockBackend`] device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// An open succeeded.
    Opened {
        /// Device node.
        path: String,
        /// I/O method the handle was opened with.
        io_method: IoMethod,
    },
    /// An open was refused.
    OpenFailed {
        /// Device node.
        path: String,
    },
    /// A handle was dropped.
    Closed {
        /// Device node.
        path: String,
    },
    /// Autofocus was switched on or off.
    Autofocus {
        /// Device node.
        path: String,
        /// New autofocus setting.
        enabled: bool,
    },
}

/// Scripted backend that produces synthetic JPEG frames.
///
/// Clones share state, so a test can keep one clone to script failures and
/// inspect the recorded [`DeviceEvent`]s while a session owns another.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    events: Vec<DeviceEvent>,
    open_failures: HashMap<String, u32>,
    unplugged: Vec<String>,
    grab_script: VecDeque<MockGrab>,
    autofocus_unsupported: bool,
    paced: bool,
    sequence: u64,
}

#[derive(Debug, Clone, Copy)]
enum MockGrab {
    Lost,
    Empty,
}

impl MockBackend {
    /// Creates a backend where every device opens and grabs succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` opens of `path` fail.
    pub fn fail_opens(&self, path: &str, count: u32) {
        *self.lock().open_failures.entry(path.to_string()).or_insert(0) += count;
    }

    /// Makes every open of `path` fail until [`MockBackend::plug`].
    pub fn unplug(&self, path: &str) {
        let mut state = self.lock();
        if !state.unplugged.iter().any(|p| p == path) {
            state.unplugged.push(path.to_string());
        }
    }

    /// Reverses [`MockBackend::unplug`].
    pub fn plug(&self, path: &str) {
        self.lock().unplugged.retain(|p| p != path);
    }

    /// Makes the next `count` grabs report a lost device.
    pub fn fail_grabs(&self, count: usize) {
        let mut state = self.lock();
        state.grab_script.extend(std::iter::repeat(MockGrab::Lost).take(count));
    }

    /// Makes the next `count` driver reads come back empty.
    pub fn empty_reads(&self, count: usize) {
        let mut state = self.lock();
        state.grab_script.extend(std::iter::repeat(MockGrab::Empty).take(count));
    }

    /// Makes handles block for one frame interval per grab, like a real
    /// camera streaming at the requested frame rate.
    pub fn paced(self) -> Self {
        self.lock().paced = true;
        self
    }

    /// Makes autofocus requests fail.
    pub fn without_autofocus(self) -> Self {
        self.lock().autofocus_unsupported = true;
        self
    }

    /// Returns every event recorded so far.
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.lock().events.clone()
    }

    /// Number of open attempts, successful or not, on `path`.
    pub fn open_attempts(&self, path: &str) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| match e {
                DeviceEvent::Opened { path: p, .. } | DeviceEvent::OpenFailed { path: p } => {
                    p == path
                }
                _ => false,
            })
            .count()
    }

    /// Number of handles on `path` that were closed.
    pub fn closes(&self, path: &str) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, DeviceEvent::Closed { path: p } if p == path))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CaptureBackend for MockBackend {
    type Handle = MockHandle;

    fn open(&self, request: &OpenRequest) -> Result<MockHandle, DeviceError> {
        let mut state = self.lock();
        let path = request.path.clone();

        let scripted_failure = match state.open_failures.get_mut(&path) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };

        if scripted_failure || state.unplugged.contains(&path) {
            state.events.push(DeviceEvent::OpenFailed { path: path.clone() });
            return Err(DeviceError::OpenFailed {
                path,
                reason: "no such device".to_string(),
            });
        }

        state.events.push(DeviceEvent::Opened {
            path: path.clone(),
            io_method: request.io_method,
        });
        tracing::debug!(path = %path, io_method = %request.io_method, "MockBackend opened device");

        let interval = state
            .paced
            .then(|| Duration::from_secs(1) / request.frame_rate.max(1));

        Ok(MockHandle {
            path,
            io_method: request.io_method,
            interval,
            state: Arc::clone(&self.state),
        })
    }
}

/// Handle produced by [`MockBackend`].
#[derive(Debug)]
pub struct MockHandle {
    path: String,
    io_method: IoMethod,
    interval: Option<Duration>,
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_once(&self) -> Result<Option<Vec<u8>>, DeviceError> {
        let mut state = self.lock();
        if state.unplugged.contains(&self.path) {
            return Err(DeviceError::Lost {
                path: self.path.clone(),
                reason: "device unplugged".to_string(),
            });
        }
        match state.grab_script.pop_front() {
            Some(MockGrab::Lost) => Err(DeviceError::Lost {
                path: self.path.clone(),
                reason: "I/O error".to_string(),
            }),
            Some(MockGrab::Empty) => Ok(None),
            None => {
                state.sequence += 1;
                // Minimal SOI .. EOI envelope around the sequence number.
                let mut data = vec![0xFF, 0xD8];
                data.extend_from_slice(&state.sequence.to_be_bytes());
                data.extend_from_slice(&[0xFF, 0xD9]);
                Ok(Some(data))
            }
        }
    }
}

impl DeviceHandle for MockHandle {
    fn path(&self) -> &str {
        &self.path
    }

    fn io_method(&self) -> IoMethod {
        self.io_method
    }

    fn grab(&mut self) -> Result<Vec<u8>, DeviceError> {
        if let Some(interval) = self.interval {
            std::thread::sleep(interval);
        }
        let path = self.path.clone();
        read_until_frame(&path, || self.read_once())
    }

    fn set_autofocus(&mut self, enabled: bool) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if state.autofocus_unsupported {
            return Err(DeviceError::Unsupported {
                path: self.path.clone(),
                control: "focus_automatic_continuous".to_string(),
            });
        }
        state.events.push(DeviceEvent::Autofocus {
            path: self.path.clone(),
            enabled,
        });
        Ok(())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        let path = self.path.clone();
        self.lock().events.push(DeviceEvent::Closed { path });
        tracing::debug!(path = %self.path, "MockBackend closed device");
    }
}
