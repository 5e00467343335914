//! USB camera capture relay.
//!
//! Continuously captures MJPEG frames from a USB video device and hands
//! them to a downstream sink, surviving device unplug/replug and live
//! changes of the configured device path without a restart.
//!
//! # Architecture
//!
//! ```text
//! PublishLoop ── grab ──▶ CaptureSession ──▶ DeviceHandle (backend)
//!     │                        ▲
//!     │ publish                │ release / reopen / swap
//!     ▼                        │
//!  FrameSink           ReconnectSupervisor ◀── ParamSource (live path)
//!     │
//!  RateMonitor ──▶ MetricsRegistry
//! ```
//!
//! # Design Principles
//!
//! - **Single owner**: one thread owns the only open device handle
//! - **Scoped release**: handles close when dropped, on every exit path
//! - **Local recovery**: device loss and failed swaps are handled inside
//!   the loop with a fixed one-second backoff
//! - **Fail fast on misconfiguration**: an unknown I/O method stops startup
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use usbcam_relay::{
//!     capture::{CaptureConfig, CaptureSession, MockBackend},
//!     clock::SystemClock,
//!     params::StaticParams,
//!     publish::{PublishLoop, TracingSink},
//!     shutdown::Shutdown,
//!     supervisor::ReconnectSupervisor,
//! };
//!
//! let config = CaptureConfig::for_device("/dev/video0");
//! let params = StaticParams::new("/dev/video0");
//! let shutdown = Shutdown::new();
//!
//! let session = CaptureSession::start_with_retry(
//!     MockBackend::new(),
//!     config,
//!     Arc::new(SystemClock),
//!     &params,
//!     &shutdown,
//! )
//! .unwrap();
//!
//! let stats = PublishLoop::new(session, ReconnectSupervisor::new(params), TracingSink)
//!     .run(&shutdown);
//! println!("published {} frames", stats.frames_published);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod clock;
pub mod params;
pub mod publish;
pub mod shutdown;
pub mod supervisor;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use capture::{CaptureConfig, CaptureSession, Frame, IoMethod, MockBackend, SessionState};
pub use clock::{Clock, SystemClock};
pub use params::{FileParams, ParamSource, StaticParams};
pub use publish::{CompressedImage, FrameSink, PublishLoop};
pub use shutdown::Shutdown;
pub use supervisor::{ReconnectSupervisor, SwapOutcome};
pub use telemetry::{MetricsRegistry, RateMonitor};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
