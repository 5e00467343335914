//! Frame-rate telemetry and Prometheus export.
//!
//! # Metrics Exposed
//!
//! - `usbcam_session_open` - Whether a device is open (1=open, 0=closed)
//! - `usbcam_frames_per_second` - Frames in the last one-second window
//! - `usbcam_frames_published_total` - Frames handed to the sink
//! - `usbcam_frames_dropped_total` - Frames dropped by a lagging consumer
//! - `usbcam_grab_failures_total` - Failed grabs
//! - `usbcam_device_switches_total` - Switches to a new device path
//! - `usbcam_swap_fallbacks_total` - Swaps that fell back to the old path
//! - `usbcam_reconnects_total` - Lost devices reopened on the same path

mod collector;
mod rate;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
pub use rate::{RateMonitor, RateSample, WINDOW};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, ServerError};
