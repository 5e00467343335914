//! Metrics collection and registry.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Registration or encoding failed.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of capture loop state for metrics update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Whether a device handle is currently open.
    pub session_open: bool,
    /// Frames handed to the sink.
    pub frames_published: u64,
    /// Frames the sink dropped because the consumer lagged.
    pub frames_dropped: u64,
    /// Grabs that failed.
    pub grab_failures: u64,
    /// Successful switches to a new device path.
    pub device_switches: u64,
    /// Swaps that fell back to the previous path.
    pub swap_fallbacks: u64,
    /// Lost devices that were reopened on the same path.
    pub reconnects: u64,
    /// Frames counted in the last completed one-second window.
    pub frames_per_second: Option<u32>,
}

/// Prometheus metrics registry for capture monitoring.
pub struct MetricsRegistry {
    registry: Registry,

    session_open: IntGauge,
    frames_per_second: IntGauge,

    frames_published: IntCounter,
    frames_dropped: IntCounter,
    grab_failures: IntCounter,

    device_switches: IntCounter,
    swap_fallbacks: IntCounter,
    reconnects: IntCounter,
}

impl MetricsRegistry {
    /// Creates a new registry with all capture metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let session_open = IntGauge::new(
            "usbcam_session_open",
            "Whether a capture device is open (1=open, 0=closed)",
        )?;
        let frames_per_second = IntGauge::new(
            "usbcam_frames_per_second",
            "Frames published during the last one-second window",
        )?;
        let frames_published = IntCounter::new(
            "usbcam_frames_published_total",
            "Total frames handed to the publish sink",
        )?;
        let frames_dropped = IntCounter::new(
            "usbcam_frames_dropped_total",
            "Total frames dropped because the consumer lagged",
        )?;
        let grab_failures = IntCounter::new(
            "usbcam_grab_failures_total",
            "Total failed frame grabs",
        )?;
        let device_switches = IntCounter::new(
            "usbcam_device_switches_total",
            "Total switches to a new device path",
        )?;
        let swap_fallbacks = IntCounter::new(
            "usbcam_swap_fallbacks_total",
            "Total device swaps that fell back to the previous path",
        )?;
        let reconnects = IntCounter::new(
            "usbcam_reconnects_total",
            "Total lost devices reopened on the same path",
        )?;

        registry.register(Box::new(session_open.clone()))?;
        registry.register(Box::new(frames_per_second.clone()))?;
        registry.register(Box::new(frames_published.clone()))?;
        registry.register(Box::new(frames_dropped.clone()))?;
        registry.register(Box::new(grab_failures.clone()))?;
        registry.register(Box::new(device_switches.clone()))?;
        registry.register(Box::new(swap_fallbacks.clone()))?;
        registry.register(Box::new(reconnects.clone()))?;

        Ok(Self {
            registry,
            session_open,
            frames_per_second,
            frames_published,
            frames_dropped,
            grab_failures,
            device_switches,
            swap_fallbacks,
            reconnects,
        })
    }

    /// Updates all metrics from a snapshot.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.session_open.set(i64::from(snapshot.session_open));
        if let Some(fps) = snapshot.frames_per_second {
            self.frames_per_second.set(i64::from(fps));
        }

        // Counters only move forward, so apply the difference.
        advance(&self.frames_published, snapshot.frames_published);
        advance(&self.frames_dropped, snapshot.frames_dropped);
        advance(&self.grab_failures, snapshot.grab_failures);
        advance(&self.device_switches, snapshot.device_switches);
        advance(&self.swap_fallbacks, snapshot.swap_fallbacks);
        advance(&self.reconnects, snapshot.reconnects);
    }

    /// Returns the underlying Prometheus registry.
    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}
