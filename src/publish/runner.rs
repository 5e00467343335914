//! The capture/publish control loop.

use super::{CompressedImage, Delivery, FrameSink};
use crate::capture::{CaptureBackend, CaptureSession};
use crate::params::ParamSource;
use crate::shutdown::Shutdown;
use crate::supervisor::{ReconnectSupervisor, SwapOutcome};
use crate::telemetry::{MetricsRegistry, MetricsSnapshot, RateMonitor};
use std::sync::Arc;

/// Running totals kept by the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Loop iterations run.
    pub iterations: u64,
    /// Frames accepted by the sink.
    pub frames_published: u64,
    /// Pending frames overwritten before the consumer took them.
    pub frames_dropped: u64,
    /// Grabs that failed and released the device.
    pub grab_failures: u64,
    /// Successful switches to a new device path.
    pub device_switches: u64,
    /// Failed switches that restored the previous path.
    pub swap_fallbacks: u64,
    /// Closed sessions reopened on their last path.
    pub reconnects: u64,
    /// Frame count of the last completed rate window.
    pub last_fps: Option<u32>,
}

impl LoopStats {
    /// Builds a metrics snapshot.
    pub fn snapshot(&self, session_open: bool) -> MetricsSnapshot {
        MetricsSnapshot {
            session_open,
            frames_published: self.frames_published,
            frames_dropped: self.frames_dropped,
            grab_failures: self.grab_failures,
            device_switches: self.device_switches,
            swap_fallbacks: self.swap_fallbacks,
            reconnects: self.reconnects,
            frames_per_second: self.last_fps,
        }
    }

    fn record_swap(&mut self, outcome: &SwapOutcome) {
        match outcome {
            SwapOutcome::Switched { .. } => self.device_switches += 1,
            SwapOutcome::FellBack { .. } => self.swap_fallbacks += 1,
            SwapOutcome::Reopened { .. } => self.reconnects += 1,
            SwapOutcome::Unchanged | SwapOutcome::Detached { .. } | SwapOutcome::StillClosed { .. } => {}
        }
    }
}

/// What happened to the frame side of one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was grabbed and handed to the sink.
    Published { sequence: u64 },
    /// A frame was grabbed but the sink refused it.
    Rejected { sequence: u64 },
    /// The grab failed; nothing was published.
    GrabFailed,
}

/// Result of one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Grab and publish result.
    pub frame: FrameOutcome,
    /// Result of the reconfiguration check.
    pub swap: SwapOutcome,
}

/// Grab → publish → rate update → reconfiguration check, until shutdown.
pub struct PublishLoop<B: CaptureBackend, P, S> {
    session: CaptureSession<B>,
    supervisor: ReconnectSupervisor<P>,
    sink: S,
    rate: RateMonitor,
    stats: LoopStats,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl<B, P, S> PublishLoop<B, P, S>
where
    B: CaptureBackend,
    P: ParamSource,
    S: FrameSink,
{
    /// Creates a loop whose first rate window opens now.
    pub fn new(session: CaptureSession<B>, supervisor: ReconnectSupervisor<P>, sink: S) -> Self {
        let rate = RateMonitor::starting_at(session.clock().now());
        Self {
            session,
            supervisor,
            sink,
            rate,
            stats: LoopStats::default(),
            metrics: None,
        }
    }

    /// Feeds loop statistics into `registry` after every iteration.
    pub fn with_metrics(mut self, registry: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(registry);
        self
    }

    /// Runs until `shutdown` is triggered, then releases the device.
    pub fn run(mut self, shutdown: &Shutdown) -> LoopStats {
        tracing::info!(
            device = self.session.last_path(),
            "Publishing frames"
        );

        while shutdown.is_running() {
            self.run_once(shutdown);
        }

        self.session.shutdown();
        tracing::info!(
            published = self.stats.frames_published,
            grab_failures = self.stats.grab_failures,
            "Publish loop stopped"
        );
        self.stats
    }

    /// Performs one iteration of the loop.
    ///
    /// `shutdown` lets the supervisor skip backoff waits once a stop has
    /// been requested.
    pub fn run_once(&mut self, shutdown: &Shutdown) -> StepOutcome {
        self.stats.iterations += 1;

        let frame = match self.session.grab_frame() {
            Ok(frame) => {
                let sequence = frame.sequence();
                if !frame.has_jpeg_marker() {
                    tracing::debug!(sequence, bytes = frame.len(), "Frame lacks JPEG start marker");
                }
                let image = CompressedImage::from_frame(frame, &self.session.config().frame_id);

                let outcome = match self.sink.publish(image) {
                    Ok(Delivery::Delivered) => {
                        self.stats.frames_published += 1;
                        FrameOutcome::Published { sequence }
                    }
                    Ok(Delivery::ReplacedPending) => {
                        self.stats.frames_published += 1;
                        self.stats.frames_dropped += 1;
                        tracing::trace!(sequence, "Consumer lagging, pending frame replaced");
                        FrameOutcome::Published { sequence }
                    }
                    Err(e) => {
                        tracing::warn!(sequence, "Failed to publish frame: {}", e);
                        FrameOutcome::Rejected { sequence }
                    }
                };

                self.rate.record_frame();
                if let Some(sample) = self.rate.tick(self.session.clock().now()) {
                    self.stats.last_fps = Some(sample.frames);
                }
                outcome
            }
            Err(e) => {
                self.stats.grab_failures += 1;
                self.supervisor.on_grab_failure(&mut self.session, &e, shutdown);
                FrameOutcome::GrabFailed
            }
        };

        let swap = self.supervisor.check(&mut self.session, shutdown);
        self.stats.record_swap(&swap);

        if let Some(metrics) = &self.metrics {
            metrics.update(&self.stats.snapshot(self.session.is_open()));
        }

        StepOutcome { frame, swap }
    }

    /// Statistics so far.
    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// The capture session driven by this loop.
    pub fn session(&self) -> &CaptureSession<B> {
        &self.session
    }

    /// The sink frames are published to.
    pub fn sink(&self) -> &S {
        &self.sink
    }
}
