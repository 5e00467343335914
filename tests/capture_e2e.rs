//! End-to-end capture loop scenarios against the mock backend.

use std::sync::Arc;
use usbcam_relay::capture::{
    CaptureConfig, CaptureSession, DeviceEvent, IoMethod, MockBackend, OpenError, SessionState,
};
use usbcam_relay::clock::{ManualClock, BACKOFF};
use usbcam_relay::params::{ScriptedParams, StaticParams};
use usbcam_relay::publish::{CompressedImage, Delivery, FrameSink, PublishError, PublishLoop};
use usbcam_relay::shutdown::Shutdown;
use usbcam_relay::supervisor::ReconnectSupervisor;

/// Records messages and requests shutdown after `limit` of them.
struct StopAfter {
    limit: usize,
    shutdown: Shutdown,
    messages: Vec<CompressedImage>,
}

impl StopAfter {
    fn new(limit: usize, shutdown: &Shutdown) -> Self {
        Self {
            limit,
            shutdown: shutdown.clone(),
            messages: Vec::new(),
        }
    }
}

impl FrameSink for StopAfter {
    fn publish(&mut self, image: CompressedImage) -> Result<Delivery, PublishError> {
        self.messages.push(image);
        if self.messages.len() >= self.limit {
            self.shutdown.trigger();
        }
        Ok(Delivery::Delivered)
    }
}

fn camera_config() -> CaptureConfig {
    CaptureConfig {
        device_path: "/dev/video0".to_string(),
        io_method: "mmap".to_string(),
        width: 640,
        height: 480,
        frame_rate: 30,
        ..CaptureConfig::default()
    }
}

#[test]
fn five_grabs_produce_five_ordered_publishes() {
    let backend = MockBackend::new();
    let clock = Arc::new(ManualClock::at_epoch());
    let shutdown = Shutdown::new();
    let params = StaticParams::new("/dev/video0");

    let session =
        CaptureSession::start_with_retry(backend.clone(), camera_config(), clock, &params, &shutdown)
            .unwrap();
    assert_eq!(session.state(), SessionState::Open);

    let mut sink = StopAfter::new(5, &shutdown);
    let stats = PublishLoop::new(session, ReconnectSupervisor::new(&params), &mut sink).run(&shutdown);

    assert_eq!(stats.frames_published, 5);
    assert_eq!(sink.messages.len(), 5);
    for message in &sink.messages {
        assert_eq!(message.format, "jpeg");
        assert!(!message.data.is_empty());
    }
    for pair in sink.messages.windows(2) {
        assert!(pair[1].header.stamp > pair[0].header.stamp);
    }

    // Released exactly once when the loop exits.
    assert_eq!(backend.closes("/dev/video0"), 1);
    assert_eq!(
        backend.events().first(),
        Some(&DeviceEvent::Opened {
            path: "/dev/video0".to_string(),
            io_method: IoMethod::Mmap
        })
    );
}

#[test]
fn two_failed_opens_mean_two_backoffs() {
    let backend = MockBackend::new();
    backend.fail_opens("/dev/video0", 2);
    let clock = Arc::new(ManualClock::at_epoch());

    let session = CaptureSession::start_with_retry(
        backend.clone(),
        camera_config(),
        clock.clone(),
        &StaticParams::new("/dev/video0"),
        &Shutdown::new(),
    )
    .unwrap();

    assert_eq!(session.state(), SessionState::Open);
    assert_eq!(clock.sleeps(), vec![BACKOFF, BACKOFF]);
}

#[test]
fn long_cold_start_keeps_retrying() {
    let backend = MockBackend::new();
    backend.fail_opens("/dev/video0", 50);
    let clock = Arc::new(ManualClock::at_epoch());

    let session = CaptureSession::start_with_retry(
        backend.clone(),
        camera_config(),
        clock.clone(),
        &StaticParams::new("/dev/video0"),
        &Shutdown::new(),
    )
    .unwrap();

    assert!(session.is_open());
    let sleeps = clock.sleeps();
    assert_eq!(sleeps.len(), 50);
    assert!(sleeps.iter().all(|d| *d >= BACKOFF));
}

#[test]
fn unknown_io_method_halts_startup() {
    let backend = MockBackend::new();
    let config = CaptureConfig {
        io_method: "dmabuf".to_string(),
        ..camera_config()
    };

    let result = CaptureSession::start_with_retry(
        backend.clone(),
        config,
        Arc::new(ManualClock::at_epoch()),
        &StaticParams::new("/dev/video0"),
        &Shutdown::new(),
    );

    assert!(matches!(result, Err(OpenError::UnknownIoMethod(_))));
    assert!(backend.events().is_empty());
}

#[test]
fn hot_swap_survives_failed_target_and_recovers() {
    let backend = MockBackend::new();
    backend.unplug("/dev/video1");
    let clock = Arc::new(ManualClock::at_epoch());
    let shutdown = Shutdown::new();
    let params = ScriptedParams::new(["/dev/video0", "/dev/video1"]);

    let session = CaptureSession::start(backend.clone(), camera_config(), clock.clone()).unwrap();
    let mut publish_loop = PublishLoop::new(
        session,
        ReconnectSupervisor::new(&params),
        StopAfter::new(usize::MAX, &shutdown),
    );

    // Iteration 1: unchanged. Iteration 2: swap fails, falls back.
    publish_loop.run_once(&shutdown);
    publish_loop.run_once(&shutdown);
    assert_eq!(publish_loop.session().active_path(), Some("/dev/video0"));
    assert_eq!(publish_loop.stats().swap_fallbacks, 1);
    assert_eq!(clock.sleeps(), vec![BACKOFF]);

    // The node shows up; the next check adopts it.
    backend.plug("/dev/video1");
    publish_loop.run_once(&shutdown);
    assert_eq!(publish_loop.session().active_path(), Some("/dev/video1"));
    assert_eq!(publish_loop.stats().device_switches, 1);
    assert_eq!(publish_loop.stats().frames_published, 3);
}

#[test]
fn unplug_and_replug_resumes_publishing() {
    let backend = MockBackend::new();
    let clock = Arc::new(ManualClock::at_epoch());
    let shutdown = Shutdown::new();
    let params = StaticParams::new("/dev/video0");

    let session = CaptureSession::start(backend.clone(), camera_config(), clock.clone()).unwrap();
    let mut publish_loop = PublishLoop::new(
        session,
        ReconnectSupervisor::new(&params),
        StopAfter::new(usize::MAX, &shutdown),
    );

    publish_loop.run_once(&shutdown);
    backend.unplug("/dev/video0");
    publish_loop.run_once(&shutdown);
    publish_loop.run_once(&shutdown);
    assert!(!publish_loop.session().is_open());
    assert_eq!(publish_loop.stats().frames_published, 1);

    backend.plug("/dev/video0");
    publish_loop.run_once(&shutdown);
    assert!(publish_loop.session().is_open());
    publish_loop.run_once(&shutdown);
    assert_eq!(publish_loop.stats().frames_published, 2);
    assert_eq!(publish_loop.stats().reconnects, 1);
}
