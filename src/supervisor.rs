//! Reconnect supervision.
//!
//! The supervisor reacts to two independent triggers: a failed grab, and a
//! live device-path change. It only manipulates the session's handle and
//! never sees frame data.

use crate::capture::{CaptureBackend, CaptureSession, GrabError};
use crate::clock::BACKOFF;
use crate::params::ParamSource;
use crate::shutdown::Shutdown;

/// What a configuration check did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    /// The live path matches the open handle.
    Unchanged,
    /// The handle was replaced by one on the new path.
    Switched {
        /// Path that was released.
        from: String,
        /// Path now open.
        to: String,
    },
    /// The new path failed to open and the previous path was restored.
    FellBack {
        /// Path that failed to open.
        attempted: String,
        /// Path reopened after the backoff.
        restored: String,
    },
    /// Neither the new nor the previous path could be opened.
    Detached {
        /// Path that failed to open.
        attempted: String,
        /// Path that was released and not restored.
        previous: String,
    },
    /// A closed session was reopened on its last path.
    Reopened {
        /// Path now open.
        path: String,
    },
    /// A closed session could not be reopened on its last path.
    StillClosed {
        /// Path that failed to open.
        path: String,
    },
}

impl SwapOutcome {
    /// Returns true if the check left the session open.
    pub fn is_attached(&self) -> bool {
        matches!(
            self,
            SwapOutcome::Unchanged
                | SwapOutcome::Switched { .. }
                | SwapOutcome::FellBack { .. }
                | SwapOutcome::Reopened { .. }
        )
    }
}

/// Drives session teardown and rebuild.
pub struct ReconnectSupervisor<P> {
    params: P,
}

impl<P: ParamSource> ReconnectSupervisor<P> {
    /// Creates a supervisor reading the live device path from `params`.
    pub fn new(params: P) -> Self {
        Self { params }
    }

    /// Handles a failed grab: logs it, releases the broken handle and
    /// waits one backoff interval unless shutdown was requested.
    ///
    /// The handle is not reopened here; the next [`check`](Self::check)
    /// rebuilds it on the configured path.
    pub fn on_grab_failure<B: CaptureBackend>(
        &self,
        session: &mut CaptureSession<B>,
        error: &GrabError,
        shutdown: &Shutdown,
    ) {
        match error {
            GrabError::DeviceLost { .. } => tracing::error!("couldn't grab image: {}", error),
            GrabError::NotOpen => tracing::warn!("couldn't grab image: {}", error),
        }
        session.release();
        if shutdown.is_running() {
            session.clock().sleep(BACKOFF);
        }
    }

    /// Re-reads the live device path and reconciles the session with it.
    ///
    /// When shutdown has been requested a failed swap gives up without
    /// waiting for the fallback.
    pub fn check<B: CaptureBackend>(
        &self,
        session: &mut CaptureSession<B>,
        shutdown: &Shutdown,
    ) -> SwapOutcome {
        let live = self.params.device_path();

        match session.active_path().map(str::to_owned) {
            Some(active) => match live {
                Some(live) if live != active => self.swap(session, &active, &live, shutdown),
                _ => SwapOutcome::Unchanged,
            },
            None => {
                let previous = session.last_path().to_string();
                match live {
                    Some(live) if live != previous => self.swap(session, &previous, &live, shutdown),
                    _ => self.reopen(session, &previous),
                }
            }
        }
    }

    fn swap<B: CaptureBackend>(
        &self,
        session: &mut CaptureSession<B>,
        previous: &str,
        next: &str,
        shutdown: &Shutdown,
    ) -> SwapOutcome {
        tracing::info!("switching device from {} to {}", previous, next);
        session.release();

        match session.open(next) {
            Ok(()) => SwapOutcome::Switched {
                from: previous.to_string(),
                to: next.to_string(),
            },
            Err(e) if !shutdown.is_running() => {
                tracing::warn!("Open failure during swap ({}), shutting down", e);
                SwapOutcome::Detached {
                    attempted: next.to_string(),
                    previous: previous.to_string(),
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Open failure during swap ({}), falling back to {} in {:?}",
                    e,
                    previous,
                    BACKOFF
                );
                session.clock().sleep(BACKOFF);

                match session.open(previous) {
                    Ok(()) => SwapOutcome::FellBack {
                        attempted: next.to_string(),
                        restored: previous.to_string(),
                    },
                    Err(e) => {
                        tracing::error!("Fallback to {} failed: {}", previous, e);
                        SwapOutcome::Detached {
                            attempted: next.to_string(),
                            previous: previous.to_string(),
                        }
                    }
                }
            }
        }
    }

    fn reopen<B: CaptureBackend>(&self, session: &mut CaptureSession<B>, path: &str) -> SwapOutcome {
        match session.open(path) {
            Ok(()) => {
                tracing::info!(path, "Device reconnected");
                SwapOutcome::Reopened {
                    path: path.to_string(),
                }
            }
            Err(e) => {
                tracing::debug!("Reconnect attempt failed: {}", e);
                SwapOutcome::StillClosed {
                    path: path.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureConfig, DeviceEvent, MockBackend, SessionState};
    use crate::clock::{Clock, ManualClock};
    use crate::params::ScriptedParams;
    use chrono::{DateTime, Utc};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn running() -> Shutdown {
        Shutdown::new()
    }

    fn stopped() -> Shutdown {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown
    }

    /// Notes how many device events had happened at each sleep.
    struct EventClock {
        backend: MockBackend,
        inner: ManualClock,
        events_at_sleep: Mutex<Vec<usize>>,
    }

    impl Clock for EventClock {
        fn now(&self) -> DateTime<Utc> {
            self.inner.now()
        }

        fn sleep(&self, duration: Duration) {
            let seen = self.backend.events().len();
            self.events_at_sleep.lock().unwrap().push(seen);
            self.inner.sleep(duration);
        }
    }

    fn open_session(backend: &MockBackend, clock: &Arc<ManualClock>) -> CaptureSession<MockBackend> {
        CaptureSession::start(
            backend.clone(),
            CaptureConfig::for_device("/dev/video0"),
            clock.clone(),
        )
        .unwrap()
    }

    #[test]
    fn test_unchanged_path_is_a_no_op() {
        let backend = MockBackend::new();
        let clock = Arc::new(ManualClock::at_epoch());
        let mut session = open_session(&backend, &clock);
        let supervisor = ReconnectSupervisor::new(ScriptedParams::new(["/dev/video0"]));

        assert_eq!(supervisor.check(&mut session, &running()), SwapOutcome::Unchanged);
        assert_eq!(backend.closes("/dev/video0"), 0);
        assert_eq!(backend.open_attempts("/dev/video0"), 1);
    }

    #[test]
    fn test_path_change_closes_once_and_opens_new() {
        let backend = MockBackend::new();
        let clock = Arc::new(ManualClock::at_epoch());
        let mut session = open_session(&backend, &clock);
        let supervisor = ReconnectSupervisor::new(ScriptedParams::new(["/dev/video1"]));

        let outcome = supervisor.check(&mut session, &running());

        assert_eq!(
            outcome,
            SwapOutcome::Switched {
                from: "/dev/video0".to_string(),
                to: "/dev/video1".to_string()
            }
        );
        assert_eq!(backend.closes("/dev/video0"), 1);
        assert_eq!(backend.open_attempts("/dev/video1"), 1);
        assert_eq!(session.active_path(), Some("/dev/video1"));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_failed_swap_falls_back_once_after_backoff() {
        let backend = MockBackend::new();
        let clock = Arc::new(ManualClock::at_epoch());
        let mut session = open_session(&backend, &clock);
        backend.unplug("/dev/video1");
        let supervisor = ReconnectSupervisor::new(ScriptedParams::new(["/dev/video1"]));

        let outcome = supervisor.check(&mut session, &running());

        assert!(matches!(outcome, SwapOutcome::FellBack { .. }));
        assert_eq!(clock.sleeps(), vec![BACKOFF]);
        // Initial open plus exactly one fallback.
        assert_eq!(backend.open_attempts("/dev/video0"), 2);
        assert_eq!(session.active_path(), Some("/dev/video0"));
    }

    #[test]
    fn test_fallback_open_happens_after_the_wait() {
        let backend = MockBackend::new();
        let clock = Arc::new(EventClock {
            backend: backend.clone(),
            inner: ManualClock::at_epoch(),
            events_at_sleep: Mutex::new(Vec::new()),
        });
        let mut session = CaptureSession::start(
            backend.clone(),
            CaptureConfig::for_device("/dev/video0"),
            clock.clone(),
        )
        .unwrap();
        backend.unplug("/dev/video1");
        let supervisor = ReconnectSupervisor::new(ScriptedParams::new(["/dev/video1"]));

        supervisor.check(&mut session, &running());

        let events = backend.events();
        let failed = events
            .iter()
            .position(|e| matches!(e, DeviceEvent::OpenFailed { path } if path == "/dev/video1"))
            .unwrap();
        let fallback = events
            .iter()
            .rposition(|e| matches!(e, DeviceEvent::Opened { path, .. } if path == "/dev/video0"))
            .unwrap();
        let waits = clock.events_at_sleep.lock().unwrap().clone();
        assert_eq!(waits.len(), 1);
        // The wait saw the failed open but not yet the fallback open.
        assert!(failed < waits[0]);
        assert!(waits[0] <= fallback);
        assert_eq!(session.active_path(), Some("/dev/video0"));
    }

    #[test]
    fn test_failed_swap_skips_fallback_during_shutdown() {
        let backend = MockBackend::new();
        let clock = Arc::new(ManualClock::at_epoch());
        let mut session = open_session(&backend, &clock);
        backend.unplug("/dev/video1");
        let supervisor = ReconnectSupervisor::new(ScriptedParams::new(["/dev/video1"]));

        let outcome = supervisor.check(&mut session, &stopped());

        assert!(matches!(outcome, SwapOutcome::Detached { .. }));
        assert!(clock.sleeps().is_empty());
        assert_eq!(backend.open_attempts("/dev/video0"), 1);
    }

    #[test]
    fn test_grab_failure_skips_backoff_during_shutdown() {
        let backend = MockBackend::new();
        let clock = Arc::new(ManualClock::at_epoch());
        let mut session = open_session(&backend, &clock);
        let supervisor = ReconnectSupervisor::new(ScriptedParams::new(["/dev/video0"]));

        backend.fail_grabs(1);
        let err = session.grab_frame().unwrap_err();
        supervisor.on_grab_failure(&mut session, &err, &stopped());

        assert_eq!(session.state(), SessionState::Closed);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_failed_fallback_leaves_session_detached() {
        let backend = MockBackend::new();
        let clock = Arc::new(ManualClock::at_epoch());
        let mut session = open_session(&backend, &clock);
        backend.unplug("/dev/video0");
        backend.unplug("/dev/video1");
        let supervisor = ReconnectSupervisor::new(ScriptedParams::new(["/dev/video1"]));

        let outcome = supervisor.check(&mut session, &running());

        assert!(matches!(outcome, SwapOutcome::Detached { .. }));
        assert!(!outcome.is_attached());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.active_path(), None);

        // The next check tries the new path again.
        backend.plug("/dev/video1");
        assert!(matches!(
            supervisor.check(&mut session, &running()),
            SwapOutcome::Switched { .. }
        ));
        assert_eq!(session.active_path(), Some("/dev/video1"));
    }

    #[test]
    fn test_lost_device_is_reopened_on_same_path() {
        let backend = MockBackend::new();
        let clock = Arc::new(ManualClock::at_epoch());
        let mut session = open_session(&backend, &clock);
        let supervisor = ReconnectSupervisor::new(ScriptedParams::new(["/dev/video0"]));

        backend.fail_grabs(1);
        let err = session.grab_frame().unwrap_err();
        supervisor.on_grab_failure(&mut session, &err, &running());

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(backend.closes("/dev/video0"), 1);
        assert_eq!(clock.sleeps(), vec![BACKOFF]);

        assert_eq!(
            supervisor.check(&mut session, &running()),
            SwapOutcome::Reopened {
                path: "/dev/video0".to_string()
            }
        );
        assert!(session.grab_frame().is_ok());
    }

    #[test]
    fn test_unplugged_device_stays_closed_until_replugged() {
        let backend = MockBackend::new();
        let clock = Arc::new(ManualClock::at_epoch());
        let mut session = open_session(&backend, &clock);
        let supervisor = ReconnectSupervisor::new(ScriptedParams::new(["/dev/video0"]));

        backend.unplug("/dev/video0");
        let err = session.grab_frame().unwrap_err();
        supervisor.on_grab_failure(&mut session, &err, &running());

        assert!(matches!(
            supervisor.check(&mut session, &running()),
            SwapOutcome::StillClosed { .. }
        ));

        backend.plug("/dev/video0");
        assert!(matches!(
            supervisor.check(&mut session, &running()),
            SwapOutcome::Reopened { .. }
        ));
    }
}
