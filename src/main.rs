//! USB camera relay CLI.
//!
//! Opens the configured capture device (waiting for it to appear), then
//! publishes frames until Ctrl-C.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use usbcam_relay::{
    capture::{CaptureBackend, CaptureConfig, CaptureSession, FileConfig, MockBackend, OpenError},
    clock::SystemClock,
    params::{FileParams, ParamSource, StaticParams},
    publish::{LatestFrameSink, PublishLoop},
    shutdown::Shutdown,
    supervisor::ReconnectSupervisor,
    telemetry::MetricsRegistry,
};

const DEFAULT_BACKEND: &str = if cfg!(feature = "v4l") { "v4l" } else { "mock" };

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Video4Linux device nodes.
    V4l,
    /// Synthetic frames, no hardware required.
    Mock,
}

#[derive(Debug, Parser)]
#[command(name = "usbcam-relay", version, about)]
struct Args {
    /// TOML parameter file; `[camera] video_device` is re-read while running.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Capture backend.
    #[arg(long, value_enum, default_value = DEFAULT_BACKEND)]
    backend: Backend,

    /// Device node; overrides the file and disables live re-reading.
    #[arg(long)]
    video_device: Option<String>,

    /// I/O method: mmap, read or userptr.
    #[arg(long)]
    io_method: Option<String>,

    /// Port for the Prometheus endpoint (0 disables it).
    #[arg(long)]
    metrics_port: Option<u16>,
}

/// `RUST_LOG` when set and valid, `info` otherwise.
fn log_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt().with_env_filter(log_filter()).init();

    let args = Args::parse();
    tracing::debug!(?args, "Command line");
    info!("usbcam-relay v{}", usbcam_relay::VERSION);

    let file_config = match &args.config {
        Some(path) => match FileConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => FileConfig::default(),
    };

    let mut config = file_config.camera;
    if let Some(device) = &args.video_device {
        config.device_path = device.clone();
    }
    if let Some(io_method) = &args.io_method {
        config.io_method = io_method.clone();
    }
    config.log_summary();

    let params: Box<dyn ParamSource> = match (&args.config, &args.video_device) {
        (Some(path), None) => match FileParams::new(path) {
            Ok(params) => Box::new(params),
            Err(e) => {
                error!("Failed to watch {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        _ => Box::new(StaticParams::new(config.device_path.clone())),
    };

    let shutdown = Shutdown::new();
    if let Err(e) = shutdown.install_ctrlc_handler() {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    let metrics = match MetricsRegistry::new() {
        Ok(registry) => Some(Arc::new(registry)),
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            None
        }
    };
    let metrics_port = args.metrics_port.unwrap_or(file_config.output.metrics_port);
    start_metrics_server(metrics.clone(), metrics_port);

    match args.backend {
        Backend::Mock => {
            info!("Using mock capture backend");
            run(MockBackend::new().paced(), config, params, &shutdown, metrics)
        }
        #[cfg(feature = "v4l")]
        Backend::V4l => run(
            usbcam_relay::capture::V4lBackend::new(),
            config,
            params,
            &shutdown,
            metrics,
        ),
        #[cfg(not(feature = "v4l"))]
        Backend::V4l => {
            error!("Built without Video4Linux support; rebuild with --features v4l or use --backend mock");
            ExitCode::FAILURE
        }
    }
}

fn run<B: CaptureBackend>(
    backend: B,
    config: CaptureConfig,
    params: Box<dyn ParamSource>,
    shutdown: &Shutdown,
    metrics: Option<Arc<MetricsRegistry>>,
) -> ExitCode {
    let session = match CaptureSession::start_with_retry(
        backend,
        config,
        Arc::new(SystemClock),
        params.as_ref(),
        shutdown,
    ) {
        Ok(session) => session,
        Err(OpenError::Interrupted) => {
            info!("Stopped before a device became available");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let (sink, frames) = LatestFrameSink::new();
    let consumer = std::thread::spawn(move || {
        let mut received = 0u64;
        for image in frames {
            received += 1;
            tracing::trace!(
                stamp = %image.header.stamp,
                bytes = image.data.len(),
                "Frame received"
            );
        }
        received
    });

    let mut publish_loop = PublishLoop::new(session, ReconnectSupervisor::new(params), sink);
    if let Some(registry) = metrics {
        publish_loop = publish_loop.with_metrics(registry);
    }
    let stats = publish_loop.run(shutdown);

    match consumer.join() {
        Ok(received) => info!(
            published = stats.frames_published,
            dropped = stats.frames_dropped,
            received,
            "Done"
        ),
        Err(_) => warn!("Frame consumer panicked"),
    }
    ExitCode::SUCCESS
}

#[cfg(feature = "metrics")]
fn start_metrics_server(registry: Option<Arc<MetricsRegistry>>, port: u16) {
    use usbcam_relay::telemetry::{MetricsServer, MetricsServerConfig};

    if let (Some(registry), true) = (registry, port != 0) {
        MetricsServer::new(MetricsServerConfig::with_port(port), registry).spawn();
    }
}

#[cfg(not(feature = "metrics"))]
fn start_metrics_server(_registry: Option<Arc<MetricsRegistry>>, port: u16) {
    if port != 0 {
        tracing::debug!(port, "Metrics endpoint requires the `metrics` feature");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn test_log_filter_honours_rust_log() {
        // One test touches RUST_LOG so nothing races on it.
        std::env::set_var("RUST_LOG", "debug");
        assert_eq!(log_filter().max_level_hint(), Some(LevelFilter::DEBUG));

        std::env::remove_var("RUST_LOG");
        assert_eq!(log_filter().max_level_hint(), Some(LevelFilter::INFO));
    }
}
