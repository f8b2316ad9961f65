//! Hotaru device binary.
//!
//! ## Usage
//!
//! ```bash
//! # Real sensor (libcamera)
//! hotaru
//!
//! # Synthetic frames for development (requires the test-source feature)
//! hotaru --test-source
//! ```
//!
//! Configuration comes from `HOTARU_*` environment variables; see
//! `config.rs` for the full set.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info};

use hotaru::camera::{CameraHandle, FrameSource, LibcameraConfig, LibcameraSource};
use hotaru::command::Command;
use hotaru::config::Config;
use hotaru::context::AppContext;
use hotaru::control::{run_control_loop, SysfsTouchProbe};
use hotaru::gesture::{GestureConfig, GestureDetector};
use hotaru::link::{LinkSupervisor, NetLink, SupervisorConfig};
use hotaru::record::run_recorder_task;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hotaru=info".parse().context("bad log directive")?),
        )
        .init();

    let config = Config::from_env()?;

    info!("Hotaru starting");
    info!("  Bind: {}", config.bind);
    info!("  Storage: {:?}", config.storage_root);
    info!(
        "  Video: {}x{} @ {}fps",
        config.width, config.height, config.target_fps
    );
    info!("  Test source: {}", config.test_source);

    std::fs::create_dir_all(&config.storage_root)
        .with_context(|| format!("Failed to create storage root {:?}", config.storage_root))?;

    // Camera init failure is reported and leaves capture/record/stream
    // unavailable for this run; everything else keeps serving.
    let camera = match build_source(&config) {
        Ok(source) => Some(CameraHandle::new(source, config.lock_timeout)),
        Err(e) => {
            error!(error = %e, "camera init failed; capture, recording and streaming disabled");
            None
        }
    };
    let camera_present = camera.is_some();

    let ctx = Arc::new(AppContext::new(config.clone(), camera));
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(32);

    // Background context: the recorder loop
    if camera_present {
        tokio::spawn(run_recorder_task(ctx.clone()));
    }

    // Foreground context: gestures, supervision, command dispatch
    let supervisor = LinkSupervisor::new(
        NetLink::new(
            config.wifi_interface.clone(),
            config.service_name.clone(),
            config.bind.port(),
        ),
        SupervisorConfig {
            check_interval: config.link_check_interval,
            retry_ceiling: config.link_retry_ceiling,
        },
    );
    let detector = GestureDetector::new(GestureConfig {
        threshold: config.touch_threshold,
        long_hold: config.long_hold,
        quiet_window: config.quiet_window,
    });
    let probe = config.touch_device.clone().map(SysfsTouchProbe::new);
    tokio::spawn(run_control_loop(
        ctx.clone(),
        cmd_rx,
        supervisor,
        probe,
        detector,
    ));

    hotaru::web::serve(ctx, cmd_tx, config.ui_path.clone()).await
}

fn build_source(config: &Config) -> Result<Box<dyn FrameSource>> {
    if config.test_source {
        #[cfg(feature = "test-source")]
        {
            info!("Starting synthetic frame source");
            return Ok(Box::new(hotaru::camera::SyntheticSource::new(24 * 1024)));
        }
        #[cfg(not(feature = "test-source"))]
        {
            anyhow::bail!("Test source not enabled. Rebuild with --features test-source");
        }
    }

    let source = LibcameraSource::start(LibcameraConfig {
        width: config.width,
        height: config.height,
        fps: config.target_fps,
    })?;
    Ok(Box::new(source))
}
