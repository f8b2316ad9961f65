//! Foreground control loop: command dispatch, gesture polling, connection
//! supervision.
//!
//! This task stays scheduled alongside an active streaming session, so
//! user input and administrative commands are never starved while a
//! stream is open.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::camera::TuneParam;
use crate::capture::capture_still;
use crate::command::{Command, SessionState, StatusEvent};
use crate::context::AppContext;
use crate::gesture::{GestureAction, GestureDetector};
use crate::link::{LinkControl, LinkSupervisor};

/// Gesture/command poll cadence.
const CONTROL_POLL: Duration = Duration::from_millis(20);

/// Raw touch level source. `None` when a sample is unavailable.
pub trait TouchProbe: Send {
    fn read(&mut self) -> Option<u16>;
}

/// Reads a raw level from a sysfs-style file (one integer per read).
pub struct SysfsTouchProbe {
    path: PathBuf,
}

impl SysfsTouchProbe {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl TouchProbe for SysfsTouchProbe {
    fn read(&mut self) -> Option<u16> {
        std::fs::read_to_string(&self.path)
            .ok()?
            .trim()
            .parse()
            .ok()
    }
}

/// Apply one command to the device. Malformed commands never reach this
/// point; unknown tuning parameter names are dropped here.
pub async fn dispatch(ctx: &Arc<AppContext>, cmd: Command) {
    debug!(?cmd, "dispatching command");
    match cmd {
        Command::StreamStart => enable_stream(ctx),
        Command::StreamStop => disable_stream(ctx),
        Command::StreamToggle => {
            if ctx.state.stream_enabled() {
                disable_stream(ctx);
            } else {
                enable_stream(ctx);
            }
        }
        Command::Capture => match capture_still(ctx).await {
            Ok(outcome) => debug!(?outcome, "capture handled"),
            Err(e) => warn!(error = %e, "capture failed"),
        },
        Command::RecordStart => {
            let mut recorder = ctx.recorder.lock().await;
            if let Err(e) = recorder.start(&ctx.state, &ctx.events) {
                warn!(error = %e, "record start failed");
            }
        }
        Command::RecordStop => {
            let mut recorder = ctx.recorder.lock().await;
            if let Err(e) = recorder.stop(&ctx.state, &ctx.gallery, &ctx.events) {
                warn!(error = %e, "record stop failed");
            }
        }
        Command::Delete { name } => {
            if let Err(e) = ctx.gallery.delete(&name) {
                warn!(%name, error = %e, "delete failed");
            }
            ctx.events.emit(StatusEvent::RefreshGallery);
        }
        Command::Setting { param, value } => match TuneParam::from_name(&param) {
            Some(param) => {
                if let Some(camera) = ctx.camera.as_ref() {
                    match camera.tune(param, value).await {
                        Ok(true) => info!(?param, value, "setting applied"),
                        Ok(false) => debug!(?param, "camera busy, setting dropped"),
                        Err(e) => warn!(?param, error = %e, "setting failed"),
                    }
                }
            }
            None => debug!(%param, "unknown setting ignored"),
        },
    }
}

/// Map a resolved gesture to its bound command.
pub async fn dispatch_gesture(ctx: &Arc<AppContext>, action: GestureAction) {
    info!(?action, "gesture resolved");
    let cmd = match action {
        GestureAction::Capture => Command::Capture,
        GestureAction::ToggleStreaming => Command::StreamToggle,
        GestureAction::ToggleRecording => {
            if ctx.state.recording_active() {
                Command::RecordStop
            } else {
                Command::RecordStart
            }
        }
    };
    dispatch(ctx, cmd).await;
}

fn enable_stream(ctx: &AppContext) {
    if !ctx.state.set_stream_enabled(true) {
        ctx.events.emit(StatusEvent::StreamState {
            state: SessionState::Started,
        });
    }
}

fn disable_stream(ctx: &AppContext) {
    if ctx.state.set_stream_enabled(false) {
        ctx.events.emit(StatusEvent::StreamState {
            state: SessionState::Stopped,
        });
    }
}

/// Run the cooperative foreground loop until the process exits.
pub async fn run_control_loop<L, P>(
    ctx: Arc<AppContext>,
    mut commands: mpsc::Receiver<Command>,
    mut supervisor: LinkSupervisor<L>,
    mut probe: Option<P>,
    mut detector: GestureDetector,
) where
    L: LinkControl,
    P: TouchProbe,
{
    info!("control loop started");
    let mut ticker = tokio::time::interval(CONTROL_POLL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let now = Instant::now();

        if let Some(probe) = probe.as_mut() {
            if let Some(level) = probe.read() {
                if let Some(action) = detector.poll(level, now) {
                    dispatch_gesture(&ctx, action).await;
                }
            }
        }

        supervisor.tick(now, ctx.state.any_session_active());
        ctx.state.set_link_up(supervisor.is_connected());

        while let Ok(cmd) = commands.try_recv() {
            dispatch(&ctx, cmd).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraHandle, SyntheticSource};
    use crate::config::Config;
    use tempfile::tempdir;

    fn test_ctx(root: &std::path::Path) -> Arc<AppContext> {
        let mut config = Config::default();
        config.storage_root = root.to_path_buf();
        config.lock_timeout = Duration::from_millis(20);
        let camera = CameraHandle::new(Box::new(SyntheticSource::new(64)), config.lock_timeout);
        Arc::new(AppContext::new(config, Some(camera)))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn record_commands_drive_the_session() {
        let dir = tempdir().unwrap();
        let ctx = test_ctx(dir.path());

        dispatch(&ctx, Command::RecordStart).await;
        assert!(ctx.state.recording_active());
        dispatch(&ctx, Command::RecordStart).await; // no-op
        assert!(ctx.state.recording_active());

        dispatch(&ctx, Command::RecordStop).await;
        assert!(!ctx.state.recording_active());
        dispatch(&ctx, Command::RecordStop).await; // no-op
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stream_toggle_flips_intent_and_emits_transitions() {
        let dir = tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let mut events = ctx.events.subscribe();

        dispatch(&ctx, Command::StreamToggle).await;
        assert!(ctx.state.stream_enabled());
        dispatch(&ctx, Command::StreamStart).await; // already enabled: no event
        dispatch(&ctx, Command::StreamToggle).await;
        assert!(!ctx.state.stream_enabled());

        assert_eq!(
            events.recv().await.unwrap(),
            StatusEvent::StreamState {
                state: SessionState::Started
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            StatusEvent::StreamState {
                state: SessionState::Stopped
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn gesture_record_toggle_respects_current_state() {
        let dir = tempdir().unwrap();
        let ctx = test_ctx(dir.path());

        dispatch_gesture(&ctx, GestureAction::ToggleRecording).await;
        assert!(ctx.state.recording_active());
        dispatch_gesture(&ctx, GestureAction::ToggleRecording).await;
        assert!(!ctx.state.recording_active());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_setting_is_ignored() {
        let dir = tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        dispatch(
            &ctx,
            Command::Setting {
                param: "sharpness_boost".into(),
                value: 9,
            },
        )
        .await;
        // Nothing to assert beyond "did not panic / did not error out":
        // unknown parameters are silent no-ops by contract.
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_command_invalidates_gallery() {
        let dir = tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        std::fs::write(dir.path().join("img_1.jpg"), b"photo").unwrap();

        assert_eq!(ctx.gallery.listing().await.items.len(), 1);
        dispatch(
            &ctx,
            Command::Delete {
                name: "img_1.jpg".into(),
            },
        )
        .await;
        assert!(ctx.gallery.listing().await.items.is_empty());
    }
}
