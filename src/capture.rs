//! The single frame-pull operation and still-capture handling.
//!
//! `pump_frame` is the only code path that takes the camera mutex to pull
//! a frame, and the holder performs every side effect (recording append,
//! deferred still save, thumbnail) before releasing. Both execution
//! contexts (the streaming session and the background recorder) go
//! through it, which is what upholds the one-active-puller invariant.

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::command::StatusEvent;
use crate::context::AppContext;
use crate::frame::Frame;

/// Outcome of a still-capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Frame grabbed and written
    Saved,
    /// A stream is live; the request will ride its next frame
    Deferred,
    /// Camera contended for the whole lock timeout; request stays pending
    Busy,
}

/// Pull one frame, running all due side effects while the device is held.
///
/// Returns `Ok(None)` on lock timeout or device grab failure, both
/// expected, recoverable outcomes the caller skips past.
pub async fn pump_frame(ctx: &AppContext) -> Result<Option<Frame>> {
    let Some(camera) = ctx.camera.as_ref() else {
        return Ok(None);
    };

    let Some(mut guard) = camera.acquire().await else {
        // Contention is normal; skip this cycle
        return Ok(None);
    };

    let frame = match guard.grab() {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "frame grab failed");
            return Ok(None);
        }
    };

    // Side effects run while the device is still held; file latency here is
    // bounded to this single acquisition.
    tokio::task::block_in_place(|| {
        let mut recorder = ctx.recorder.blocking_lock();
        if let Err(e) = recorder.record_frame(&frame) {
            warn!(error = %e, "recording write failed");
        }
        drop(recorder);

        if ctx.state.take_still() {
            match save_still(ctx, &frame) {
                Ok(path) => {
                    info!(path = ?path, "still captured");
                    ctx.gallery.mark_dirty();
                    ctx.events.emit(StatusEvent::RefreshGallery);
                }
                Err(e) => warn!(error = %e, "still save failed"),
            }
        }
    });

    drop(guard);
    Ok(Some(frame))
}

/// Handle a still-capture request.
///
/// While a stream is live the request is only flagged: the streaming
/// session's own next frame services it, avoiding a second contender for
/// the device. Otherwise pump once right here.
pub async fn capture_still(ctx: &AppContext) -> Result<CaptureOutcome> {
    ctx.state.request_still();

    if ctx.state.streaming_active() {
        debug!("stream live, still capture deferred to next streamed frame");
        return Ok(CaptureOutcome::Deferred);
    }

    match pump_frame(ctx).await? {
        Some(_) => Ok(CaptureOutcome::Saved),
        // Flag stays set; the next successful pull services it
        None => Ok(CaptureOutcome::Busy),
    }
}

fn save_still(ctx: &AppContext, frame: &Frame) -> Result<PathBuf> {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let path = ctx.config.storage_root.join(format!("img_{}.jpg", stamp));
    fs::write(&path, &frame.payload)
        .with_context(|| format!("Failed to write still {:?}", path))?;
    Ok(path)
}
