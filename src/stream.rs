//! Streaming session: Inactive → Active → Inactive.
//!
//! The loop pulls frames through `pump_frame` (so recording writes and
//! deferred stills ride the stream's own schedule), multiplexes each frame
//! to the client as a multipart chunk, and paces itself to the target
//! frame interval. A hard session ceiling guarantees eventual release of
//! the device even under client or network misbehavior. Every exit branch
//! funnels through the single teardown at the bottom.

use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::capture::pump_frame;
use crate::command::{SessionState, StatusEvent};
use crate::context::AppContext;
use crate::frame::multipart_chunk;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Client dropped the connection
    ClientGone,
    /// Active flag flipped externally (command or gesture)
    Disabled,
    /// Session ceiling reached
    TimeLimit,
    /// Another session already owned the stream slot
    Busy,
}

/// Post-session accounting.
#[derive(Debug, Clone, Copy)]
pub struct StreamSummary {
    pub frames_sent: u64,
    pub frames_skipped: u64,
    pub elapsed: Duration,
    pub reason: StopReason,
}

/// Run one streaming session, writing multipart chunks into `tx` until the
/// client disconnects, the session is disabled, or the ceiling is hit.
pub async fn run_stream(ctx: &AppContext, tx: mpsc::Sender<Bytes>) -> StreamSummary {
    let started = Instant::now();

    if !ctx.state.claim_stream() {
        debug!("stream request refused, session already live");
        return StreamSummary {
            frames_sent: 0,
            frames_skipped: 0,
            elapsed: started.elapsed(),
            reason: StopReason::Busy,
        };
    }

    if !ctx.state.set_stream_enabled(true) {
        ctx.events.emit(StatusEvent::StreamState {
            state: SessionState::Started,
        });
    }
    info!("stream session started");

    let interval = ctx.config.frame_interval();
    let mut slow_frames = 0u32;
    let mut frames_sent = 0u64;
    let mut frames_skipped = 0u64;

    let reason = loop {
        let iter_started = Instant::now();

        // Cooperative cancellation: observe the externally-flippable flag
        // at the top of every iteration.
        if !ctx.state.stream_enabled() {
            break StopReason::Disabled;
        }
        if started.elapsed() >= ctx.config.max_stream_duration {
            break StopReason::TimeLimit;
        }
        if tx.is_closed() {
            break StopReason::ClientGone;
        }

        match pump_frame(ctx).await {
            Ok(Some(frame)) => {
                if tx.send(multipart_chunk(&frame)).await.is_err() {
                    break StopReason::ClientGone;
                }
                frames_sent += 1;
            }
            // Contention or device hiccup: skip the cycle, keep the session
            Ok(None) => frames_skipped += 1,
            Err(e) => {
                warn!(error = %e, "frame cycle failed");
                frames_skipped += 1;
            }
        }

        // Continuity over cadence: slow frames are counted, never fatal
        let busy = iter_started.elapsed();
        if busy > interval * 2 {
            slow_frames += 1;
            if slow_frames >= ctx.config.slow_frame_limit {
                debug!(slow_frames, "sustained slow frames, continuing");
                slow_frames = 0;
            }
        } else {
            slow_frames = 0;
        }

        // Pace to the target rate; clamp to a minimum yield on overrun
        let pause = interval.saturating_sub(busy).max(ctx.config.min_yield);
        tokio::time::sleep(pause).await;
    };

    // Sole teardown path: every exit lands here
    ctx.state.release_stream();
    if ctx.state.set_stream_enabled(false) {
        ctx.events.emit(StatusEvent::StreamState {
            state: SessionState::Stopped,
        });
    }

    let summary = StreamSummary {
        frames_sent,
        frames_skipped,
        elapsed: started.elapsed(),
        reason,
    };
    info!(
        frames = summary.frames_sent,
        skipped = summary.frames_skipped,
        elapsed_secs = summary.elapsed.as_secs_f64(),
        reason = ?summary.reason,
        "stream session ended"
    );
    summary
}
