//! Shared device flags.
//!
//! Each flag is written by exactly one owner at a time and read elsewhere;
//! the still-pending and dirty-style flags are set from multiple call sites
//! but only ever set true, and cleared by the single consumer, so no
//! ordering subtleties arise. Plain atomics, no locks.

use std::sync::atomic::{AtomicBool, Ordering};

/// Flags shared between the foreground control task, the streaming session
/// and the background recorder.
#[derive(Debug, Default)]
pub struct DeviceState {
    /// Streaming intent: toggled by commands and the long-hold gesture.
    stream_enabled: AtomicBool,
    /// Streaming session liveness: owned by the session loop.
    streaming_active: AtomicBool,
    /// Recording session liveness: owned by the recorder.
    recording_active: AtomicBool,
    /// A still capture is waiting to be serviced by the next frame pull.
    still_pending: AtomicBool,
    /// Last observed link state, published by the connection supervisor.
    link_up: AtomicBool,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream_enabled(&self) -> bool {
        self.stream_enabled.load(Ordering::SeqCst)
    }

    /// Set the streaming intent bit; returns the previous value so callers
    /// can emit transition events exactly once.
    pub fn set_stream_enabled(&self, on: bool) -> bool {
        self.stream_enabled.swap(on, Ordering::SeqCst)
    }

    pub fn streaming_active(&self) -> bool {
        self.streaming_active.load(Ordering::SeqCst)
    }

    /// Claim the single streaming session slot. Returns false if a session
    /// is already live.
    pub fn claim_stream(&self) -> bool {
        !self.streaming_active.swap(true, Ordering::SeqCst)
    }

    pub fn release_stream(&self) {
        self.streaming_active.store(false, Ordering::SeqCst);
    }

    pub fn recording_active(&self) -> bool {
        self.recording_active.load(Ordering::SeqCst)
    }

    pub fn set_recording(&self, on: bool) {
        self.recording_active.store(on, Ordering::SeqCst);
    }

    /// True while either session is live. The connection supervisor uses
    /// this to withhold disruptive reconnects.
    pub fn any_session_active(&self) -> bool {
        self.streaming_active() || self.recording_active()
    }

    pub fn request_still(&self) {
        self.still_pending.store(true, Ordering::SeqCst);
    }

    pub fn still_pending(&self) -> bool {
        self.still_pending.load(Ordering::SeqCst)
    }

    /// Consume the pending still request, if any.
    pub fn take_still(&self) -> bool {
        self.still_pending.swap(false, Ordering::SeqCst)
    }

    pub fn link_up(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }

    pub fn set_link_up(&self, up: bool) {
        self.link_up.store(up, Ordering::SeqCst);
    }
}
