//! Recording session: Idle → Active → Idle, plus the background recorder
//! task.
//!
//! Frames are appended with the same multipart framing the live stream
//! uses, so a stored recording plays back as a multipart stream verbatim.
//! The first frame of a session doubles as the thumbnail (best-effort).

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::capture::pump_frame;
use crate::command::{EventHub, SessionState, StatusEvent};
use crate::context::AppContext;
use crate::frame::{multipart_chunk, Frame};
use crate::gallery::{Gallery, SIDECAR_SUFFIX, THUMB_PREFIX};
use crate::state::DeviceState;

/// Idle sleep while the recorder has nothing to do or is stepping aside
/// for an active stream.
const IDLE_POLL: std::time::Duration = std::time::Duration::from_millis(100);

/// Recorder settings split out of the main config.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub root: PathBuf,
    pub fps: u32,
    pub flush_every: u32,
}

/// One in-progress video capture.
struct RecordingSession {
    writer: BufWriter<File>,
    path: PathBuf,
    thumb_path: PathBuf,
    frame_count: u64,
    started: Instant,
    thumbnail_saved: bool,
}

/// Owner of the at-most-one recording session.
pub struct Recorder {
    cfg: RecorderConfig,
    session: Option<RecordingSession>,
}

impl Recorder {
    pub fn new(cfg: RecorderConfig) -> Self {
        Self { cfg, session: None }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn frame_count(&self) -> u64 {
        self.session.as_ref().map(|s| s.frame_count).unwrap_or(0)
    }

    /// Open a new output target. No-op if a session is already active.
    pub fn start(&mut self, state: &DeviceState, events: &EventHub) -> Result<()> {
        if self.session.is_some() {
            debug!("record start ignored, session already active");
            return Ok(());
        }

        let stamp = unix_millis();
        let path = self.cfg.root.join(format!("vid_{}.mjpg", stamp));
        let thumb_path = self
            .cfg
            .root
            .join(format!("{}vid_{}.jpg", THUMB_PREFIX, stamp));

        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open recording target {:?}", path))?;

        info!(path = ?path, "recording started");
        self.session = Some(RecordingSession {
            writer: BufWriter::new(file),
            path,
            thumb_path,
            frame_count: 0,
            started: Instant::now(),
            thumbnail_saved: false,
        });
        state.set_recording(true);
        events.emit(StatusEvent::RecordingStatus {
            state: SessionState::Started,
        });
        Ok(())
    }

    /// Append one frame. No-op if not recording.
    pub fn record_frame(&mut self, frame: &Frame) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        // First frame of the session doubles as the thumbnail. One attempt;
        // a failed write never aborts the session.
        if !session.thumbnail_saved {
            session.thumbnail_saved = true;
            if let Err(e) = fs::write(&session.thumb_path, &frame.payload) {
                warn!(error = %e, "thumbnail write failed");
            }
        }

        session.writer.write_all(&multipart_chunk(frame))?;
        session.frame_count += 1;

        // Bounded loss on power interruption
        if session.frame_count % self.cfg.flush_every as u64 == 0 {
            session.writer.flush()?;
        }
        Ok(())
    }

    /// Flush, close and finalize the session. No-op if not recording.
    /// Returns the persisted duration in seconds when a session ended.
    pub fn stop(
        &mut self,
        state: &DeviceState,
        gallery: &Gallery,
        events: &EventHub,
    ) -> Result<Option<u64>> {
        let Some(mut session) = self.session.take() else {
            debug!("record stop ignored, no active session");
            return Ok(None);
        };

        state.set_recording(false);

        let duration_secs = session.frame_count / self.cfg.fps.max(1) as u64;

        if let Err(e) = session.writer.flush() {
            warn!(error = %e, "recording flush failed");
        }
        match session.writer.into_inner() {
            Ok(file) => {
                if let Err(e) = file.sync_data() {
                    warn!(error = %e, "recording sync failed");
                }
            }
            Err(e) => warn!(error = %e, "recording close failed"),
        }

        // Duration sidecar is written synchronously before we report stop
        let sidecar = PathBuf::from({
            let mut s = session.path.as_os_str().to_owned();
            s.push(SIDECAR_SUFFIX);
            s
        });
        if let Err(e) = fs::write(
            &sidecar,
            serde_json::json!({ "duration_secs": duration_secs }).to_string(),
        ) {
            warn!(error = %e, "duration sidecar write failed");
        }

        gallery.mark_dirty();

        info!(
            path = ?session.path,
            frames = session.frame_count,
            duration_secs,
            elapsed_secs = session.started.elapsed().as_secs(),
            "recording stopped"
        );
        events.emit(StatusEvent::RecordingStatus {
            state: SessionState::Stopped,
        });
        Ok(Some(duration_secs))
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Background recorder loop: the second, lower-priority execution context.
///
/// Pulls frames at a fixed pace while recording is active and no stream is
/// live; when a stream is active it steps aside, because the streaming
/// session performs the recording write on its own schedule.
pub async fn run_recorder_task(ctx: Arc<AppContext>) {
    info!("recorder task started");
    loop {
        if ctx.state.recording_active() && !ctx.state.streaming_active() {
            if let Err(e) = pump_frame(&ctx).await {
                warn!(error = %e, "recorder frame cycle failed");
            }
            tokio::time::sleep(ctx.config.record_interval).await;
        } else {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;

    fn test_recorder(root: &std::path::Path, fps: u32) -> Recorder {
        Recorder::new(RecorderConfig {
            root: root.to_path_buf(),
            fps,
            flush_every: 20,
        })
    }

    fn frame(tag: u8) -> Frame {
        Frame::new(Bytes::from(vec![0xFF, 0xD8, tag, 0xFF, 0xD9]))
    }

    fn fixtures() -> (DeviceState, EventHub) {
        (DeviceState::new(), EventHub::new(8))
    }

    #[test]
    fn start_is_idempotent() {
        let dir = tempdir().unwrap();
        let (state, events) = fixtures();
        let mut rec = test_recorder(dir.path(), 15);

        rec.start(&state, &events).unwrap();
        let first = std::fs::read_dir(dir.path()).unwrap().count();
        rec.start(&state, &events).unwrap(); // no-op
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), first);
        assert!(rec.is_active());
    }

    #[test]
    fn stop_without_session_is_noop() {
        let dir = tempdir().unwrap();
        let (state, events) = fixtures();
        let gallery = Gallery::new(dir.path().to_path_buf());
        let mut rec = test_recorder(dir.path(), 15);

        assert_eq!(rec.stop(&state, &gallery, &events).unwrap(), None);
        assert!(!state.recording_active());
    }

    #[test]
    fn duration_is_floor_of_frames_over_fps() {
        let dir = tempdir().unwrap();
        let (state, events) = fixtures();
        let gallery = Gallery::new(dir.path().to_path_buf());
        let mut rec = test_recorder(dir.path(), 15);

        rec.start(&state, &events).unwrap();
        for i in 0..47 {
            rec.record_frame(&frame(i as u8)).unwrap();
        }
        let duration = rec.stop(&state, &gallery, &events).unwrap();
        assert_eq!(duration, Some(3)); // 47 / 15 truncates
    }

    #[test]
    fn sidecar_and_thumbnail_are_persisted() {
        let dir = tempdir().unwrap();
        let (state, events) = fixtures();
        let gallery = Gallery::new(dir.path().to_path_buf());
        let mut rec = test_recorder(dir.path(), 10);

        rec.start(&state, &events).unwrap();
        for i in 0..25 {
            rec.record_frame(&frame(i)).unwrap();
        }
        rec.stop(&state, &gallery, &events).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();

        let video = names.iter().find(|n| n.ends_with(".mjpg")).unwrap();
        assert!(names.iter().any(|n| n.starts_with(THUMB_PREFIX)));
        let sidecar = names
            .iter()
            .find(|n| n.ends_with(SIDECAR_SUFFIX))
            .expect("sidecar written");
        assert!(sidecar.starts_with(video.as_str()));

        let raw = std::fs::read_to_string(dir.path().join(sidecar)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["duration_secs"], 2); // 25 / 10 truncates
    }

    #[test]
    fn recorded_file_uses_multipart_framing() {
        let dir = tempdir().unwrap();
        let (state, events) = fixtures();
        let gallery = Gallery::new(dir.path().to_path_buf());
        let mut rec = test_recorder(dir.path(), 15);

        rec.start(&state, &events).unwrap();
        rec.record_frame(&frame(1)).unwrap();
        rec.record_frame(&frame(2)).unwrap();
        rec.stop(&state, &gallery, &events).unwrap();

        let video = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .find(|e| e.file_name().to_string_lossy().ends_with(".mjpg"))
            .unwrap();
        let contents = std::fs::read(video.path()).unwrap();
        let text = String::from_utf8_lossy(&contents);
        assert_eq!(text.matches("--frame\r\n").count(), 2);
        assert_eq!(text.matches("Content-Length: 5").count(), 2);
    }

    #[test]
    fn record_frame_while_idle_is_noop() {
        let dir = tempdir().unwrap();
        let mut rec = test_recorder(dir.path(), 15);
        rec.record_frame(&frame(1)).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn lifecycle_emits_status_events() {
        let dir = tempdir().unwrap();
        let (state, events) = fixtures();
        let gallery = Gallery::new(dir.path().to_path_buf());
        let mut rx = events.subscribe();
        let mut rec = test_recorder(dir.path(), 15);

        rec.start(&state, &events).unwrap();
        rec.stop(&state, &gallery, &events).unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            StatusEvent::RecordingStatus {
                state: SessionState::Started
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            StatusEvent::RecordingStatus {
                state: SessionState::Stopped
            }
        );
    }

    #[tokio::test]
    async fn stop_marks_gallery_dirty() {
        let dir = tempdir().unwrap();
        let (state, events) = fixtures();
        let gallery = Gallery::new(dir.path().to_path_buf());
        let mut rec = test_recorder(dir.path(), 15);

        // Prime the cache while storage is empty
        assert!(gallery.listing().await.items.is_empty());

        rec.start(&state, &events).unwrap();
        rec.record_frame(&frame(1)).unwrap();
        rec.stop(&state, &gallery, &events).unwrap();

        // Stop invalidated the cache; the new video shows up
        assert_eq!(gallery.listing().await.items.len(), 1);
    }
}
