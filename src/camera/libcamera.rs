//! Real sensor backend: `libcamera-vid` emitting MJPEG on stdout.
//!
//! The child runs continuously; `grab` cuts the next complete JPEG out of
//! the pipe by scanning for SOI/EOI markers. Tuning restarts the child with
//! updated control arguments, since libcamera-vid has no runtime control
//! channel.

use std::collections::HashMap;
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{FrameSource, TuneParam};
use crate::frame::Frame;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Largest buffered scan window before the stream is declared corrupt.
const MAX_PENDING_BYTES: usize = 4 * 1024 * 1024;

/// libcamera-vid invocation parameters.
#[derive(Debug, Clone)]
pub struct LibcameraConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for LibcameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 15,
        }
    }
}

/// Camera device driven by a libcamera-vid child process.
pub struct LibcameraSource {
    config: LibcameraConfig,
    controls: HashMap<TuneParam, i32>,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    pending: Vec<u8>,
}

impl LibcameraSource {
    /// Spawn libcamera-vid and hold its stdout for frame grabs.
    pub fn start(config: LibcameraConfig) -> Result<Self> {
        let mut source = Self {
            config,
            controls: HashMap::new(),
            child: None,
            stdout: None,
            pending: Vec::new(),
        };
        source.respawn()?;
        Ok(source)
    }

    fn respawn(&mut self) -> Result<()> {
        self.stop_child();

        let args = self.build_args();
        info!(
            "Starting libcamera-vid: {}x{} @ {}fps",
            self.config.width, self.config.height, self.config.fps
        );
        debug!("libcamera-vid args: {:?}", args);

        let mut child = Command::new("libcamera-vid")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn libcamera-vid. Is it installed?")?;

        let stdout = child
            .stdout
            .take()
            .context("Failed to capture stdout from libcamera-vid")?;

        self.child = Some(child);
        self.stdout = Some(stdout);
        self.pending.clear();
        Ok(())
    }

    fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            "0".to_string(),
            "--width".to_string(),
            self.config.width.to_string(),
            "--height".to_string(),
            self.config.height.to_string(),
            "--framerate".to_string(),
            self.config.fps.to_string(),
            "--codec".to_string(),
            "mjpeg".to_string(),
            "-o".to_string(),
            "-".to_string(),
            "--flush".to_string(),
            "--nopreview".to_string(),
        ];

        for (param, value) in &self.controls {
            match param {
                // libcamera expects normalized floats for picture controls
                TuneParam::Brightness => {
                    args.push("--brightness".into());
                    args.push(format!("{:.2}", *value as f32 / 100.0));
                }
                TuneParam::Contrast => {
                    args.push("--contrast".into());
                    args.push(format!("{:.2}", 1.0 + *value as f32 / 100.0));
                }
                TuneParam::Saturation => {
                    args.push("--saturation".into());
                    args.push(format!("{:.2}", 1.0 + *value as f32 / 100.0));
                }
                TuneParam::Exposure => {
                    args.push("--ev".into());
                    args.push(value.to_string());
                }
                TuneParam::Gain => {
                    args.push("--gain".into());
                    args.push(value.to_string());
                }
                TuneParam::HMirror => {
                    if *value != 0 {
                        args.push("--hflip".into());
                    }
                }
                TuneParam::VFlip => {
                    if *value != 0 {
                        args.push("--vflip".into());
                    }
                }
            }
        }

        args
    }

    fn stop_child(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl FrameSource for LibcameraSource {
    fn grab(&mut self) -> Result<Frame> {
        let stdout = self
            .stdout
            .as_mut()
            .context("libcamera-vid not running")?;

        // Blocking pipe read; the caller holds the camera mutex from an
        // async context, so hand the read to a blocking-capable thread.
        tokio::task::block_in_place(|| {
            let mut chunk = [0u8; 64 * 1024];
            loop {
                if let Some(payload) = extract_jpeg(&mut self.pending) {
                    return Ok(Frame::new(payload));
                }
                if self.pending.len() > MAX_PENDING_BYTES {
                    self.pending.clear();
                    bail!("no frame boundary within {} bytes", MAX_PENDING_BYTES);
                }
                let n = stdout.read(&mut chunk)?;
                if n == 0 {
                    bail!("libcamera-vid stream ended (EOF)");
                }
                self.pending.extend_from_slice(&chunk[..n]);
            }
        })
    }

    fn tune(&mut self, param: TuneParam, value: i32) -> Result<()> {
        self.controls.insert(param, value);
        if let Err(e) = self.respawn() {
            warn!(error = %e, "failed to restart sensor with new controls");
            return Err(e);
        }
        Ok(())
    }
}

impl Drop for LibcameraSource {
    fn drop(&mut self) {
        self.stop_child();
    }
}

/// Cut the first complete JPEG (SOI..=EOI) out of `buf`, draining everything
/// up to and including it. Returns `None` until a full image is buffered.
fn extract_jpeg(buf: &mut Vec<u8>) -> Option<Bytes> {
    let start = find(buf, &SOI)?;
    let end_rel = find(&buf[start + 2..], &EOI)?;
    let end = start + 2 + end_rel + 2;
    let payload = Bytes::copy_from_slice(&buf[start..end]);
    buf.drain(..end);
    Some(payload)
}

fn find(haystack: &[u8], needle: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == needle)
}
