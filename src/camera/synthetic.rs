//! Synthetic frame source for development and tests without hardware.

use anyhow::Result;
use bytes::Bytes;

use super::{FrameSource, TuneParam};
use crate::frame::Frame;

/// Generates deterministic JPEG-shaped frames: SOI marker, a counter,
/// pattern padding, EOI marker.
pub struct SyntheticSource {
    frame_size: usize,
    counter: u32,
    /// Last tuning applied, for assertions
    pub last_tune: Option<(TuneParam, i32)>,
}

impl SyntheticSource {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size: frame_size.max(8),
            counter: 0,
            last_tune: None,
        }
    }

    pub fn frames_grabbed(&self) -> u32 {
        self.counter
    }
}

impl FrameSource for SyntheticSource {
    fn grab(&mut self) -> Result<Frame> {
        let mut data = Vec::with_capacity(self.frame_size);
        data.extend_from_slice(&[0xFF, 0xD8]);
        data.extend_from_slice(&self.counter.to_be_bytes());
        while data.len() < self.frame_size - 2 {
            data.push((self.counter & 0xFF) as u8);
        }
        data.extend_from_slice(&[0xFF, 0xD9]);

        self.counter = self.counter.wrapping_add(1);
        Ok(Frame::new(Bytes::from(data)))
    }

    fn tune(&mut self, param: TuneParam, value: i32) -> Result<()> {
        self.last_tune = Some((param, value));
        Ok(())
    }
}
