//! Multichannel f32 audio buffer with planar layout.

use alloc::vec;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// A multichannel f32 audio buffer in planar layout.
///
/// Data is stored as `channels` contiguous planes of `frames` samples
/// each. `data[ch * frames + frame]` gives the sample for channel `ch`
/// at `frame`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioBuffer {
    data: Vec<f32>,
    channels: u16,
    frames: usize,
}

impl AudioBuffer {
    /// Create a new silent buffer with the given dimensions.
    pub fn new(channels: u16, frames: usize) -> Self {
        Self {
            data: vec![0.0; channels as usize * frames],
            channels,
            frames,
        }
    }

    /// Build a buffer from decoded per-channel planes.
    /// All planes must have equal length; extra channels beyond the
    /// first plane's length are truncated to match.
    pub fn from_planar(planes: &[Vec<f32>]) -> Self {
        let channels = planes.len() as u16;
        let frames = planes.first().map_or(0, |p| p.len());
        let mut buf = Self::new(channels, frames);
        for (ch, plane) in planes.iter().enumerate() {
            let dst = buf.channel_mut(ch as u16);
            let n = plane.len().min(frames);
            dst[..n].copy_from_slice(&plane[..n]);
        }
        buf
    }

    /// Fill all samples with zero.
    pub fn silence(&mut self) {
        self.data.fill(0.0);
    }

    /// Number of channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Read-only access to one channel's sample data.
    pub fn channel(&self, ch: u16) -> &[f32] {
        let start = ch as usize * self.frames;
        &self.data[start..start + self.frames]
    }

    /// Mutable access to one channel's sample data.
    pub fn channel_mut(&mut self, ch: u16) -> &mut [f32] {
        let start = ch as usize * self.frames;
        let len = self.frames;
        &mut self.data[start..start + len]
    }

    /// Sum overlapping channels from `source` into this buffer.
    pub fn mix_from(&mut self, source: &AudioBuffer) {
        self.mix_from_scaled(source, 1.0);
    }

    /// Sum overlapping channels from `source` into this buffer with gain.
    pub fn mix_from_scaled(&mut self, source: &AudioBuffer, gain: f32) {
        let chs = self.channels.min(source.channels);
        let frs = self.frames.min(source.frames);
        for ch in 0..chs {
            let dst = self.channel_mut(ch);
            let src = source.channel(ch);
            for i in 0..frs {
                dst[i] += src[i] * gain;
            }
        }
    }

    /// Scale all samples by `gain`.
    pub fn apply_gain(&mut self, gain: f32) {
        for s in &mut self.data {
            *s *= gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_silent() {
        let buf = AudioBuffer::new(2, 4);
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.frames(), 4);
        assert!(buf.channel(0).iter().all(|&s| s == 0.0));
        assert!(buf.channel(1).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn from_planar_copies_planes() {
        let buf = AudioBuffer::from_planar(&[vec![0.1, 0.2], vec![0.3, 0.4]]);
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.frames(), 2);
        assert_eq!(buf.channel(0), &[0.1, 0.2]);
        assert_eq!(buf.channel(1), &[0.3, 0.4]);
    }

    #[test]
    fn silence_clears_data() {
        let mut buf = AudioBuffer::new(1, 2);
        buf.channel_mut(0)[0] = 1.0;
        buf.silence();
        assert_eq!(buf.channel(0), &[0.0, 0.0]);
    }

    #[test]
    fn mix_from_sums_channels() {
        let mut dst = AudioBuffer::new(2, 2);
        dst.channel_mut(0)[0] = 0.5;

        let mut src = AudioBuffer::new(2, 2);
        src.channel_mut(0)[0] = 0.3;
        src.channel_mut(1)[1] = 0.7;

        dst.mix_from(&src);
        assert!((dst.channel(0)[0] - 0.8).abs() < 1e-6);
        assert!((dst.channel(1)[1] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn mix_from_scaled_applies_gain() {
        let mut dst = AudioBuffer::new(1, 2);
        let mut src = AudioBuffer::new(1, 2);
        src.channel_mut(0)[0] = 1.0;
        src.channel_mut(0)[1] = -1.0;

        dst.mix_from_scaled(&src, 0.5);
        assert!((dst.channel(0)[0] - 0.5).abs() < 1e-6);
        assert!((dst.channel(0)[1] - -0.5).abs() < 1e-6);
    }

    #[test]
    fn mix_from_mismatched_sizes_uses_minimum() {
        let mut dst = AudioBuffer::new(2, 4);
        let mut src = AudioBuffer::new(1, 2);
        src.channel_mut(0)[0] = 1.0;
        src.channel_mut(0)[1] = 2.0;

        dst.mix_from(&src);
        assert!((dst.channel(0)[0] - 1.0).abs() < 1e-6);
        assert!((dst.channel(0)[1] - 2.0).abs() < 1e-6);
        assert_eq!(dst.channel(0)[2], 0.0);
        assert_eq!(dst.channel(1)[0], 0.0);
    }
}
