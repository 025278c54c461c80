//! Clips: positioned regions of audio or MIDI on a track.

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::buffer::AudioBuffer;
use crate::track::TrackId;

/// Identifier for a clip. Unique within a project.
pub type ClipId = u32;

/// A single MIDI note inside a MIDI clip.
///
/// `start` is relative to the clip's own start, in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MidiNote {
    /// MIDI note number (0-127).
    pub note: u8,
    /// MIDI velocity (0-127).
    pub velocity: u8,
    /// Offset from clip start in seconds.
    pub start: f64,
    /// Note length in seconds.
    pub duration: f64,
}

/// Decoded audio payload for an audio clip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioClip {
    /// Native sample rate of the decoded data.
    pub sample_rate: u32,
    /// Planar sample data.
    pub buffer: AudioBuffer,
}

impl AudioClip {
    /// Duration of the decoded data in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.buffer.frames() as f64 / self.sample_rate as f64
    }
}

/// What a clip contains.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClipPayload {
    Audio(AudioClip),
    Midi(Vec<MidiNote>),
}

/// A clip placed on a track's timeline.
///
/// `track_id` is a non-owning back reference — tracks own their clips,
/// and the id is only a lookup key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: ClipId,
    pub track_id: TrackId,
    /// Timeline start in seconds.
    pub start_time: f64,
    /// Playable length in seconds. Negative input clamps to 0.
    pub duration: f64,
    /// Trim offset into the payload, in seconds.
    pub offset: f64,
    pub payload: ClipPayload,
}

impl Clip {
    /// Create a clip, clamping negative times to zero.
    pub fn new(
        id: ClipId,
        track_id: TrackId,
        start_time: f64,
        duration: f64,
        payload: ClipPayload,
    ) -> Self {
        Self {
            id,
            track_id,
            start_time: start_time.max(0.0),
            duration: duration.max(0.0),
            offset: 0.0,
            payload,
        }
    }

    /// Timeline end in seconds (exclusive).
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Whether `[start_time, end_time)` intersects `[from, to)`.
    pub fn intersects(&self, from: f64, to: f64) -> bool {
        self.start_time < to && self.end_time() > from
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn midi_clip(start: f64, duration: f64) -> Clip {
        Clip::new(1, 0, start, duration, ClipPayload::Midi(Vec::new()))
    }

    #[test]
    fn negative_times_clamp_to_zero() {
        let clip = midi_clip(-1.0, -2.0);
        assert_eq!(clip.start_time, 0.0);
        assert_eq!(clip.duration, 0.0);
    }

    #[test]
    fn intersects_half_open_interval() {
        let clip = midi_clip(1.0, 2.0); // [1, 3)
        assert!(clip.intersects(0.0, 1.5));
        assert!(clip.intersects(2.9, 4.0));
        assert!(!clip.intersects(3.0, 4.0)); // end is exclusive
        assert!(!clip.intersects(0.0, 1.0)); // start not yet reached
    }

    #[test]
    fn audio_clip_duration_from_frames() {
        let clip = AudioClip {
            sample_rate: 100,
            buffer: AudioBuffer::new(2, 250),
        };
        assert!((clip.duration() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn audio_clip_zero_rate_is_zero_duration() {
        let clip = AudioClip { sample_rate: 0, buffer: AudioBuffer::new(1, 10) };
        assert_eq!(clip.duration(), 0.0);
    }
}
