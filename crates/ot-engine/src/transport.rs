//! Transport: the sample-accurate playhead.
//!
//! Position is kept in samples (u64) so repeated advancement never
//! accumulates floating-point drift. Seconds appear only at the API
//! boundary.

/// An enabled loop region, stored in samples. `end` is exclusive and
/// always greater than `start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopRegion {
    pub start: u64,
    pub end: u64,
}

/// Playback state machine: stopped <-> playing, with pause keeping the
/// position and stop rewinding it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// What happened during an `advance` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Advance {
    /// Position before the step.
    pub from: u64,
    /// Position after the step (post-wrap).
    pub to: u64,
    /// Set when the step crossed the loop end and wrapped.
    pub wrapped: bool,
}

/// The engine transport.
#[derive(Clone, Debug)]
pub struct Transport {
    sample_rate: u32,
    position: u64,
    state: TransportState,
    looping: Option<LoopRegion>,
    recording: bool,
    time_signature: (u8, u8),
}

impl Transport {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            position: 0,
            state: TransportState::Stopped,
            looping: None,
            recording: false,
            time_signature: (4, 4),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current playhead position in samples.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Current playhead position in seconds.
    pub fn position_seconds(&self) -> f64 {
        self.position as f64 / self.sample_rate as f64
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    pub fn loop_region(&self) -> Option<LoopRegion> {
        self.looping
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Arm or disarm recording. The flag is orthogonal to the state
    /// machine but can only be armed while playing; stop disarms it.
    pub fn set_recording(&mut self, recording: bool) {
        if recording && self.state != TransportState::Playing {
            return;
        }
        self.recording = recording;
    }

    pub fn time_signature(&self) -> (u8, u8) {
        self.time_signature
    }

    /// Set the session time signature. Zero beats or units clamp to 1.
    pub fn set_time_signature(&mut self, beats: u8, unit: u8) {
        self.time_signature = (beats.max(1), unit.max(1));
    }

    /// Convert a time in seconds to samples, clamping negatives.
    pub fn seconds_to_samples(&self, seconds: f64) -> u64 {
        if seconds.is_finite() && seconds > 0.0 {
            (seconds * self.sample_rate as f64).round() as u64
        } else {
            0
        }
    }

    pub fn play(&mut self) {
        self.state = TransportState::Playing;
    }

    /// Pause in place: the position is retained.
    pub fn pause(&mut self) {
        if self.state == TransportState::Playing {
            self.state = TransportState::Paused;
        }
    }

    /// Stop and rewind to zero. Disarms recording.
    pub fn stop(&mut self) {
        self.state = TransportState::Stopped;
        self.position = 0;
        self.recording = false;
    }

    /// Jump to an absolute position in seconds. Works in any state.
    pub fn seek_seconds(&mut self, seconds: f64) {
        self.position = self.seconds_to_samples(seconds);
    }

    /// Jump to an absolute position in samples.
    pub fn seek(&mut self, position: u64) {
        self.position = position;
    }

    /// Enable looping over [start, end) in seconds. A region with
    /// `end <= start` (or non-finite bounds) disables looping.
    pub fn set_loop_seconds(&mut self, start: f64, end: f64) {
        let start = self.seconds_to_samples(start);
        let end = self.seconds_to_samples(end);
        self.looping = if end > start {
            Some(LoopRegion { start, end })
        } else {
            None
        };
    }

    pub fn clear_loop(&mut self) {
        self.looping = None;
    }

    /// Advance the playhead by one block. Does nothing unless playing.
    ///
    /// When an enabled loop region's end falls inside the step, the
    /// overshoot carries past the loop start so no time is lost:
    /// `new = start + (new - end)`.
    pub fn advance(&mut self, frames: u64) -> Advance {
        let from = self.position;
        if self.state != TransportState::Playing {
            return Advance { from, to: from, wrapped: false };
        }
        let mut to = from + frames;
        let mut wrapped = false;
        if let Some(region) = self.looping {
            // Only wrap when the playhead was inside the region; a
            // seek past the loop end plays straight through.
            if from < region.end && to >= region.end {
                to = region.start + (to - region.end);
                wrapped = true;
            }
        }
        self.position = to;
        Advance { from, to, wrapped }
    }
}
