//! Look-ahead timeline scheduler.
//!
//! Each tick scans the window `[position, position + block + lookahead)`
//! and emits the timeline events that fall inside it. Per-clip
//! watermarks record how far each clip has been scheduled, so a window
//! that overlaps the previous one never double-fires. Deferred work
//! (note releases, voice retirement, source removal) goes through a
//! min-heap of completions keyed by absolute sample time.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, BTreeMap};

use ot_ir::{Clip, ClipId, ClipPayload, Project, TrackId};

use crate::graph::NodeKey;
use crate::voice::VoiceId;

/// An event the engine must act on at an absolute sample time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimelineEvent {
    NoteOn {
        track_id: TrackId,
        clip_id: ClipId,
        note: u8,
        velocity: u8,
        at: u64,
    },
    NoteOff {
        track_id: TrackId,
        note: u8,
        at: u64,
    },
    AudioStart {
        track_id: TrackId,
        clip_id: ClipId,
        at: u64,
        /// Trim into the payload, in timeline samples.
        offset: u64,
        /// Playback length, in timeline samples.
        duration: u64,
    },
}

impl TimelineEvent {
    pub fn at(&self) -> u64 {
        match *self {
            TimelineEvent::NoteOn { at, .. }
            | TimelineEvent::NoteOff { at, .. }
            | TimelineEvent::AudioStart { at, .. } => at,
        }
    }
}

/// Deferred action attached to a completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionAction {
    /// Start the release ramp of voices playing this note.
    ReleaseNote { track_id: TrackId, note: u8 },
    /// A released voice's envelope has reached zero.
    RetireVoice(VoiceId),
    /// A buffer source has played out.
    RemoveSource(NodeKey),
}

/// A scheduled piece of deferred work. Ordered by time, then by
/// insertion sequence so same-sample completions run FIFO.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Completion {
    pub at: u64,
    seq: u64,
    pub action: CompletionAction,
}

impl Ord for Completion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

impl PartialOrd for Completion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The look-ahead scheduler.
pub struct Scheduler {
    /// Extra scheduling horizon beyond the current block, in samples.
    lookahead: u64,
    /// Absolute sample up to which each clip has been scheduled.
    watermarks: BTreeMap<ClipId, u64>,
    completions: BinaryHeap<Reverse<Completion>>,
    seq: u64,
}

impl Scheduler {
    pub fn new(lookahead: u64) -> Self {
        Self {
            lookahead,
            watermarks: BTreeMap::new(),
            completions: BinaryHeap::new(),
            seq: 0,
        }
    }

    pub fn lookahead(&self) -> u64 {
        self.lookahead
    }

    pub fn pending_completions(&self) -> usize {
        self.completions.len()
    }

    /// Forget all scheduling progress and deferred work. Called on
    /// seek, stop, and loop wrap; the caller silences live voices and
    /// sources itself.
    pub fn rewind(&mut self) {
        self.watermarks.clear();
        self.completions.clear();
    }

    /// Forget one clip's progress (clip removed or moved).
    pub fn forget_clip(&mut self, clip_id: ClipId) {
        self.watermarks.remove(&clip_id);
    }

    /// Queue a deferred action.
    pub fn defer(&mut self, at: u64, action: CompletionAction) {
        let completion = Completion { at, seq: self.seq, action };
        self.seq += 1;
        self.completions.push(Reverse(completion));
    }

    /// Pop every completion due at or before `now`, in (time, FIFO)
    /// order.
    pub fn pop_due(&mut self, now: u64) -> Vec<Completion> {
        let mut due = Vec::new();
        while let Some(Reverse(head)) = self.completions.peek() {
            if head.at > now {
                break;
            }
            if let Some(Reverse(completion)) = self.completions.pop() {
                due.push(completion);
            }
        }
        due
    }

    /// Collect the events for one tick. `position` is the playhead at
    /// block start; events are returned sorted by time, with project
    /// track order breaking ties.
    pub fn tick(
        &mut self,
        project: &Project,
        position: u64,
        block: u64,
        sample_rate: u32,
    ) -> Vec<TimelineEvent> {
        let horizon = position + block + self.lookahead;
        let mut events = Vec::new();

        for track in &project.tracks {
            for clip in &track.clips {
                let lo = self
                    .watermarks
                    .get(&clip.id)
                    .copied()
                    .unwrap_or(0)
                    .max(position);
                if lo >= horizon {
                    continue;
                }
                match &clip.payload {
                    ClipPayload::Midi(notes) => {
                        schedule_midi(clip, notes, lo, horizon, sample_rate, &mut events);
                    }
                    ClipPayload::Audio(_) => {
                        schedule_audio(clip, lo, horizon, sample_rate, &mut events);
                    }
                }
                self.watermarks.insert(clip.id, horizon);
            }
        }

        events.sort_by_key(|e| e.at());
        events
    }
}

fn to_samples(seconds: f64, sample_rate: u32) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * sample_rate as f64).round() as u64
    } else {
        0
    }
}

fn schedule_midi(
    clip: &Clip,
    notes: &[ot_ir::MidiNote],
    lo: u64,
    horizon: u64,
    sample_rate: u32,
    events: &mut Vec<TimelineEvent>,
) {
    let clip_start = to_samples(clip.start_time, sample_rate);
    let clip_end = to_samples(clip.end_time(), sample_rate);
    for note in notes {
        let at = clip_start + to_samples(note.start, sample_rate);
        if at < lo || at >= horizon || at >= clip_end {
            continue;
        }
        events.push(TimelineEvent::NoteOn {
            track_id: clip.track_id,
            clip_id: clip.id,
            note: note.note,
            velocity: note.velocity,
            at,
        });
        // Notes never ring past their clip.
        let off = (at + to_samples(note.duration, sample_rate)).min(clip_end);
        events.push(TimelineEvent::NoteOff { track_id: clip.track_id, note: note.note, at: off });
    }
}

fn schedule_audio(
    clip: &Clip,
    lo: u64,
    horizon: u64,
    sample_rate: u32,
    events: &mut Vec<TimelineEvent>,
) {
    let clip_start = to_samples(clip.start_time, sample_rate);
    let clip_end = to_samples(clip.end_time(), sample_rate);
    // Starting mid-clip (seek landed inside it) trims the front.
    let at = clip_start.max(lo);
    if at >= horizon || at >= clip_end {
        return;
    }
    let skip = at - clip_start;
    events.push(TimelineEvent::AudioStart {
        track_id: clip.track_id,
        clip_id: clip.id,
        at,
        offset: to_samples(clip.offset, sample_rate) + skip,
        duration: clip_end - at,
    });
}
