//! Tracks: the per-lane unit of the timeline.

use alloc::vec::Vec;
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};

use crate::automation::AutomationCurve;
use crate::clip::Clip;
use crate::plugin::ChainSpec;
use crate::preset::SynthPreset;

/// Identifier for a track. Unique within a project; never reused.
pub type TrackId = u32;

/// What kind of material a track carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackKind {
    #[default]
    Audio,
    Midi,
    /// Submix bus; other tracks can route into it.
    Bus,
}

/// Where a track's output goes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputTarget {
    #[default]
    Master,
    Bus(TrackId),
}

/// A track owns its clips, its effect chain, and its mix settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: ArrayString<32>,
    pub kind: TrackKind,
    /// Fader level in [0,1].
    pub volume: f32,
    /// Stereo pan in [-1,1], 0 = center.
    pub pan: f32,
    pub muted: bool,
    pub solo: bool,
    pub output: OutputTarget,
    pub chain: ChainSpec,
    pub clips: Vec<Clip>,
    /// Synth preset for MIDI tracks.
    pub preset: Option<SynthPreset>,
    /// Fader automation, if any.
    pub volume_automation: Option<AutomationCurve>,
    /// Pan automation, if any.
    pub pan_automation: Option<AutomationCurve>,
}

impl Track {
    /// Create a track with default mix settings.
    pub fn new(id: TrackId, name: &str, kind: TrackKind) -> Self {
        // Over-long names keep their leading chars; a wholesale
        // try_push_str would drop the name entirely.
        let mut track_name = ArrayString::new();
        for ch in name.chars() {
            if track_name.try_push(ch).is_err() {
                break;
            }
        }
        Self {
            id,
            name: track_name,
            kind,
            volume: 0.8,
            pan: 0.0,
            muted: false,
            solo: false,
            output: OutputTarget::Master,
            chain: ChainSpec::default(),
            clips: Vec::new(),
            preset: if kind == TrackKind::Midi {
                Some(SynthPreset::default())
            } else {
                None
            },
            volume_automation: None,
            pan_automation: None,
        }
    }

    /// Set the fader level, clamped to [0,1].
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { self.volume };
    }

    /// Set the pan position, clamped to [-1,1].
    pub fn set_pan(&mut self, pan: f32) {
        self.pan = if pan.is_finite() { pan.clamp(-1.0, 1.0) } else { self.pan };
    }
}

/// Mute/solo resolution: a track is audible iff it is not muted and
/// either no track is soloed or this one is.
pub fn is_audible(track: &Track, any_solo: bool) -> bool {
    !track.muted && (!any_solo || track.solo)
}
