//! Pre-decoded import payloads.
//!
//! Decoding happens outside this workspace; collaborators hand us raw
//! planar samples or note lists, which are validated and converted to
//! clip payloads here.

use ot_ir::{AudioBuffer, AudioClip, ClipPayload, MidiNote};

use crate::error::SessionError;

/// Decoded audio handed over by an importer.
#[derive(Clone, Debug)]
pub struct ImportedAudio {
    pub sample_rate: u32,
    /// One plane per channel; all planes must be equally long.
    pub planes: Vec<Vec<f32>>,
}

impl ImportedAudio {
    /// Validate and convert to an audio clip payload.
    pub fn into_clip(self) -> Result<AudioClip, SessionError> {
        if self.sample_rate == 0 {
            return Err(SessionError::MalformedPayload(String::from("zero sample rate")));
        }
        if self.planes.is_empty() || self.planes[0].is_empty() {
            return Err(SessionError::MalformedPayload(String::from("no sample data")));
        }
        let frames = self.planes[0].len();
        if self.planes.iter().any(|p| p.len() != frames) {
            return Err(SessionError::MalformedPayload(String::from(
                "channel planes differ in length",
            )));
        }
        Ok(AudioClip {
            sample_rate: self.sample_rate,
            buffer: AudioBuffer::from_planar(&self.planes),
        })
    }
}

/// One note from a MIDI importer.
#[derive(Clone, Copy, Debug)]
pub struct ImportedNote {
    pub note: u8,
    pub velocity: u8,
    /// Offset from clip start in seconds.
    pub start: f64,
    pub duration: f64,
}

/// Convert an imported note list to a MIDI payload. Notes with
/// non-positive duration or out-of-range pitch are dropped with a
/// warning; order is normalized by start time.
pub fn notes_payload(notes: &[ImportedNote]) -> ClipPayload {
    let mut converted: Vec<MidiNote> = notes
        .iter()
        .filter(|n| {
            let ok = n.note <= 127 && n.duration > 0.0 && n.start >= 0.0;
            if !ok {
                log::warn!("dropping malformed note {} at {}", n.note, n.start);
            }
            ok
        })
        .map(|n| MidiNote {
            note: n.note,
            velocity: n.velocity.min(127),
            start: n.start,
            duration: n.duration,
        })
        .collect();
    converted.sort_by(|a, b| a.start.total_cmp(&b.start));
    ClipPayload::Midi(converted)
}
