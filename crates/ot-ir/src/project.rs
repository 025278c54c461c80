//! The serializable project tree.

use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::track::{Track, TrackId};

/// A complete project: everything the engine needs to reproduce a
/// session. Track order is significant and preserved on round-trip.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Session tempo in beats per minute.
    pub bpm: f64,
    pub tracks: Vec<Track>,
}

impl Project {
    /// Create an empty project at the given tempo.
    pub fn new(id: &str, name: &str, bpm: f64) -> Self {
        Self {
            id: String::from(id),
            name: String::from(name),
            bpm: if bpm.is_finite() && bpm > 0.0 { bpm } else { 120.0 },
            tracks: Vec::new(),
        }
    }

    /// Look up a track by id.
    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// Highest track id in use, for allocating the next one.
    pub fn max_track_id(&self) -> Option<TrackId> {
        self.tracks.iter().map(|t| t.id).max()
    }

    /// Highest clip id in use across all tracks.
    pub fn max_clip_id(&self) -> Option<u32> {
        self.tracks
            .iter()
            .flat_map(|t| t.clips.iter().map(|c| c.id))
            .max()
    }
}
