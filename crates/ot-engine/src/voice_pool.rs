//! Polyphonic voice allocation with oldest-first stealing.

use ot_ir::{SynthPreset, TrackId};

use crate::graph::{AudioGraph, NodeKey};
use crate::voice::{Voice, VoiceId, VoiceStage};

/// Owns every live voice across all tracks.
pub struct VoicePool {
    voices: Vec<Voice>,
    next_id: VoiceId,
}

impl VoicePool {
    pub fn new() -> Self {
        Self { voices: Vec::new(), next_id: 0 }
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn voice(&self, id: VoiceId) -> Option<&Voice> {
        self.voices.iter().find(|v| v.id == id)
    }

    fn live_on_track(&self, track_id: TrackId) -> usize {
        self.voices.iter().filter(|v| v.track_id == track_id).count()
    }

    /// Oldest voice on a track: smallest start time, then smallest id
    /// for voices started in the same block.
    fn steal_candidate(&self, track_id: TrackId) -> Option<VoiceId> {
        self.voices
            .iter()
            .filter(|v| v.track_id == track_id)
            .min_by_key(|v| (v.start_time, v.id))
            .map(|v| v.id)
    }

    /// Start a voice. When the track is at its polyphony cap the
    /// oldest voice is stolen: its nodes are removed immediately, so
    /// the new voice never pushes the count past the cap.
    #[allow(clippy::too_many_arguments)]
    pub fn note_on(
        &mut self,
        graph: &mut AudioGraph,
        preset: &SynthPreset,
        track_id: TrackId,
        track_input: NodeKey,
        note: u8,
        velocity: u8,
        now: u64,
        sample_rate: u32,
    ) -> VoiceId {
        let cap = preset.polyphony.max(1);
        while self.live_on_track(track_id) >= cap {
            match self.steal_candidate(track_id) {
                Some(id) => self.retire(graph, id),
                None => break,
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        let voice = Voice::spawn(
            graph, preset, id, track_id, track_input, note, velocity, now, sample_rate,
        );
        self.voices.push(voice);
        id
    }

    /// Release every held voice playing `note` on `track_id`. Returns
    /// `(voice, retire_at)` pairs for deferred cleanup.
    pub fn note_off(
        &mut self,
        graph: &mut AudioGraph,
        track_id: TrackId,
        note: u8,
        now: u64,
        sample_rate: u32,
    ) -> Vec<(VoiceId, u64)> {
        let mut released = Vec::new();
        for voice in &mut self.voices {
            if voice.track_id == track_id && voice.note == note && voice.stage == VoiceStage::Held
            {
                let done = voice.release(graph, now, sample_rate);
                released.push((voice.id, done));
            }
        }
        released
    }

    /// Release every held voice (transport stop). Returns retire pairs.
    pub fn release_all(
        &mut self,
        graph: &mut AudioGraph,
        now: u64,
        sample_rate: u32,
    ) -> Vec<(VoiceId, u64)> {
        let mut released = Vec::new();
        for voice in &mut self.voices {
            if voice.stage == VoiceStage::Held {
                let done = voice.release(graph, now, sample_rate);
                released.push((voice.id, done));
            }
        }
        released
    }

    /// Remove a voice and its subgraph. Unknown ids are ignored (the
    /// voice may already have been stolen).
    pub fn retire(&mut self, graph: &mut AudioGraph, id: VoiceId) {
        if let Some(idx) = self.voices.iter().position(|v| v.id == id) {
            let voice = self.voices.swap_remove(idx);
            voice.retire(graph);
        }
    }

    /// Remove every voice immediately (engine teardown).
    pub fn clear(&mut self, graph: &mut AudioGraph) {
        for voice in self.voices.drain(..) {
            voice.retire(graph);
        }
    }
}

impl Default for VoicePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;
    use ot_ir::SynthPreset;

    const SR: u32 = 48_000;

    struct Fixture {
        graph: AudioGraph,
        pool: VoicePool,
        input: NodeKey,
        preset: SynthPreset,
    }

    fn fixture(polyphony: usize) -> Fixture {
        let mut graph = AudioGraph::new();
        let input = graph.add_node(NodeKind::Sum);
        graph.connect(input, graph.master());
        let preset = SynthPreset { polyphony, ..SynthPreset::default() };
        Fixture { graph, pool: VoicePool::new(), input, preset }
    }

    impl Fixture {
        fn note_on(&mut self, note: u8, now: u64) -> VoiceId {
            self.pool.note_on(
                &mut self.graph,
                &self.preset,
                0,
                self.input,
                note,
                100,
                now,
                SR,
            )
        }
    }

    #[test]
    fn pool_grows_until_cap() {
        let mut f = fixture(4);
        for i in 0..4 {
            f.note_on(60 + i, i as u64 * 100);
        }
        assert_eq!(f.pool.len(), 4);
    }

    #[test]
    fn steal_takes_oldest_voice() {
        let mut f = fixture(2);
        let first = f.note_on(60, 0);
        let second = f.note_on(61, 100);
        let third = f.note_on(62, 200);
        assert_eq!(f.pool.len(), 2);
        assert!(f.pool.voice(first).is_none());
        assert!(f.pool.voice(second).is_some());
        assert!(f.pool.voice(third).is_some());
    }

    #[test]
    fn steal_tie_breaks_on_voice_id() {
        let mut f = fixture(2);
        // Two voices started in the same block.
        let first = f.note_on(60, 0);
        let second = f.note_on(61, 0);
        f.note_on(62, 100);
        assert!(f.pool.voice(first).is_none());
        assert!(f.pool.voice(second).is_some());
    }

    #[test]
    fn stolen_voice_nodes_leave_the_graph() {
        let mut f = fixture(1);
        let first = f.note_on(60, 0);
        let gain = f.pool.voice(first).map(|v| v.gain_key());
        f.note_on(61, 100);
        assert!(!f.graph.contains(gain.unwrap()));
    }

    #[test]
    fn note_off_releases_matching_held_voices_only() {
        let mut f = fixture(8);
        f.note_on(60, 0);
        f.note_on(62, 0);
        let released = f
            .pool
            .note_off(&mut f.graph, 0, 60, 1000, SR);
        assert_eq!(released.len(), 1);
        // Releasing again is a no-op; the voice is no longer held.
        let again = f.pool.note_off(&mut f.graph, 0, 60, 2000, SR);
        assert!(again.is_empty());
    }

    #[test]
    fn retire_unknown_id_is_ignored() {
        let mut f = fixture(4);
        f.pool.retire(&mut f.graph, 999);
        assert!(f.pool.is_empty());
    }

    #[test]
    fn release_all_covers_every_held_voice() {
        let mut f = fixture(8);
        f.note_on(60, 0);
        f.note_on(61, 0);
        f.note_on(62, 0);
        let released = f.pool.release_all(&mut f.graph, 500, SR);
        assert_eq!(released.len(), 3);
    }

    #[test]
    fn clear_empties_pool_and_graph() {
        let mut f = fixture(8);
        f.note_on(60, 0);
        f.note_on(61, 0);
        let before = f.graph.node_count();
        assert!(before > 2);
        f.pool.clear(&mut f.graph);
        assert!(f.pool.is_empty());
        // Only master and the track input remain.
        assert_eq!(f.graph.node_count(), 2);
    }

    #[test]
    fn per_track_caps_are_independent() {
        let mut f = fixture(1);
        f.note_on(60, 0);
        // Same cap, different track: no steal.
        let preset = f.preset.clone();
        f.pool.note_on(&mut f.graph, &preset, 1, f.input, 60, 100, 0, SR);
        assert_eq!(f.pool.len(), 2);
    }
}
