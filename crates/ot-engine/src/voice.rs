//! A voice: the per-note synth subgraph.
//!
//! Each voice is oscillators -> filter -> envelope gain -> track input.
//! The ADSR is expressed as scheduled ramps on the gain node, so the
//! envelope trajectory is exact and inspectable without rendering.

use ot_ir::{SynthPreset, TrackId};

use crate::graph::{AudioGraph, FilterNode, GainNode, NodeKey, NodeKind, OscillatorNode};

/// Stable identifier for a live voice.
pub type VoiceId = u64;

/// Lifecycle of a voice's envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceStage {
    /// Attack, decay, or sustain: the note is held.
    Held,
    /// Release ramp scheduled; the voice retires when it completes.
    Released,
}

/// A live voice and the graph nodes it owns.
#[derive(Debug)]
pub struct Voice {
    pub id: VoiceId,
    pub track_id: TrackId,
    pub note: u8,
    /// Absolute sample at which the voice started. Steal order.
    pub start_time: u64,
    pub stage: VoiceStage,
    oscillators: Vec<NodeKey>,
    filter: NodeKey,
    gain: NodeKey,
    release_seconds: f32,
}

impl Voice {
    /// Build the subgraph for one note and schedule the attack/decay
    /// ramps starting at `now`.
    pub fn spawn(
        graph: &mut AudioGraph,
        preset: &SynthPreset,
        id: VoiceId,
        track_id: TrackId,
        track_input: NodeKey,
        note: u8,
        velocity: u8,
        now: u64,
        sample_rate: u32,
    ) -> Self {
        let env = preset.envelope.clamped();
        let peak = velocity.min(127) as f32 / 127.0;

        let gain = graph.add_node(NodeKind::Gain(GainNode::new(0.0)));
        let filter = graph.add_node(NodeKind::Filter(FilterNode::new(
            preset.filter.clamped_cutoff(),
            preset.filter.clamped_q(),
        )));
        let mut oscillators = Vec::new();
        for osc in preset.enabled_oscillators() {
            let key = graph.add_node(NodeKind::Oscillator(OscillatorNode {
                waveform: osc.waveform,
                frequency: osc.frequency_for_note(note),
                gain: osc.gain.clamp(0.0, 1.0),
                phase: 0.0,
            }));
            graph.connect(key, filter);
            oscillators.push(key);
        }
        graph.connect(filter, gain);
        graph.connect(gain, track_input);

        let attack = seconds_to_samples(env.attack, sample_rate);
        let decay = seconds_to_samples(env.decay, sample_rate);
        if let Some(g) = graph.gain_mut(gain) {
            g.schedule_ramp(now, now + attack, 0.0, peak);
            g.schedule_ramp(now + attack, now + attack + decay, peak, env.sustain * peak);
        }

        Self {
            id,
            track_id,
            note,
            start_time: now,
            stage: VoiceStage::Held,
            oscillators,
            filter,
            gain,
            release_seconds: env.release,
        }
    }

    /// Begin the release ramp at `now`. Returns the absolute sample at
    /// which the voice is done and may be retired. Releasing an
    /// already-released voice keeps the earlier ramp.
    pub fn release(&mut self, graph: &mut AudioGraph, now: u64, sample_rate: u32) -> u64 {
        if self.stage == VoiceStage::Released {
            return now;
        }
        self.stage = VoiceStage::Released;
        let release = seconds_to_samples(self.release_seconds, sample_rate);
        if let Some(g) = graph.gain_mut(self.gain) {
            let current = g.value_at(now);
            g.cancel_after(now);
            g.schedule_ramp(now, now + release, current, 0.0);
        }
        now + release
    }

    /// Remove every node this voice owns. Output stops immediately.
    pub fn retire(&self, graph: &mut AudioGraph) {
        for &osc in &self.oscillators {
            graph.remove_node(osc);
        }
        graph.remove_node(self.filter);
        graph.remove_node(self.gain);
    }

    /// Exact envelope value at an absolute sample time.
    pub fn envelope_value(&self, graph: &AudioGraph, time: u64) -> f32 {
        graph.gain(self.gain).map_or(0.0, |g| g.value_at(time))
    }

    pub fn gain_key(&self) -> NodeKey {
        self.gain
    }

    pub fn oscillator_keys(&self) -> &[NodeKey] {
        &self.oscillators
    }
}

fn seconds_to_samples(seconds: f32, sample_rate: u32) -> u64 {
    (seconds.max(0.0) as f64 * sample_rate as f64).round() as u64
}
