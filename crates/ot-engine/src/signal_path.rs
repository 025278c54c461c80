//! Per-track node frame: input -> chain -> compensation -> fader -> pan.
//!
//! Voices and buffer sources feed the input sum; the pan node feeds
//! whatever the track's output target resolves to (master or a bus
//! track's input).

use ot_ir::{PluginInstance, TrackId};

use crate::chain::EffectChain;
use crate::error::EngineError;
use crate::graph::{AudioGraph, DelayNode, GainNode, NodeKey, NodeKind, PanNode};

/// The graph frame owned by one track.
pub struct TrackPath {
    pub track_id: TrackId,
    input: NodeKey,
    chain: EffectChain,
    compensation: NodeKey,
    fader: NodeKey,
    pan: NodeKey,
}

impl TrackPath {
    /// Build the frame and wire it to `destination`.
    pub fn new(graph: &mut AudioGraph, track_id: TrackId, destination: NodeKey) -> Self {
        let input = graph.add_node(NodeKind::Sum);
        let chain = EffectChain::new(graph);
        let compensation = graph.add_node(NodeKind::Delay(DelayNode::new(0)));
        let fader = graph.add_node(NodeKind::Gain(GainNode::new(0.8)));
        let pan = graph.add_node(NodeKind::Pan(PanNode { pan: 0.0 }));

        graph.connect(input, chain.input());
        graph.connect(chain.output(), compensation);
        graph.connect(compensation, fader);
        graph.connect(fader, pan);
        graph.connect(pan, destination);

        Self { track_id, input, chain, compensation, fader, pan }
    }

    /// Where sources and voices mix in.
    pub fn input(&self) -> NodeKey {
        self.input
    }

    pub fn chain(&self) -> &EffectChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut EffectChain {
        &mut self.chain
    }

    /// Effective fader value currently applied (after mute/solo).
    pub fn fader_value(&self, graph: &AudioGraph) -> f32 {
        graph.gain(self.fader).map_or(0.0, |g| g.value_at(0))
    }

    /// Apply the resolved mix state. `audible` already folds in
    /// mute/solo; an inaudible track hard-gates to zero.
    pub fn apply_mix(&self, graph: &mut AudioGraph, volume: f32, pan: f32, audible: bool) {
        if let Some(g) = graph.gain_mut(self.fader) {
            g.set_value(if audible { volume.clamp(0.0, 1.0) } else { 0.0 });
        }
        if let Some(node) = graph.node_mut(self.pan) {
            if let NodeKind::Pan(p) = &mut node.kind {
                p.pan = pan.clamp(-1.0, 1.0);
            }
        }
    }

    /// Re-point the track's output at a new destination.
    pub fn set_destination(&self, graph: &mut AudioGraph, destination: NodeKey) {
        graph.disconnect_outputs(self.pan);
        graph.connect(self.pan, destination);
    }

    /// Would routing this track into `destination` close a cycle?
    pub fn routing_would_cycle(&self, graph: &AudioGraph, destination: NodeKey) -> bool {
        graph.reaches(destination, self.input)
    }

    /// Latency the chain contributes, in samples.
    pub fn chain_latency(&self) -> u64 {
        self.chain.total_latency()
    }

    /// Current compensation delay, in samples.
    pub fn compensation(&self, graph: &AudioGraph) -> u64 {
        match graph.node(self.compensation).map(|n| &n.kind) {
            Some(NodeKind::Delay(d)) => d.delay_samples,
            _ => 0,
        }
    }

    /// Set the compensation delay. No-op when unchanged, so repeated
    /// recomputes never reallocate the line.
    pub fn set_compensation(&self, graph: &mut AudioGraph, samples: u64) {
        if let Some(node) = graph.node_mut(self.compensation) {
            if let NodeKind::Delay(d) = &mut node.kind {
                if d.delay_samples != samples {
                    d.set_delay(samples);
                }
            }
        }
    }

    /// Add an effect at the end of the chain.
    pub fn add_effect(
        &mut self,
        graph: &mut AudioGraph,
        plugin: &PluginInstance,
        sample_rate: u32,
    ) {
        self.chain.add_effect(graph, plugin, sample_rate);
    }

    /// Remove one effect by plugin id.
    pub fn remove_effect(
        &mut self,
        graph: &mut AudioGraph,
        plugin_id: u32,
    ) -> Result<(), EngineError> {
        self.chain.remove_effect(graph, plugin_id)
    }

    /// Tear down the whole frame.
    pub fn dispose(self, graph: &mut AudioGraph) {
        self.chain.dispose(graph);
        graph.remove_node(self.compensation);
        graph.remove_node(self.fader);
        graph.remove_node(self.pan);
        graph.remove_node(self.input);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ot_ir::EffectKind;

    const SR: u32 = 48_000;

    #[test]
    fn frame_routes_input_to_destination() {
        let mut graph = AudioGraph::new();
        let master = graph.master();
        let path = TrackPath::new(&mut graph, 0, master);
        assert!(graph.reaches(path.input(), master));
    }

    #[test]
    fn inaudible_track_gates_to_zero() {
        let mut graph = AudioGraph::new();
        let master = graph.master();
        let path = TrackPath::new(&mut graph, 0, master);
        path.apply_mix(&mut graph, 0.9, 0.0, false);
        assert_eq!(path.fader_value(&graph), 0.0);
        path.apply_mix(&mut graph, 0.9, 0.0, true);
        assert!((path.fader_value(&graph) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn set_destination_moves_the_single_output_edge() {
        let mut graph = AudioGraph::new();
        let master = graph.master();
        let bus_input = graph.add_node(NodeKind::Sum);
        graph.connect(bus_input, master);
        let path = TrackPath::new(&mut graph, 0, master);
        path.set_destination(&mut graph, bus_input);
        let outs: Vec<_> = graph
            .connections()
            .iter()
            .filter(|c| c.from == path.pan)
            .collect();
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].to, bus_input);
    }

    #[test]
    fn cycle_detection_refuses_self_feed() {
        let mut graph = AudioGraph::new();
        let master = graph.master();
        let a = TrackPath::new(&mut graph, 0, master);
        let b = TrackPath::new(&mut graph, 1, master);
        // a -> b is fine; b -> a would then close a loop.
        assert!(!a.routing_would_cycle(&graph, b.input()));
        a.set_destination(&mut graph, b.input());
        assert!(b.routing_would_cycle(&graph, a.input()));
    }

    #[test]
    fn compensation_set_is_idempotent() {
        let mut graph = AudioGraph::new();
        let master = graph.master();
        let path = TrackPath::new(&mut graph, 0, master);
        path.set_compensation(&mut graph, 128);
        assert_eq!(path.compensation(&graph), 128);
        path.set_compensation(&mut graph, 128);
        assert_eq!(path.compensation(&graph), 128);
    }

    #[test]
    fn chain_latency_flows_from_effects() {
        let mut graph = AudioGraph::new();
        let master = graph.master();
        let mut path = TrackPath::new(&mut graph, 0, master);
        let mut plugin = PluginInstance::new(1, "d", EffectKind::Delay { seconds: 0.01 });
        plugin.latency_samples = 480;
        path.add_effect(&mut graph, &plugin, SR);
        assert_eq!(path.chain_latency(), 480);
    }

    #[test]
    fn dispose_leaves_only_external_nodes() {
        let mut graph = AudioGraph::new();
        let master = graph.master();
        let path = TrackPath::new(&mut graph, 0, master);
        path.dispose(&mut graph);
        assert_eq!(graph.node_count(), 1);
    }
}
