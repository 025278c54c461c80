//! Per-track effect chain runtime.
//!
//! The chain owns a fixed frame of nodes — input, wet gain, dry gain,
//! output — plus one subgraph per effect. Any mutation (add, remove,
//! reorder, bypass) triggers a full rewire of the chain-level edges.
//! Composite effects keep their internal edges across rebuilds because
//! those edges originate from nodes the rebuild never disconnects.

use ot_ir::{EffectKind, PluginId, PluginInstance};

use crate::error::EngineError;
use crate::graph::{AudioGraph, DelayNode, FilterNode, GainNode, NodeKey, NodeKind};

/// Graph endpoints of one effect.
#[derive(Clone, Copy, Debug)]
enum Endpoints {
    /// A single node: input and output coincide.
    Simple(NodeKey),
    /// A subgraph entered at `input` and left at `output`.
    Composite { input: NodeKey, output: NodeKey },
}

impl Endpoints {
    fn input(&self) -> NodeKey {
        match *self {
            Endpoints::Simple(key) => key,
            Endpoints::Composite { input, .. } => input,
        }
    }

    fn output(&self) -> NodeKey {
        match *self {
            Endpoints::Simple(key) => key,
            Endpoints::Composite { output, .. } => output,
        }
    }
}

/// One live effect in the chain.
struct ChainEffect {
    plugin_id: PluginId,
    bypassed: bool,
    latency_samples: u64,
    endpoints: Endpoints,
    /// Every node the effect owns, for removal.
    owned: Vec<NodeKey>,
}

/// A track's effect chain, wired into the graph.
pub struct EffectChain {
    input: NodeKey,
    output: NodeKey,
    wet: NodeKey,
    dry: NodeKey,
    effects: Vec<ChainEffect>,
}

impl EffectChain {
    /// Build an empty chain. Callers wire `input()` and `output()`
    /// into the surrounding signal path.
    pub fn new(graph: &mut AudioGraph) -> Self {
        let input = graph.add_node(NodeKind::Sum);
        let output = graph.add_node(NodeKind::Sum);
        let wet = graph.add_node(NodeKind::Gain(GainNode::new(1.0)));
        let dry = graph.add_node(NodeKind::Gain(GainNode::new(0.0)));
        let chain = Self { input, output, wet, dry, effects: Vec::new() };
        chain.rebuild(graph);
        chain
    }

    pub fn input(&self) -> NodeKey {
        self.input
    }

    pub fn output(&self) -> NodeKey {
        self.output
    }

    /// Number of effects, bypassed included.
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Plugin ids in processing order.
    pub fn order(&self) -> Vec<PluginId> {
        self.effects.iter().map(|e| e.plugin_id).collect()
    }

    /// Total latency of non-bypassed effects, in samples.
    pub fn total_latency(&self) -> u64 {
        self.effects
            .iter()
            .filter(|e| !e.bypassed)
            .map(|e| e.latency_samples)
            .sum()
    }

    /// Instantiate a plugin at the end of the chain.
    pub fn add_effect(
        &mut self,
        graph: &mut AudioGraph,
        plugin: &PluginInstance,
        sample_rate: u32,
    ) {
        let (endpoints, owned) = build_effect(graph, plugin, sample_rate);
        self.effects.push(ChainEffect {
            plugin_id: plugin.id,
            bypassed: plugin.bypassed,
            latency_samples: plugin.latency_samples,
            endpoints,
            owned,
        });
        self.rebuild(graph);
    }

    /// Remove an effect and its nodes.
    pub fn remove_effect(
        &mut self,
        graph: &mut AudioGraph,
        plugin_id: PluginId,
    ) -> Result<(), EngineError> {
        let idx = self.index_of(plugin_id)?;
        let effect = self.effects.remove(idx);
        for key in effect.owned {
            graph.remove_node(key);
        }
        self.rebuild(graph);
        Ok(())
    }

    /// Move an effect to a new position. `to` clamps to the chain end.
    pub fn move_effect(
        &mut self,
        graph: &mut AudioGraph,
        plugin_id: PluginId,
        to: usize,
    ) -> Result<(), EngineError> {
        let from = self.index_of(plugin_id)?;
        let effect = self.effects.remove(from);
        let to = to.min(self.effects.len());
        self.effects.insert(to, effect);
        self.rebuild(graph);
        Ok(())
    }

    /// Bypass or re-engage an effect. Bypassed effects are wired
    /// around, not through.
    pub fn set_bypassed(
        &mut self,
        graph: &mut AudioGraph,
        plugin_id: PluginId,
        bypassed: bool,
    ) -> Result<(), EngineError> {
        let idx = self.index_of(plugin_id)?;
        if self.effects[idx].bypassed != bypassed {
            self.effects[idx].bypassed = bypassed;
            self.rebuild(graph);
        }
        Ok(())
    }

    /// Drop every effect and fall back to a unity dry path.
    pub fn clear(&mut self, graph: &mut AudioGraph) {
        for effect in self.effects.drain(..) {
            for key in effect.owned {
                graph.remove_node(key);
            }
        }
        self.set_wet_dry(graph, 0.0, 1.0);
        self.rebuild(graph);
    }

    /// Set the chain-level wet/dry mix.
    pub fn set_wet_dry(&self, graph: &mut AudioGraph, wet: f32, dry: f32) {
        if let Some(g) = graph.gain_mut(self.wet) {
            g.set_value(wet.clamp(0.0, 1.0));
        }
        if let Some(g) = graph.gain_mut(self.dry) {
            g.set_value(dry.clamp(0.0, 1.0));
        }
    }

    /// Remove the chain's own nodes (track deletion).
    pub fn dispose(mut self, graph: &mut AudioGraph) {
        self.clear(graph);
        graph.remove_node(self.wet);
        graph.remove_node(self.dry);
        graph.remove_node(self.input);
        graph.remove_node(self.output);
    }

    fn index_of(&self, plugin_id: PluginId) -> Result<usize, EngineError> {
        self.effects
            .iter()
            .position(|e| e.plugin_id == plugin_id)
            .ok_or(EngineError::NotFound("effect"))
    }

    /// Rewire all chain-level edges from scratch.
    ///
    /// Only edges that originate from the chain frame (input, wet,
    /// dry) or from an effect's output endpoint are dropped; composite
    /// internals hang off each effect's input endpoint and survive.
    fn rebuild(&self, graph: &mut AudioGraph) {
        graph.disconnect_outputs(self.input);
        graph.disconnect_outputs(self.wet);
        graph.disconnect_outputs(self.dry);
        for effect in &self.effects {
            graph.disconnect_outputs(effect.endpoints.output());
        }

        let mut prev = self.input;
        for effect in self.effects.iter().filter(|e| !e.bypassed) {
            graph.connect(prev, effect.endpoints.input());
            prev = effect.endpoints.output();
        }
        graph.connect(prev, self.wet);
        graph.connect(self.wet, self.output);
        graph.connect(self.input, self.dry);
        graph.connect(self.dry, self.output);
    }
}

/// Build the node subgraph for one plugin.
fn build_effect(
    graph: &mut AudioGraph,
    plugin: &PluginInstance,
    sample_rate: u32,
) -> (Endpoints, Vec<NodeKey>) {
    match plugin.kind {
        EffectKind::Gain => {
            let level = plugin.parameters.get(&0).copied().unwrap_or(1.0);
            let key = graph.add_node(NodeKind::Gain(GainNode::new(level.clamp(0.0, 4.0))));
            (Endpoints::Simple(key), vec![key])
        }
        EffectKind::LowPass { cutoff_hz } => {
            let key = graph.add_node(NodeKind::Filter(FilterNode::new(cutoff_hz, 0.707)));
            (Endpoints::Simple(key), vec![key])
        }
        EffectKind::Delay { seconds } => {
            // Composite: input splits into a delayed path and a direct
            // path that meet at the output sum.
            let samples = (seconds.max(0.0) as f64 * sample_rate as f64).round() as u64;
            let input = graph.add_node(NodeKind::Sum);
            let delay = graph.add_node(NodeKind::Delay(DelayNode::new(samples)));
            let output = graph.add_node(NodeKind::Sum);
            graph.connect(input, delay);
            graph.connect(delay, output);
            graph.connect(input, output);
            (Endpoints::Composite { input, output }, vec![input, delay, output])
        }
    }
}
