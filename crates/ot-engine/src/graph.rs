//! Runtime audio graph.
//!
//! Nodes live in a generational arena, so a stale key can never reach
//! another node's slot after removal — dangling connections are
//! unrepresentable. All mutation happens on the control context; the
//! renderer only walks the current topology.

use std::sync::Arc;

use ot_ir::{AudioClip, ClipId, Waveform};
use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Generational key for a graph node.
    pub struct NodeKey;
}

/// A directed edge between two nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Connection {
    pub from: NodeKey,
    pub to: NodeKey,
}

/// A node in the audio graph.
#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
}

/// What a node does with its gathered input.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// Terminal mix point; the engine reads its output.
    Master,
    /// Plain summing junction (track inputs, chain endpoints, buses).
    Sum,
    Gain(GainNode),
    Pan(PanNode),
    Oscillator(OscillatorNode),
    Filter(FilterNode),
    Delay(DelayNode),
    BufferSource(BufferSourceNode),
}

/// A scheduled linear gain ramp in absolute sample time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ramp {
    pub start: u64,
    pub end: u64,
    pub from: f32,
    pub to: f32,
}

/// Gain stage with an optional lane of scheduled linear ramps.
///
/// Ramps are kept sorted by start time and non-overlapping; between
/// ramps the value holds at the previous ramp's target. This models
/// `linearRampToValueAtTime`-style envelope scheduling explicitly.
#[derive(Clone, Debug)]
pub struct GainNode {
    /// Value before the first ramp (and when no ramps exist).
    pub base: f32,
    ramps: Vec<Ramp>,
}

impl GainNode {
    pub fn new(base: f32) -> Self {
        Self { base, ramps: Vec::new() }
    }

    /// Set the static value and drop all scheduled ramps.
    pub fn set_value(&mut self, value: f32) {
        self.base = if value.is_finite() { value.max(0.0) } else { self.base };
        self.ramps.clear();
    }

    /// Append a ramp. Start times must be scheduled in order; a ramp
    /// starting before the previous one ends truncates it.
    pub fn schedule_ramp(&mut self, start: u64, end: u64, from: f32, to: f32) {
        let (from, to) = (sanitize(from), sanitize(to));
        if let Some(last) = self.ramps.last_mut() {
            if last.end > start {
                last.to = ramp_value(last, start);
                last.end = start;
            }
        }
        let end = end.max(start);
        self.ramps.push(Ramp { start, end, from, to });
    }

    /// Remove all scheduled ramps at or after `time`; a ramp spanning
    /// `time` is cut short at its current value.
    pub fn cancel_after(&mut self, time: u64) {
        self.ramps.retain(|r| r.start < time);
        if let Some(last) = self.ramps.last_mut() {
            if last.end > time {
                last.to = ramp_value(last, time);
                last.end = time;
            }
        }
    }

    /// Exact gain value at an absolute sample time.
    pub fn value_at(&self, time: u64) -> f32 {
        // Last ramp starting at or before `time`.
        let idx = self.ramps.partition_point(|r| r.start <= time);
        if idx == 0 {
            return self.base;
        }
        ramp_value(&self.ramps[idx - 1], time)
    }

    /// Scheduled ramps (for inspection in tests).
    pub fn ramps(&self) -> &[Ramp] {
        &self.ramps
    }
}

fn ramp_value(ramp: &Ramp, time: u64) -> f32 {
    if time >= ramp.end {
        return ramp.to;
    }
    if time <= ramp.start || ramp.end == ramp.start {
        return ramp.from;
    }
    let t = (time - ramp.start) as f32 / (ramp.end - ramp.start) as f32;
    ramp.from + (ramp.to - ramp.from) * t
}

fn sanitize(v: f32) -> f32 {
    if v.is_finite() {
        v.max(0.0)
    } else {
        0.0
    }
}

/// Equal-power stereo panner.
#[derive(Clone, Copy, Debug)]
pub struct PanNode {
    /// Pan position in [-1,1].
    pub pan: f32,
}

/// Free-running oscillator; output is gated by the voice's gain node.
#[derive(Clone, Debug)]
pub struct OscillatorNode {
    pub waveform: Waveform,
    /// Frequency in Hz, already clamped by the preset.
    pub frequency: f32,
    pub gain: f32,
    /// Normalized phase in [0,1).
    pub phase: f32,
}

/// State-variable low-pass filter (TPT topology).
#[derive(Clone, Debug)]
pub struct FilterNode {
    pub cutoff_hz: f32,
    pub q: f32,
    /// Per-channel integrator state: [ic1eq, ic2eq].
    pub state: [[f32; 2]; 2],
}

impl FilterNode {
    pub fn new(cutoff_hz: f32, q: f32) -> Self {
        Self { cutoff_hz, q, state: [[0.0; 2]; 2] }
    }
}

/// Fixed delay line used for plugin delay compensation.
#[derive(Clone, Debug)]
pub struct DelayNode {
    pub delay_samples: u64,
    pub(crate) lines: [Vec<f32>; 2],
    pub(crate) write_pos: usize,
}

impl DelayNode {
    pub fn new(delay_samples: u64) -> Self {
        let mut node = Self { delay_samples: 0, lines: [Vec::new(), Vec::new()], write_pos: 0 };
        node.set_delay(delay_samples);
        node
    }

    /// Resize the delay. Reallocates, so control-context only.
    pub fn set_delay(&mut self, delay_samples: u64) {
        self.delay_samples = delay_samples;
        let len = delay_samples as usize;
        for line in &mut self.lines {
            line.clear();
            line.resize(len, 0.0);
        }
        self.write_pos = 0;
    }
}

/// Plays a slice of decoded audio at a scheduled timeline position.
#[derive(Clone, Debug)]
pub struct BufferSourceNode {
    pub clip_id: ClipId,
    pub audio: Arc<AudioClip>,
    /// Absolute timeline sample at which playback begins.
    pub start_sample: u64,
    /// Trim into the payload, in payload frames.
    pub offset_frames: u64,
    /// How many engine-rate frames to play.
    pub duration_frames: u64,
    /// Cancelled sources render silence and are reaped.
    pub cancelled: bool,
}

impl BufferSourceNode {
    /// Whether playback has fully elapsed at `time`.
    pub fn finished_at(&self, time: u64) -> bool {
        self.cancelled || time >= self.start_sample + self.duration_frames
    }
}

/// The audio processing graph.
pub struct AudioGraph {
    pub(crate) nodes: SlotMap<NodeKey, Node>,
    pub(crate) connections: Vec<Connection>,
    master: NodeKey,
    /// Bumped on every topology change; the renderer rebuilds its
    /// traversal order when it observes a new version.
    version: u64,
}

impl AudioGraph {
    /// Create a graph containing only the master node.
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let master = nodes.insert(Node { kind: NodeKind::Master });
        Self { nodes, connections: Vec::new(), master, version: 0 }
    }

    /// The terminal master node.
    pub fn master(&self) -> NodeKey {
        self.master
    }

    /// Current topology version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Add a node and return its key.
    pub fn add_node(&mut self, kind: NodeKind) -> NodeKey {
        self.version += 1;
        self.nodes.insert(Node { kind })
    }

    /// Connect two live nodes. Connecting a dead key is a no-op;
    /// duplicate edges are not added.
    pub fn connect(&mut self, from: NodeKey, to: NodeKey) {
        if !self.nodes.contains_key(from) || !self.nodes.contains_key(to) {
            return;
        }
        let edge = Connection { from, to };
        if !self.connections.contains(&edge) {
            self.connections.push(edge);
            self.version += 1;
        }
    }

    /// Remove a specific edge.
    pub fn disconnect(&mut self, from: NodeKey, to: NodeKey) {
        let before = self.connections.len();
        self.connections.retain(|c| !(c.from == from && c.to == to));
        if self.connections.len() != before {
            self.version += 1;
        }
    }

    /// Remove every outgoing edge of a node.
    pub fn disconnect_outputs(&mut self, node: NodeKey) {
        let before = self.connections.len();
        self.connections.retain(|c| c.from != node);
        if self.connections.len() != before {
            self.version += 1;
        }
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, node: NodeKey) {
        if self.nodes.remove(node).is_some() {
            self.connections.retain(|c| c.from != node && c.to != node);
            self.version += 1;
        }
    }

    /// Whether a key still refers to a live node.
    pub fn contains(&self, node: NodeKey) -> bool {
        self.nodes.contains_key(node)
    }

    /// Whether `to` is reachable from `from` along existing edges.
    /// Used to refuse routing changes that would close a cycle.
    pub fn reaches(&self, from: NodeKey, to: NodeKey) -> bool {
        if from == to {
            return true;
        }
        let mut stack = vec![from];
        let mut seen = vec![from];
        while let Some(node) = stack.pop() {
            for conn in self.connections.iter().filter(|c| c.from == node) {
                if conn.to == to {
                    return true;
                }
                if !seen.contains(&conn.to) {
                    seen.push(conn.to);
                    stack.push(conn.to);
                }
            }
        }
        false
    }

    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    /// All edges, for structural audits.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Convenience: mutable access to a gain node's lane.
    pub fn gain_mut(&mut self, key: NodeKey) -> Option<&mut GainNode> {
        match self.nodes.get_mut(key).map(|n| &mut n.kind) {
            Some(NodeKind::Gain(g)) => Some(g),
            _ => None,
        }
    }

    /// Convenience: read access to a gain node's lane.
    pub fn gain(&self, key: NodeKey) -> Option<&GainNode> {
        match self.nodes.get(key).map(|n| &n.kind) {
            Some(NodeKind::Gain(g)) => Some(g),
            _ => None,
        }
    }
}

impl Default for AudioGraph {
    fn default() -> Self {
        Self::new()
    }
}
