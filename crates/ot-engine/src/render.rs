//! Graph traversal and per-block DSP.
//!
//! A `Renderer` owns the per-node output buffers and a cached
//! topological order. The order is recomputed only when the graph's
//! topology version changes, so steady-state rendering does no graph
//! analysis.

use ot_ir::AudioBuffer;
use slotmap::SecondaryMap;

use crate::graph::{AudioGraph, NodeKey, NodeKind, Ramp};

/// Topological sort via Kahn's algorithm.
///
/// Returns nodes ordered so every source appears before its consumers.
/// If the graph contains a cycle the result is shorter than the node
/// count; the renderer silently skips the cyclic remainder (routing
/// commands refuse cycles before they reach the graph).
pub fn topological_sort(graph: &AudioGraph) -> Vec<NodeKey> {
    let mut in_degree: SecondaryMap<NodeKey, u32> = SecondaryMap::new();
    for (key, _) in graph.nodes.iter() {
        in_degree.insert(key, 0);
    }
    for conn in graph.connections() {
        if let Some(d) = in_degree.get_mut(conn.to) {
            *d += 1;
        }
    }

    let mut queue: Vec<NodeKey> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(k, _)| k)
        .collect();
    let mut result = Vec::with_capacity(graph.node_count());

    while let Some(key) = queue.pop() {
        result.push(key);
        for conn in graph.connections().iter().filter(|c| c.from == key) {
            if let Some(d) = in_degree.get_mut(conn.to) {
                *d -= 1;
                if *d == 0 {
                    queue.push(conn.to);
                }
            }
        }
    }

    result
}

/// Sum the outputs of every node feeding `target` into `scratch`.
fn gather_inputs(
    graph: &AudioGraph,
    outputs: &SecondaryMap<NodeKey, AudioBuffer>,
    target: NodeKey,
    scratch: &mut AudioBuffer,
) {
    scratch.silence();
    for conn in graph.connections().iter().filter(|c| c.to == target) {
        if let Some(src) = outputs.get(conn.from) {
            scratch.mix_from(src);
        }
    }
}

/// Owns the render-side state of an audio graph.
pub struct Renderer {
    outputs: SecondaryMap<NodeKey, AudioBuffer>,
    topo: Vec<NodeKey>,
    scratch: AudioBuffer,
    seen_version: u64,
    block_frames: usize,
    sample_rate: u32,
}

impl Renderer {
    pub fn new(sample_rate: u32, block_frames: usize) -> Self {
        Self {
            outputs: SecondaryMap::new(),
            topo: Vec::new(),
            scratch: AudioBuffer::new(2, block_frames),
            seen_version: u64::MAX,
            block_frames,
            sample_rate,
        }
    }

    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    /// Recompute traversal order and (re)allocate node buffers.
    fn sync_topology(&mut self, graph: &AudioGraph) {
        self.topo = topological_sort(graph);
        self.outputs.retain(|key, _| graph.contains(key));
        for &key in &self.topo {
            if self.outputs.get(key).is_none() {
                self.outputs.insert(key, AudioBuffer::new(2, self.block_frames));
            }
        }
        self.seen_version = graph.version();
    }

    /// Render one block starting at absolute sample `start` and copy
    /// the master output into `out`.
    pub fn render_block(&mut self, graph: &mut AudioGraph, start: u64, out: &mut AudioBuffer) {
        if graph.version() != self.seen_version {
            self.sync_topology(graph);
        }
        let frames = self.block_frames.min(out.frames());

        for idx in 0..self.topo.len() {
            let key = self.topo[idx];
            if !graph.contains(key) {
                continue;
            }
            gather_inputs(graph, &self.outputs, key, &mut self.scratch);
            let scratch = &mut self.scratch;
            let sample_rate = self.sample_rate;
            let output = match self.outputs.get_mut(key) {
                Some(buf) => buf,
                None => continue,
            };
            if let Some(node) = graph.node_mut(key) {
                process_node(&mut node.kind, scratch, output, start, frames, sample_rate);
            }
        }

        out.silence();
        if let Some(master) = self.outputs.get(graph.master()) {
            out.mix_from(master);
        }
    }

    /// Peek at a node's most recent block output (tests and metering).
    pub fn node_output(&self, key: NodeKey) -> Option<&AudioBuffer> {
        self.outputs.get(key)
    }
}

fn process_node(
    kind: &mut NodeKind,
    input: &mut AudioBuffer,
    output: &mut AudioBuffer,
    start: u64,
    frames: usize,
    sample_rate: u32,
) {
    match kind {
        NodeKind::Master | NodeKind::Sum => {
            output.silence();
            output.mix_from(input);
        }
        NodeKind::Gain(gain) => {
            // Fast path: no ramp touches this block, gain is constant.
            if gain.ramps().iter().all(|r: &Ramp| !overlaps(r, start, frames)) {
                output.silence();
                output.mix_from_scaled(input, gain.value_at(start));
            } else {
                for ch in 0..2u16 {
                    let src = input.channel(ch);
                    let dst = output.channel_mut(ch);
                    for i in 0..frames {
                        dst[i] = src[i] * gain.value_at(start + i as u64);
                    }
                }
            }
        }
        NodeKind::Pan(pan) => {
            let p = pan.pan.clamp(-1.0, 1.0);
            let left = (1.0 - p).min(1.0);
            let right = (1.0 + p).min(1.0);
            for (ch, g) in [(0u16, left), (1u16, right)] {
                let src = input.channel(ch);
                let dst = output.channel_mut(ch);
                for i in 0..frames {
                    dst[i] = src[i] * g;
                }
            }
        }
        NodeKind::Oscillator(osc) => {
            let step = osc.frequency / sample_rate as f32;
            let mut phase = osc.phase;
            for i in 0..frames {
                let sample = osc.gain * waveform_sample(osc.waveform, phase);
                // Mono source feeds both channels.
                output.channel_mut(0)[i] = sample;
                output.channel_mut(1)[i] = sample;
                phase += step;
                if phase >= 1.0 {
                    phase -= libm::floorf(phase);
                }
            }
            osc.phase = phase;
        }
        NodeKind::Filter(filter) => {
            let cutoff = filter.cutoff_hz.clamp(10.0, sample_rate as f32 * 0.45);
            let g = libm::tanf(core::f32::consts::PI * cutoff / sample_rate as f32);
            let k = 1.0 / filter.q.max(0.1);
            let a1 = 1.0 / (1.0 + g * (g + k));
            let a2 = g * a1;
            let a3 = g * a2;
            for ch in 0..2u16 {
                let [mut ic1, mut ic2] = filter.state[ch as usize];
                let src = input.channel(ch);
                let dst = output.channel_mut(ch);
                for i in 0..frames {
                    let v3 = src[i] - ic2;
                    let v1 = a1 * ic1 + a2 * v3;
                    let v2 = ic2 + a2 * ic1 + a3 * v3;
                    ic1 = 2.0 * v1 - ic1;
                    ic2 = 2.0 * v2 - ic2;
                    dst[i] = v2;
                }
                filter.state[ch as usize] = [ic1, ic2];
            }
        }
        NodeKind::Delay(delay) => {
            if delay.delay_samples == 0 {
                output.silence();
                output.mix_from(input);
            } else {
                let len = delay.lines[0].len();
                for ch in 0..2u16 {
                    let mut pos = delay.write_pos;
                    let line = &mut delay.lines[ch as usize];
                    let src = input.channel(ch);
                    let dst = output.channel_mut(ch);
                    for i in 0..frames {
                        dst[i] = line[pos];
                        line[pos] = src[i];
                        pos = (pos + 1) % len;
                    }
                }
                delay.write_pos = (delay.write_pos + frames) % len;
            }
        }
        NodeKind::BufferSource(source) => {
            output.silence();
            if source.finished_at(start) {
                return;
            }
            let clip = &source.audio;
            let ratio = clip.sample_rate as f64 / sample_rate as f64;
            let payload = &clip.buffer;
            let payload_frames = payload.frames();
            let end = source.start_sample + source.duration_frames;
            for i in 0..frames {
                let t = start + i as u64;
                if t < source.start_sample || t >= end {
                    continue;
                }
                let src_pos = source.offset_frames as f64 + (t - source.start_sample) as f64 * ratio;
                let idx = src_pos as usize;
                if idx >= payload_frames {
                    continue;
                }
                let frac = (src_pos - idx as f64) as f32;
                for ch in 0..2u16 {
                    // Mono payloads feed both output channels.
                    let plane = payload.channel(ch.min(payload.channels() - 1));
                    let a = plane[idx];
                    let b = if idx + 1 < payload_frames { plane[idx + 1] } else { a };
                    output.channel_mut(ch)[i] = a + (b - a) * frac;
                }
            }
        }
    }
}

fn overlaps(ramp: &Ramp, start: u64, frames: usize) -> bool {
    let end = start + frames as u64;
    ramp.start < end && ramp.end > start
}

fn waveform_sample(waveform: ot_ir::Waveform, phase: f32) -> f32 {
    use ot_ir::Waveform;
    match waveform {
        Waveform::Sine => libm::sinf(2.0 * core::f32::consts::PI * phase),
        Waveform::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Saw => 2.0 * phase - 1.0,
        Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
    }
}
