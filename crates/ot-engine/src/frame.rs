//! A single stereo output frame.

/// One stereo sample pair, f32 in [-1, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Frame {
    pub left: f32,
    pub right: f32,
}

impl Frame {
    pub fn silence() -> Self {
        Self { left: 0.0, right: 0.0 }
    }

    /// Interleave a planar block into frames.
    pub fn interleave(buffer: &ot_ir::AudioBuffer, out: &mut Vec<Frame>) {
        out.clear();
        let left = buffer.channel(0);
        let right = if buffer.channels() > 1 { buffer.channel(1) } else { left };
        for i in 0..buffer.frames() {
            out.push(Frame { left: left[i], right: right[i] });
        }
    }
}
