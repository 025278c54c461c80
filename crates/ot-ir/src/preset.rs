//! Synthesizer preset types and note-to-frequency conversion.
//!
//! A preset describes how a voice subgraph is built: one oscillator
//! per enabled `OscillatorConfig`, a shared filter, and an ADSR gain
//! envelope. All parameters clamp at construction — invalid control
//! input degrades gracefully instead of failing.

use alloc::vec;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// Lowest allowed filter cutoff in Hz.
pub const MIN_CUTOFF_HZ: f32 = 10.0;

/// Highest allowed filter cutoff in Hz.
pub const MAX_CUTOFF_HZ: f32 = 20_000.0;

/// Lowest allowed filter resonance.
pub const MIN_Q: f32 = 0.1;

/// Highest allowed filter resonance.
pub const MAX_Q: f32 = 20.0;

/// Reference pitch: MIDI note 69 (A4) at 440 Hz.
const A4_NOTE: f32 = 69.0;
const A4_HZ: f32 = 440.0;

/// Convert a MIDI note number to its 12-TET frequency in Hz.
pub fn note_frequency(note: u8) -> f32 {
    A4_HZ * libm::exp2f((note as f32 - A4_NOTE) / 12.0)
}

/// Oscillator waveform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Saw,
    Triangle,
}

/// One oscillator in a preset.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OscillatorConfig {
    /// Disabled oscillators are skipped at voice build time.
    pub enabled: bool,
    pub waveform: Waveform,
    /// Base frequency in Hz; 440 means "play the note as-is".
    /// Other values scale the note frequency by `frequency / 440`.
    pub frequency: f32,
    /// Detune in cents.
    pub detune_cents: f32,
    /// Per-oscillator mix gain.
    pub gain: f32,
}

impl Default for OscillatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            waveform: Waveform::Sine,
            frequency: A4_HZ,
            detune_cents: 0.0,
            gain: 1.0,
        }
    }
}

impl OscillatorConfig {
    /// Frequency this oscillator plays for a given MIDI note.
    /// Negative or non-finite config frequencies clamp to a safe range.
    pub fn frequency_for_note(&self, note: u8) -> f32 {
        let base = sanitize(self.frequency, A4_HZ).clamp(1.0, MAX_CUTOFF_HZ);
        let detune = sanitize(self.detune_cents, 0.0).clamp(-1200.0, 1200.0);
        note_frequency(note) * (base / A4_HZ) * libm::exp2f(detune / 1200.0)
    }
}

/// Shared per-voice filter settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub cutoff_hz: f32,
    pub q: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self { cutoff_hz: MAX_CUTOFF_HZ, q: 0.707 }
    }
}

impl FilterConfig {
    /// Cutoff clamped into the valid range, NaN falling back to max.
    pub fn clamped_cutoff(&self) -> f32 {
        sanitize(self.cutoff_hz, MAX_CUTOFF_HZ).clamp(MIN_CUTOFF_HZ, MAX_CUTOFF_HZ)
    }

    /// Resonance clamped into the valid range, NaN falling back to 0.707.
    pub fn clamped_q(&self) -> f32 {
        sanitize(self.q, 0.707).clamp(MIN_Q, MAX_Q)
    }
}

/// ADSR amplitude envelope, all times in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdsrConfig {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for AdsrConfig {
    fn default() -> Self {
        Self { attack: 0.01, decay: 0.1, sustain: 0.8, release: 0.3 }
    }
}

impl AdsrConfig {
    /// Clamp all fields to valid values. Times are non-negative,
    /// sustain is [0,1]; NaN falls back to defaults.
    pub fn clamped(&self) -> Self {
        let d = Self::default();
        Self {
            attack: sanitize(self.attack, d.attack).max(0.0),
            decay: sanitize(self.decay, d.decay).max(0.0),
            sustain: sanitize(self.sustain, d.sustain).clamp(0.0, 1.0),
            release: sanitize(self.release, d.release).max(0.0),
        }
    }
}

/// A complete synthesizer preset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SynthPreset {
    pub oscillators: Vec<OscillatorConfig>,
    pub filter: FilterConfig,
    pub envelope: AdsrConfig,
    /// Hard cap on simultaneously live voices.
    pub polyphony: usize,
}

impl Default for SynthPreset {
    fn default() -> Self {
        Self {
            oscillators: vec![OscillatorConfig::default()],
            filter: FilterConfig::default(),
            envelope: AdsrConfig::default(),
            polyphony: 16,
        }
    }
}

impl SynthPreset {
    /// Enabled oscillators only.
    pub fn enabled_oscillators(&self) -> impl Iterator<Item = &OscillatorConfig> {
        self.oscillators.iter().filter(|o| o.enabled)
    }
}

/// Replace non-finite values with a fallback.
fn sanitize(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}
