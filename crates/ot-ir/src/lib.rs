//! Core data model for the Overtone audio engine.
//!
//! This crate defines the value types shared across the workspace:
//! automation curves, clips, tracks, plugin instances, synth presets,
//! and the serializable project tree. The runtime engine consumes
//! these types; session import/export produces them.
//!
//! Designed to be `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod automation;
mod buffer;
mod clip;
mod plugin;
mod preset;
mod project;
mod track;

pub use automation::{evaluate, AutomationCurve, CurvePoint, Interp};
pub use buffer::AudioBuffer;
pub use clip::{AudioClip, Clip, ClipId, ClipPayload, MidiNote};
pub use plugin::{ChainSpec, EffectKind, ParamId, PluginId, PluginInstance};
pub use preset::{
    note_frequency, AdsrConfig, FilterConfig, OscillatorConfig, SynthPreset, Waveform,
    MAX_CUTOFF_HZ, MAX_Q, MIN_CUTOFF_HZ, MIN_Q,
};
pub use project::Project;
pub use track::{is_audible, OutputTarget, Track, TrackId, TrackKind};
