//! Real-time scheduling and signal-routing engine for Overtone.
//!
//! Builds a runtime audio graph from the project model, schedules
//! clips through a look-ahead window, manages polyphonic voices, and
//! renders blocks of audio on demand.

mod chain;
mod engine;
mod error;
mod frame;
mod graph;
mod pdc;
mod render;
mod scheduler;
mod signal_path;
mod transport;
mod voice;
mod voice_pool;

pub use chain::EffectChain;
pub use engine::{Engine, EngineConfig, TickSummary};
pub use error::EngineError;
pub use frame::Frame;
pub use graph::{
    AudioGraph, BufferSourceNode, Connection, DelayNode, FilterNode, GainNode, Node, NodeKey,
    NodeKind, OscillatorNode, PanNode, Ramp,
};
pub use pdc::{compute_compensation, PathLatency};
pub use render::Renderer;
pub use scheduler::{Completion, CompletionAction, Scheduler, TimelineEvent};
pub use signal_path::TrackPath;
pub use transport::{LoopRegion, Transport, TransportState};
pub use voice::{Voice, VoiceId, VoiceStage};
pub use voice_pool::VoicePool;
