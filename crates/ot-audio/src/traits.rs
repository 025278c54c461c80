//! Audio output trait and error types.

use ot_engine::Frame;
use thiserror::Error;

/// Errors from the audio device layer.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("device init error: {0}")]
    DeviceInit(String),
    #[error("stream create error: {0}")]
    StreamCreate(String),
    #[error("playback error: {0}")]
    Playback(String),
    #[error("no audio device available")]
    NoDevice,
}

/// An audio output backend the master controller can drive.
pub trait AudioOutput {
    /// Device sample rate.
    fn sample_rate(&self) -> u32;

    /// Queue frames for playback, blocking until all are accepted.
    /// Backpressure from the device paces the caller.
    fn write(&mut self, frames: &[Frame]);

    /// Start playback.
    fn start(&mut self) -> Result<(), AudioError>;

    /// Stop playback.
    fn stop(&mut self) -> Result<(), AudioError>;
}
