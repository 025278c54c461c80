//! Headless controller for Overtone.
//!
//! Owns a project and manages playback: a control thread ticks the
//! engine and feeds rendered frames into the device ring buffer. The
//! same engine pump drives offline WAV rendering, so the two paths
//! cannot drift apart.

mod wav;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ot_audio::{AudioOutput, CpalOutput};
use ot_engine::{Engine, EngineConfig, Frame};
use ot_ir::AudioBuffer;

// Re-export common types so callers don't need the inner crates.
pub use ot_engine::TickSummary;
pub use ot_ir::Project;
pub use ot_session::SessionError;

pub use wav::{frames_to_wav, write_wav_file};

/// Extra render tail after the last clip, covering release ramps.
const RENDER_TAIL_SECONDS: f64 = 0.5;

/// Headless controller — owns a project and manages playback.
pub struct Controller {
    project: Project,
    config: EngineConfig,
    playback: Option<PlaybackHandle>,
}

struct PlaybackHandle {
    stop_signal: Arc<AtomicBool>,
    position: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Controller {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            project: Project::new("untitled", "Untitled", 120.0),
            config,
            playback: None,
        }
    }

    // --- Project management ---

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn load_json(&mut self, json: &str) -> Result<(), SessionError> {
        self.stop();
        self.project = ot_session::load_project(json)?;
        Ok(())
    }

    pub fn set_project(&mut self, project: Project) {
        self.stop();
        self.project = project;
    }

    // --- Real-time playback ---

    /// Start playback from the beginning on a background thread.
    pub fn play(&mut self) {
        self.stop();

        let project = self.project.clone();
        let config = self.config;
        let stop_signal = Arc::new(AtomicBool::new(false));
        let position = Arc::new(AtomicU64::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stop = stop_signal.clone();
        let pos = position.clone();
        let done = finished.clone();

        let thread = std::thread::spawn(move || {
            control_thread(project, config, stop, pos, done);
        });

        self.playback = Some(PlaybackHandle {
            stop_signal,
            position,
            finished,
            thread: Some(thread),
        });
    }

    pub fn stop(&mut self) {
        if let Some(mut pb) = self.playback.take() {
            pb.stop_signal.store(true, Ordering::Relaxed);
            if let Some(handle) = pb.thread.take() {
                let _ = handle.join();
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playback
            .as_ref()
            .is_some_and(|p| !p.finished.load(Ordering::Relaxed))
    }

    pub fn is_finished(&self) -> bool {
        self.playback
            .as_ref()
            .is_some_and(|p| p.finished.load(Ordering::Relaxed))
    }

    /// Playhead position in seconds, while playing.
    pub fn position_seconds(&self) -> Option<f64> {
        let pb = self.playback.as_ref()?;
        if pb.finished.load(Ordering::Relaxed) {
            return None;
        }
        let samples = pb.position.load(Ordering::Relaxed);
        Some(samples as f64 / self.config.sample_rate as f64)
    }

    // --- Offline rendering ---

    /// Render the whole project to frames, no device involved.
    pub fn render_frames(&self, max_frames: usize) -> Vec<Frame> {
        let mut engine = Engine::new(self.config);
        engine.load_project(self.project.clone());
        engine.play();

        let end = render_end_sample(&self.project, self.config.sample_rate);
        let mut out = AudioBuffer::new(2, self.config.block_frames);
        let mut block = Vec::new();
        let mut frames = Vec::new();
        while frames.len() < max_frames && engine.transport().position() < end {
            engine.tick(&mut out);
            Frame::interleave(&out, &mut block);
            frames.extend_from_slice(&block);
        }
        frames.truncate(max_frames);
        frames
    }

    /// Render the whole project to an in-memory WAV file.
    pub fn render_to_wav(&self, max_seconds: u32) -> Result<Vec<u8>, hound::Error> {
        let max_frames = self.config.sample_rate as usize * max_seconds as usize;
        let frames = self.render_frames(max_frames);
        wav::frames_to_wav(&frames, self.config.sample_rate)
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Last clip end plus the render tail, in samples.
fn render_end_sample(project: &Project, sample_rate: u32) -> u64 {
    let end_seconds = project
        .tracks
        .iter()
        .flat_map(|t| t.clips.iter())
        .map(|c| c.end_time())
        .fold(0.0f64, f64::max);
    ((end_seconds + RENDER_TAIL_SECONDS) * sample_rate as f64) as u64
}

/// The playback pump: ticks the engine and pushes frames into the
/// device ring. With no device it free-runs paced by wall clock, so
/// the transport stays accurate for the caller.
fn control_thread(
    project: Project,
    config: EngineConfig,
    stop_signal: Arc<AtomicBool>,
    position: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
) {
    let mut output = match CpalOutput::new() {
        Ok((mut output, consumer)) => match output.build_stream(consumer) {
            Ok(()) => {
                let _ = output.start();
                Some(output)
            }
            Err(err) => {
                log::warn!("audio stream failed: {err}");
                None
            }
        },
        Err(err) => {
            log::warn!("no audio device: {err}");
            None
        }
    };

    let config = EngineConfig {
        sample_rate: output.as_ref().map_or(config.sample_rate, |o| o.sample_rate()),
        ..config
    };
    let mut engine = Engine::new(config);
    engine.load_project(project);
    engine.set_unavailable(output.is_none());
    engine.play();

    let end = render_end_sample(engine.project(), config.sample_rate);
    let block_duration =
        Duration::from_secs_f64(config.block_frames as f64 / config.sample_rate as f64);
    let mut out = AudioBuffer::new(2, config.block_frames);
    let mut block = Vec::new();

    while !stop_signal.load(Ordering::Relaxed) {
        let looping = engine.transport().loop_region().is_some();
        if !looping && engine.transport().position() >= end {
            break;
        }
        engine.tick(&mut out);
        position.store(engine.transport().position(), Ordering::Relaxed);

        match output.as_mut() {
            Some(device) => {
                Frame::interleave(&out, &mut block);
                device.write(&block);
            }
            None => std::thread::sleep(block_duration),
        }
    }

    // Drain the ring with silence so the tail is not clipped.
    if let Some(device) = output.as_mut() {
        let tail = vec![Frame::silence(); config.sample_rate as usize / 10];
        device.write(&tail);
        let _ = device.stop();
    }
    engine.dispose();
    finished.store(true, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ot_ir::{Clip, ClipPayload, MidiNote, Track, TrackKind};

    fn project_with_note() -> Project {
        let mut project = Project::new("p", "Render", 120.0);
        let mut track = Track::new(0, "synth", TrackKind::Midi);
        track.clips.push(Clip::new(
            0,
            0,
            0.0,
            0.5,
            ClipPayload::Midi(vec![MidiNote {
                note: 69,
                velocity: 127,
                start: 0.0,
                duration: 0.4,
            }]),
        ));
        project.tracks.push(track);
        project
    }

    #[test]
    fn offline_render_produces_audio() {
        let mut controller = Controller::default();
        controller.set_project(project_with_note());
        let frames = controller.render_frames(48_000);
        assert!(!frames.is_empty());
        assert!(frames.iter().any(|f| f.left != 0.0));
    }

    #[test]
    fn render_stops_after_project_end() {
        let mut controller = Controller::default();
        controller.set_project(project_with_note());
        // Clip ends at 0.5s; tail is 0.5s; ask for far more.
        let frames = controller.render_frames(48_000 * 30);
        assert!(frames.len() < 48_000 * 2);
    }

    #[test]
    fn render_to_wav_wraps_frames() {
        let mut controller = Controller::default();
        controller.set_project(project_with_note());
        let bytes = controller.render_to_wav(2).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert!(bytes.len() > 44);
    }

    #[test]
    fn empty_project_renders_nothing_but_tail() {
        let controller = Controller::default();
        let frames = controller.render_frames(48_000 * 10);
        // Only the half-second tail.
        assert!(frames.len() <= 48_000);
        assert!(frames.iter().all(|f| f.left == 0.0 && f.right == 0.0));
    }
}
