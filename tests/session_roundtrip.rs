//! Integration test: project persistence, interchange, and offline render.

use ot_engine::{Engine, EngineConfig};
use ot_ir::{EffectKind, MidiNote, OutputTarget, TrackKind};
use ot_master::Controller;
use ot_session::{apply_snapshot, export_snapshot, load_project, save_project, ImportedAudio};

fn config() -> EngineConfig {
    EngineConfig::default()
}

/// A small arrangement exercising every persisted surface: a bus, a
/// routed synth track with effects and automation, and an audio track.
fn build_arrangement() -> Engine {
    let mut engine = Engine::new(config());

    let bus = engine.add_track("drum bus", TrackKind::Bus);
    let synth = engine.add_track("lead", TrackKind::Midi);
    let tape = engine.add_track("tape", TrackKind::Audio);

    engine.set_track_output(synth, OutputTarget::Bus(bus)).unwrap();
    engine.set_track_volume(synth, 0.6).unwrap();
    engine.set_track_pan(synth, 0.25).unwrap();
    engine.set_track_muted(tape, true).unwrap();

    engine
        .add_midi_clip(
            synth,
            0.5,
            2.0,
            vec![
                MidiNote { note: 60, velocity: 100, start: 0.0, duration: 0.5 },
                MidiNote { note: 67, velocity: 80, start: 1.0, duration: 0.5 },
            ],
        )
        .unwrap();

    engine
        .add_effect(synth, "lpf", EffectKind::LowPass { cutoff_hz: 2_000.0 }, 0)
        .unwrap();
    engine
        .add_effect(synth, "echo", EffectKind::Delay { seconds: 0.1 }, 64)
        .unwrap();
    engine.set_chain_wet_dry(synth, 0.7, 0.3).unwrap();

    let audio = ImportedAudio {
        sample_rate: 48_000,
        planes: vec![vec![0.25; 4_800], vec![0.25; 4_800]],
    };
    engine
        .add_audio_clip(tape, 1.0, audio.into_clip().unwrap())
        .unwrap();

    engine
}

// --- project JSON ---

#[test]
fn project_json_round_trips() {
    let engine = build_arrangement();
    let original = engine.project().clone();

    let json = save_project(&original).unwrap();
    let loaded = load_project(&json).unwrap();

    assert_eq!(loaded, original);
}

#[test]
fn loaded_project_plays_back() {
    let engine = build_arrangement();
    let json = save_project(engine.project()).unwrap();

    let mut controller = Controller::default();
    controller.load_json(&json).unwrap();
    assert_eq!(controller.project().tracks.len(), 3);

    let frames = controller.render_frames(48_000 * 3);
    assert!(frames.iter().any(|f| f.left != 0.0 || f.right != 0.0));
}

#[test]
fn malformed_json_is_rejected() {
    assert!(load_project("{not json").is_err());
    assert!(load_project("{\"id\": 3}").is_err());
}

// --- interchange snapshot ---

#[test]
fn snapshot_flattens_every_surface() {
    let engine = build_arrangement();
    let snapshot = export_snapshot(engine.project());

    assert_eq!(snapshot.tracks.len(), 3);
    assert_eq!(snapshot.clips.len(), 2);
    assert_eq!(snapshot.plugins.len(), 2);

    let lead = snapshot
        .tracks
        .iter()
        .find(|t| t.name == "lead")
        .expect("lead track in snapshot");
    assert_eq!(lead.volume, 0.6);
    assert_eq!(lead.wet, 0.7);
}

#[test]
fn snapshot_survives_serde() {
    let engine = build_arrangement();
    let snapshot = export_snapshot(engine.project());

    let json = serde_json::to_string(&snapshot).unwrap();
    let back: ot_session::Snapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(back.tracks.len(), snapshot.tracks.len());
    assert_eq!(back.plugins.len(), snapshot.plugins.len());
}

#[test]
fn apply_snapshot_rebuilds_through_commands() {
    let source = build_arrangement();
    let snapshot = export_snapshot(source.project());

    let mut target = Engine::new(config());
    let id_map = apply_snapshot(&mut target, &snapshot).unwrap();
    assert_eq!(id_map.len(), 3);

    let rebuilt = target.project();
    assert_eq!(rebuilt.tracks.len(), 3);

    // Routing was remapped onto the new track ids.
    let bus_new = id_map[&0];
    let lead_new = id_map[&1];
    let lead = rebuilt.tracks.iter().find(|t| t.id == lead_new).unwrap();
    assert_eq!(lead.output, OutputTarget::Bus(bus_new));
    assert_eq!(lead.chain.plugins.len(), 2);
    assert_eq!(lead.volume, 0.6);

    // Audio media is referenced, not embedded, so the tape clip
    // does not come back.
    let tape_new = id_map[&2];
    let tape = rebuilt.tracks.iter().find(|t| t.id == tape_new).unwrap();
    assert!(tape.clips.is_empty());
    assert!(tape.muted);
}

// --- offline render via the controller ---

#[test]
fn render_to_wav_is_deterministic() {
    let engine = build_arrangement();

    let mut controller = Controller::default();
    controller.set_project(engine.project().clone());

    let a = controller.render_to_wav(4).unwrap();
    let b = controller.render_to_wav(4).unwrap();
    assert_eq!(&a[0..4], b"RIFF");
    assert_eq!(a, b, "Offline render must be reproducible");
}
