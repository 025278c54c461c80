//! Flattened interchange snapshot.
//!
//! The snapshot is the export surface for external collaborators: a
//! flat view of tracks, clips, plugins, and automation lanes, keyed by
//! id instead of nesting. Import never touches engine internals — it
//! replays the snapshot through the same command surface a front end
//! would use. Audio clip media is referenced, not embedded; importing
//! an audio reference logs and skips it.

use std::collections::BTreeMap;

use ot_engine::Engine;
use ot_ir::{
    AutomationCurve, ClipId, ClipPayload, EffectKind, MidiNote, OutputTarget, Project, TrackId,
    TrackKind,
};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub bpm: f64,
    pub tracks: Vec<SnapshotTrack>,
    pub clips: Vec<SnapshotClip>,
    pub plugins: Vec<SnapshotPlugin>,
    pub automation: Vec<SnapshotLane>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotTrack {
    pub id: TrackId,
    pub name: String,
    pub kind: TrackKind,
    pub volume: f32,
    pub pan: f32,
    pub muted: bool,
    pub solo: bool,
    pub output: OutputTarget,
    pub wet: f32,
    pub dry: f32,
}

/// Clip contents in the snapshot. Audio media lives outside the
/// session file, so audio clips carry a shape reference only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SnapshotClipKind {
    Midi(Vec<MidiNote>),
    AudioRef { sample_rate: u32, frames: usize },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotClip {
    pub id: ClipId,
    pub track_id: TrackId,
    pub start_time: f64,
    pub duration: f64,
    pub offset: f64,
    pub kind: SnapshotClipKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotPlugin {
    pub track_id: TrackId,
    /// Index within the track's chain.
    pub position: usize,
    pub name: String,
    pub kind: EffectKind,
    pub latency_samples: u64,
    pub bypassed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaneTarget {
    Volume,
    Pan,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotLane {
    pub track_id: TrackId,
    pub target: LaneTarget,
    pub curve: AutomationCurve,
}

/// Flatten a project into a snapshot.
pub fn export_snapshot(project: &Project) -> Snapshot {
    let mut tracks = Vec::new();
    let mut clips = Vec::new();
    let mut plugins = Vec::new();
    let mut automation = Vec::new();

    for track in &project.tracks {
        tracks.push(SnapshotTrack {
            id: track.id,
            name: String::from(track.name.as_str()),
            kind: track.kind,
            volume: track.volume,
            pan: track.pan,
            muted: track.muted,
            solo: track.solo,
            output: track.output,
            wet: track.chain.wet,
            dry: track.chain.dry,
        });
        for clip in &track.clips {
            let kind = match &clip.payload {
                ClipPayload::Midi(notes) => SnapshotClipKind::Midi(notes.clone()),
                ClipPayload::Audio(audio) => SnapshotClipKind::AudioRef {
                    sample_rate: audio.sample_rate,
                    frames: audio.buffer.frames(),
                },
            };
            clips.push(SnapshotClip {
                id: clip.id,
                track_id: track.id,
                start_time: clip.start_time,
                duration: clip.duration,
                offset: clip.offset,
                kind,
            });
        }
        for (position, plugin) in track.chain.plugins.iter().enumerate() {
            plugins.push(SnapshotPlugin {
                track_id: track.id,
                position,
                name: plugin.name.clone(),
                kind: plugin.kind,
                latency_samples: plugin.latency_samples,
                bypassed: plugin.bypassed,
            });
        }
        if let Some(curve) = &track.volume_automation {
            automation.push(SnapshotLane {
                track_id: track.id,
                target: LaneTarget::Volume,
                curve: curve.clone(),
            });
        }
        if let Some(curve) = &track.pan_automation {
            automation.push(SnapshotLane {
                track_id: track.id,
                target: LaneTarget::Pan,
                curve: curve.clone(),
            });
        }
    }

    Snapshot {
        name: project.name.clone(),
        bpm: project.bpm,
        tracks,
        clips,
        plugins,
        automation,
    }
}

/// Replay a snapshot into an engine through its command surface.
/// Returns the mapping from snapshot track ids to created ids.
pub fn apply_snapshot(
    engine: &mut Engine,
    snapshot: &Snapshot,
) -> Result<BTreeMap<TrackId, TrackId>, SessionError> {
    let mut id_map = BTreeMap::new();
    for track in &snapshot.tracks {
        let id = engine.add_track(&track.name, track.kind);
        id_map.insert(track.id, id);
        engine.set_track_volume(id, track.volume)?;
        engine.set_track_pan(id, track.pan)?;
        engine.set_track_muted(id, track.muted)?;
        engine.set_track_solo(id, track.solo)?;
        engine.set_chain_wet_dry(id, track.wet, track.dry)?;
    }

    // Route once every bus exists.
    for track in &snapshot.tracks {
        if let OutputTarget::Bus(bus) = track.output {
            let id = id_map[&track.id];
            match id_map.get(&bus) {
                Some(&new_bus) => engine.set_track_output(id, OutputTarget::Bus(new_bus))?,
                None => log::warn!("snapshot routes track {} to missing bus {bus}", track.id),
            }
        }
    }

    for clip in &snapshot.clips {
        let Some(&track_id) = id_map.get(&clip.track_id) else {
            log::warn!("snapshot clip {} references missing track", clip.id);
            continue;
        };
        match &clip.kind {
            SnapshotClipKind::Midi(notes) => {
                engine.add_midi_clip(track_id, clip.start_time, clip.duration, notes.clone())?;
            }
            SnapshotClipKind::AudioRef { .. } => {
                log::warn!("snapshot clip {} references external media, skipping", clip.id);
            }
        }
    }

    let mut plugins: Vec<&SnapshotPlugin> = snapshot.plugins.iter().collect();
    plugins.sort_by_key(|p| (p.track_id, p.position));
    for plugin in plugins {
        let Some(&track_id) = id_map.get(&plugin.track_id) else {
            continue;
        };
        let id = engine.add_effect(track_id, &plugin.name, plugin.kind, plugin.latency_samples)?;
        if plugin.bypassed {
            engine.set_effect_bypassed(track_id, id, true)?;
        }
    }

    for lane in &snapshot.automation {
        let Some(&track_id) = id_map.get(&lane.track_id) else {
            continue;
        };
        match lane.target {
            LaneTarget::Volume => {
                engine.set_volume_automation(track_id, Some(lane.curve.clone()))?
            }
            LaneTarget::Pan => engine.set_pan_automation(track_id, Some(lane.curve.clone()))?,
        }
    }

    Ok(id_map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ot_engine::EngineConfig;
    use ot_ir::{CurvePoint, Interp};

    fn build_source_engine() -> Engine {
        let mut engine = Engine::new(EngineConfig::default());
        let bus = engine.add_track("fx bus", TrackKind::Bus);
        let synth = engine.add_track("synth", TrackKind::Midi);
        engine.set_track_output(synth, OutputTarget::Bus(bus)).unwrap();
        engine.set_track_volume(synth, 0.6).unwrap();
        engine.set_track_solo(synth, true).unwrap();
        engine
            .add_midi_clip(
                synth,
                1.0,
                2.0,
                vec![MidiNote { note: 60, velocity: 100, start: 0.0, duration: 0.5 }],
            )
            .unwrap();
        engine
            .add_effect(synth, "lp", EffectKind::LowPass { cutoff_hz: 900.0 }, 32)
            .unwrap();
        let mut curve = AutomationCurve::default();
        curve.insert(CurvePoint { time: 0.0, value: 1.0, kind: Interp::Linear });
        engine.set_volume_automation(synth, Some(curve)).unwrap();
        engine
    }

    #[test]
    fn snapshot_flattens_all_sections() {
        let engine = build_source_engine();
        let snapshot = export_snapshot(engine.project());
        assert_eq!(snapshot.tracks.len(), 2);
        assert_eq!(snapshot.clips.len(), 1);
        assert_eq!(snapshot.plugins.len(), 1);
        assert_eq!(snapshot.automation.len(), 1);
        assert!(matches!(snapshot.clips[0].kind, SnapshotClipKind::Midi(_)));
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let engine = build_source_engine();
        let snapshot = export_snapshot(engine.project());
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.tracks.len(), snapshot.tracks.len());
        assert_eq!(restored.plugins[0].latency_samples, 32);
    }

    #[test]
    fn apply_recreates_structure_via_commands() {
        let source = build_source_engine();
        let snapshot = export_snapshot(source.project());

        let mut target = Engine::new(EngineConfig::default());
        let id_map = apply_snapshot(&mut target, &snapshot).unwrap();
        assert_eq!(id_map.len(), 2);

        let project = target.project();
        assert_eq!(project.tracks.len(), 2);
        let synth = project
            .tracks
            .iter()
            .find(|t| t.name.as_str() == "synth")
            .unwrap();
        assert!((synth.volume - 0.6).abs() < 1e-6);
        assert!(synth.solo);
        assert_eq!(synth.clips.len(), 1);
        assert_eq!(synth.chain.plugins.len(), 1);
        assert!(synth.volume_automation.is_some());
        // Routing remapped to the new bus id.
        let bus = project
            .tracks
            .iter()
            .find(|t| t.name.as_str() == "fx bus")
            .unwrap();
        assert_eq!(synth.output, OutputTarget::Bus(bus.id));
    }

    #[test]
    fn audio_refs_are_skipped_not_fatal() {
        let snapshot = Snapshot {
            name: String::from("s"),
            bpm: 120.0,
            tracks: vec![SnapshotTrack {
                id: 0,
                name: String::from("drums"),
                kind: TrackKind::Audio,
                volume: 0.8,
                pan: 0.0,
                muted: false,
                solo: false,
                output: OutputTarget::Master,
                wet: 1.0,
                dry: 0.0,
            }],
            clips: vec![SnapshotClip {
                id: 0,
                track_id: 0,
                start_time: 0.0,
                duration: 1.0,
                offset: 0.0,
                kind: SnapshotClipKind::AudioRef { sample_rate: 48_000, frames: 48_000 },
            }],
            plugins: Vec::new(),
            automation: Vec::new(),
        };
        let mut engine = Engine::new(EngineConfig::default());
        apply_snapshot(&mut engine, &snapshot).unwrap();
        assert_eq!(engine.project().tracks.len(), 1);
        assert!(engine.project().tracks[0].clips.is_empty());
    }
}
