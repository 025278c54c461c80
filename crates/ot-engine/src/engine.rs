//! The engine: command surface and per-block pump.
//!
//! All mutation happens here, on the control context. `tick` is the
//! single hot entry point: it scans the look-ahead window, applies the
//! resulting timeline events, runs due completions, renders one block,
//! and advances the transport.

use std::collections::BTreeMap;
use std::sync::Arc;

use ot_ir::{
    evaluate, is_audible, AudioBuffer, AudioClip, Clip, ClipId, ClipPayload, EffectKind,
    MidiNote, OutputTarget, PluginId, PluginInstance, Project, Track, TrackId, TrackKind,
};

use crate::error::EngineError;
use crate::graph::{AudioGraph, BufferSourceNode, NodeKey, NodeKind};
use crate::pdc::{compute_compensation, PathLatency};
use crate::render::Renderer;
use crate::scheduler::{CompletionAction, Scheduler, TimelineEvent};
use crate::signal_path::TrackPath;
use crate::transport::{Transport, TransportState};
use crate::voice_pool::VoicePool;

/// Engine construction parameters.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Frames rendered per tick.
    pub block_frames: usize,
    /// How far past the current block the scheduler looks.
    pub lookahead_seconds: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { sample_rate: 48_000, block_frames: 512, lookahead_seconds: 0.1 }
    }
}

/// What one tick did, for callers that surface activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub notes_started: usize,
    pub sources_started: usize,
    pub wrapped: bool,
}

/// The scheduling and signal-routing engine.
pub struct Engine {
    config: EngineConfig,
    project: Project,
    graph: AudioGraph,
    renderer: Renderer,
    transport: Transport,
    scheduler: Scheduler,
    pool: VoicePool,
    paths: BTreeMap<TrackId, TrackPath>,
    /// Live buffer sources, for cancellation on clip removal.
    live_sources: Vec<(ClipId, NodeKey)>,
    next_track_id: TrackId,
    next_clip_id: ClipId,
    next_plugin_id: PluginId,
    /// Observers fired once per tick with the post-advance position.
    transport_callbacks: Vec<Box<dyn FnMut(u64)>>,
    disposed: bool,
    /// Set when no output device could be opened; the engine keeps
    /// ticking but emits silence.
    unavailable: bool,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let lookahead =
            (config.lookahead_seconds.max(0.0) * config.sample_rate as f64).round() as u64;
        Self {
            project: Project::new("untitled", "Untitled", 120.0),
            graph: AudioGraph::new(),
            renderer: Renderer::new(config.sample_rate, config.block_frames),
            transport: Transport::new(config.sample_rate),
            scheduler: Scheduler::new(lookahead),
            pool: VoicePool::new(),
            paths: BTreeMap::new(),
            live_sources: Vec::new(),
            next_track_id: 0,
            next_clip_id: 0,
            next_plugin_id: 0,
            transport_callbacks: Vec::new(),
            disposed: false,
            unavailable: false,
            config,
        }
    }

    /// Replace the whole project, rebuilding every signal path.
    pub fn load_project(&mut self, project: Project) {
        if self.disposed {
            return;
        }
        self.flush_live_audio();
        for (_, path) in std::mem::take(&mut self.paths) {
            path.dispose(&mut self.graph);
        }
        self.transport.stop();
        self.scheduler.rewind();

        self.next_track_id = project.max_track_id().map_or(0, |id| id + 1);
        self.next_clip_id = project.max_clip_id().map_or(0, |id| id + 1);
        self.next_plugin_id = project
            .tracks
            .iter()
            .flat_map(|t| t.chain.plugins.iter().map(|p| p.id))
            .max()
            .map_or(0, |id| id + 1);
        self.project = project;

        // Buses may be referenced before they appear, so build every
        // frame against master first and re-point afterwards.
        let master = self.graph.master();
        for track in &self.project.tracks {
            let mut path = TrackPath::new(&mut self.graph, track.id, master);
            for plugin in &track.chain.plugins {
                path.add_effect(&mut self.graph, plugin, self.config.sample_rate);
            }
            path.chain()
                .set_wet_dry(&mut self.graph, track.chain.wet, track.chain.dry);
            self.paths.insert(track.id, path);
        }
        let outputs: Vec<(TrackId, OutputTarget)> =
            self.project.tracks.iter().map(|t| (t.id, t.output)).collect();
        for (id, output) in outputs {
            let dest = self.resolve_destination(output);
            if let Some(path) = self.paths.get(&id) {
                path.set_destination(&mut self.graph, dest);
            }
        }
        self.apply_mix_all();
        self.recompute_pdc();
        log::info!(
            "loaded project '{}' ({} tracks)",
            self.project.name,
            self.project.tracks.len()
        );
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    pub fn voice_count(&self) -> usize {
        self.pool.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn is_unavailable(&self) -> bool {
        self.unavailable
    }

    /// Mark the engine as running without an output device. Ticks
    /// still advance but the rendered block is silenced.
    pub fn set_unavailable(&mut self, unavailable: bool) {
        if unavailable && !self.unavailable {
            log::warn!("audio output unavailable, falling back to silence");
        }
        self.unavailable = unavailable;
    }

    /// Tear down all runtime state. Safe to call more than once;
    /// every later command is a no-op and ticks render silence.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.flush_live_audio();
        for (_, path) in std::mem::take(&mut self.paths) {
            path.dispose(&mut self.graph);
        }
        self.transport.stop();
        self.scheduler.rewind();
        self.disposed = true;
        log::info!("engine disposed");
    }

    // === Transport ===

    pub fn play(&mut self) {
        if !self.disposed {
            self.transport.play();
        }
    }

    /// Pause in place. Held voices are released so nothing rings on.
    pub fn pause(&mut self) {
        if self.disposed {
            return;
        }
        self.transport.pause();
        self.release_everything();
    }

    pub fn stop(&mut self) {
        if self.disposed {
            return;
        }
        self.transport.stop();
        self.flush_live_audio();
        self.scheduler.rewind();
    }

    /// Jump the playhead. Live voices and sources are cut; clips under
    /// the new position pick up mid-stream on the next tick.
    pub fn seek(&mut self, seconds: f64) {
        if self.disposed {
            return;
        }
        self.flush_live_audio();
        self.scheduler.rewind();
        self.transport.seek_seconds(seconds);
    }

    pub fn set_loop(&mut self, start_seconds: f64, end_seconds: f64) {
        if !self.disposed {
            self.transport.set_loop_seconds(start_seconds, end_seconds);
        }
    }

    pub fn clear_loop(&mut self) {
        if !self.disposed {
            self.transport.clear_loop();
        }
    }

    /// Arm or disarm recording; arming requires a playing transport.
    pub fn set_recording(&mut self, recording: bool) {
        if !self.disposed {
            self.transport.set_recording(recording);
        }
    }

    pub fn set_time_signature(&mut self, beats: u8, unit: u8) {
        if !self.disposed {
            self.transport.set_time_signature(beats, unit);
        }
    }

    /// Register an observer fired once per tick, after scheduling and
    /// the position update, with the new playhead position.
    pub fn add_transport_callback(&mut self, callback: Box<dyn FnMut(u64)>) {
        self.transport_callbacks.push(callback);
    }

    // === Tracks ===

    pub fn add_track(&mut self, name: &str, kind: TrackKind) -> TrackId {
        let id = self.next_track_id;
        self.next_track_id += 1;
        self.project.tracks.push(Track::new(id, name, kind));
        let master = self.graph.master();
        let path = TrackPath::new(&mut self.graph, id, master);
        self.paths.insert(id, path);
        self.apply_mix_all();
        id
    }

    /// Remove a track, its clips, voices, and nodes. Tracks that were
    /// routed into it fall back to master.
    pub fn remove_track(&mut self, track_id: TrackId) -> Result<(), EngineError> {
        let idx = self
            .project
            .tracks
            .iter()
            .position(|t| t.id == track_id)
            .ok_or(EngineError::NotFound("track"))?;

        let voice_ids: Vec<_> = self
            .pool
            .voices()
            .iter()
            .filter(|v| v.track_id == track_id)
            .map(|v| v.id)
            .collect();
        for id in voice_ids {
            self.pool.retire(&mut self.graph, id);
        }
        let track = self.project.tracks.remove(idx);
        for clip in &track.clips {
            self.cancel_sources_for(clip.id);
            self.scheduler.forget_clip(clip.id);
        }
        if let Some(path) = self.paths.remove(&track_id) {
            path.dispose(&mut self.graph);
        }

        // Re-point orphaned routes at master.
        let master = self.graph.master();
        for track in &mut self.project.tracks {
            if track.output == OutputTarget::Bus(track_id) {
                track.output = OutputTarget::Master;
                if let Some(path) = self.paths.get(&track.id) {
                    path.set_destination(&mut self.graph, master);
                }
            }
        }
        // The removed track may have held the only solo.
        self.apply_mix_all();
        self.recompute_pdc();
        Ok(())
    }

    pub fn set_track_volume(&mut self, track_id: TrackId, volume: f32) -> Result<(), EngineError> {
        self.track_mut(track_id)?.set_volume(volume);
        self.apply_mix_all();
        Ok(())
    }

    pub fn set_track_pan(&mut self, track_id: TrackId, pan: f32) -> Result<(), EngineError> {
        self.track_mut(track_id)?.set_pan(pan);
        self.apply_mix_all();
        Ok(())
    }

    pub fn set_track_muted(&mut self, track_id: TrackId, muted: bool) -> Result<(), EngineError> {
        self.track_mut(track_id)?.muted = muted;
        self.apply_mix_all();
        Ok(())
    }

    pub fn set_track_solo(&mut self, track_id: TrackId, solo: bool) -> Result<(), EngineError> {
        self.track_mut(track_id)?.solo = solo;
        self.apply_mix_all();
        Ok(())
    }

    /// Route a track's output. Refused when the route would close a
    /// feedback loop; nothing changes on failure.
    pub fn set_track_output(
        &mut self,
        track_id: TrackId,
        output: OutputTarget,
    ) -> Result<(), EngineError> {
        if !self.paths.contains_key(&track_id) {
            return Err(EngineError::NotFound("track"));
        }
        if let OutputTarget::Bus(bus) = output {
            if !self.paths.contains_key(&bus) {
                return Err(EngineError::NotFound("bus"));
            }
        }
        let dest = self.resolve_destination(output);
        let path = &self.paths[&track_id];
        if path.routing_would_cycle(&self.graph, dest) {
            return Err(EngineError::InvalidRouting);
        }
        path.set_destination(&mut self.graph, dest);
        self.track_mut(track_id)?.output = output;
        self.recompute_pdc();
        Ok(())
    }

    pub fn set_volume_automation(
        &mut self,
        track_id: TrackId,
        curve: Option<ot_ir::AutomationCurve>,
    ) -> Result<(), EngineError> {
        self.track_mut(track_id)?.volume_automation = curve;
        // Clearing a lane must restore the static fader right away.
        self.apply_mix_all();
        Ok(())
    }

    pub fn set_pan_automation(
        &mut self,
        track_id: TrackId,
        curve: Option<ot_ir::AutomationCurve>,
    ) -> Result<(), EngineError> {
        self.track_mut(track_id)?.pan_automation = curve;
        self.apply_mix_all();
        Ok(())
    }

    // === Clips ===

    pub fn add_midi_clip(
        &mut self,
        track_id: TrackId,
        start_time: f64,
        duration: f64,
        notes: Vec<MidiNote>,
    ) -> Result<ClipId, EngineError> {
        let id = self.next_clip_id;
        let clip = Clip::new(id, track_id, start_time, duration, ClipPayload::Midi(notes));
        self.track_mut(track_id)?.clips.push(clip);
        self.next_clip_id += 1;
        Ok(id)
    }

    /// Add an audio clip. The payload must carry a positive sample
    /// rate; a zero duration defaults to the payload length.
    pub fn add_audio_clip(
        &mut self,
        track_id: TrackId,
        start_time: f64,
        audio: AudioClip,
    ) -> Result<ClipId, EngineError> {
        if audio.sample_rate == 0 || audio.buffer.frames() == 0 {
            return Err(EngineError::DecodeFailed(String::from("empty audio payload")));
        }
        let id = self.next_clip_id;
        let duration = audio.duration();
        let clip = Clip::new(id, track_id, start_time, duration, ClipPayload::Audio(audio));
        self.track_mut(track_id)?.clips.push(clip);
        self.next_clip_id += 1;
        Ok(id)
    }

    /// Remove a clip. Live audio from it stops immediately.
    pub fn remove_clip(&mut self, clip_id: ClipId) -> Result<(), EngineError> {
        let track = self
            .project
            .tracks
            .iter_mut()
            .find(|t| t.clips.iter().any(|c| c.id == clip_id))
            .ok_or(EngineError::NotFound("clip"))?;
        track.clips.retain(|c| c.id != clip_id);
        self.cancel_sources_for(clip_id);
        self.scheduler.forget_clip(clip_id);
        Ok(())
    }

    /// Move a clip to a new start time.
    pub fn move_clip(&mut self, clip_id: ClipId, start_time: f64) -> Result<(), EngineError> {
        let clip = self
            .project
            .tracks
            .iter_mut()
            .flat_map(|t| t.clips.iter_mut())
            .find(|c| c.id == clip_id)
            .ok_or(EngineError::NotFound("clip"))?;
        clip.start_time = start_time.max(0.0);
        self.cancel_sources_for(clip_id);
        self.scheduler.forget_clip(clip_id);
        Ok(())
    }

    // === Effects ===

    /// Instantiate an effect at the end of a track's chain.
    pub fn add_effect(
        &mut self,
        track_id: TrackId,
        name: &str,
        kind: EffectKind,
        latency_samples: u64,
    ) -> Result<PluginId, EngineError> {
        let id = self.next_plugin_id;
        let mut plugin = PluginInstance::new(id, name, kind);
        plugin.latency_samples = latency_samples;

        let path = self
            .paths
            .get_mut(&track_id)
            .ok_or(EngineError::NotFound("track"))?;
        path.add_effect(&mut self.graph, &plugin, self.config.sample_rate);
        self.track_mut(track_id)?.chain.plugins.push(plugin);
        self.next_plugin_id += 1;
        self.recompute_pdc();
        Ok(id)
    }

    pub fn remove_effect(
        &mut self,
        track_id: TrackId,
        plugin_id: PluginId,
    ) -> Result<(), EngineError> {
        let path = self
            .paths
            .get_mut(&track_id)
            .ok_or(EngineError::NotFound("track"))?;
        path.remove_effect(&mut self.graph, plugin_id)?;
        self.track_mut(track_id)?
            .chain
            .plugins
            .retain(|p| p.id != plugin_id);
        self.recompute_pdc();
        Ok(())
    }

    pub fn move_effect(
        &mut self,
        track_id: TrackId,
        plugin_id: PluginId,
        to: usize,
    ) -> Result<(), EngineError> {
        let path = self
            .paths
            .get_mut(&track_id)
            .ok_or(EngineError::NotFound("track"))?;
        path.chain_mut().move_effect(&mut self.graph, plugin_id, to)?;
        let chain = &mut self.track_mut(track_id)?.chain;
        if let Some(from) = chain.plugins.iter().position(|p| p.id == plugin_id) {
            let plugin = chain.plugins.remove(from);
            let to = to.min(chain.plugins.len());
            chain.plugins.insert(to, plugin);
        }
        Ok(())
    }

    pub fn set_effect_bypassed(
        &mut self,
        track_id: TrackId,
        plugin_id: PluginId,
        bypassed: bool,
    ) -> Result<(), EngineError> {
        let path = self
            .paths
            .get_mut(&track_id)
            .ok_or(EngineError::NotFound("track"))?;
        path.chain_mut()
            .set_bypassed(&mut self.graph, plugin_id, bypassed)?;
        if let Some(plugin) = self
            .track_mut(track_id)?
            .chain
            .plugins
            .iter_mut()
            .find(|p| p.id == plugin_id)
        {
            plugin.bypassed = bypassed;
        }
        self.recompute_pdc();
        Ok(())
    }

    pub fn set_chain_wet_dry(
        &mut self,
        track_id: TrackId,
        wet: f32,
        dry: f32,
    ) -> Result<(), EngineError> {
        let path = self
            .paths
            .get(&track_id)
            .ok_or(EngineError::NotFound("track"))?;
        path.chain().set_wet_dry(&mut self.graph, wet, dry);
        let chain = &mut self.track_mut(track_id)?.chain;
        chain.wet = wet.clamp(0.0, 1.0);
        chain.dry = dry.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn clear_effects(&mut self, track_id: TrackId) -> Result<(), EngineError> {
        let path = self
            .paths
            .get_mut(&track_id)
            .ok_or(EngineError::NotFound("track"))?;
        path.chain_mut().clear(&mut self.graph);
        let chain = &mut self.track_mut(track_id)?.chain;
        chain.plugins.clear();
        chain.wet = 0.0;
        chain.dry = 1.0;
        self.recompute_pdc();
        Ok(())
    }

    /// Compensation currently applied to a track, in samples.
    pub fn track_compensation(&self, track_id: TrackId) -> Option<u64> {
        self.paths.get(&track_id).map(|p| p.compensation(&self.graph))
    }

    // === Live input ===

    /// Start a note immediately (live MIDI input). Subject to the
    /// track preset's polyphony cap. Fails while the engine runs
    /// without a device, since the audition cannot be heard.
    pub fn note_on(&mut self, track_id: TrackId, note: u8, velocity: u8) -> Result<(), EngineError> {
        if self.disposed {
            return Ok(());
        }
        if self.unavailable {
            return Err(EngineError::EngineUnavailable);
        }
        let now = self.transport.position();
        self.start_voice(track_id, note, velocity, now)
            .map(|_| ())
    }

    /// Release a live note.
    pub fn note_off(&mut self, track_id: TrackId, note: u8) -> Result<(), EngineError> {
        if self.disposed {
            return Ok(());
        }
        let now = self.transport.position();
        let released =
            self.pool
                .note_off(&mut self.graph, track_id, note, now, self.config.sample_rate);
        for (voice_id, done) in released {
            self.scheduler.defer(done, CompletionAction::RetireVoice(voice_id));
        }
        Ok(())
    }

    // === The pump ===

    /// Process one block: schedule, apply completions, render, advance.
    pub fn tick(&mut self, out: &mut AudioBuffer) -> TickSummary {
        let mut summary = TickSummary::default();
        if self.disposed {
            out.silence();
            return summary;
        }

        let position = self.transport.position();
        let block = self.config.block_frames as u64;

        if self.transport.is_playing() {
            let events =
                self.scheduler
                    .tick(&self.project, position, block, self.config.sample_rate);
            self.apply_events(events, &mut summary);
        }

        for completion in self.scheduler.pop_due(position) {
            match completion.action {
                CompletionAction::ReleaseNote { track_id, note } => {
                    let released = self.pool.note_off(
                        &mut self.graph,
                        track_id,
                        note,
                        completion.at,
                        self.config.sample_rate,
                    );
                    for (voice_id, done) in released {
                        self.scheduler.defer(done, CompletionAction::RetireVoice(voice_id));
                    }
                }
                CompletionAction::RetireVoice(voice_id) => {
                    self.pool.retire(&mut self.graph, voice_id);
                }
                CompletionAction::RemoveSource(key) => {
                    self.graph.remove_node(key);
                    self.live_sources.retain(|(_, k)| *k != key);
                }
            }
        }

        self.apply_automation(position);
        self.renderer.render_block(&mut self.graph, position, out);
        // Release ramps live in absolute time, so a frozen playhead
        // would hold them at their start value and ring forever.
        if self.unavailable || self.transport.state() == TransportState::Paused {
            out.silence();
        }

        let step = self.transport.advance(block);
        if step.wrapped {
            // Absolute-time state is meaningless across the jump.
            self.flush_live_audio();
            self.scheduler.rewind();
            summary.wrapped = true;
            // The landing position may already be past the loop start,
            // so catch up on the span the jump skipped over.
            if let Some(region) = self.transport.loop_region() {
                let span = step.to.saturating_sub(region.start);
                let events = self.scheduler.tick(
                    &self.project,
                    region.start,
                    span,
                    self.config.sample_rate,
                );
                self.apply_events(events, &mut summary);
            }
        }

        if self.transport.is_playing() {
            for callback in &mut self.transport_callbacks {
                callback(step.to);
            }
        }
        summary
    }

    fn apply_events(&mut self, events: Vec<TimelineEvent>, summary: &mut TickSummary) {
        for event in events {
            // One bad clip must not silence the rest of the tick.
            match self.apply_event(event, summary) {
                Ok(()) => {}
                Err(err) => log::warn!("skipping scheduled event: {err}"),
            }
        }
    }

    // === Internals ===

    fn track_mut(&mut self, track_id: TrackId) -> Result<&mut Track, EngineError> {
        self.project
            .tracks
            .iter_mut()
            .find(|t| t.id == track_id)
            .ok_or(EngineError::NotFound("track"))
    }

    fn resolve_destination(&self, output: OutputTarget) -> NodeKey {
        match output {
            OutputTarget::Master => self.graph.master(),
            OutputTarget::Bus(bus) => self
                .paths
                .get(&bus)
                .map(|p| p.input())
                .unwrap_or_else(|| self.graph.master()),
        }
    }

    fn start_voice(
        &mut self,
        track_id: TrackId,
        note: u8,
        velocity: u8,
        at: u64,
    ) -> Result<crate::voice::VoiceId, EngineError> {
        let track = self
            .project
            .tracks
            .iter()
            .find(|t| t.id == track_id)
            .ok_or(EngineError::NotFound("track"))?;
        let preset = track
            .preset
            .clone()
            .ok_or(EngineError::NotFound("preset"))?;
        let input = self
            .paths
            .get(&track_id)
            .map(|p| p.input())
            .ok_or(EngineError::NotFound("track"))?;
        Ok(self.pool.note_on(
            &mut self.graph,
            &preset,
            track_id,
            input,
            note,
            velocity,
            at,
            self.config.sample_rate,
        ))
    }

    fn apply_event(
        &mut self,
        event: TimelineEvent,
        summary: &mut TickSummary,
    ) -> Result<(), EngineError> {
        match event {
            TimelineEvent::NoteOn { track_id, note, velocity, at, .. } => {
                self.start_voice(track_id, note, velocity, at)?;
                summary.notes_started += 1;
            }
            TimelineEvent::NoteOff { track_id, note, at } => {
                // Release ramps live in absolute time, so the release
                // can be scheduled ahead just like the attack.
                let released = self.pool.note_off(
                    &mut self.graph,
                    track_id,
                    note,
                    at,
                    self.config.sample_rate,
                );
                for (voice_id, done) in released {
                    self.scheduler.defer(done, CompletionAction::RetireVoice(voice_id));
                }
            }
            TimelineEvent::AudioStart { track_id, clip_id, at, offset, duration } => {
                let audio = self
                    .project
                    .tracks
                    .iter()
                    .flat_map(|t| t.clips.iter())
                    .find(|c| c.id == clip_id)
                    .and_then(|c| match &c.payload {
                        ClipPayload::Audio(audio) => Some(audio.clone()),
                        ClipPayload::Midi(_) => None,
                    })
                    .ok_or(EngineError::NotFound("clip"))?;
                if audio.sample_rate == 0 {
                    return Err(EngineError::DecodeFailed(String::from(
                        "clip has no sample rate",
                    )));
                }
                let input = self
                    .paths
                    .get(&track_id)
                    .map(|p| p.input())
                    .ok_or(EngineError::NotFound("track"))?;
                // Payload offset is expressed in timeline samples.
                let ratio = audio.sample_rate as f64 / self.config.sample_rate as f64;
                let key = self.graph.add_node(NodeKind::BufferSource(BufferSourceNode {
                    clip_id,
                    audio: Arc::new(audio),
                    start_sample: at,
                    offset_frames: (offset as f64 * ratio).round() as u64,
                    duration_frames: duration,
                    cancelled: false,
                }));
                self.graph.connect(key, input);
                self.live_sources.push((clip_id, key));
                self.scheduler
                    .defer(at + duration, CompletionAction::RemoveSource(key));
                summary.sources_started += 1;
            }
        }
        Ok(())
    }

    /// Push resolved mix state (fader, pan, mute/solo) to every path.
    fn apply_mix_all(&mut self) {
        let any_solo = self.project.tracks.iter().any(|t| t.solo);
        let states: Vec<(TrackId, f32, f32, bool)> = self
            .project
            .tracks
            .iter()
            .map(|t| (t.id, t.volume, t.pan, is_audible(t, any_solo)))
            .collect();
        for (id, volume, pan, audible) in states {
            if let Some(path) = self.paths.get(&id) {
                path.apply_mix(&mut self.graph, volume, pan, audible);
            }
        }
    }

    /// Evaluate automation lanes at the block start and fold the
    /// values into the mix state.
    fn apply_automation(&mut self, position: u64) {
        let time = position as f64 / self.config.sample_rate as f64;
        let any_solo = self.project.tracks.iter().any(|t| t.solo);
        let states: Vec<(TrackId, f32, f32, bool)> = self
            .project
            .tracks
            .iter()
            .filter(|t| t.volume_automation.is_some() || t.pan_automation.is_some())
            .map(|t| {
                let volume = t
                    .volume_automation
                    .as_ref()
                    .map_or(t.volume, |c| evaluate(c, time));
                let pan = t.pan_automation.as_ref().map_or(t.pan, |c| evaluate(c, time));
                (t.id, volume, pan, is_audible(t, any_solo))
            })
            .collect();
        for (id, volume, pan, audible) in states {
            if let Some(path) = self.paths.get(&id) {
                path.apply_mix(&mut self.graph, volume, pan, audible);
            }
        }
    }

    /// Recompute delay compensation for the whole routing tree.
    fn recompute_pdc(&mut self) {
        let paths: BTreeMap<TrackId, PathLatency> = self
            .project
            .tracks
            .iter()
            .filter_map(|t| {
                self.paths.get(&t.id).map(|p| {
                    (t.id, PathLatency { chain_latency: p.chain_latency(), output: t.output })
                })
            })
            .collect();
        let compensation = compute_compensation(&paths);
        for (id, samples) in compensation {
            if let Some(path) = self.paths.get(&id) {
                path.set_compensation(&mut self.graph, samples);
            }
        }
    }

    /// Release everything currently held, with proper release tails.
    fn release_everything(&mut self) {
        let now = self.transport.position();
        let released = self
            .pool
            .release_all(&mut self.graph, now, self.config.sample_rate);
        for (voice_id, done) in released {
            self.scheduler.defer(done, CompletionAction::RetireVoice(voice_id));
        }
    }

    /// Hard-stop all live audio: voices retired, sources removed.
    fn flush_live_audio(&mut self) {
        self.pool.clear(&mut self.graph);
        for (_, key) in self.live_sources.drain(..) {
            self.graph.remove_node(key);
        }
    }

    /// Cancel the live sources of one clip.
    fn cancel_sources_for(&mut self, clip_id: ClipId) {
        let mut removed = Vec::new();
        self.live_sources.retain(|&(id, key)| {
            if id == clip_id {
                removed.push(key);
                false
            } else {
                true
            }
        });
        for key in removed {
            self.graph.remove_node(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ot_ir::{AutomationCurve, CurvePoint, Interp};

    const SR: u32 = 48_000;
    const BLOCK: usize = 512;

    fn engine() -> Engine {
        Engine::new(EngineConfig {
            sample_rate: SR,
            block_frames: BLOCK,
            lookahead_seconds: 0.1,
        })
    }

    fn out_buffer() -> AudioBuffer {
        AudioBuffer::new(2, BLOCK)
    }

    fn run_ticks(engine: &mut Engine, n: usize) -> Vec<TickSummary> {
        let mut out = out_buffer();
        (0..n).map(|_| engine.tick(&mut out)).collect()
    }

    fn midi_note(note: u8, start: f64, duration: f64) -> MidiNote {
        MidiNote { note, velocity: 100, start, duration }
    }

    fn test_audio(seconds: f64) -> AudioClip {
        let frames = (seconds * SR as f64) as usize;
        AudioClip {
            sample_rate: SR,
            buffer: AudioBuffer::from_planar(&[vec![0.5; frames]]),
        }
    }

    #[test]
    fn scheduled_note_starts_within_lookahead() {
        let mut e = engine();
        let track = e.add_track("synth", TrackKind::Midi);
        e.add_midi_clip(track, 0.0, 2.0, vec![midi_note(60, 0.05, 0.5)])
            .unwrap();
        e.play();
        let summaries = run_ticks(&mut e, 1);
        // 0.05s is inside the 0.1s look-ahead of the first tick.
        assert_eq!(summaries[0].notes_started, 1);
        assert_eq!(e.voice_count(), 1);
    }

    #[test]
    fn voice_retires_after_release_tail() {
        let mut e = engine();
        let track = e.add_track("synth", TrackKind::Midi);
        e.add_midi_clip(track, 0.0, 2.0, vec![midi_note(60, 0.0, 0.1)])
            .unwrap();
        e.play();
        run_ticks(&mut e, 1);
        assert_eq!(e.voice_count(), 1);
        // Note off at 0.1s + default release 0.3s = done by 0.4s.
        let ticks_needed = (SR as usize / 2) / BLOCK + 1;
        run_ticks(&mut e, ticks_needed);
        assert_eq!(e.voice_count(), 0);
    }

    #[test]
    fn audio_clip_spawns_and_reaps_a_source() {
        let mut e = engine();
        let track = e.add_track("drums", TrackKind::Audio);
        e.add_audio_clip(track, 0.0, test_audio(0.05)).unwrap();
        e.play();
        let summaries = run_ticks(&mut e, 1);
        assert_eq!(summaries[0].sources_started, 1);
        assert_eq!(e.live_sources.len(), 1);
        // 0.05s of audio is long gone after 0.2s of ticks.
        run_ticks(&mut e, SR as usize / 5 / BLOCK + 1);
        assert!(e.live_sources.is_empty());
    }

    #[test]
    fn rejects_empty_audio_payload() {
        let mut e = engine();
        let track = e.add_track("drums", TrackKind::Audio);
        let bad = AudioClip { sample_rate: 0, buffer: AudioBuffer::new(1, 10) };
        assert!(matches!(
            e.add_audio_clip(track, 0.0, bad),
            Err(EngineError::DecodeFailed(_))
        ));
    }

    #[test]
    fn master_output_carries_scheduled_audio() {
        let mut e = engine();
        let track = e.add_track("drums", TrackKind::Audio);
        e.add_audio_clip(track, 0.0, test_audio(1.0)).unwrap();
        e.play();
        let mut out = out_buffer();
        e.tick(&mut out);
        assert!(out.channel(0).iter().any(|&s| s != 0.0));
    }

    #[test]
    fn muted_track_renders_silence() {
        let mut e = engine();
        let track = e.add_track("drums", TrackKind::Audio);
        e.add_audio_clip(track, 0.0, test_audio(1.0)).unwrap();
        e.set_track_muted(track, true).unwrap();
        e.play();
        let mut out = out_buffer();
        e.tick(&mut out);
        assert!(out.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn solo_elsewhere_silences_unsoloed_track() {
        let mut e = engine();
        let drums = e.add_track("drums", TrackKind::Audio);
        let other = e.add_track("other", TrackKind::Audio);
        e.add_audio_clip(drums, 0.0, test_audio(1.0)).unwrap();
        e.set_track_solo(other, true).unwrap();
        e.play();
        let mut out = out_buffer();
        e.tick(&mut out);
        assert!(out.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn loop_wrap_reschedules_clips() {
        let mut e = engine();
        let track = e.add_track("synth", TrackKind::Midi);
        e.add_midi_clip(track, 0.0, 0.2, vec![midi_note(60, 0.0, 0.05)])
            .unwrap();
        e.set_loop(0.0, 0.2);
        e.play();
        // Run long enough to wrap (0.2s = 9600 samples ≈ 19 blocks).
        let summaries = run_ticks(&mut e, 40);
        let wraps = summaries.iter().filter(|s| s.wrapped).count();
        assert!(wraps >= 2);
        let notes: usize = summaries.iter().map(|s| s.notes_started).sum();
        assert!(notes >= 2, "note must re-fire after each wrap, got {notes}");
    }

    #[test]
    fn seek_cuts_live_audio_and_rescans() {
        let mut e = engine();
        let track = e.add_track("drums", TrackKind::Audio);
        e.add_audio_clip(track, 0.0, test_audio(2.0)).unwrap();
        e.play();
        run_ticks(&mut e, 1);
        assert_eq!(e.live_sources.len(), 1);
        e.seek(1.0);
        assert!(e.live_sources.is_empty());
        // The next tick picks the clip up mid-stream.
        let summaries = run_ticks(&mut e, 1);
        assert_eq!(summaries[0].sources_started, 1);
    }

    #[test]
    fn routing_cycle_is_refused_atomically() {
        let mut e = engine();
        let a = e.add_track("a", TrackKind::Bus);
        let b = e.add_track("b", TrackKind::Bus);
        e.set_track_output(a, OutputTarget::Bus(b)).unwrap();
        let err = e.set_track_output(b, OutputTarget::Bus(a));
        assert_eq!(err, Err(EngineError::InvalidRouting));
        // b still routes to master.
        assert_eq!(e.project().track(b).unwrap().output, OutputTarget::Master);
    }

    #[test]
    fn routing_to_missing_bus_is_not_found() {
        let mut e = engine();
        let a = e.add_track("a", TrackKind::Audio);
        assert_eq!(
            e.set_track_output(a, OutputTarget::Bus(99)),
            Err(EngineError::NotFound("bus"))
        );
    }

    #[test]
    fn effect_latency_pads_sibling_tracks() {
        let mut e = engine();
        let a = e.add_track("a", TrackKind::Audio);
        let b = e.add_track("b", TrackKind::Audio);
        e.add_effect(a, "delay", EffectKind::Delay { seconds: 0.01 }, 480)
            .unwrap();
        assert_eq!(e.track_compensation(a), Some(0));
        assert_eq!(e.track_compensation(b), Some(480));
        // Bypass removes the need for padding.
        let plugin_id = e.project().track(a).unwrap().chain.plugins[0].id;
        e.set_effect_bypassed(a, plugin_id, true).unwrap();
        assert_eq!(e.track_compensation(b), Some(0));
    }

    #[test]
    fn remove_track_repoints_orphans_to_master() {
        let mut e = engine();
        let bus = e.add_track("bus", TrackKind::Bus);
        let a = e.add_track("a", TrackKind::Audio);
        e.set_track_output(a, OutputTarget::Bus(bus)).unwrap();
        e.remove_track(bus).unwrap();
        assert_eq!(e.project().track(a).unwrap().output, OutputTarget::Master);
        // The orphan still renders into master without panicking.
        e.play();
        run_ticks(&mut e, 2);
    }

    #[test]
    fn volume_automation_overrides_static_fader() {
        let mut e = engine();
        let track = e.add_track("drums", TrackKind::Audio);
        e.add_audio_clip(track, 0.0, test_audio(1.0)).unwrap();
        let mut curve = AutomationCurve::default();
        curve.insert(CurvePoint { time: 0.0, value: 0.0, kind: Interp::Step });
        e.set_volume_automation(track, Some(curve)).unwrap();
        e.play();
        let mut out = out_buffer();
        e.tick(&mut out);
        assert!(out.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn dispose_is_idempotent_and_silences_ticks() {
        let mut e = engine();
        let track = e.add_track("drums", TrackKind::Audio);
        e.add_audio_clip(track, 0.0, test_audio(1.0)).unwrap();
        e.play();
        e.dispose();
        e.dispose();
        assert!(e.is_disposed());
        let mut out = out_buffer();
        let summary = e.tick(&mut out);
        assert_eq!(summary, TickSummary::default());
        assert!(out.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn unavailable_engine_keeps_time_but_outputs_silence() {
        let mut e = engine();
        let track = e.add_track("drums", TrackKind::Audio);
        e.add_audio_clip(track, 0.0, test_audio(1.0)).unwrap();
        e.set_unavailable(true);
        e.play();
        let mut out = out_buffer();
        e.tick(&mut out);
        assert!(out.channel(0).iter().all(|&s| s == 0.0));
        assert_eq!(e.transport().position(), BLOCK as u64);
    }

    #[test]
    fn load_project_rebuilds_paths_and_ids() {
        let mut source = engine();
        let track = source.add_track("synth", TrackKind::Midi);
        source
            .add_midi_clip(track, 0.0, 1.0, vec![midi_note(60, 0.0, 0.5)])
            .unwrap();
        let project = source.project().clone();

        let mut e = engine();
        e.load_project(project);
        assert_eq!(e.project().tracks.len(), 1);
        let new_track = e.add_track("second", TrackKind::Audio);
        assert!(new_track > track);
        e.play();
        let summaries = run_ticks(&mut e, 1);
        assert_eq!(summaries[0].notes_started, 1);
    }

    #[test]
    fn polyphony_cap_steals_oldest_scheduled_note() {
        let mut e = engine();
        let track = e.add_track("synth", TrackKind::Midi);
        if let Some(preset) = e.track_mut(track).unwrap().preset.as_mut() {
            preset.polyphony = 2;
        }
        // Three long overlapping notes inside one look-ahead window.
        e.add_midi_clip(
            track,
            0.0,
            4.0,
            vec![
                midi_note(60, 0.0, 3.0),
                midi_note(64, 0.01, 3.0),
                midi_note(67, 0.02, 3.0),
            ],
        )
        .unwrap();
        e.play();
        run_ticks(&mut e, 1);
        assert_eq!(e.voice_count(), 2);
        let notes: Vec<u8> = e.pool.voices().iter().map(|v| v.note).collect();
        assert!(!notes.contains(&60), "oldest note must be stolen");
    }

    #[test]
    fn stop_rewinds_and_allows_clean_restart() {
        let mut e = engine();
        let track = e.add_track("synth", TrackKind::Midi);
        e.add_midi_clip(track, 0.0, 1.0, vec![midi_note(60, 0.0, 0.5)])
            .unwrap();
        e.play();
        run_ticks(&mut e, 3);
        e.stop();
        assert_eq!(e.transport().position(), 0);
        assert_eq!(e.voice_count(), 0);
        e.play();
        let summaries = run_ticks(&mut e, 1);
        assert_eq!(summaries[0].notes_started, 1);
    }

    #[test]
    fn removing_a_playing_clip_cuts_its_source() {
        let mut e = engine();
        let track = e.add_track("drums", TrackKind::Audio);
        let clip = e.add_audio_clip(track, 0.0, test_audio(2.0)).unwrap();
        e.play();
        run_ticks(&mut e, 1);
        assert_eq!(e.live_sources.len(), 1);
        e.remove_clip(clip).unwrap();
        assert!(e.live_sources.is_empty());
        let mut out = out_buffer();
        e.tick(&mut out);
        assert!(out.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn paused_engine_renders_silence() {
        let mut e = engine();
        let track = e.add_track("synth", TrackKind::Midi);
        e.add_midi_clip(track, 0.0, 2.0, vec![midi_note(69, 0.0, 1.5)])
            .unwrap();
        e.play();
        // Let the note reach sustain.
        run_ticks(&mut e, SR as usize / 4 / BLOCK);
        e.pause();

        // Release ramps cannot progress while the playhead is frozen,
        // so the render must be gated.
        let mut out = out_buffer();
        for _ in 0..SR as usize / BLOCK {
            e.tick(&mut out);
            assert!(
                out.channel(0).iter().all(|&s| s == 0.0),
                "paused engine still ringing"
            );
        }
    }

    #[test]
    fn resume_after_pause_completes_release_tails() {
        let mut e = engine();
        let track = e.add_track("synth", TrackKind::Midi);
        e.add_midi_clip(track, 0.0, 2.0, vec![midi_note(69, 0.0, 1.5)])
            .unwrap();
        e.play();
        run_ticks(&mut e, SR as usize / 4 / BLOCK);
        e.pause();
        assert!(e.voice_count() > 0);

        // Once time moves again the pause-released voices retire.
        e.play();
        run_ticks(&mut e, SR as usize / BLOCK);
        assert_eq!(e.voice_count(), 0);
    }

    #[test]
    fn removing_the_soloed_track_restores_the_rest() {
        let mut e = engine();
        let drums = e.add_track("drums", TrackKind::Audio);
        let vox = e.add_track("vox", TrackKind::Audio);
        e.add_audio_clip(drums, 0.0, test_audio(1.0)).unwrap();
        e.set_track_solo(vox, true).unwrap();
        e.play();

        let mut out = out_buffer();
        e.tick(&mut out);
        assert!(out.channel(0).iter().all(|&s| s == 0.0));

        e.remove_track(vox).unwrap();
        e.tick(&mut out);
        assert!(
            out.channel(0).iter().any(|&s| s != 0.0),
            "no solo remains, the surviving track must sound"
        );
    }

    #[test]
    fn transport_callbacks_observe_scheduled_positions() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut e = engine();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        e.add_transport_callback(Box::new(move |pos| sink.borrow_mut().push(pos)));

        // No callback while stopped.
        run_ticks(&mut e, 2);
        assert!(seen.borrow().is_empty());

        e.play();
        run_ticks(&mut e, 3);
        assert_eq!(*seen.borrow(), vec![BLOCK as u64, 2 * BLOCK as u64, 3 * BLOCK as u64]);
    }

    #[test]
    fn clearing_automation_restores_the_static_fader() {
        let mut e = engine();
        let track = e.add_track("drums", TrackKind::Audio);
        e.add_audio_clip(track, 0.0, test_audio(2.0)).unwrap();
        let silent = AutomationCurve::from_points(&[
            CurvePoint::new(0.0, 0.0, Interp::Linear),
            CurvePoint::new(10.0, 0.0, Interp::Linear),
        ]);
        e.set_volume_automation(track, Some(silent)).unwrap();
        e.play();

        let mut out = out_buffer();
        e.tick(&mut out);
        assert!(out.channel(0).iter().all(|&s| s == 0.0));

        e.set_volume_automation(track, None).unwrap();
        e.tick(&mut out);
        assert!(
            out.channel(0).iter().any(|&s| s != 0.0),
            "static fader must take over as soon as the lane is cleared"
        );
    }

    #[test]
    fn live_note_on_fails_without_a_device() {
        let mut e = engine();
        let track = e.add_track("synth", TrackKind::Midi);
        e.set_unavailable(true);
        e.play();
        assert_eq!(
            e.note_on(track, 60, 100),
            Err(EngineError::EngineUnavailable)
        );
        // Releasing is still accepted; there is nothing to hear.
        assert!(e.note_off(track, 60).is_ok());
    }

    #[test]
    fn recording_follows_the_transport() {
        let mut e = engine();
        e.set_recording(true);
        assert!(!e.transport().is_recording());
        e.play();
        e.set_recording(true);
        assert!(e.transport().is_recording());
        e.stop();
        assert!(!e.transport().is_recording());
    }
}
