//! Overtone CLI — headless playback and WAV export.
//!
//! Usage:
//!   ot-cli path/to/project.json
//!   ot-cli path/to/project.json --wav output.wav

use std::io::Write;
use std::{env, fs};

use ot_engine::EngineConfig;
use ot_master::Controller;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let path = args.get(1).unwrap_or_else(|| {
        eprintln!("Usage: ot-cli <project.json> [--wav output.wav]");
        std::process::exit(1);
    });

    let wav_path = args
        .iter()
        .position(|a| a == "--wav")
        .and_then(|i| args.get(i + 1))
        .cloned();

    let json = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {}", path, e);
        std::process::exit(1);
    });

    let mut ctrl = Controller::new(EngineConfig::default());
    ctrl.load_json(&json).unwrap_or_else(|e| {
        eprintln!("Failed to parse project: {}", e);
        std::process::exit(1);
    });

    let project = ctrl.project();
    println!("Project:  {}", project.name);
    println!("Tempo:    {} BPM", project.bpm);
    println!("Tracks:   {}", project.tracks.len());
    let clips: usize = project.tracks.iter().map(|t| t.clips.len()).sum();
    println!("Clips:    {}", clips);
    println!();

    match wav_path {
        Some(wav) => render_to_wav(&ctrl, &wav),
        None => play_audio(&mut ctrl),
    }
}

fn play_audio(ctrl: &mut Controller) {
    ctrl.play();
    println!("Playing...");

    while ctrl.is_playing() {
        if let Some(seconds) = ctrl.position_seconds() {
            print!("\r{:8.2}s", seconds);
            let _ = std::io::stdout().flush();
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    println!("\rDone.       ");
}

fn render_to_wav(ctrl: &Controller, path: &str) {
    let max_seconds: u32 = 300;
    println!("Rendering to {}...", path);

    let wav = ctrl.render_to_wav(max_seconds).unwrap_or_else(|e| {
        eprintln!("Render failed: {}", e);
        std::process::exit(1);
    });
    println!("Rendered {} bytes", wav.len());

    fs::write(path, &wav).unwrap_or_else(|e| {
        eprintln!("Failed to write {}: {}", path, e);
        std::process::exit(1);
    });

    println!("Done.");
}
