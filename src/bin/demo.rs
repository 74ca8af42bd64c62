//! keyplay-demo - plays a short two-hand phrase through the engine.
//!
//! Drives the engine with a plain sleep loop at roughly 120 Hz, the same
//! way a UI host would drive it from a frame callback. Uses the built-in
//! oscillator backend by default, or a SoundFont when one is given.
//!
//! ```bash
//! cargo run --bin keyplay-demo
//! cargo run --bin keyplay-demo -- --soundfont path/to/font.sf2
//! ```

use anyhow::{Context, Result};
use keyplay::{
    EngineConfig, Hand, Note, PlaybackEngine, SoundFontInstrument,
};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// Tick interval for the driver loop (~120 Hz).
const TICK_INTERVAL: Duration = Duration::from_millis(8);

/// Command-line options for the demo.
struct CliOptions {
    /// Path to a custom SoundFont file.
    soundfont: Option<PathBuf>,
    /// Tempo multiplier to play at.
    tempo: f64,
}

impl CliOptions {
    /// Parses command-line arguments.
    ///
    /// Supports:
    /// - `--soundfont <path>` or `-sf <path>`: use a SoundFont backend
    /// - `--tempo <multiplier>` or `-t <multiplier>`: playback speed
    /// - `--help` or `-h`: print help and exit
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut soundfont: Option<PathBuf> = None;
        let mut tempo = 1.0;
        let mut i = 1;

        while i < args.len() {
            match args[i].as_str() {
                "--soundfont" | "-sf" => {
                    i += 1;
                    if i >= args.len() {
                        anyhow::bail!("--soundfont requires a path argument");
                    }
                    soundfont = Some(PathBuf::from(&args[i]));
                }
                "--tempo" | "-t" => {
                    i += 1;
                    if i >= args.len() {
                        anyhow::bail!("--tempo requires a multiplier argument");
                    }
                    tempo = args[i]
                        .parse()
                        .with_context(|| format!("invalid tempo: {}", args[i]))?;
                }
                "--help" | "-h" => {
                    eprintln!("keyplay-demo - plays a short phrase through the engine");
                    eprintln!();
                    eprintln!(
                        "Usage: {} [OPTIONS]",
                        args.first().map(String::as_str).unwrap_or("keyplay-demo")
                    );
                    eprintln!();
                    eprintln!("Options:");
                    eprintln!("  -sf, --soundfont PATH  Use a SoundFont backend (.sf2)");
                    eprintln!("  -t, --tempo RATE       Tempo multiplier (clamped to 0.25-2.0)");
                    eprintln!("  -h, --help             Print this help message");
                    std::process::exit(0);
                }
                other => anyhow::bail!("unknown option: {}", other),
            }
            i += 1;
        }

        Ok(Self { soundfont, tempo })
    }
}

/// A C major phrase: melody in the right hand over held fifths in the left.
fn demo_notes() -> (Vec<Note>, f64) {
    let melody = [60, 62, 64, 65, 67, 65, 64, 62];
    let mut notes = Vec::new();
    for (i, &pitch) in melody.iter().enumerate() {
        notes.push(Note::new(pitch, 100, i as f64 * 0.5, 0.45).with_hand(Hand::Right));
    }
    for (i, &root) in [48u8, 43, 48].iter().enumerate() {
        let start = i as f64 * 1.5;
        notes.push(Note::new(root, 80, start, 1.4).with_hand(Hand::Left));
        notes.push(Note::new(root + 7, 70, start, 1.4).with_hand(Hand::Left));
    }
    (notes, 4.5)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let options = CliOptions::parse()?;
    let (notes, duration) = demo_notes();
    let config = EngineConfig::default();

    let mut engine = match options.soundfont {
        Some(path) => {
            let instrument = SoundFontInstrument::new(&path)
                .with_context(|| format!("failed to load SoundFont {}", path.display()))?;
            PlaybackEngine::with_instrument(notes, duration, config, Box::new(instrument))
        }
        None => PlaybackEngine::new(notes, duration, config),
    };

    if !engine.audio_available() {
        eprintln!("No audio output available; running silently.");
    }

    engine.set_tempo(options.tempo);
    engine.play();
    println!(
        "Playing {:.1}s at {:.2}x...",
        engine.duration(),
        engine.tempo()
    );

    let mut last_printed = -1i64;
    loop {
        let snapshot = engine.tick();
        if !snapshot.is_playing {
            break;
        }
        let second = snapshot.current_time as i64;
        if second > last_printed {
            last_printed = second;
            let pitches: Vec<String> = snapshot
                .active_pitches
                .iter()
                .map(|&p| keyplay::note::note_to_name(p))
                .collect();
            println!("t={:>4.1}s  sounding: {}", snapshot.current_time, pitches.join(" "));
        }
        thread::sleep(TICK_INTERVAL);
    }

    println!("Done.");
    engine.close();
    Ok(())
}
