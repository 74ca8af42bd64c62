//! Synthesis backends for the playback engine.
//!
//! Anything that can start and stop a pitched voice with an envelope can
//! sit behind the [`Instrument`] trait: the hand-rolled oscillator
//! backend, the SoundFont backend, or the silent fallback used when no
//! audio output is available.

mod oscillator;
mod soundfont;

pub use oscillator::OscillatorInstrument;
pub use soundfont::SoundFontInstrument;

use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Sample rate for audio synthesis (44.1 kHz standard).
pub const SAMPLE_RATE: u32 = 44100;

/// Errors constructing a synthesis backend.
///
/// These are the only hard failures the engine surfaces; everything at
/// playback time degrades gracefully instead.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to open audio output")]
    Output(#[from] rodio::StreamError),

    #[error("failed to start audio stream")]
    Stream(#[from] rodio::PlayError),

    #[error("failed to read SoundFont {path}")]
    SoundFontIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid SoundFont {path}: {reason}")]
    SoundFont { path: PathBuf, reason: String },
}

/// A polyphonic instrument the scheduler can drive.
///
/// Implementations guarantee at most one voice per pitch: retriggering a
/// sounding pitch force-stops the old voice first. Voices self-release
/// after their duration; `stop` begins the release early.
///
/// Not required to be `Send`: the engine is single-threaded and the audio
/// output stream is pinned to the thread that created it.
pub trait Instrument {
    /// Begins a voice for `pitch` after `delay` of wall-clock time,
    /// self-releasing after `duration`. `delay` absorbs the scheduler's
    /// look-ahead so note starts are not quantized to the tick cadence.
    fn start(&mut self, pitch: u8, velocity: u8, delay: Duration, duration: Duration);

    /// Begins the release of the voice for `pitch`, if one is sounding.
    fn stop(&mut self, pitch: u8);

    /// Releases every active voice. Used on pause, stop, seek, tempo
    /// change, and teardown.
    fn stop_all(&mut self);

    /// Per-tick housekeeping: dispatch due events, reap finished voices.
    fn process(&mut self, _now: Instant) {}
}

/// No-op backend for degraded or headless operation.
///
/// When audio output cannot be opened, the engine swaps this in so that
/// position tracking and active-pitch publication keep working; sound is
/// a side effect, not a correctness dependency.
#[derive(Debug, Default)]
pub struct SilentInstrument;

impl Instrument for SilentInstrument {
    fn start(&mut self, _pitch: u8, _velocity: u8, _delay: Duration, _duration: Duration) {}

    fn stop(&mut self, _pitch: u8) {}

    fn stop_all(&mut self) {}
}
