//! Playback engine: the polling scheduler that drives an instrument so
//! the audible result matches the note list against the transport clock.
//!
//! The engine is driven by an external tick source (display refresh,
//! fixed-rate timer, anything); it makes no cadence assumptions. Each
//! tick it queries the transport, dispatches note starts inside a small
//! look-ahead window (the per-voice start delay absorbs polling jitter),
//! and recomputes the set of currently sounding pitches from the full
//! note list. The rescan is O(n) per tick, which stays well under the
//! tick budget for note lists in the low thousands.

use crate::note::{validate_notes, Note, NoteId};
use crate::synth::{Instrument, OscillatorInstrument, SilentInstrument};
use crate::transport::{Transport, TransportConfig};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::time::{Duration, Instant};

/// Scheduler and transport tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Wall-clock look-ahead for note dispatch. Must comfortably exceed
    /// the host's tick interval or notes will start late.
    pub look_ahead: Duration,
    /// Tempo bounds for the transport.
    pub transport: TransportConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            look_ahead: Duration::from_millis(100),
            transport: TransportConfig::default(),
        }
    }
}

/// Observable playback state, published once per tick.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackSnapshot {
    pub is_playing: bool,
    /// Position in seconds at reference tempo.
    pub current_time: f64,
    /// Total duration in seconds at reference tempo.
    pub duration: f64,
    /// Current tempo multiplier.
    pub tempo: f64,
    /// Pitches sounding at `current_time`, for visual synchronization.
    pub active_pitches: BTreeSet<u8>,
}

/// Real-time MIDI playback engine for one session.
///
/// Owns the validated note list, the transport clock, the dispatch
/// bookkeeping, and the synthesis backend. All methods are synchronous
/// and intended to be called from a single thread; the audio backend
/// runs on its own thread behind the [`Instrument`] boundary.
pub struct PlaybackEngine {
    notes: Vec<Note>,
    transport: Transport,
    /// Note ids already dispatched in the current playback pass.
    scheduled: HashSet<NoteId>,
    /// Notes starting before this position are not eligible for dispatch.
    /// Reset on play, seek, and stop.
    pass_origin: f64,
    active: BTreeSet<u8>,
    instrument: Box<dyn Instrument>,
    look_ahead: Duration,
    audio_available: bool,
}

impl PlaybackEngine {
    /// Creates an engine with the default oscillator backend.
    ///
    /// If audio output cannot be opened (no device, host policy), the
    /// engine degrades to a silent backend: scheduling, position
    /// tracking, and active-pitch publication keep working, and
    /// [`audio_available`](Self::audio_available) reports the failure.
    pub fn new(notes: Vec<Note>, duration: f64, config: EngineConfig) -> Self {
        match OscillatorInstrument::new() {
            Ok(instrument) => Self::build(notes, duration, config, Box::new(instrument), true),
            Err(e) => {
                tracing::warn!("Audio output unavailable, running silent: {}", e);
                Self::build(notes, duration, config, Box::new(SilentInstrument), false)
            }
        }
    }

    /// Creates an engine with an explicit synthesis backend.
    pub fn with_instrument(
        notes: Vec<Note>,
        duration: f64,
        config: EngineConfig,
        instrument: Box<dyn Instrument>,
    ) -> Self {
        Self::build(notes, duration, config, instrument, true)
    }

    fn build(
        notes: Vec<Note>,
        duration: f64,
        config: EngineConfig,
        instrument: Box<dyn Instrument>,
        audio_available: bool,
    ) -> Self {
        Self {
            notes: validate_notes(notes),
            transport: Transport::new(duration, config.transport),
            scheduled: HashSet::new(),
            pass_origin: 0.0,
            active: BTreeSet::new(),
            instrument,
            look_ahead: config.look_ahead,
            audio_available,
        }
    }

    /// Returns whether a real audio backend is attached.
    pub fn audio_available(&self) -> bool {
        self.audio_available
    }

    /// Returns whether the transport is playing.
    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    /// Returns the current position in reference seconds.
    pub fn position(&self) -> f64 {
        self.transport.position()
    }

    /// Returns the total duration in reference seconds.
    pub fn duration(&self) -> f64 {
        self.transport.duration()
    }

    /// Returns the current tempo multiplier.
    pub fn tempo(&self) -> f64 {
        self.transport.tempo()
    }

    /// Returns the pitches sounding as of the last tick.
    pub fn active_pitches(&self) -> &BTreeSet<u8> {
        &self.active
    }

    /// Starts playback from the current position. No-op while playing.
    pub fn play(&mut self) {
        self.play_at(Instant::now());
    }

    fn play_at(&mut self, now: Instant) {
        if self.transport.is_playing() {
            return;
        }
        self.pass_origin = self.transport.position_at(now);
        self.transport.play_at(now);
    }

    /// Pauses playback, releasing all voices. Notes cancelled before
    /// their start become eligible again on resume; notes already
    /// sounding are not resumed mid-note. No-op while paused.
    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    fn pause_at(&mut self, now: Instant) {
        if !self.transport.is_playing() {
            return;
        }
        self.transport.pause_at(now);
        let pos = self.transport.position_at(now);
        for note in &self.notes {
            if note.start >= pos {
                self.scheduled.remove(&note.id);
            }
        }
        self.instrument.stop_all();
    }

    /// Stops playback, resets the position to 0, and clears all
    /// scheduling state.
    pub fn stop(&mut self) {
        self.transport.stop();
        self.scheduled.clear();
        self.pass_origin = 0.0;
        self.active.clear();
        self.instrument.stop_all();
    }

    /// Jumps to a position (clamped to `[0, duration]`), cancelling all
    /// in-flight scheduling. Every note at or after the target becomes
    /// eligible to play again, including notes a backward seek re-crosses.
    pub fn seek(&mut self, position: f64) {
        self.seek_at(position, Instant::now());
    }

    fn seek_at(&mut self, position: f64, now: Instant) {
        self.transport.seek_at(position, now);
        self.pass_origin = self.transport.position_at(now);
        self.scheduled.clear();
        self.instrument.stop_all();
    }

    /// Changes the tempo multiplier (clamped to the configured bounds).
    ///
    /// Dispatched voices carry wall-clock durations computed under the
    /// old tempo, so while playing they are released and anything not yet
    /// started is re-dispatched under the new tempo on the next tick.
    pub fn set_tempo(&mut self, tempo: f64) {
        self.set_tempo_at(tempo, Instant::now());
    }

    fn set_tempo_at(&mut self, tempo: f64, now: Instant) {
        self.transport.set_tempo_at(tempo, now);
        if self.transport.is_playing() {
            let pos = self.transport.position_at(now);
            for note in &self.notes {
                if note.start >= pos {
                    self.scheduled.remove(&note.id);
                }
            }
            self.instrument.stop_all();
        }
    }

    /// Plays a one-shot preview note, bypassing the scheduler and the
    /// transport entirely (used for key-press preview UIs).
    pub fn play_note(&mut self, pitch: u8, velocity: u8, duration: Duration) {
        self.instrument
            .start(pitch.min(127), velocity.min(127), Duration::ZERO, duration);
    }

    /// Stops a preview note started with [`play_note`](Self::play_note).
    pub fn stop_note(&mut self, pitch: u8) {
        self.instrument.stop(pitch);
    }

    /// Advances the engine by one tick and publishes the updated state.
    ///
    /// Call once per host tick at any cadence; 60-120 Hz keeps note
    /// starts inside the look-ahead window.
    pub fn tick(&mut self) -> PlaybackSnapshot {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> PlaybackSnapshot {
        if !self.transport.is_playing() {
            self.instrument.process(now);
            self.active.clear();
            return self.snapshot_at(self.transport.position_at(now));
        }

        let pos = self.transport.position_at(now);
        if pos >= self.transport.duration() {
            // End of playback: release everything and rewind.
            self.instrument.stop_all();
            self.instrument.process(now);
            self.transport.stop();
            self.scheduled.clear();
            self.pass_origin = 0.0;
            self.active.clear();
            return self.snapshot_at(0.0);
        }

        // Dispatch note starts inside the look-ahead window. The window
        // is scaled by tempo so its wall-clock size stays constant. Notes
        // the loop overshot (a dropped frame longer than the window) are
        // caught up with zero delay rather than skipped.
        let tempo = self.transport.tempo();
        let window_end = pos + self.look_ahead.as_secs_f64() * tempo;
        for note in &self.notes {
            if note.start >= self.pass_origin
                && note.start < window_end
                && !self.scheduled.contains(&note.id)
            {
                self.scheduled.insert(note.id);
                let delay = Duration::from_secs_f64(((note.start - pos) / tempo).max(0.0));
                let scaled = Duration::from_secs_f64(note.duration / tempo);
                self.instrument.start(note.pitch, note.velocity, delay, scaled);
            }
        }

        self.instrument.process(now);

        self.active.clear();
        for note in &self.notes {
            if note.is_active_at(pos) {
                self.active.insert(note.pitch);
            }
        }

        self.snapshot_at(pos)
    }

    fn snapshot_at(&self, position: f64) -> PlaybackSnapshot {
        PlaybackSnapshot {
            is_playing: self.transport.is_playing(),
            current_time: position,
            duration: self.transport.duration(),
            tempo: self.transport.tempo(),
            active_pitches: self.active.clone(),
        }
    }

    /// Releases all audio resources and detaches the backend. The engine
    /// remains usable in silent mode. Also performed on drop, so cleanup
    /// is deterministic on every exit path.
    pub fn close(&mut self) {
        self.instrument.stop_all();
        self.instrument = Box::new(SilentInstrument);
        self.audio_available = false;
        self.transport.stop();
        self.scheduled.clear();
        self.active.clear();
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.instrument.stop_all();
    }
}
