//! Transport clock: the single source of truth for playback position.
//!
//! The transport maps wall-clock time to musical position at reference
//! tempo. Position is re-anchored on play, seek, and tempo change, so
//! `position()` is always `anchored_position + elapsed * tempo` while
//! playing and constant while paused. Note data never needs rewriting
//! when the tempo multiplier changes.
//!
//! All mutators are single atomic state updates from the scheduler's
//! point of view: there is exactly one writer (the host thread that also
//! drives the tick loop), so the scheduler always observes a fully
//! updated transport on its next tick.

use std::time::Instant;

/// Tempo multiplier bounds for the transport.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// Slowest allowed tempo multiplier.
    pub min_tempo: f64,
    /// Fastest allowed tempo multiplier.
    pub max_tempo: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            min_tempo: 0.25,
            max_tempo: 2.0,
        }
    }
}

/// Authoritative playback clock for one session.
///
/// Positions are seconds at reference tempo. The tempo multiplier scales
/// how fast wall-clock time advances the position; 1.0 is reference speed.
#[derive(Debug)]
pub struct Transport {
    config: TransportConfig,
    /// Total piece duration in reference seconds; seek targets clamp to it.
    duration: f64,
    tempo: f64,
    /// Position at reference tempo, fixed as of `anchor`.
    position: f64,
    /// Wall-clock instant `position` was last fixed. `Some` while playing.
    anchor: Option<Instant>,
}

impl Transport {
    /// Creates a stopped transport at position 0 with tempo 1.0.
    pub fn new(duration: f64, config: TransportConfig) -> Self {
        Self {
            config,
            duration: duration.max(0.0),
            tempo: 1.0,
            position: 0.0,
            anchor: None,
        }
    }

    /// Returns whether the transport is playing.
    pub fn is_playing(&self) -> bool {
        self.anchor.is_some()
    }

    /// Returns the current tempo multiplier.
    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Returns the total duration in reference seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Starts playback from the current position. No-op if already playing.
    pub fn play(&mut self) {
        self.play_at(Instant::now());
    }

    pub(crate) fn play_at(&mut self, now: Instant) {
        if self.anchor.is_none() {
            self.anchor = Some(now);
            tracing::debug!(position = self.position, "Transport play");
        }
    }

    /// Pauses playback, folding elapsed time into the position.
    /// No-op if already paused.
    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    pub(crate) fn pause_at(&mut self, now: Instant) {
        if self.anchor.is_some() {
            self.position = self.position_at(now);
            self.anchor = None;
            tracing::debug!(position = self.position, "Transport pause");
        }
    }

    /// Stops playback and resets the position to 0.
    pub fn stop(&mut self) {
        self.position = 0.0;
        self.anchor = None;
        tracing::debug!("Transport stop");
    }

    /// Jumps to a position, clamped to `[0, duration]`.
    ///
    /// Out-of-range targets are an expected UI edge case, not an error.
    /// When playing, the wall-clock anchor restarts at the new position.
    pub fn seek(&mut self, position: f64) {
        self.seek_at(position, Instant::now());
    }

    pub(crate) fn seek_at(&mut self, position: f64, now: Instant) {
        let target = if position.is_finite() { position } else { 0.0 };
        self.position = target.clamp(0.0, self.duration);
        if self.anchor.is_some() {
            self.anchor = Some(now);
        }
        tracing::debug!(position = self.position, "Transport seek");
    }

    /// Changes the tempo multiplier, clamped to the configured bounds.
    ///
    /// When playing, elapsed progress is folded into the position first,
    /// so the musical position is continuous across the change.
    pub fn set_tempo(&mut self, tempo: f64) {
        self.set_tempo_at(tempo, Instant::now());
    }

    pub(crate) fn set_tempo_at(&mut self, tempo: f64, now: Instant) {
        if self.anchor.is_some() {
            self.position = self.position_at(now);
            self.anchor = Some(now);
        }
        let tempo = if tempo.is_finite() { tempo } else { 1.0 };
        self.tempo = tempo.clamp(self.config.min_tempo, self.config.max_tempo);
        tracing::debug!(tempo = self.tempo, "Transport tempo");
    }

    /// Returns the current position in reference seconds.
    ///
    /// Monotonically non-decreasing while playing, constant while paused,
    /// except across explicit `seek` and `stop`.
    pub fn position(&self) -> f64 {
        self.position_at(Instant::now())
    }

    pub(crate) fn position_at(&self, now: Instant) -> f64 {
        match self.anchor {
            Some(anchor) => {
                let elapsed = now.saturating_duration_since(anchor).as_secs_f64();
                self.position + elapsed * self.tempo
            }
            None => self.position,
        }
    }
}
