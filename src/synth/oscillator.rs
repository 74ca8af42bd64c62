//! Hand-rolled oscillator backend: one sine voice per pitch, shaped by an
//! ADSR envelope, mixed by rodio.
//!
//! Each voice is a self-terminating rodio `Source`: it emits leading
//! silence for its scheduled delay (so note starts are sample-accurate
//! rather than tick-quantized), renders `sin * envelope * gain`, and
//! returns `None` once the release completes, at which point rodio drops
//! it. The pool only keeps a release flag per pitch; the audio thread
//! owns the sample generation.

use super::{BackendError, Instrument, SAMPLE_RATE};
use crate::note::pitch_to_freq;
use rodio::{OutputStream, OutputStreamHandle, Source};
use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Attack ramp length.
const ATTACK: Duration = Duration::from_millis(10);
/// Decay ramp length.
const DECAY: Duration = Duration::from_millis(80);
/// Sustain level relative to peak.
const SUSTAIN_LEVEL: f32 = 0.75;
/// Release ramp length.
const RELEASE: Duration = Duration::from_millis(120);

/// Loudness follows a power law of normalized velocity.
const VELOCITY_CURVE: f32 = 1.5;
/// Per-voice gain headroom so dense chords do not clip the mixer.
const VOICE_GAIN: f32 = 0.2;

fn to_samples(d: Duration) -> usize {
    (d.as_secs_f64() * SAMPLE_RATE as f64) as usize
}

/// Attack-decay-sustain-release amplitude envelope, advanced per sample.
///
/// The sustained shape (attack ramp, decay ramp, sustain hold) is
/// multiplied by a release ramp that begins at `duration - release`, or
/// immediately for notes shorter than the release. Both factors are
/// continuous, so an early release never pops.
struct Adsr {
    attack: usize,
    decay: usize,
    sustain: f32,
    release: usize,
    /// Sample index where the release ramp begins.
    release_at: usize,
    pos: usize,
}

impl Adsr {
    fn new(total_samples: usize) -> Self {
        let release = to_samples(RELEASE).max(1);
        Self {
            attack: to_samples(ATTACK).max(1),
            decay: to_samples(DECAY).max(1),
            sustain: SUSTAIN_LEVEL,
            release,
            release_at: total_samples.saturating_sub(release),
            pos: 0,
        }
    }

    /// Begins the release ramp at the current sample, if it has not
    /// already begun.
    fn release_now(&mut self) {
        self.release_at = self.release_at.min(self.pos);
    }

    fn is_complete(&self) -> bool {
        self.pos >= self.release_at + self.release
    }

    /// Returns the amplitude for the current sample and advances,
    /// or `None` once the release has completed.
    fn next(&mut self) -> Option<f32> {
        if self.is_complete() {
            return None;
        }
        let pos = self.pos;
        let shape = if pos < self.attack {
            pos as f32 / self.attack as f32
        } else if pos < self.attack + self.decay {
            1.0 - (1.0 - self.sustain) * ((pos - self.attack) as f32 / self.decay as f32)
        } else {
            self.sustain
        };
        let ramp = if pos < self.release_at {
            1.0
        } else {
            1.0 - (pos - self.release_at) as f32 / self.release as f32
        };
        self.pos += 1;
        Some(shape * ramp)
    }
}

/// A single sounding pitch as a rodio source.
struct VoiceSource {
    phase: f32,
    phase_incr: f32,
    gain: f32,
    /// Leading silence implementing the scheduled start delay.
    delay_samples: usize,
    envelope: Adsr,
    /// Set by the pool to begin the release early (stop, seek, retrigger).
    release: Arc<AtomicBool>,
}

impl VoiceSource {
    fn new(
        pitch: u8,
        velocity: u8,
        delay: Duration,
        duration: Duration,
        release: Arc<AtomicBool>,
    ) -> Self {
        Self {
            phase: 0.0,
            phase_incr: TAU * pitch_to_freq(pitch) as f32 / SAMPLE_RATE as f32,
            gain: (velocity as f32 / 127.0).powf(VELOCITY_CURVE) * VOICE_GAIN,
            delay_samples: to_samples(delay),
            envelope: Adsr::new(to_samples(duration)),
            release,
        }
    }
}

impl Iterator for VoiceSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let released = self.release.load(Ordering::Relaxed);
        if self.delay_samples > 0 {
            // Cancelled before it ever sounded (e.g. a seek during the
            // look-ahead window): end without rendering anything.
            if released {
                return None;
            }
            self.delay_samples -= 1;
            return Some(0.0);
        }
        if released {
            self.envelope.release_now();
        }
        let amplitude = self.envelope.next()?;
        let sample = self.phase.sin() * amplitude * self.gain;
        self.phase += self.phase_incr;
        if self.phase > TAU {
            self.phase -= TAU;
        }
        Some(sample)
    }
}

impl Source for VoiceSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        None // Ends when the envelope completes.
    }
}

/// Bookkeeping for one dispatched voice. The sample generation lives on
/// the audio thread; this is just the control side.
struct VoiceHandle {
    release: Arc<AtomicBool>,
    /// Latest wall-clock instant the voice can still be sounding.
    ends_at: Instant,
}

/// Oscillator-based polyphonic instrument.
///
/// Keeps at most one voice per pitch; retriggering a sounding pitch
/// force-releases the old voice before starting the new one.
pub struct OscillatorInstrument {
    // Dropping the stream kills audio output; hold it for our lifetime.
    _stream: OutputStream,
    handle: OutputStreamHandle,
    voices: HashMap<u8, VoiceHandle>,
}

impl OscillatorInstrument {
    /// Opens the default audio output.
    pub fn new() -> Result<Self, BackendError> {
        let (stream, handle) = OutputStream::try_default()?;
        Ok(Self {
            _stream: stream,
            handle,
            voices: HashMap::new(),
        })
    }

    fn release_voice(voice: VoiceHandle) {
        voice.release.store(true, Ordering::Relaxed);
    }
}

impl Instrument for OscillatorInstrument {
    fn start(&mut self, pitch: u8, velocity: u8, delay: Duration, duration: Duration) {
        if let Some(old) = self.voices.remove(&pitch) {
            Self::release_voice(old);
        }
        let release = Arc::new(AtomicBool::new(false));
        let source = VoiceSource::new(pitch, velocity, delay, duration, Arc::clone(&release));
        if let Err(e) = self.handle.play_raw(source) {
            tracing::warn!(pitch, "Failed to start voice: {}", e);
            return;
        }
        // A short note still runs its full release ramp.
        let ends_at = Instant::now() + delay + duration.max(RELEASE);
        self.voices.insert(pitch, VoiceHandle { release, ends_at });
    }

    fn stop(&mut self, pitch: u8) {
        if let Some(voice) = self.voices.remove(&pitch) {
            Self::release_voice(voice);
        }
    }

    fn stop_all(&mut self) {
        for (_, voice) in self.voices.drain() {
            Self::release_voice(voice);
        }
    }

    fn process(&mut self, now: Instant) {
        // Voices self-dispose on the audio thread; drop stale handles here.
        self.voices.retain(|_, voice| voice.ends_at > now);
    }
}

impl Drop for OscillatorInstrument {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adsr_attack_ramps_up() {
        let mut adsr = Adsr::new(to_samples(Duration::from_secs(1)));
        let first = adsr.next().unwrap();
        assert!(first < 0.01);
        let mut last = first;
        for _ in 0..100 {
            let amp = adsr.next().unwrap();
            assert!(amp >= last);
            last = amp;
        }
        assert!(last > 0.1);
    }

    #[test]
    fn test_adsr_reaches_sustain() {
        let mut adsr = Adsr::new(to_samples(Duration::from_secs(1)));
        // Skip past attack and decay.
        for _ in 0..to_samples(ATTACK) + to_samples(DECAY) + 10 {
            adsr.next().unwrap();
        }
        let amp = adsr.next().unwrap();
        assert!((amp - SUSTAIN_LEVEL).abs() < 0.01);
    }

    #[test]
    fn test_adsr_completes_at_duration() {
        let total = to_samples(Duration::from_millis(500));
        let mut adsr = Adsr::new(total);
        let produced = std::iter::from_fn(|| adsr.next()).count();
        assert_eq!(produced, total);
    }

    #[test]
    fn test_adsr_ends_near_zero() {
        let total = to_samples(Duration::from_millis(500));
        let mut adsr = Adsr::new(total);
        let mut last = 0.0;
        while let Some(amp) = adsr.next() {
            last = amp;
        }
        assert!(last < 0.01);
    }

    #[test]
    fn test_adsr_early_release_shortens_voice() {
        let total = to_samples(Duration::from_secs(10));
        let mut adsr = Adsr::new(total);
        for _ in 0..1000 {
            adsr.next().unwrap();
        }
        adsr.release_now();
        let remaining = std::iter::from_fn(|| adsr.next()).count();
        assert_eq!(remaining, to_samples(RELEASE));
    }

    #[test]
    fn test_adsr_short_note_releases_immediately() {
        // Duration below the release length: the ramp starts at sample 0.
        let total = to_samples(Duration::from_millis(50));
        let mut adsr = Adsr::new(total);
        let produced = std::iter::from_fn(|| adsr.next()).count();
        assert_eq!(produced, to_samples(RELEASE));
    }

    #[test]
    fn test_voice_delay_is_silent() {
        let flag = Arc::new(AtomicBool::new(false));
        let delay = Duration::from_millis(50);
        let mut voice = VoiceSource::new(69, 100, delay, Duration::from_secs(1), flag);
        for _ in 0..to_samples(delay) {
            assert_eq!(voice.next(), Some(0.0));
        }
        // Past the delay the envelope opens and samples become audible.
        let heard = (0..2000).filter_map(|_| voice.next()).any(|s| s.abs() > 0.01);
        assert!(heard);
    }

    #[test]
    fn test_voice_terminates() {
        let flag = Arc::new(AtomicBool::new(false));
        let duration = Duration::from_millis(200);
        let mut voice = VoiceSource::new(60, 100, Duration::ZERO, duration, flag);
        let produced = std::iter::from_fn(|| voice.next()).count();
        assert_eq!(produced, to_samples(duration));
    }

    #[test]
    fn test_voice_release_flag_cuts_playback() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut voice = VoiceSource::new(
            60,
            100,
            Duration::ZERO,
            Duration::from_secs(60),
            Arc::clone(&flag),
        );
        for _ in 0..1000 {
            voice.next().unwrap();
        }
        flag.store(true, Ordering::Relaxed);
        let remaining = std::iter::from_fn(|| voice.next()).count();
        assert_eq!(remaining, to_samples(RELEASE));
    }

    #[test]
    fn test_voice_cancelled_during_delay_never_sounds() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut voice = VoiceSource::new(
            60,
            100,
            Duration::from_millis(100),
            Duration::from_secs(1),
            flag,
        );
        assert_eq!(voice.next(), None);
    }

    #[test]
    fn test_zero_velocity_is_silent() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut voice = VoiceSource::new(60, 0, Duration::ZERO, Duration::from_millis(100), flag);
        assert!(std::iter::from_fn(|| voice.next()).all(|s| s == 0.0));
    }
}
