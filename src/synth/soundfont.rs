//! SoundFont backend: sample-based synthesis via rustysynth.
//!
//! The synthesizer renders continuously on rodio's audio thread through a
//! buffered stereo source; the control side only issues note-on/note-off
//! messages. Scheduled starts and stops are kept in a small pending-event
//! queue drained each tick, since rustysynth has no internal scheduling.

use super::{BackendError, Instrument, SAMPLE_RATE};
use rodio::{OutputStream, OutputStreamHandle, Source};
use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Audio buffer size for low-latency playback.
/// Smaller = lower latency but higher CPU usage.
const BUFFER_SIZE: usize = 256;

/// All notes play on one MIDI channel; the engine has no per-track
/// instrument switching.
const CHANNEL: i32 = 0;

/// Audio source that pulls samples from the synthesizer.
struct SynthSource {
    synth: Arc<Mutex<Synthesizer>>,
    left_buf: Vec<f32>,
    right_buf: Vec<f32>,
    buf_pos: usize,
    /// Current channel (0 = left, 1 = right).
    channel: usize,
}

impl SynthSource {
    fn new(synth: Arc<Mutex<Synthesizer>>) -> Self {
        Self {
            synth,
            left_buf: vec![0.0; BUFFER_SIZE],
            right_buf: vec![0.0; BUFFER_SIZE],
            buf_pos: BUFFER_SIZE, // Start at end to trigger first render
            channel: 0,
        }
    }
}

impl Iterator for SynthSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.buf_pos >= BUFFER_SIZE {
            // The synthesizer outputs silence when no notes are sounding,
            // so rendering unconditionally keeps the stream warm.
            if let Ok(mut synth) = self.synth.lock() {
                synth.render(&mut self.left_buf, &mut self.right_buf);
            } else {
                self.left_buf.fill(0.0);
                self.right_buf.fill(0.0);
            }
            self.buf_pos = 0;
        }

        // Interleave stereo samples: L, R, L, R, ...
        let sample = if self.channel == 0 {
            self.left_buf[self.buf_pos]
        } else {
            self.right_buf[self.buf_pos]
        };

        self.channel = 1 - self.channel;
        if self.channel == 0 {
            self.buf_pos += 1;
        }

        Some(sample)
    }
}

impl Source for SynthSource {
    fn current_frame_len(&self) -> Option<usize> {
        None // Continuous stream
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    On { velocity: u8 },
    Off,
}

/// A note-on or note-off waiting for its wall-clock due time.
#[derive(Debug, Clone, Copy)]
struct PendingEvent {
    due: Instant,
    pitch: u8,
    kind: EventKind,
}

/// Removes events due at or before `now`, in due order.
fn drain_due(pending: &mut Vec<PendingEvent>, now: Instant) -> Vec<PendingEvent> {
    let mut due: Vec<PendingEvent> = Vec::new();
    pending.retain(|event| {
        if event.due <= now {
            due.push(*event);
            false
        } else {
            true
        }
    });
    due.sort_by_key(|event| event.due);
    due
}

/// Sample-based polyphonic instrument backed by a SoundFont.
pub struct SoundFontInstrument {
    synth: Arc<Mutex<Synthesizer>>,
    // Dropping the stream kills audio output; hold both for our lifetime.
    _stream: OutputStream,
    _handle: OutputStreamHandle,
    pending: Vec<PendingEvent>,
}

impl SoundFontInstrument {
    /// Loads a SoundFont file (.sf2) and opens the default audio output.
    pub fn new<P: AsRef<Path>>(soundfont_path: P) -> Result<Self, BackendError> {
        let path = soundfont_path.as_ref();
        let mut file = BufReader::new(File::open(path).map_err(|source| {
            BackendError::SoundFontIo {
                path: path.to_path_buf(),
                source,
            }
        })?);
        let soundfont = Arc::new(SoundFont::new(&mut file).map_err(|e| {
            BackendError::SoundFont {
                path: path.to_path_buf(),
                reason: format!("{:?}", e),
            }
        })?);

        let settings = SynthesizerSettings::new(SAMPLE_RATE as i32);
        let synth = Synthesizer::new(&soundfont, &settings).map_err(|e| {
            BackendError::SoundFont {
                path: path.to_path_buf(),
                reason: format!("{:?}", e),
            }
        })?;
        let synth = Arc::new(Mutex::new(synth));

        let (stream, handle) = OutputStream::try_default()?;
        handle.play_raw(SynthSource::new(Arc::clone(&synth)))?;

        Ok(Self {
            synth,
            _stream: stream,
            _handle: handle,
            pending: Vec::new(),
        })
    }

    fn note_on(&self, pitch: u8, velocity: u8) {
        if let Ok(mut synth) = self.synth.lock() {
            synth.note_on(CHANNEL, pitch as i32, velocity as i32);
        }
    }

    fn note_off(&self, pitch: u8) {
        if let Ok(mut synth) = self.synth.lock() {
            synth.note_off(CHANNEL, pitch as i32);
        }
    }
}

impl Instrument for SoundFontInstrument {
    fn start(&mut self, pitch: u8, velocity: u8, delay: Duration, duration: Duration) {
        // Retrigger: cancel anything queued for this pitch and silence it.
        self.pending.retain(|event| event.pitch != pitch);
        self.note_off(pitch);

        let now = Instant::now();
        if delay.is_zero() {
            self.note_on(pitch, velocity);
        } else {
            self.pending.push(PendingEvent {
                due: now + delay,
                pitch,
                kind: EventKind::On { velocity },
            });
        }
        self.pending.push(PendingEvent {
            due: now + delay + duration,
            pitch,
            kind: EventKind::Off,
        });
    }

    fn stop(&mut self, pitch: u8) {
        self.pending.retain(|event| event.pitch != pitch);
        self.note_off(pitch);
    }

    fn stop_all(&mut self) {
        self.pending.clear();
        if let Ok(mut synth) = self.synth.lock() {
            // Non-immediate: voices run their release instead of clicking off.
            synth.note_off_all(false);
        }
    }

    fn process(&mut self, now: Instant) {
        for event in drain_due(&mut self.pending, now) {
            match event.kind {
                EventKind::On { velocity } => self.note_on(event.pitch, velocity),
                EventKind::Off => self.note_off(event.pitch),
            }
        }
    }
}

impl Drop for SoundFontInstrument {
    fn drop(&mut self) {
        self.stop_all();
    }
}
