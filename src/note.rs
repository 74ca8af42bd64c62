//! Note model for the playback engine.
//!
//! A note is an immutable description of a single pitched event: pitch,
//! start time, duration, velocity, and an optional hand tag. Times are in
//! seconds at reference tempo, so a tempo change never rewrites note data.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for generating unique note IDs.
/// Using atomic for thread-safety in case of parallel note construction.
static NOTE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a note within a note list.
/// The scheduler uses it to guarantee a note is dispatched at most once
/// per continuous playback pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteId(u64);

impl NoteId {
    /// Generates a new unique note ID.
    ///
    /// Thread-safe: uses atomic increment internally.
    pub fn new() -> Self {
        Self(NOTE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value (for serialization/debugging).
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

/// Which hand plays a note. Carried through for visualization consumers;
/// the engine itself never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hand {
    Left,
    Right,
}

/// A single pitched event with timing and dynamics.
///
/// `start` and `duration` are seconds at reference tempo. The `id` field
/// is stable for the lifetime of the note list and lets the scheduler
/// track dispatch state without index-based lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier for this note instance.
    pub id: NoteId,

    /// MIDI note number (0-127). 60 = Middle C (C4).
    pub pitch: u8,

    /// Note velocity (0-127). Controls loudness.
    pub velocity: u8,

    /// Start time in seconds at reference tempo.
    pub start: f64,

    /// Duration in seconds at reference tempo. Must be positive.
    pub duration: f64,

    /// Optional hand tag, preserved but not interpreted.
    pub hand: Option<Hand>,
}

impl Note {
    /// Creates a new note with a fresh unique ID.
    ///
    /// Pitch and velocity are clamped to the MIDI range 0-127.
    ///
    /// # Examples
    ///
    /// ```
    /// use keyplay::Note;
    ///
    /// // Middle C for one second at the start of the piece.
    /// let note = Note::new(60, 100, 0.0, 1.0);
    /// ```
    pub fn new(pitch: u8, velocity: u8, start: f64, duration: f64) -> Self {
        Self {
            id: NoteId::new(),
            pitch: pitch.min(127),
            velocity: velocity.min(127),
            start,
            duration,
            hand: None,
        }
    }

    /// Sets the hand tag. Builder-style, for note list construction.
    pub fn with_hand(mut self, hand: Hand) -> Self {
        self.hand = Some(hand);
        self
    }

    /// Returns the end time of this note (start + duration).
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Checks if this note is sounding at a given position.
    ///
    /// The interval is half-open: `[start, start + duration)`.
    pub fn is_active_at(&self, position: f64) -> bool {
        position >= self.start && position < self.end()
    }
}

/// Filters a note list down to well-formed notes.
///
/// Malformed notes (non-positive or non-finite duration, negative or
/// non-finite start) are skipped with a warning; the remainder of the
/// list loads normally. A single bad note must never take down a session.
pub fn validate_notes(notes: Vec<Note>) -> Vec<Note> {
    notes
        .into_iter()
        .filter(|note| {
            let ok = note.duration.is_finite()
                && note.duration > 0.0
                && note.start.is_finite()
                && note.start >= 0.0;
            if !ok {
                tracing::warn!(
                    id = note.id.as_u64(),
                    pitch = note.pitch,
                    start = note.start,
                    duration = note.duration,
                    "Skipping malformed note"
                );
            }
            ok
        })
        .collect()
}

/// Standard MIDI note names for display purposes.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Converts a MIDI note number to a human-readable name with octave.
///
/// # Examples
///
/// ```
/// use keyplay::note::note_to_name;
///
/// assert_eq!(note_to_name(60), "C4"); // Middle C
/// ```
pub fn note_to_name(note: u8) -> String {
    let octave = (note / 12) as i8 - 1; // MIDI octave convention
    let note_index = (note % 12) as usize;
    format!("{}{}", NOTE_NAMES[note_index], octave)
}

/// MIDI note number of A4, the tuning reference.
const REFERENCE_NOTE: f64 = 69.0;

/// Frequency of A4 in Hz.
const REFERENCE_FREQ: f64 = 440.0;

/// Converts a MIDI note number to its equal-tempered frequency in Hz.
pub fn pitch_to_freq(pitch: u8) -> f64 {
    REFERENCE_FREQ * 2.0_f64.powf((pitch as f64 - REFERENCE_NOTE) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_creation() {
        let note = Note::new(60, 100, 0.5, 1.0);
        assert_eq!(note.pitch, 60);
        assert_eq!(note.velocity, 100);
        assert_eq!(note.start, 0.5);
        assert_eq!(note.duration, 1.0);
        assert_eq!(note.hand, None);
    }

    #[test]
    fn test_note_clamping() {
        let note = Note::new(200, 200, 0.0, 1.0);
        assert_eq!(note.pitch, 127);
        assert_eq!(note.velocity, 127);
    }

    #[test]
    fn test_note_ids_unique() {
        let a = Note::new(60, 100, 0.0, 1.0);
        let b = Note::new(60, 100, 0.0, 1.0);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_note_active() {
        let note = Note::new(60, 100, 1.0, 2.0); // [1.0, 3.0)
        assert!(!note.is_active_at(0.999));
        assert!(note.is_active_at(1.0));
        assert!(note.is_active_at(2.5));
        assert!(!note.is_active_at(3.0));
    }

    #[test]
    fn test_hand_tag_preserved() {
        let note = Note::new(60, 100, 0.0, 1.0).with_hand(Hand::Left);
        assert_eq!(note.hand, Some(Hand::Left));
    }

    #[test]
    fn test_validate_skips_malformed() {
        let notes = vec![
            Note::new(60, 100, 0.0, 1.0),
            Note::new(62, 100, 1.0, 0.0),            // zero duration
            Note::new(64, 100, 2.0, -1.0),           // negative duration
            Note::new(65, 100, -1.0, 1.0),           // negative start
            Note::new(67, 100, f64::NAN, 1.0),       // non-finite start
            Note::new(69, 100, 3.0, f64::INFINITY),  // non-finite duration
            Note::new(71, 100, 4.0, 0.25),
        ];
        let valid = validate_notes(notes);
        assert_eq!(valid.len(), 2);
        assert_eq!(valid[0].pitch, 60);
        assert_eq!(valid[1].pitch, 71);
    }

    #[test]
    fn test_note_to_name() {
        assert_eq!(note_to_name(60), "C4");
        assert_eq!(note_to_name(69), "A4");
        assert_eq!(note_to_name(0), "C-1");
        assert_eq!(note_to_name(127), "G9");
    }

    #[test]
    fn test_pitch_to_freq() {
        assert!((pitch_to_freq(69) - 440.0).abs() < 1e-9);
        // One octave doubles the frequency.
        assert!((pitch_to_freq(81) - 880.0).abs() < 1e-9);
        // Middle C.
        assert!((pitch_to_freq(60) - 261.6256).abs() < 0.001);
    }
}
