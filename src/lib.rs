//! keyplay - a real-time MIDI playback and synthesis engine.
//!
//! Takes a static list of timed notes and a mutable transport
//! (play/pause/seek/tempo) and produces accurately timed sound, while
//! publishing the playback position and the set of currently sounding
//! pitches for visual synchronization. The engine is driven by an
//! external tick source and makes no assumptions about its cadence.

pub mod engine;
pub mod note;
pub mod synth;
pub mod transport;

// Re-export commonly used types
pub use engine::{EngineConfig, PlaybackEngine, PlaybackSnapshot};
pub use note::{pitch_to_freq, validate_notes, Hand, Note, NoteId};
pub use synth::{
    BackendError, Instrument, OscillatorInstrument, SilentInstrument, SoundFontInstrument,
};
pub use transport::{Transport, TransportConfig};
