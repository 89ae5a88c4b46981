//! MIDI performance to keyboard actuation for games with virtual
//! instruments: parse or capture a performance, transform it to fit a
//! limited key range, and play it back as timed key presses.

pub mod actuation;
pub mod autotune;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod mapping;
pub mod midi;
pub mod pipeline;
pub mod playback;
pub mod recorder;

pub use actuation::{ActuationTracker, KeyActuator, LogActuator};
pub use autotune::{AutoTuneStats, QuantizeGrid, auto_tune};
pub use config::Settings;
pub use engine::{EngineCommand, EngineHandle, EngineUpdate, spawn_engine};
pub use error::{Error, Result};
pub use events::{NoteKind, RawEvent, RecordedEvent};
pub use mapping::{KeyMapper, KeyMapping, MappingScheme, Modifier, builtin_schemes, scheme_by_id};
pub use pipeline::{TransformConfig, TransformStats, transform};
pub use playback::{PlaybackState, Player, PlayerUpdate};
pub use recorder::MidiRecorder;
