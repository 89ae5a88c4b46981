//! MIDI input: Standard MIDI File parsing and live port listening.

mod file;
mod live;

pub use file::{FileInfo, TrackInfo, parse_bytes, parse_file};
pub use live::MidiListener;
