use std::path::PathBuf;

/// Errors crossing a capability boundary: MIDI hardware, the filesystem,
/// or the key actuator. Everything else in the crate degrades silently
/// (bad events are filtered, invalid transport calls are no-ops).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no MIDI input port matching \"{0}\"")]
    PortNotFound(String),

    #[error("MIDI input error: {0}")]
    MidiInput(String),

    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid MIDI file: {0}")]
    MidiFile(#[from] midly::Error),

    #[error("bad settings file: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
