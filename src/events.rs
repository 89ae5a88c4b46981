use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteKind {
    On,
    Off,
}

/// A single timed note event, in seconds from the start of the piece.
///
/// Pipeline stages never mutate these in place; each stage builds a new list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub time: f64,
    pub kind: NoteKind,
    pub pitch: u8,
    pub velocity: u8,
    pub track: usize,
    pub channel: u8,
}

impl RawEvent {
    pub fn note_on(time: f64, pitch: u8, velocity: u8, track: usize, channel: u8) -> Self {
        Self {
            time,
            kind: NoteKind::On,
            pitch,
            velocity,
            track,
            channel,
        }
    }

    pub fn note_off(time: f64, pitch: u8, track: usize, channel: u8) -> Self {
        Self {
            time,
            kind: NoteKind::Off,
            pitch,
            velocity: 0,
            track,
            channel,
        }
    }

    pub fn pitch_class(&self) -> u8 {
        self.pitch % 12
    }

    pub fn with_pitch(&self, pitch: u8) -> Self {
        Self { pitch, ..*self }
    }

    pub fn with_time(&self, time: f64) -> Self {
        Self { time, ..*self }
    }
}

/// A live-captured event, timestamped relative to the start of the recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub timestamp: f64,
    pub kind: NoteKind,
    pub pitch: u8,
    pub velocity: u8,
}

impl RecordedEvent {
    /// Convert into a file-style event. Recorded input has no track or
    /// channel structure, so both default to 0.
    pub fn to_raw(&self) -> RawEvent {
        RawEvent {
            time: self.timestamp,
            kind: self.kind,
            pitch: self.pitch,
            velocity: self.velocity,
            track: 0,
            channel: 0,
        }
    }
}

/// Name of a MIDI pitch, e.g. `note_name(60) == "C4"`.
pub fn note_name(pitch: u8) -> String {
    const NAMES: [&str; 12] = [
        "C", "C#", "D", "Eb", "E", "F", "F#", "G", "G#", "A", "Bb", "B",
    ];
    let octave = (pitch as i32 / 12) - 1;
    format!("{}{}", NAMES[(pitch % 12) as usize], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_names() {
        assert_eq!(note_name(60), "C4");
        assert_eq!(note_name(48), "C3");
        assert_eq!(note_name(83), "B5");
        assert_eq!(note_name(21), "A0");
    }

    #[test]
    fn recorded_to_raw_defaults() {
        let rec = RecordedEvent {
            timestamp: 1.5,
            kind: NoteKind::On,
            pitch: 60,
            velocity: 100,
        };
        let raw = rec.to_raw();
        assert_eq!(raw.time, 1.5);
        assert_eq!(raw.track, 0);
        assert_eq!(raw.channel, 0);
    }
}
