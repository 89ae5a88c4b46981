//! Pitch-to-key mapping tables and the hot-swappable active scheme.
//!
//! A [`MappingScheme`] is an immutable value; switching schemes replaces the
//! whole table through an `ArcSwap` so the midir callback thread never sees a
//! half-updated mapping.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modifier {
    None,
    Shift,
    Ctrl,
}

/// Set-1 scan codes for the left modifiers, used by the actuation flash.
pub const SCAN_LSHIFT: u16 = 0x2A;
pub const SCAN_LCTRL: u16 = 0x1D;

/// A single virtual key action: base scan code plus optional modifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMapping {
    pub scan_code: u16,
    pub modifier: Modifier,
    pub label: String,
}

/// A complete pitch → key table for one target layout.
#[derive(Debug, Clone)]
pub struct MappingScheme {
    pub id: &'static str,
    pub name: &'static str,
    pub key_count: usize,
    /// Inclusive MIDI range the table covers.
    pub midi_range: (u8, u8),
    table: HashMap<u8, KeyMapping>,
}

impl MappingScheme {
    pub fn lookup(&self, pitch: u8) -> Option<&KeyMapping> {
        self.table.get(&pitch)
    }

    pub fn mappings(&self) -> &HashMap<u8, KeyMapping> {
        &self.table
    }
}

/// Set-1 scan code for a key name used by the built-in layouts.
fn scan(key: &str) -> u16 {
    match key {
        "Z" => 0x2C,
        "X" => 0x2D,
        "C" => 0x2E,
        "V" => 0x2F,
        "B" => 0x30,
        "N" => 0x31,
        "M" => 0x32,
        "A" => 0x1E,
        "S" => 0x1F,
        "D" => 0x20,
        "F" => 0x21,
        "G" => 0x22,
        "H" => 0x23,
        "J" => 0x24,
        "Q" => 0x10,
        "W" => 0x11,
        "E" => 0x12,
        "R" => 0x13,
        "T" => 0x14,
        "Y" => 0x15,
        "U" => 0x16,
        "I" => 0x17,
        "O" => 0x18,
        "P" => 0x19,
        "K" => 0x25,
        "L" => 0x26,
        "1" => 0x02,
        "2" => 0x03,
        "3" => 0x04,
        "4" => 0x05,
        "5" => 0x06,
        "6" => 0x07,
        "7" => 0x08,
        "8" => 0x09,
        "9" => 0x0A,
        "0" => 0x0B,
        "-" => 0x0C,
        "=" => 0x0D,
        _ => unreachable!("unknown key name {key}"),
    }
}

fn km(key: &str, modifier: Modifier) -> KeyMapping {
    let label = match modifier {
        Modifier::Shift => format!("Shift+{key}"),
        Modifier::Ctrl => format!("Ctrl+{key}"),
        Modifier::None => key.to_string(),
    };
    KeyMapping {
        scan_code: scan(key),
        modifier,
        label,
    }
}

/// One chromatic octave in the `Z X C V B N M` row shape: naturals on plain
/// keys, sharps on Shift, flats on Ctrl of the next natural.
fn chromatic_row(keys: [&str; 7]) -> [(String, Modifier); 12] {
    let [c, d, e, f, g, a, b] = keys.map(str::to_string);
    [
        (c.clone(), Modifier::None),  // C
        (c, Modifier::Shift),         // C#
        (d, Modifier::None),          // D
        (e.clone(), Modifier::Ctrl),  // Eb
        (e, Modifier::None),          // E
        (f.clone(), Modifier::None),  // F
        (f, Modifier::Shift),         // F#
        (g.clone(), Modifier::None),  // G
        (g, Modifier::Shift),         // G#
        (a, Modifier::None),          // A
        (b.clone(), Modifier::Ctrl),  // Bb
        (b, Modifier::None),          // B
    ]
}

fn insert_row(table: &mut HashMap<u8, KeyMapping>, base: u8, keys: [&str; 7]) {
    for (i, (key, modifier)) in chromatic_row(keys).into_iter().enumerate() {
        table.insert(base + i as u8, km(&key, modifier));
    }
}

fn build_wwm_36() -> MappingScheme {
    let mut table = HashMap::new();
    insert_row(&mut table, 48, ["Z", "X", "C", "V", "B", "N", "M"]);
    insert_row(&mut table, 60, ["A", "S", "D", "F", "G", "H", "J"]);
    insert_row(&mut table, 72, ["Q", "W", "E", "R", "T", "Y", "U"]);
    MappingScheme {
        id: "wwm_36",
        name: "Where Winds Meet 36-key",
        key_count: 36,
        midi_range: (48, 83),
        table,
    }
}

fn build_ff14_32() -> MappingScheme {
    let mut table = HashMap::new();
    let rows: [[&str; 8]; 3] = [
        ["A", "S", "D", "F", "G", "H", "J", "K"],
        ["Q", "W", "E", "R", "T", "Y", "U", "I"],
        ["1", "2", "3", "4", "5", "6", "7", "8"],
    ];
    for (r, keys) in rows.iter().enumerate() {
        for (i, key) in keys.iter().enumerate() {
            table.insert(48 + (r * 8 + i) as u8, km(key, Modifier::None));
        }
    }
    for i in 0..8u8 {
        let key = (i + 1).to_string();
        table.insert(72 + i, km(&key, Modifier::Ctrl));
    }
    MappingScheme {
        id: "ff14_32",
        name: "FF14 32-key",
        key_count: 32,
        midi_range: (48, 79),
        table,
    }
}

fn build_generic_24() -> MappingScheme {
    let mut table = HashMap::new();
    insert_row(&mut table, 48, ["Z", "X", "C", "V", "B", "N", "M"]);
    insert_row(&mut table, 60, ["Q", "W", "E", "R", "T", "Y", "U"]);
    MappingScheme {
        id: "generic_24",
        name: "Generic 24-key",
        key_count: 24,
        midi_range: (48, 71),
        table,
    }
}

fn build_generic_48() -> MappingScheme {
    let mut table = HashMap::new();
    let numbers = ["1", "2", "3", "4", "5", "6", "7", "8", "9", "0", "-", "="];
    for (i, key) in numbers.iter().enumerate() {
        table.insert(36 + i as u8, km(key, Modifier::None));
    }
    insert_row(&mut table, 48, ["Z", "X", "C", "V", "B", "N", "M"]);
    insert_row(&mut table, 60, ["A", "S", "D", "F", "G", "H", "J"]);
    insert_row(&mut table, 72, ["Q", "W", "E", "R", "T", "Y", "U"]);
    MappingScheme {
        id: "generic_48",
        name: "Generic 48-key",
        key_count: 48,
        midi_range: (36, 83),
        table,
    }
}

fn build_generic_88() -> MappingScheme {
    // Full piano range, MIDI 21 (A0) to 108 (C8): three key groups layered
    // across plain / Shift / Ctrl.
    let mut table = HashMap::new();
    let groups: [[&str; 11]; 3] = [
        ["Z", "X", "C", "V", "B", "N", "M", "A", "S", "D", "F"],
        ["Q", "W", "E", "R", "T", "Y", "U", "I", "O", "P", "K"],
        ["1", "2", "3", "4", "5", "6", "7", "8", "9", "0", "-"],
    ];
    let layers = [Modifier::None, Modifier::Shift, Modifier::Ctrl];

    let mut pitch = 21u8;
    for keys in &groups {
        for modifier in layers {
            for key in keys {
                if pitch > 108 {
                    break;
                }
                table.insert(pitch, km(key, modifier));
                pitch += 1;
            }
        }
    }
    MappingScheme {
        id: "generic_88",
        name: "Generic 88-key",
        key_count: 88,
        midi_range: (21, 108),
        table,
    }
}

pub const DEFAULT_SCHEME_ID: &str = "wwm_36";

/// All built-in schemes in display order.
pub fn builtin_schemes() -> Vec<Arc<MappingScheme>> {
    vec![
        Arc::new(build_wwm_36()),
        Arc::new(build_ff14_32()),
        Arc::new(build_generic_24()),
        Arc::new(build_generic_48()),
        Arc::new(build_generic_88()),
    ]
}

pub fn scheme_by_id(id: &str) -> Option<Arc<MappingScheme>> {
    builtin_schemes().into_iter().find(|s| s.id == id)
}

/// The active scheme plus a live transpose offset.
///
/// `lookup` runs on the midir callback thread while the engine may be
/// swapping the scheme; both fields are single atomic replacements.
pub struct KeyMapper {
    scheme: ArcSwap<MappingScheme>,
    transpose: AtomicI32,
}

impl KeyMapper {
    pub fn new(scheme: Arc<MappingScheme>) -> Self {
        Self {
            scheme: ArcSwap::new(scheme),
            transpose: AtomicI32::new(0),
        }
    }

    pub fn scheme(&self) -> Arc<MappingScheme> {
        self.scheme.load_full()
    }

    pub fn set_scheme(&self, scheme: Arc<MappingScheme>) {
        self.scheme.store(scheme);
    }

    pub fn transpose(&self) -> i32 {
        self.transpose.load(Ordering::Relaxed)
    }

    /// Whole-octave live transpose, clamped to ±2 octaves.
    pub fn set_transpose(&self, semitones: i32) {
        let clamped = semitones.clamp(-24, 24);
        self.transpose.store(clamped, Ordering::Relaxed);
    }

    /// Map a pitch to a key action, applying the live transpose.
    /// Out-of-table pitches return `None`.
    pub fn lookup(&self, pitch: u8) -> Option<KeyMapping> {
        let shifted = pitch as i32 + self.transpose.load(Ordering::Relaxed);
        let shifted: u8 = shifted.try_into().ok()?;
        self.scheme.load().lookup(shifted).cloned()
    }
}
