//! The transform pipeline: raw MIDI events in, actuation-ready events out.
//!
//! `transform` is a pure function of its inputs: no wall-clock dependence,
//! no mutation of the input list, and no stage ever fails; malformed or empty
//! input degrades to filtered or empty output.

pub(crate) mod fold;
mod stages;

use serde::{Deserialize, Serialize};

use crate::events::{NoteKind, RawEvent};
use fold::OctaveFolder;

pub const DEFAULT_NOTE_MIN: u8 = 48; // C3
pub const DEFAULT_NOTE_MAX: u8 = 83; // B5
pub const GM_PERCUSSION_CHANNEL: u8 = 9;

/// 60 fps frame grid, the smallest delay the target application can act on.
pub const FRAME_GRID_SECONDS: f64 = 1.0 / 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    pub note_min: u8,
    pub note_max: u8,
    pub remove_percussion: bool,
    pub percussion_channel: u8,
    /// Track allow-list; `None` keeps every track.
    pub include_tracks: Option<Vec<usize>>,
    /// Polyphony cap; 0 disables the limiter.
    pub max_voices: usize,
    pub velocity_target: u8,
    pub quantize_grid: f64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            note_min: DEFAULT_NOTE_MIN,
            note_max: DEFAULT_NOTE_MAX,
            remove_percussion: true,
            percussion_channel: GM_PERCUSSION_CHANNEL,
            include_tracks: None,
            max_voices: 0,
            velocity_target: 127,
            quantize_grid: FRAME_GRID_SECONDS,
        }
    }
}

/// Counters describing what the pipeline did. Note counters count Note-Ons;
/// `collisions_removed` counts every dropped event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformStats {
    pub total_notes: usize,
    pub percussion_removed: usize,
    pub track_filtered: usize,
    pub octave_deduped: usize,
    pub global_transpose: i32,
    pub notes_shifted: usize,
    pub collisions_removed: usize,
    pub polyphony_dropped: usize,
    /// (lowest, highest) Note-On pitch before any shifting; (0, 0) if empty.
    pub original_range: (u8, u8),
}

/// Run the full nine-stage transform. Returns the processed list (sorted by
/// time, Off before On at equal times) and the stats built alongside it.
pub fn transform(events: &[RawEvent], config: &TransformConfig) -> (Vec<RawEvent>, TransformStats) {
    let mut stats = TransformStats::default();
    let note_ons = events.iter().filter(|e| e.kind == NoteKind::On);
    for e in note_ons {
        stats.total_notes += 1;
        if stats.total_notes == 1 {
            stats.original_range = (e.pitch, e.pitch);
        } else {
            stats.original_range.0 = stats.original_range.0.min(e.pitch);
            stats.original_range.1 = stats.original_range.1.max(e.pitch);
        }
    }

    let (lo, hi) = (config.note_min, config.note_max);

    // 1. Percussion filter.
    let mut current = if config.remove_percussion {
        let (out, removed) = stages::filter_percussion(events, config.percussion_channel);
        stats.percussion_removed = removed;
        out
    } else {
        events.to_vec()
    };

    // 2. Track filter.
    if let Some(include) = &config.include_tracks {
        let (out, removed) = stages::filter_tracks(&current, include);
        stats.track_filtered = removed;
        current = out;
    }

    // Later stages reason about coincidence and melodic order, so establish
    // time order here regardless of how the input arrived.
    stages::sort_events(&mut current);

    // 3. Octave de-dup.
    let (current, deduped) = stages::dedup_octaves(&current);
    stats.octave_deduped = deduped;

    // 4. Smart global transpose.
    let shift = stages::best_transpose(&current, lo, hi);
    stats.global_transpose = shift;
    let transposed = stages::apply_transpose(&current, shift);

    // 5. Voice-leading octave fold.
    let mut folder = OctaveFolder::new(lo, hi);
    let folded: Vec<RawEvent> = transposed.iter().map(|e| folder.fold_event(e)).collect();
    stats.notes_shifted = current
        .iter()
        .zip(&folded)
        .filter(|(before, after)| before.kind == NoteKind::On && before.pitch != after.pitch)
        .count();

    // 6. Collision de-dup.
    let (current, collisions) = stages::dedup_collisions(&folded);
    stats.collisions_removed = collisions;

    // 7. Polyphony limiter.
    let (current, dropped) = stages::limit_polyphony(&current, config.max_voices);
    stats.polyphony_dropped = dropped;

    // 8. Velocity normalization.
    let current = stages::normalize_velocity(&current, config.velocity_target);

    // 9. Time quantization.
    let mut current = stages::quantize_times(&current, config.quantize_grid);

    stages::sort_events(&mut current);
    (current, stats)
}
