//! Post-recording cleanup: snap timestamps toward a beat grid and fold
//! out-of-range pitches into the playable window.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::events::RecordedEvent;
use crate::pipeline::fold::modulo_fold;

/// Beat subdivision the quantizer snaps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantizeGrid {
    Quarter,
    Eighth,
    Sixteenth,
    TripletEighth,
}

impl QuantizeGrid {
    /// Grid step in beats.
    pub fn beats(self) -> f64 {
        match self {
            QuantizeGrid::Quarter => 1.0,
            QuantizeGrid::Eighth => 0.5,
            QuantizeGrid::Sixteenth => 0.25,
            QuantizeGrid::TripletEighth => 1.0 / 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoTuneStats {
    pub total_events: usize,
    pub quantized_count: usize,
    pub pitch_corrected_count: usize,
}

/// Pull each timestamp toward its nearest grid point by `strength` (0 leaves
/// it alone, 1 snaps fully). Timestamps are relative to the recording start,
/// so the grid is anchored at zero.
pub fn quantize_to_beat_grid(
    events: &[RecordedEvent],
    bpm: f64,
    grid: QuantizeGrid,
    strength: f64,
) -> (Vec<RecordedEvent>, usize) {
    let step = grid.beats() * 60.0 / bpm;
    let strength = strength.clamp(0.0, 1.0);
    let mut moved = 0;
    let out = events
        .iter()
        .map(|e| {
            let snapped = (e.timestamp / step).round() * step;
            let adjusted = e.timestamp + (snapped - e.timestamp) * strength;
            if (adjusted - e.timestamp).abs() > 1e-9 {
                moved += 1;
            }
            RecordedEvent {
                timestamp: adjusted,
                ..*e
            }
        })
        .collect();
    (out, moved)
}

/// Fold every pitch outside `[note_min, note_max]` by octaves.
pub fn correct_pitches(
    events: &[RecordedEvent],
    note_min: u8,
    note_max: u8,
) -> (Vec<RecordedEvent>, usize) {
    let mut corrected = 0;
    let out = events
        .iter()
        .map(|e| {
            let folded = modulo_fold(e.pitch, note_min, note_max);
            if folded != e.pitch {
                corrected += 1;
            }
            RecordedEvent {
                pitch: folded,
                ..*e
            }
        })
        .collect();
    (out, corrected)
}

/// Full pass: quantize then fold, with a fixed 75% quantize strength so the
/// result keeps a trace of the performance's own timing.
pub fn auto_tune(
    events: &[RecordedEvent],
    bpm: f64,
    grid: QuantizeGrid,
    note_min: u8,
    note_max: u8,
) -> (Vec<RecordedEvent>, AutoTuneStats) {
    let (quantized, moved) = quantize_to_beat_grid(events, bpm, grid, 0.75);
    let (out, corrected) = correct_pitches(&quantized, note_min, note_max);
    let stats = AutoTuneStats {
        total_events: events.len(),
        quantized_count: moved,
        pitch_corrected_count: corrected,
    };
    info!(
        total = stats.total_events,
        quantized = stats.quantized_count,
        corrected = stats.pitch_corrected_count,
        "auto-tune pass"
    );
    (out, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoteKind;

    fn ev(timestamp: f64, pitch: u8) -> RecordedEvent {
        RecordedEvent {
            timestamp,
            kind: NoteKind::On,
            pitch,
            velocity: 100,
        }
    }

    #[test]
    fn grid_steps() {
        assert_eq!(QuantizeGrid::Quarter.beats(), 1.0);
        assert_eq!(QuantizeGrid::Sixteenth.beats(), 0.25);
        assert!((QuantizeGrid::TripletEighth.beats() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn full_strength_snaps_to_grid() {
        // 120 bpm, eighth grid: step = 0.25 s.
        let events = vec![ev(0.26, 60), ev(0.49, 62)];
        let (out, moved) = quantize_to_beat_grid(&events, 120.0, QuantizeGrid::Eighth, 1.0);
        assert_eq!(moved, 2);
        assert!((out[0].timestamp - 0.25).abs() < 1e-9);
        assert!((out[1].timestamp - 0.5).abs() < 1e-9);
    }

    #[test]
    fn partial_strength_moves_partway() {
        let events = vec![ev(0.30, 60)]; // nearest grid point at 0.25
        let (out, _) = quantize_to_beat_grid(&events, 120.0, QuantizeGrid::Eighth, 0.5);
        assert!((out[0].timestamp - 0.275).abs() < 1e-9);
    }

    #[test]
    fn zero_strength_is_identity() {
        let events = vec![ev(0.3131, 60)];
        let (out, moved) = quantize_to_beat_grid(&events, 120.0, QuantizeGrid::Eighth, 0.0);
        assert_eq!(moved, 0);
        assert_eq!(out[0].timestamp, 0.3131);
    }

    #[test]
    fn on_grid_event_not_counted() {
        let events = vec![ev(0.5, 60)];
        let (_, moved) = quantize_to_beat_grid(&events, 120.0, QuantizeGrid::Eighth, 1.0);
        assert_eq!(moved, 0);
    }

    #[test]
    fn out_of_range_pitches_folded() {
        let events = vec![ev(0.0, 96), ev(0.0, 60), ev(0.0, 24)];
        let (out, corrected) = correct_pitches(&events, 48, 83);
        assert_eq!(corrected, 2);
        assert_eq!(out[0].pitch, 72);
        assert_eq!(out[1].pitch, 60);
        assert_eq!(out[2].pitch, 48);
    }

    #[test]
    fn auto_tune_combines_both() {
        let events = vec![ev(0.26, 96)];
        let (out, stats) = auto_tune(&events, 120.0, QuantizeGrid::Eighth, 48, 83);
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.quantized_count, 1);
        assert_eq!(stats.pitch_corrected_count, 1);
        assert_eq!(out[0].pitch, 72);
        // 75% of the way from 0.26 to 0.25.
        assert!((out[0].timestamp - 0.2525).abs() < 1e-9);
    }
}
