//! Capture of live input events with recording-relative timestamps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::info;

use crate::events::{NoteKind, RecordedEvent};

/// Accumulates live events while armed. Safe to share between the input
/// callback thread and the engine.
pub struct MidiRecorder {
    recording: AtomicBool,
    inner: Mutex<Inner>,
}

struct Inner {
    started_at: Option<Instant>,
    events: Vec<RecordedEvent>,
}

impl MidiRecorder {
    pub fn new() -> Self {
        Self {
            recording: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                started_at: None,
                events: Vec::new(),
            }),
        }
    }

    /// Arm the recorder. Discards any previous take.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        inner.started_at = Some(Instant::now());
        inner.events.clear();
        self.recording.store(true, Ordering::Relaxed);
        info!("recording started");
    }

    /// Disarm and return the take in capture order.
    pub fn stop(&self) -> Vec<RecordedEvent> {
        self.recording.store(false, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.started_at = None;
        let events = std::mem::take(&mut inner.events);
        info!(count = events.len(), "recording stopped");
        events
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    /// Timestamp and store one event. Ignored while disarmed, so the input
    /// callback can call this unconditionally.
    pub fn record_event(&self, kind: NoteKind, pitch: u8, velocity: u8) {
        if !self.recording.load(Ordering::Relaxed) {
            return;
        }
        let mut inner = self.inner.lock();
        let Some(started_at) = inner.started_at else {
            return;
        };
        let timestamp = started_at.elapsed().as_secs_f64();
        inner.events.push(RecordedEvent {
            timestamp,
            kind,
            pitch,
            velocity,
        });
    }

    /// Seconds since arming, or the captured span when idle (0 when empty).
    pub fn duration(&self) -> f64 {
        let inner = self.inner.lock();
        match inner.started_at {
            Some(started_at) => started_at.elapsed().as_secs_f64(),
            None => inner.events.last().map_or(0.0, |e| e.timestamp),
        }
    }

    pub fn event_count(&self) -> usize {
        self.inner.lock().events.len()
    }
}

impl Default for MidiRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disarmed_recorder_ignores_events() {
        let rec = MidiRecorder::new();
        rec.record_event(NoteKind::On, 60, 100);
        assert_eq!(rec.event_count(), 0);
        assert!(!rec.is_recording());
    }

    #[test]
    fn captures_in_order_with_relative_timestamps() {
        let rec = MidiRecorder::new();
        rec.start();
        rec.record_event(NoteKind::On, 60, 100);
        std::thread::sleep(std::time::Duration::from_millis(5));
        rec.record_event(NoteKind::Off, 60, 0);
        let take = rec.stop();
        assert_eq!(take.len(), 2);
        assert_eq!(take[0].pitch, 60);
        assert!(take[0].timestamp >= 0.0);
        assert!(take[1].timestamp > take[0].timestamp);
        assert!(!rec.is_recording());
    }

    #[test]
    fn restart_discards_previous_take() {
        let rec = MidiRecorder::new();
        rec.start();
        rec.record_event(NoteKind::On, 60, 100);
        rec.start();
        assert_eq!(rec.event_count(), 0);
        rec.record_event(NoteKind::On, 62, 100);
        assert_eq!(rec.stop().len(), 1);
    }

    #[test]
    fn stop_drains_events() {
        let rec = MidiRecorder::new();
        rec.start();
        rec.record_event(NoteKind::On, 60, 100);
        assert_eq!(rec.stop().len(), 1);
        assert_eq!(rec.event_count(), 0);
        assert!(rec.stop().is_empty());
    }
}
