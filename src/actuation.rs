//! Key actuation: the capability boundary and the held-key tracker.
//!
//! The tracker owns the system's core safety contract: every press is
//! eventually matched by exactly one release, even across stop, cancel,
//! disconnect, or a missed Note-Off (stuck-key watchdog).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::mapping::{KeyMapping, Modifier, SCAN_LCTRL, SCAN_LSHIFT};

/// Platform key-injection primitive. Implementations must deliver events in
/// call order; releasing an already-released key must be a no-op.
pub trait KeyActuator: Send + Sync {
    fn send_key_event(&self, scan_code: u16, pressed: bool);
}

/// Actuator that only logs, for headless use and as a safe default when no
/// platform injector is wired up.
#[derive(Debug, Default)]
pub struct LogActuator;

impl KeyActuator for LogActuator {
    fn send_key_event(&self, scan_code: u16, pressed: bool) {
        debug!(scan_code, pressed, "key event");
    }
}

struct HeldKey {
    mapping: KeyMapping,
    pressed_at: Instant,
}

/// Tracks physically held virtual keys per MIDI pitch.
///
/// Invariant: every pitch in the table corresponds to a key that is down.
/// All mutations happen under one lock, so the flash sequence of a modified
/// key can never interleave with another press.
pub struct ActuationTracker {
    actuator: Arc<dyn KeyActuator>,
    active: Mutex<HashMap<u8, HeldKey>>,
}

fn modifier_scan(modifier: Modifier) -> Option<u16> {
    match modifier {
        Modifier::Shift => Some(SCAN_LSHIFT),
        Modifier::Ctrl => Some(SCAN_LCTRL),
        Modifier::None => None,
    }
}

impl ActuationTracker {
    pub fn new(actuator: Arc<dyn KeyActuator>) -> Self {
        Self {
            actuator,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Press the key for `pitch`. A modified key is flashed:
    /// modifier-down, key-down, modifier-up, so the modifier never leaks
    /// into a coincident unmodified key.
    pub fn press(&self, pitch: u8, mapping: KeyMapping) {
        let mut active = self.active.lock();
        match modifier_scan(mapping.modifier) {
            Some(mod_scan) => {
                self.actuator.send_key_event(mod_scan, true);
                self.actuator.send_key_event(mapping.scan_code, true);
                self.actuator.send_key_event(mod_scan, false);
            }
            None => self.actuator.send_key_event(mapping.scan_code, true),
        }
        // Overwrites any stale record for the pitch.
        active.insert(
            pitch,
            HeldKey {
                mapping,
                pressed_at: Instant::now(),
            },
        );
    }

    /// Release the key for `pitch`, returning its mapping. Only the base key
    /// goes up; the modifier was already released during `press`. A pitch
    /// that is not held returns `None` and does nothing.
    pub fn release(&self, pitch: u8) -> Option<KeyMapping> {
        let mut active = self.active.lock();
        let held = active.remove(&pitch)?;
        self.actuator.send_key_event(held.mapping.scan_code, false);
        Some(held.mapping)
    }

    /// Release every held key. Used on stop, disconnect, and panic paths.
    pub fn release_all(&self) {
        let mut active = self.active.lock();
        for (_, held) in active.drain() {
            self.actuator.send_key_event(held.mapping.scan_code, false);
        }
    }

    /// Force-release keys held longer than `timeout` and report their
    /// pitches. Intended for periodic polling.
    pub fn check_stuck_keys(&self, timeout: Duration) -> Vec<u8> {
        let mut active = self.active.lock();
        let now = Instant::now();
        let stuck: Vec<u8> = active
            .iter()
            .filter(|(_, held)| now.duration_since(held.pressed_at) > timeout)
            .map(|(&pitch, _)| pitch)
            .collect();
        for &pitch in &stuck {
            if let Some(held) = active.remove(&pitch) {
                self.actuator.send_key_event(held.mapping.scan_code, false);
            }
            warn!(pitch, "force-released stuck key");
        }
        stuck
    }

    /// Currently held pitches, unordered.
    pub fn held_pitches(&self) -> Vec<u8> {
        self.active.lock().keys().copied().collect()
    }
}
