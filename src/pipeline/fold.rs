//! Voice-leading octave fold: brings out-of-range notes into the playable
//! range while preferring smooth, directionally consistent melodic motion.
//!
//! The scoring heuristics are pure functions over explicit state so they can
//! be tested without running the whole pipeline.

use std::collections::{HashMap, VecDeque};

use crate::events::{NoteKind, RawEvent};

/// Fold a pitch into `[lo, hi]` by octave steps, clamping when the range is
/// narrower than an octave. Pitch class is preserved whenever possible.
pub(crate) fn modulo_fold(pitch: u8, lo: u8, hi: u8) -> u8 {
    let mut p = pitch as i32;
    let (lo, hi) = (lo as i32, hi as i32);
    while p > hi {
        p -= 12;
    }
    while p < lo {
        p += 12;
    }
    p.clamp(lo, hi) as u8
}

/// All in-range pitches sharing `pitch_class`, ascending.
pub(crate) fn candidates_in_range(pitch_class: u8, lo: u8, hi: u8) -> Vec<u8> {
    let mut out = Vec::new();
    let offset = (pitch_class as i32 - lo as i32).rem_euclid(12);
    let mut c = lo as i32 + offset;
    while c <= hi as i32 {
        out.push(c as u8);
        c += 12;
    }
    out
}

/// Melodic-direction bonus for a candidate: +4 for continuing the previous
/// direction, +1.5 for a small reversal (within 5 semitones), 0 otherwise.
pub(crate) fn direction_bonus(candidate: f64, prev: f64, prev_prev: f64) -> f64 {
    let new_dir = (candidate - prev).signum();
    let old_dir = (prev - prev_prev).signum();
    if new_dir == old_dir {
        4.0
    } else if new_dir == -old_dir && new_dir != 0.0 && (candidate - prev).abs() <= 5.0 {
        1.5
    } else {
        0.0
    }
}

/// Per-channel melodic state used to score fold candidates.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VoiceState {
    pub prev: Option<f64>,
    pub prev_prev: Option<f64>,
    pub center: f64,
}

impl VoiceState {
    fn new(center: f64) -> Self {
        Self {
            prev: None,
            prev_prev: None,
            center,
        }
    }

    fn advance(&mut self, chosen: u8) {
        self.prev_prev = self.prev;
        self.prev = Some(chosen as f64);
        self.center = 0.85 * self.center + 0.15 * chosen as f64;
    }
}

/// Score a candidate pitch against the channel's melodic state. Higher wins.
pub(crate) fn score_candidate(candidate: u8, state: &VoiceState, mid: f64) -> f64 {
    let c = candidate as f64;
    let prev = state.prev.expect("scored only after a first note");
    let bonus = match state.prev_prev {
        Some(pp) => direction_bonus(c, prev, pp),
        None => 0.0,
    };
    -2.0 * (c - prev).abs() + bonus - 0.5 * (c - state.center).abs() - 0.1 * (c - mid).abs()
}

/// Stateful fold over a time-ordered event sequence.
///
/// Every folded Note-On records its chosen pitch in a per-(channel, original
/// pitch) queue; the matching Note-Off dequeues the same pitch, so on/off
/// pairs never desync even when the heuristic would now pick differently.
pub(crate) struct OctaveFolder {
    lo: u8,
    hi: u8,
    mid: f64,
    voices: HashMap<u8, VoiceState>,
    pending: HashMap<(u8, u8), VecDeque<u8>>,
}

impl OctaveFolder {
    pub(crate) fn new(lo: u8, hi: u8) -> Self {
        Self {
            lo,
            hi,
            mid: (lo as f64 + hi as f64) / 2.0,
            voices: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub(crate) fn fold_event(&mut self, event: &RawEvent) -> RawEvent {
        match event.kind {
            NoteKind::On => event.with_pitch(self.fold_on(event.channel, event.pitch)),
            NoteKind::Off => event.with_pitch(self.fold_off(event.channel, event.pitch)),
        }
    }

    fn fold_on(&mut self, channel: u8, pitch: u8) -> u8 {
        let mid = self.mid;
        let voice = self
            .voices
            .entry(channel)
            .or_insert_with(|| VoiceState::new(mid));

        let in_range = (self.lo..=self.hi).contains(&pitch);
        let chosen = if in_range {
            pitch
        } else {
            let candidates = candidates_in_range(pitch % 12, self.lo, self.hi);
            let chosen = if candidates.is_empty() {
                modulo_fold(pitch, self.lo, self.hi)
            } else if voice.prev.is_none() {
                // First note on this channel: land near the range midpoint.
                pick_min_by(&candidates, |c| (c as f64 - mid).abs())
            } else {
                pick_max_by(&candidates, |c| score_candidate(c, voice, mid))
            };
            self.pending
                .entry((channel, pitch))
                .or_default()
                .push_back(chosen);
            chosen
        };

        voice.advance(chosen);
        chosen
    }

    fn fold_off(&mut self, channel: u8, pitch: u8) -> u8 {
        if let Some(queue) = self.pending.get_mut(&(channel, pitch))
            && let Some(chosen) = queue.pop_front()
        {
            return chosen;
        }
        if !(self.lo..=self.hi).contains(&pitch) {
            // Unmatched Note-Off: deterministic fallback.
            return modulo_fold(pitch, self.lo, self.hi);
        }
        pitch
    }
}

fn pick_min_by(candidates: &[u8], key: impl Fn(u8) -> f64) -> u8 {
    let mut best = candidates[0];
    let mut best_key = key(best);
    for &c in &candidates[1..] {
        let k = key(c);
        if k < best_key {
            best = c;
            best_key = k;
        }
    }
    best
}

fn pick_max_by(candidates: &[u8], key: impl Fn(u8) -> f64) -> u8 {
    let mut best = candidates[0];
    let mut best_key = key(best);
    for &c in &candidates[1..] {
        let k = key(c);
        if k > best_key {
            best = c;
            best_key = k;
        }
    }
    best
}
