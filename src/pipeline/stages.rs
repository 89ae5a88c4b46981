//! The non-fold pipeline stages, each a pure function from event list to
//! event list. Stage order lives in [`super::transform`].

use std::collections::{HashMap, HashSet};

use crate::events::{NoteKind, RawEvent};

/// f64 timestamps are grouped by exact bit pattern: coincident events come
/// from identical ticks in the source file, so they compare equal.
fn time_key(t: f64) -> u64 {
    t.to_bits()
}

/// Stage 1: drop all events on the percussion channel.
pub(crate) fn filter_percussion(events: &[RawEvent], channel: u8) -> (Vec<RawEvent>, usize) {
    let mut removed = 0;
    let out = events
        .iter()
        .filter(|e| {
            if e.channel == channel {
                if e.kind == NoteKind::On {
                    removed += 1;
                }
                false
            } else {
                true
            }
        })
        .copied()
        .collect();
    (out, removed)
}

/// Stage 2: keep only events on allow-listed tracks.
pub(crate) fn filter_tracks(events: &[RawEvent], include: &[usize]) -> (Vec<RawEvent>, usize) {
    let allowed: HashSet<usize> = include.iter().copied().collect();
    let mut removed = 0;
    let out = events
        .iter()
        .filter(|e| {
            if allowed.contains(&e.track) {
                true
            } else {
                if e.kind == NoteKind::On {
                    removed += 1;
                }
                false
            }
        })
        .copied()
        .collect();
    (out, removed)
}

/// Stage 3: collapse doubled-octave chords. Of the Note-Ons sharing a
/// (time, pitch-class) only the highest pitch survives; dropped Ons take
/// their next matching Note-Off with them.
pub(crate) fn dedup_octaves(events: &[RawEvent]) -> (Vec<RawEvent>, usize) {
    let mut highest: HashMap<(u64, u8), u8> = HashMap::new();
    for e in events.iter().filter(|e| e.kind == NoteKind::On) {
        highest
            .entry((time_key(e.time), e.pitch_class()))
            .and_modify(|best| *best = (*best).max(e.pitch))
            .or_insert(e.pitch);
    }

    let mut removed = 0;
    let mut skip_offs: HashMap<(u8, u8), usize> = HashMap::new();
    let mut out = Vec::with_capacity(events.len());
    for e in events {
        match e.kind {
            NoteKind::On => {
                let best = highest[&(time_key(e.time), e.pitch_class())];
                if e.pitch == best {
                    out.push(*e);
                } else {
                    removed += 1;
                    *skip_offs.entry((e.channel, e.pitch)).or_default() += 1;
                }
            }
            NoteKind::Off => {
                match skip_offs.get_mut(&(e.channel, e.pitch)) {
                    Some(n) if *n > 0 => *n -= 1,
                    _ => out.push(*e),
                }
            }
        }
    }
    (out, removed)
}

const TRANSPOSE_SHIFTS: [i32; 8] = [-48, -36, -24, -12, 12, 24, 36, 48];

/// Stage 4: pick the octave shift that brings the most Note-Ons in range.
/// Ties break toward the smallest |shift|; shift 0 wins unless a shift is
/// strictly better.
pub(crate) fn best_transpose(events: &[RawEvent], lo: u8, hi: u8) -> i32 {
    let pitches: Vec<i32> = events
        .iter()
        .filter(|e| e.kind == NoteKind::On)
        .map(|e| e.pitch as i32)
        .collect();
    if pitches.is_empty() {
        return 0;
    }

    let in_range = |shift: i32| {
        pitches
            .iter()
            .filter(|&&p| (lo as i32..=hi as i32).contains(&(p + shift)))
            .count()
    };

    let mut best_shift: i32 = 0;
    let mut best_count = in_range(0);
    for shift in TRANSPOSE_SHIFTS {
        let count = in_range(shift);
        if count > best_count || (count == best_count && shift.abs() < best_shift.abs()) {
            best_count = count;
            best_shift = shift;
        }
    }
    best_shift
}

pub(crate) fn apply_transpose(events: &[RawEvent], semitones: i32) -> Vec<RawEvent> {
    if semitones == 0 {
        return events.to_vec();
    }
    events
        .iter()
        .map(|e| e.with_pitch((e.pitch as i32 + semitones).clamp(0, 127) as u8))
        .collect()
}

/// Stage 6: resolve same-(time, pitch) collisions. Note-On keeps the highest
/// velocity; Note-Off keeps exactly one (first seen).
pub(crate) fn dedup_collisions(events: &[RawEvent]) -> (Vec<RawEvent>, usize) {
    let mut best_on: HashMap<(u64, u8), usize> = HashMap::new();
    for (i, e) in events.iter().enumerate() {
        if e.kind != NoteKind::On {
            continue;
        }
        best_on
            .entry((time_key(e.time), e.pitch))
            .and_modify(|idx| {
                if e.velocity > events[*idx].velocity {
                    *idx = i;
                }
            })
            .or_insert(i);
    }

    let mut seen_off: HashSet<(u64, u8)> = HashSet::new();
    let mut removed = 0;
    let mut out = Vec::with_capacity(events.len());
    for (i, e) in events.iter().enumerate() {
        let keep = match e.kind {
            NoteKind::On => best_on[&(time_key(e.time), e.pitch)] == i,
            NoteKind::Off => seen_off.insert((time_key(e.time), e.pitch)),
        };
        if keep {
            out.push(*e);
        } else {
            removed += 1;
        }
    }
    (out, removed)
}

/// Stage 7: cap simultaneous voices by forward simulation. When a Note-On
/// would exceed the cap, keep the lowest active pitch (bass anchor, for caps
/// of 2 or more) plus the highest remaining pitches; every unselected active
/// pitch loses both its On and its matching Off.
pub(crate) fn limit_polyphony(events: &[RawEvent], max_voices: usize) -> (Vec<RawEvent>, usize) {
    if max_voices == 0 {
        return (events.to_vec(), 0);
    }

    let mut out: Vec<Option<RawEvent>> = events.iter().copied().map(Some).collect();
    let mut active: HashMap<u8, usize> = HashMap::new();
    let mut skip_offs: HashMap<u8, usize> = HashMap::new();
    let mut dropped = 0;

    for (i, e) in events.iter().enumerate() {
        match e.kind {
            NoteKind::Off => match skip_offs.get_mut(&e.pitch) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    out[i] = None;
                }
                _ => {
                    active.remove(&e.pitch);
                }
            },
            NoteKind::On => {
                if active.len() < max_voices {
                    active.insert(e.pitch, i);
                    continue;
                }

                let mut pitches: Vec<u8> = active.keys().copied().collect();
                pitches.push(e.pitch);
                pitches.sort_unstable();
                let keepers: HashSet<u8> = if max_voices >= 2 {
                    let mut keep: HashSet<u8> =
                        pitches.iter().rev().take(max_voices - 1).copied().collect();
                    keep.insert(pitches[0]);
                    keep
                } else {
                    HashSet::from([*pitches.last().unwrap()])
                };

                if keepers.contains(&e.pitch) {
                    let evict: Vec<u8> = active
                        .keys()
                        .filter(|p| !keepers.contains(p))
                        .copied()
                        .collect();
                    for pitch in evict {
                        let on_idx = active.remove(&pitch).unwrap();
                        out[on_idx] = None;
                        dropped += 1;
                        *skip_offs.entry(pitch).or_default() += 1;
                    }
                    active.insert(e.pitch, i);
                } else {
                    out[i] = None;
                    dropped += 1;
                    *skip_offs.entry(e.pitch).or_default() += 1;
                }
            }
        }
    }

    (out.into_iter().flatten().collect(), dropped)
}

/// Stage 8: force all Note-On velocities to `target`; Note-Offs untouched.
pub(crate) fn normalize_velocity(events: &[RawEvent], target: u8) -> Vec<RawEvent> {
    events
        .iter()
        .map(|e| match e.kind {
            NoteKind::On => RawEvent {
                velocity: target,
                ..*e
            },
            NoteKind::Off => *e,
        })
        .collect()
}

/// Stage 9: snap timestamps to a fixed grid.
pub(crate) fn quantize_times(events: &[RawEvent], grid: f64) -> Vec<RawEvent> {
    if grid <= 0.0 {
        return events.to_vec();
    }
    events
        .iter()
        .map(|e| e.with_time((e.time / grid).round() * grid))
        .collect()
}

/// Stable sort by (time, Off before On): a release takes effect before a
/// coincident press on the same physical key.
pub(crate) fn sort_events(events: &mut [RawEvent]) {
    events.sort_by(|a, b| {
        a.time
            .total_cmp(&b.time)
            .then_with(|| kind_order(a.kind).cmp(&kind_order(b.kind)))
    });
}

fn kind_order(kind: NoteKind) -> u8 {
    match kind {
        NoteKind::Off => 0,
        NoteKind::On => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on(time: f64, pitch: u8, velocity: u8) -> RawEvent {
        RawEvent::note_on(time, pitch, velocity, 0, 0)
    }

    fn off(time: f64, pitch: u8) -> RawEvent {
        RawEvent::note_off(time, pitch, 0, 0)
    }

    #[test]
    fn percussion_channel_dropped() {
        let events = vec![
            RawEvent::note_on(0.0, 36, 100, 0, 9),
            RawEvent::note_on(0.0, 60, 100, 0, 0),
            RawEvent::note_off(0.5, 36, 0, 9),
        ];
        let (out, removed) = filter_percussion(&events, 9);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pitch, 60);
        assert_eq!(removed, 1);
    }

    #[test]
    fn track_allow_list() {
        let events = vec![
            RawEvent::note_on(0.0, 60, 100, 0, 0),
            RawEvent::note_on(0.0, 62, 100, 1, 0),
            RawEvent::note_on(0.0, 64, 100, 2, 0),
        ];
        let (out, removed) = filter_tracks(&events, &[0, 2]);
        assert_eq!(out.iter().map(|e| e.pitch).collect::<Vec<_>>(), vec![60, 64]);
        assert_eq!(removed, 1);
    }

    #[test]
    fn octave_dedup_keeps_highest() {
        let events = vec![
            on(0.0, 60, 100),
            on(0.0, 72, 100),
            off(1.0, 60),
            off(1.0, 72),
        ];
        let (out, removed) = dedup_octaves(&events);
        assert_eq!(removed, 1);
        let ons: Vec<u8> = out
            .iter()
            .filter(|e| e.kind == NoteKind::On)
            .map(|e| e.pitch)
            .collect();
        assert_eq!(ons, vec![72]);
        let offs: Vec<u8> = out
            .iter()
            .filter(|e| e.kind == NoteKind::Off)
            .map(|e| e.pitch)
            .collect();
        assert_eq!(offs, vec![72]);
    }

    #[test]
    fn octave_dedup_leaves_distinct_classes() {
        let events = vec![on(0.0, 60, 100), on(0.0, 64, 100), on(0.0, 67, 100)];
        let (out, removed) = dedup_octaves(&events);
        assert_eq!(out.len(), 3);
        assert_eq!(removed, 0);
    }

    #[test]
    fn transpose_prefers_smallest_magnitude() {
        // Pitch 96 with range 48-83: -48/-36/-24 all land in range, so the
        // smallest magnitude (-24) wins.
        let events = vec![on(0.0, 96, 100)];
        assert_eq!(best_transpose(&events, 48, 83), -24);
    }

    #[test]
    fn transpose_zero_when_optimal() {
        let events = vec![on(0.0, 60, 100), on(0.0, 72, 100)];
        assert_eq!(best_transpose(&events, 48, 83), 0);
    }

    #[test]
    fn transpose_never_worse_than_zero() {
        // Mixed spread: whatever wins must be at least as good as 0.
        let events = vec![on(0.0, 30, 100), on(0.0, 60, 100), on(0.0, 100, 100)];
        let shift = best_transpose(&events, 48, 83);
        let count = |s: i32| {
            events
                .iter()
                .filter(|e| (48..=83).contains(&(e.pitch as i32 + s)))
                .count()
        };
        assert!(count(shift) >= count(0));
    }

    #[test]
    fn collision_on_keeps_highest_velocity() {
        let events = vec![on(1.0, 60, 50), on(1.0, 60, 90), on(1.0, 60, 70)];
        let (out, removed) = dedup_collisions(&events);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].velocity, 90);
        assert_eq!(removed, 2);
    }

    #[test]
    fn collision_off_keeps_exactly_one() {
        let events = vec![off(1.0, 60), off(1.0, 60)];
        let (out, removed) = dedup_collisions(&events);
        assert_eq!(out.len(), 1);
        assert_eq!(removed, 1);
    }

    #[test]
    fn polyphony_bass_anchor() {
        // Active {40, 60}, new On at 72 with cap 2: keep {40, 72}, drop 60.
        let events = vec![
            on(0.0, 40, 100),
            on(0.0, 60, 100),
            on(1.0, 72, 100),
            off(2.0, 40),
            off(2.0, 60),
            off(2.0, 72),
        ];
        let (out, dropped) = limit_polyphony(&events, 2);
        assert_eq!(dropped, 1);
        let ons: Vec<u8> = out
            .iter()
            .filter(|e| e.kind == NoteKind::On)
            .map(|e| e.pitch)
            .collect();
        assert_eq!(ons, vec![40, 72]);
        let offs: Vec<u8> = out
            .iter()
            .filter(|e| e.kind == NoteKind::Off)
            .map(|e| e.pitch)
            .collect();
        assert_eq!(offs, vec![40, 72]);
    }

    #[test]
    fn polyphony_one_keeps_highest() {
        let events = vec![on(0.0, 60, 100), on(1.0, 72, 100), off(2.0, 60), off(2.0, 72)];
        let (out, dropped) = limit_polyphony(&events, 1);
        assert_eq!(dropped, 1);
        let ons: Vec<u8> = out
            .iter()
            .filter(|e| e.kind == NoteKind::On)
            .map(|e| e.pitch)
            .collect();
        assert_eq!(ons, vec![72]);
    }

    #[test]
    fn polyphony_keeps_bass_newcomer() {
        // Cap 2, active {60, 72}: a new 50 is the bass anchor, so it stays
        // and the middle voice goes.
        let events = vec![on(0.0, 60, 100), on(0.0, 72, 100), on(1.0, 50, 100)];
        let (out, _) = limit_polyphony(&events, 2);
        let ons: Vec<u8> = out.iter().map(|e| e.pitch).collect();
        assert_eq!(ons, vec![72, 50]);
    }

    #[test]
    fn velocity_normalized_on_only() {
        let events = vec![on(0.0, 60, 50), off(1.0, 60)];
        let out = normalize_velocity(&events, 127);
        assert_eq!(out[0].velocity, 127);
        assert_eq!(out[1].velocity, 0);
    }

    #[test]
    fn quantize_snaps_to_grid() {
        let grid = 1.0 / 60.0;
        let events = vec![on(0.013, 60, 100), on(0.020, 62, 100)];
        let out = quantize_times(&events, grid);
        assert!((out[0].time - grid).abs() < 1e-12);
        assert!((out[1].time - grid).abs() < 1e-12);
    }

    #[test]
    fn sort_releases_before_presses() {
        let mut events = vec![on(1.0, 60, 100), off(1.0, 60), on(0.5, 62, 100)];
        sort_events(&mut events);
        assert_eq!(events[0].pitch, 62);
        assert_eq!(events[1].kind, NoteKind::Off);
        assert_eq!(events[2].kind, NoteKind::On);
    }
}
