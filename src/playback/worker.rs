//! The playback thread: count-in, timed emission, loop restart.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use tracing::debug;

use super::{Controls, PlaybackState, PlayerUpdate};
use crate::actuation::ActuationTracker;
use crate::events::{NoteKind, RawEvent};
use crate::mapping::KeyMapper;

/// Granularity of every interruptible wait. Stop and pause are observed
/// within one interval.
const POLL: Duration = Duration::from_millis(10);

/// Within this distance of the target the loop stops sleeping and polls.
const COARSE_MARGIN: Duration = Duration::from_millis(2);

const COUNT_IN_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) struct WorkerCtx {
    pub events: Arc<Vec<RawEvent>>,
    pub controls: Arc<Controls>,
    pub tracker: Arc<ActuationTracker>,
    pub mapper: Arc<KeyMapper>,
    pub update_tx: Sender<PlayerUpdate>,
    pub duration: f64,
    pub count_in_beats: u32,
}

/// Releases every held key when the thread unwinds for any reason.
struct ReleaseGuard(Arc<ActuationTracker>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.release_all();
    }
}

pub(crate) fn run(ctx: WorkerCtx) {
    let _guard = ReleaseGuard(ctx.tracker.clone());

    loop {
        if !count_in(&ctx) {
            return; // cancelled
        }
        let _ = ctx.update_tx.send(PlayerUpdate::Progress {
            position: ctx.controls.position(),
            duration: ctx.duration,
        });

        if !emit_pass(&ctx) {
            return;
        }

        if ctx.controls.looping() && !ctx.controls.stop_requested() {
            ctx.tracker.release_all();
            ctx.controls.set_position(0.0);
            ctx.controls.set_next_index(0);
            debug!("loop restart");
            continue;
        }
        break;
    }

    // Natural completion.
    ctx.tracker.release_all();
    ctx.controls.set_position(0.0);
    ctx.controls.set_next_index(0);
    ctx.controls.set_state(PlaybackState::Stopped);
    let _ = ctx
        .update_tx
        .send(PlayerUpdate::StateChanged(PlaybackState::Stopped));
    let _ = ctx.update_tx.send(PlayerUpdate::Finished);
}

/// Metronome ticks before emission. Pausing freezes the remaining part of the
/// current beat and resuming waits it out, so the countdown cadence survives
/// a pause. Returns false if stop was requested.
fn count_in(ctx: &WorkerCtx) -> bool {
    if ctx.count_in_beats == 0 {
        return true;
    }
    for remaining in (1..=ctx.count_in_beats).rev() {
        let _ = ctx.update_tx.send(PlayerUpdate::CountdownTick(remaining));
        let mut left = COUNT_IN_INTERVAL;
        while left > Duration::ZERO {
            if ctx.controls.stop_requested() {
                return false;
            }
            if ctx.controls.paused() {
                std::thread::sleep(POLL);
                continue;
            }
            let step = left.min(POLL);
            std::thread::sleep(step);
            left = left.saturating_sub(step);
        }
    }
    let _ = ctx.update_tx.send(PlayerUpdate::CountdownTick(0));
    true
}

/// One pass over the event list from the current cursor. Returns false on
/// cancellation, true at the end of the list (including trailing silence).
fn emit_pass(ctx: &WorkerCtx) -> bool {
    let mut anchor_wall = Instant::now();
    let mut anchor_pos = ctx.controls.position();

    loop {
        let idx = ctx.controls.next_index();
        let Some(event) = ctx.events.get(idx).copied() else {
            break;
        };

        // Wait until the event is due, re-reading speed and the pause flag on
        // every wake so changes apply to the wait already in progress.
        loop {
            if ctx.controls.stop_requested() {
                return false;
            }
            if ctx.controls.paused() {
                if !pause_gate(ctx) {
                    return false;
                }
                anchor_wall = Instant::now();
                anchor_pos = ctx.controls.position();
            }
            if ctx.controls.take_reanchor() {
                anchor_wall = Instant::now();
                anchor_pos = ctx.controls.position();
                break; // cursor may have moved; re-fetch the event
            }
            let speed = ctx.controls.speed();
            let offset = ((event.time - anchor_pos) / speed).max(0.0);
            let target = anchor_wall + Duration::from_secs_f64(offset);
            let now = Instant::now();
            if now >= target {
                emit(ctx, &event, idx);
                break;
            }
            let left = target - now;
            if left > COARSE_MARGIN {
                std::thread::sleep((left - Duration::from_millis(1)).min(POLL));
            } else {
                std::hint::spin_loop();
            }
        }
    }

    trailing_silence(ctx)
}

fn emit(ctx: &WorkerCtx, event: &RawEvent, idx: usize) {
    match event.kind {
        NoteKind::On => {
            if let Some(mapping) = ctx.mapper.lookup(event.pitch) {
                ctx.tracker.press(event.pitch, mapping);
            }
        }
        NoteKind::Off => {
            ctx.tracker.release(event.pitch);
        }
    }
    ctx.controls.set_position(event.time);
    ctx.controls.set_next_index(idx + 1);
    let _ = ctx.update_tx.send(PlayerUpdate::NoteEvent {
        kind: event.kind,
        pitch: event.pitch,
        velocity: event.velocity,
    });
    let _ = ctx.update_tx.send(PlayerUpdate::Progress {
        position: event.time,
        duration: ctx.duration,
    });
}

/// Block while paused. Returns false if stop was requested meanwhile.
fn pause_gate(ctx: &WorkerCtx) -> bool {
    while ctx.controls.paused() {
        if ctx.controls.stop_requested() {
            return false;
        }
        std::thread::sleep(POLL);
    }
    !ctx.controls.stop_requested()
}

/// Wait out the gap between the last event and the reported duration, still
/// honoring stop, pause, and live speed changes.
fn trailing_silence(ctx: &WorkerCtx) -> bool {
    // Remaining gap in song seconds; the wall-clock cost of each step
    // depends on the speed read at that step.
    let mut remaining = ctx.duration - ctx.controls.position();
    while remaining > 0.0 {
        if ctx.controls.stop_requested() {
            return false;
        }
        if ctx.controls.paused() {
            std::thread::sleep(POLL);
            continue;
        }
        let speed = ctx.controls.speed();
        let step = Duration::from_secs_f64(remaining / speed).min(POLL);
        std::thread::sleep(step);
        remaining -= step.as_secs_f64() * speed;
    }
    ctx.controls.set_position(ctx.duration);
    let _ = ctx.update_tx.send(PlayerUpdate::Progress {
        position: ctx.duration,
        duration: ctx.duration,
    });
    true
}
