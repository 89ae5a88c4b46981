//! Timed playback of a transformed event list.
//!
//! The [`Player`] is the control surface; the emission loop runs on its own
//! thread ([`worker`]) and talks back through a crossbeam channel. Control
//! flags (stop, pause, speed, cursor) are single scalars with last-write-wins
//! semantics, read once per scheduling decision, so no field ever needs a
//! read-modify-write transaction.

mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender, unbounded};
use tracing::{info, warn};

use crate::actuation::ActuationTracker;
use crate::events::{NoteKind, RawEvent};
use crate::mapping::KeyMapper;

pub const MIN_SPEED: f32 = 0.25;
pub const MAX_SPEED: f32 = 2.0;

/// How long `stop` waits for the emission thread before giving up and
/// force-releasing anyway.
const JOIN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PlaybackState::Playing,
            2 => PlaybackState::Paused,
            _ => PlaybackState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PlaybackState::Stopped => 0,
            PlaybackState::Playing => 1,
            PlaybackState::Paused => 2,
        }
    }
}

/// Notifications emitted by the playback thread.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerUpdate {
    NoteEvent {
        kind: NoteKind,
        pitch: u8,
        velocity: u8,
    },
    Progress {
        position: f64,
        duration: f64,
    },
    StateChanged(PlaybackState),
    /// Count-in beats remaining; 0 marks the end of the count-in.
    CountdownTick(u32),
    Finished,
}

/// Shared control block between the `Player` and its emission thread.
pub(crate) struct Controls {
    stop: AtomicBool,
    paused: AtomicBool,
    looping: AtomicBool,
    /// Set after a seek or resume so the loop re-anchors its wall clock.
    reanchor: AtomicBool,
    speed_bits: AtomicU32,
    position_bits: AtomicU64,
    next_index: AtomicUsize,
    state: AtomicU8,
}

impl Controls {
    fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            looping: AtomicBool::new(false),
            reanchor: AtomicBool::new(false),
            speed_bits: AtomicU32::new(1.0f32.to_bits()),
            position_bits: AtomicU64::new(0.0f64.to_bits()),
            next_index: AtomicUsize::new(0),
            state: AtomicU8::new(PlaybackState::Stopped.as_u8()),
        }
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub(crate) fn paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub(crate) fn looping(&self) -> bool {
        self.looping.load(Ordering::Relaxed)
    }

    pub(crate) fn take_reanchor(&self) -> bool {
        self.reanchor.swap(false, Ordering::Relaxed)
    }

    pub(crate) fn speed(&self) -> f64 {
        f32::from_bits(self.speed_bits.load(Ordering::Relaxed)) as f64
    }

    pub(crate) fn position(&self) -> f64 {
        f64::from_bits(self.position_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn set_position(&self, pos: f64) {
        self.position_bits.store(pos.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn next_index(&self) -> usize {
        self.next_index.load(Ordering::Relaxed)
    }

    pub(crate) fn set_next_index(&self, idx: usize) {
        self.next_index.store(idx, Ordering::Relaxed);
    }

    pub(crate) fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_state(&self, state: PlaybackState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }
}

/// Plays a pre-sorted event list against the actuation tracker with
/// pause/resume, live speed change, seek, looping, and cancellation.
pub struct Player {
    tracker: Arc<ActuationTracker>,
    mapper: Arc<KeyMapper>,
    controls: Arc<Controls>,
    update_tx: Sender<PlayerUpdate>,
    events: Arc<Vec<RawEvent>>,
    duration: f64,
    count_in_beats: u32,
    handle: Option<JoinHandle<()>>,
}

impl Player {
    pub fn new(tracker: Arc<ActuationTracker>, mapper: Arc<KeyMapper>) -> (Self, Receiver<PlayerUpdate>) {
        let (update_tx, update_rx) = unbounded();
        let player = Self {
            tracker,
            mapper,
            controls: Arc::new(Controls::new()),
            update_tx,
            events: Arc::new(Vec::new()),
            duration: 0.0,
            count_in_beats: 0,
            handle: None,
        };
        (player, update_rx)
    }

    /// Replace the loaded list. Stops any prior playback and resets the
    /// cursor. `duration` is the reported total length, which may exceed the
    /// last event time (trailing silence).
    pub fn load(&mut self, events: Vec<RawEvent>, duration: f64) {
        self.stop();
        self.duration = duration.max(events.last().map_or(0.0, |e| e.time));
        self.events = Arc::new(events);
        self.controls.set_next_index(0);
        self.controls.set_position(0.0);
    }

    pub fn state(&self) -> PlaybackState {
        self.controls.state()
    }

    pub fn position(&self) -> f64 {
        self.controls.position()
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Metronome beats before the first event when starting from Stopped.
    pub fn set_count_in(&mut self, beats: u32) {
        self.count_in_beats = beats;
    }

    pub fn set_looping(&self, looping: bool) {
        self.controls.looping.store(looping, Ordering::Relaxed);
    }

    /// Clamped to [0.25, 2.0]; takes effect at the next scheduling decision.
    pub fn set_speed(&self, speed: f32) {
        let clamped = speed.clamp(MIN_SPEED, MAX_SPEED);
        self.controls
            .speed_bits
            .store(clamped.to_bits(), Ordering::Relaxed);
    }

    pub fn speed(&self) -> f32 {
        self.controls.speed() as f32
    }

    /// Start playback, or resume from pause in place. No-op while already
    /// playing or with nothing loaded.
    pub fn play(&mut self) {
        match self.controls.state() {
            PlaybackState::Playing => {}
            PlaybackState::Paused => {
                self.controls.reanchor.store(true, Ordering::Relaxed);
                self.controls.paused.store(false, Ordering::Relaxed);
                self.controls.set_state(PlaybackState::Playing);
                let _ = self
                    .update_tx
                    .send(PlayerUpdate::StateChanged(PlaybackState::Playing));
            }
            PlaybackState::Stopped => {
                if self.events.is_empty() {
                    return;
                }
                self.join_worker();
                self.controls.stop.store(false, Ordering::Relaxed);
                self.controls.paused.store(false, Ordering::Relaxed);
                self.controls.set_state(PlaybackState::Playing);
                let _ = self
                    .update_tx
                    .send(PlayerUpdate::StateChanged(PlaybackState::Playing));

                let ctx = worker::WorkerCtx {
                    events: self.events.clone(),
                    controls: self.controls.clone(),
                    tracker: self.tracker.clone(),
                    mapper: self.mapper.clone(),
                    update_tx: self.update_tx.clone(),
                    duration: self.duration,
                    count_in_beats: self.count_in_beats,
                };
                self.handle = Some(
                    std::thread::Builder::new()
                        .name("playback".into())
                        .spawn(move || worker::run(ctx))
                        .expect("spawn playback thread"),
                );
            }
        }
    }

    /// Halt at the loop's next check, keeping the cursor. Only valid while
    /// playing; otherwise a no-op.
    pub fn pause(&self) {
        if self.controls.state() == PlaybackState::Playing {
            self.controls.paused.store(true, Ordering::Relaxed);
            self.controls.set_state(PlaybackState::Paused);
            let _ = self
                .update_tx
                .send(PlayerUpdate::StateChanged(PlaybackState::Paused));
        }
    }

    /// Cancel playback, bounded-join the worker, release every key and reset
    /// the cursor. Idempotent.
    pub fn stop(&mut self) {
        if self.controls.state() == PlaybackState::Stopped && self.handle.is_none() {
            return;
        }
        self.controls.stop.store(true, Ordering::Relaxed);
        self.controls.paused.store(false, Ordering::Relaxed);
        self.join_worker();
        // Runs even when the join timed out: no stuck key beats clean shutdown.
        self.tracker.release_all();
        self.controls.set_next_index(0);
        self.controls.set_position(0.0);
        self.controls.set_state(PlaybackState::Stopped);
        let _ = self
            .update_tx
            .send(PlayerUpdate::StateChanged(PlaybackState::Stopped));
    }

    /// Jump to `position` seconds: release held keys, move the cursor to the
    /// first event at or after the target, and report progress.
    pub fn seek(&self, position: f64) {
        self.tracker.release_all();
        let pos = position.max(0.0);
        let idx = self.events.partition_point(|e| e.time < pos);
        self.controls.set_position(pos);
        self.controls.set_next_index(idx);
        self.controls.reanchor.store(true, Ordering::Relaxed);
        let _ = self.update_tx.send(PlayerUpdate::Progress {
            position: pos,
            duration: self.duration,
        });
    }

    fn join_worker(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let deadline = Instant::now() + JOIN_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            // Leave it detached; the stop flag will end it eventually.
            warn!("playback thread did not exit within {JOIN_TIMEOUT:?}");
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
        info!("player shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuation::tests::MockActuator;
    use crate::mapping::scheme_by_id;

    fn make_player() -> (Player, Receiver<PlayerUpdate>, Arc<ActuationTracker>) {
        let tracker = Arc::new(ActuationTracker::new(Arc::new(MockActuator::default())));
        let mapper = Arc::new(KeyMapper::new(scheme_by_id("wwm_36").unwrap()));
        let (player, rx) = Player::new(tracker.clone(), mapper);
        (player, rx, tracker)
    }

    fn short_clip() -> Vec<RawEvent> {
        vec![
            RawEvent::note_on(0.0, 60, 127, 0, 0),
            RawEvent::note_off(0.1, 60, 0, 0),
            RawEvent::note_on(0.35, 64, 127, 0, 0),
            RawEvent::note_off(0.45, 64, 0, 0),
        ]
    }

    fn collect_notes(rx: &Receiver<PlayerUpdate>) -> Vec<(NoteKind, u8)> {
        let mut notes = Vec::new();
        while let Ok(update) = rx.try_recv() {
            if let PlayerUpdate::NoteEvent { kind, pitch, .. } = update {
                notes.push((kind, pitch));
            }
        }
        notes
    }

    fn wait_for_finish(rx: &Receiver<PlayerUpdate>, notes: &mut Vec<(NoteKind, u8)>) {
        let deadline = Duration::from_secs(5);
        loop {
            match rx.recv_timeout(deadline) {
                Ok(PlayerUpdate::NoteEvent { kind, pitch, .. }) => notes.push((kind, pitch)),
                Ok(PlayerUpdate::Finished) => return,
                Ok(_) => {}
                Err(e) => panic!("playback never finished: {e}"),
            }
        }
    }

    #[test]
    fn plays_all_events_in_order() {
        let (mut player, rx, tracker) = make_player();
        player.load(short_clip(), 0.5);
        player.play();
        let mut notes = Vec::new();
        wait_for_finish(&rx, &mut notes);
        assert_eq!(
            notes,
            vec![
                (NoteKind::On, 60),
                (NoteKind::Off, 60),
                (NoteKind::On, 64),
                (NoteKind::Off, 64),
            ]
        );
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert!(tracker.held_pitches().is_empty());
    }

    #[test]
    fn pause_resume_neither_skips_nor_repeats() {
        let (mut player, rx, _tracker) = make_player();
        player.load(short_clip(), 0.5);
        player.play();
        std::thread::sleep(Duration::from_millis(200));
        player.pause();
        assert_eq!(player.state(), PlaybackState::Paused);
        std::thread::sleep(Duration::from_millis(100));
        let mut notes = collect_notes(&rx);
        // The first pair fired before the pause, the second did not.
        assert_eq!(notes, vec![(NoteKind::On, 60), (NoteKind::Off, 60)]);
        player.play();
        wait_for_finish(&rx, &mut notes);
        assert_eq!(
            notes,
            vec![
                (NoteKind::On, 60),
                (NoteKind::Off, 60),
                (NoteKind::On, 64),
                (NoteKind::Off, 64),
            ]
        );
    }

    #[test]
    fn stop_releases_held_keys() {
        let (mut player, _rx, tracker) = make_player();
        player.load(
            vec![
                RawEvent::note_on(0.0, 60, 127, 0, 0),
                RawEvent::note_off(30.0, 60, 0, 0),
            ],
            30.0,
        );
        player.play();
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(tracker.held_pitches(), vec![60]);
        player.stop();
        assert!(tracker.held_pitches().is_empty());
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert_eq!(player.position(), 0.0);
    }

    #[test]
    fn stop_is_idempotent() {
        let (mut player, _rx, _tracker) = make_player();
        player.stop();
        player.stop();
        assert_eq!(player.state(), PlaybackState::Stopped);
    }

    #[test]
    fn pause_while_stopped_is_noop() {
        let (player, rx, _tracker) = make_player();
        player.pause();
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn seek_moves_cursor_to_first_event_at_or_after() {
        let (mut player, rx, _tracker) = make_player();
        player.load(short_clip(), 0.5);
        player.seek(0.2);
        assert_eq!(player.controls.next_index(), 2);
        assert_eq!(player.position(), 0.2);
        let progress = rx
            .try_iter()
            .find(|u| matches!(u, PlayerUpdate::Progress { .. }));
        assert!(progress.is_some());
    }

    #[test]
    fn speed_clamped() {
        let (player, _rx, _tracker) = make_player();
        player.set_speed(10.0);
        assert_eq!(player.speed(), 2.0);
        player.set_speed(0.01);
        assert_eq!(player.speed(), 0.25);
    }

    #[test]
    fn play_with_nothing_loaded_is_noop() {
        let (mut player, rx, _tracker) = make_player();
        player.play();
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn looping_replays_from_the_start() {
        let (mut player, rx, tracker) = make_player();
        player.load(
            vec![
                RawEvent::note_on(0.0, 60, 127, 0, 0),
                RawEvent::note_off(0.1, 60, 0, 0),
            ],
            0.15,
        );
        player.set_looping(true);
        player.play();
        let mut notes = Vec::new();
        let deadline = Duration::from_secs(5);
        while notes.len() < 4 {
            match rx.recv_timeout(deadline) {
                Ok(PlayerUpdate::NoteEvent { kind, pitch, .. }) => notes.push((kind, pitch)),
                Ok(PlayerUpdate::Finished) => panic!("finished while looping"),
                Ok(_) => {}
                Err(e) => panic!("loop pass never replayed: {e}"),
            }
        }
        // The full clip plays again from the start, in order.
        assert_eq!(
            notes,
            vec![
                (NoteKind::On, 60),
                (NoteKind::Off, 60),
                (NoteKind::On, 60),
                (NoteKind::Off, 60),
            ]
        );
        player.stop();
        assert!(tracker.held_pitches().is_empty());
        assert_eq!(player.state(), PlaybackState::Stopped);
    }

    #[test]
    fn speed_change_applies_during_trailing_silence() {
        let (mut player, rx, _tracker) = make_player();
        player.load(
            vec![
                RawEvent::note_on(0.0, 60, 127, 0, 0),
                RawEvent::note_off(0.05, 60, 0, 0),
            ],
            3.0,
        );
        player.play();
        std::thread::sleep(Duration::from_millis(200));
        let raised = Instant::now();
        player.set_speed(2.0);
        let mut notes = Vec::new();
        wait_for_finish(&rx, &mut notes);
        // About 2.8 s of silence remained; at double speed that is ~1.4 s of
        // wall time, while the old speed would need the full ~2.8 s.
        assert!(raised.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn count_in_ticks_before_first_note() {
        let (mut player, rx, _tracker) = make_player();
        player.load(
            vec![
                RawEvent::note_on(0.0, 60, 127, 0, 0),
                RawEvent::note_off(0.05, 60, 0, 0),
            ],
            0.1,
        );
        player.set_count_in(2);
        player.play();
        let mut seen = Vec::new();
        let deadline = Duration::from_secs(10);
        loop {
            match rx.recv_timeout(deadline) {
                Ok(PlayerUpdate::CountdownTick(n)) => seen.push(n),
                Ok(PlayerUpdate::NoteEvent { .. }) => break,
                Ok(_) => {}
                Err(e) => panic!("no note after count-in: {e}"),
            }
        }
        assert_eq!(seen, vec![2, 1, 0]);
        player.stop();
    }
}
