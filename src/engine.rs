//! The engine thread: owns the player, the recorder and the live input
//! connection, and serializes every state change through one command channel.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, select, tick, unbounded};
use tracing::{error, info};

use crate::actuation::{ActuationTracker, KeyActuator};
use crate::config::Settings;
use crate::events::{NoteKind, RecordedEvent};
use crate::mapping::{KeyMapper, scheme_by_id};
use crate::midi::{FileInfo, MidiListener, parse_file};
use crate::pipeline::{TransformStats, transform};
use crate::playback::{Player, PlayerUpdate};
use crate::recorder::MidiRecorder;

/// How often held keys are checked against the stuck-key timeout.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub enum EngineCommand {
    LoadFile(PathBuf),
    Play,
    Pause,
    Stop,
    Seek(f64),
    SetSpeed(f32),
    SetLooping(bool),
    SetScheme(String),
    SetTranspose(i32),
    ConnectInput(String),
    DisconnectInput,
    StartRecording,
    StopRecording,
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum EngineUpdate {
    FileLoaded {
        info: FileInfo,
        stats: TransformStats,
    },
    Playback(PlayerUpdate),
    StuckKeysReleased(Vec<u8>),
    InputConnected(String),
    InputDisconnected,
    RecordingFinished(Vec<RecordedEvent>),
    Error(String),
}

pub struct EngineHandle {
    pub command_tx: Sender<EngineCommand>,
    pub update_rx: Receiver<EngineUpdate>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl EngineHandle {
    pub fn send(&self, command: EngineCommand) {
        let _ = self.command_tx.send(command);
    }

    pub fn shutdown(mut self) {
        let _ = self.command_tx.send(EngineCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub fn spawn_engine(actuator: Arc<dyn KeyActuator>, settings: Settings) -> EngineHandle {
    let (command_tx, command_rx) = unbounded();
    let (update_tx, update_rx) = unbounded();
    let thread = std::thread::Builder::new()
        .name("engine".into())
        .spawn(move || Engine::new(actuator, settings, update_tx).run(command_rx))
        .expect("spawn engine thread");
    EngineHandle {
        command_tx,
        update_rx,
        thread: Some(thread),
    }
}

struct Engine {
    settings: Settings,
    tracker: Arc<ActuationTracker>,
    mapper: Arc<KeyMapper>,
    recorder: Arc<MidiRecorder>,
    player: Player,
    player_rx: Receiver<PlayerUpdate>,
    listener: Option<MidiListener>,
    update_tx: Sender<EngineUpdate>,
}

impl Engine {
    fn new(
        actuator: Arc<dyn KeyActuator>,
        settings: Settings,
        update_tx: Sender<EngineUpdate>,
    ) -> Self {
        let tracker = Arc::new(ActuationTracker::new(actuator));
        let scheme = scheme_by_id(&settings.scheme_id)
            .unwrap_or_else(|| scheme_by_id(crate::mapping::DEFAULT_SCHEME_ID).expect("default scheme exists"));
        let mapper = Arc::new(KeyMapper::new(scheme));
        let (mut player, player_rx) = Player::new(tracker.clone(), mapper.clone());
        player.set_count_in(settings.count_in_beats);
        player.set_speed(settings.speed);
        player.set_looping(settings.looping);
        Self {
            settings,
            tracker,
            mapper,
            recorder: Arc::new(MidiRecorder::new()),
            player,
            player_rx,
            listener: None,
            update_tx,
        }
    }

    fn run(mut self, command_rx: Receiver<EngineCommand>) {
        info!("engine started");
        if let Some(port) = self.settings.midi_port.clone() {
            self.connect_input(&port);
        }
        let watchdog = tick(WATCHDOG_INTERVAL);
        loop {
            select! {
                recv(command_rx) -> cmd => {
                    match cmd {
                        Ok(EngineCommand::Shutdown) | Err(_) => break,
                        Ok(cmd) => self.handle_command(cmd),
                    }
                }
                recv(self.player_rx) -> update => {
                    if let Ok(update) = update {
                        let _ = self.update_tx.send(EngineUpdate::Playback(update));
                    }
                }
                recv(watchdog) -> _ => {
                    let timeout = Duration::from_secs_f64(self.settings.stuck_key_timeout_secs);
                    let stuck = self.tracker.check_stuck_keys(timeout);
                    if !stuck.is_empty() {
                        let _ = self.update_tx.send(EngineUpdate::StuckKeysReleased(stuck));
                    }
                }
            }
        }
        self.player.stop();
        self.disconnect_input();
        self.tracker.release_all();
        info!("engine stopped");
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::LoadFile(path) => match parse_file(&path) {
                Ok((events, info)) => {
                    let (processed, stats) = transform(&events, &self.settings.transform_config());
                    self.player.load(processed, info.duration);
                    let _ = self.update_tx.send(EngineUpdate::FileLoaded { info, stats });
                }
                Err(e) => self.report_error(format!("load {}: {e}", path.display())),
            },
            EngineCommand::Play => self.player.play(),
            EngineCommand::Pause => self.player.pause(),
            EngineCommand::Stop => self.player.stop(),
            EngineCommand::Seek(position) => self.player.seek(position),
            EngineCommand::SetSpeed(speed) => self.player.set_speed(speed),
            EngineCommand::SetLooping(looping) => self.player.set_looping(looping),
            EngineCommand::SetScheme(id) => match scheme_by_id(&id) {
                Some(scheme) => {
                    // Swapping mid-performance must not strand held keys on
                    // the old layout.
                    self.tracker.release_all();
                    self.mapper.set_scheme(scheme);
                    self.settings.scheme_id = id;
                }
                None => self.report_error(format!("unknown mapping scheme '{id}'")),
            },
            EngineCommand::SetTranspose(semitones) => {
                self.tracker.release_all();
                self.mapper.set_transpose(semitones);
            }
            EngineCommand::ConnectInput(fragment) => self.connect_input(&fragment),
            EngineCommand::DisconnectInput => self.disconnect_input(),
            EngineCommand::StartRecording => self.recorder.start(),
            EngineCommand::StopRecording => {
                let take = self.recorder.stop();
                let _ = self.update_tx.send(EngineUpdate::RecordingFinished(take));
            }
            EngineCommand::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    fn connect_input(&mut self, fragment: &str) {
        self.disconnect_input();
        let mapper = self.mapper.clone();
        let tracker = self.tracker.clone();
        let recorder = self.recorder.clone();
        match MidiListener::connect(fragment, move |kind, pitch, velocity| {
            recorder.record_event(kind, pitch, velocity);
            match kind {
                NoteKind::On => {
                    if let Some(mapping) = mapper.lookup(pitch) {
                        tracker.press(pitch, mapping);
                    }
                }
                NoteKind::Off => {
                    tracker.release(pitch);
                }
            }
        }) {
            Ok(listener) => {
                let name = listener.port_name().to_owned();
                self.listener = Some(listener);
                let _ = self.update_tx.send(EngineUpdate::InputConnected(name));
            }
            Err(e) => self.report_error(format!("connect '{fragment}': {e}")),
        }
    }

    fn disconnect_input(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.close();
            // Notes still sounding on the old connection never get an Off.
            self.tracker.release_all();
            let _ = self.update_tx.send(EngineUpdate::InputDisconnected);
        }
    }

    fn report_error(&self, message: String) {
        error!("{message}");
        let _ = self.update_tx.send(EngineUpdate::Error(message));
    }
}
