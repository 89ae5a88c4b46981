use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{Event, KeyCode, KeyEventKind, poll, read};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing_subscriber::EnvFilter;

use qinkey::playback::PlayerUpdate;
use qinkey::{EngineCommand, EngineUpdate, LogActuator, PlaybackState, Settings, spawn_engine};

const SETTINGS_FILE: &str = "qinkey.ron";
const SEEK_STEP: f64 = 5.0;
const SPEED_STEP: f32 = 0.25;

struct RawMode;

impl RawMode {
    fn enter() -> std::io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let settings = match Settings::load(Path::new(SETTINGS_FILE)) {
        Ok(s) => s,
        Err(qinkey::Error::Io { .. }) => Settings::default(),
        Err(e) => return Err(e.into()),
    };
    let mut speed = settings.speed;
    let mut looping = settings.looping;

    let engine = spawn_engine(Arc::new(LogActuator), settings);
    if let Some(path) = std::env::args_os().nth(1) {
        engine.send(EngineCommand::LoadFile(PathBuf::from(path)));
        engine.send(EngineCommand::Play);
    }

    println!("space pause/resume | s stop | arrows seek | +/- speed | l loop | q quit");
    let _raw = RawMode::enter()?;

    let mut state = PlaybackState::Stopped;
    let mut position = 0.0f64;
    let mut duration = 0.0f64;
    let mut quit = false;

    while !quit {
        while poll(Duration::ZERO)? {
            if let Event::Key(key) = read()?
                && key.kind == KeyEventKind::Press
            {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => quit = true,
                    KeyCode::Char(' ') => match state {
                        PlaybackState::Playing => engine.send(EngineCommand::Pause),
                        _ => engine.send(EngineCommand::Play),
                    },
                    KeyCode::Char('s') => engine.send(EngineCommand::Stop),
                    KeyCode::Left => {
                        engine.send(EngineCommand::Seek((position - SEEK_STEP).max(0.0)));
                    }
                    KeyCode::Right => {
                        engine.send(EngineCommand::Seek(position + SEEK_STEP));
                    }
                    KeyCode::Char('+') | KeyCode::Char('=') => {
                        speed += SPEED_STEP;
                        engine.send(EngineCommand::SetSpeed(speed));
                    }
                    KeyCode::Char('-') => {
                        speed -= SPEED_STEP;
                        engine.send(EngineCommand::SetSpeed(speed));
                    }
                    KeyCode::Char('l') => {
                        looping = !looping;
                        engine.send(EngineCommand::SetLooping(looping));
                    }
                    _ => {}
                }
            }
        }

        while let Ok(update) = engine.update_rx.try_recv() {
            match update {
                EngineUpdate::FileLoaded { info, stats } => {
                    print!(
                        "\r\nloaded {} ({} tracks, {} notes, {:.1}s)\r\n",
                        info.name, info.track_count, info.note_count, info.duration
                    );
                    print!(
                        "transpose {:+} | {} folded | {} deduped | {} collisions dropped\r\n",
                        stats.global_transpose,
                        stats.notes_shifted,
                        stats.octave_deduped,
                        stats.collisions_removed
                    );
                }
                EngineUpdate::Playback(PlayerUpdate::Progress { position: p, duration: d }) => {
                    position = p;
                    duration = d;
                    print!("\r{:>6.1}s / {:.1}s   ", position, duration);
                    std::io::stdout().flush()?;
                }
                EngineUpdate::Playback(PlayerUpdate::StateChanged(s)) => {
                    state = s;
                    print!("\r\n[{s:?}]\r\n");
                }
                EngineUpdate::Playback(PlayerUpdate::CountdownTick(n)) if n > 0 => {
                    print!("\rcount-in: {n}   ");
                    std::io::stdout().flush()?;
                }
                EngineUpdate::Playback(_) => {}
                EngineUpdate::StuckKeysReleased(pitches) => {
                    print!("\r\nforce-released stuck keys: {pitches:?}\r\n");
                }
                EngineUpdate::InputConnected(port) => print!("\r\ninput: {port}\r\n"),
                EngineUpdate::InputDisconnected => print!("\r\ninput disconnected\r\n"),
                EngineUpdate::RecordingFinished(take) => {
                    print!("\r\nrecorded {} events\r\n", take.len());
                }
                EngineUpdate::Error(message) => print!("\r\nerror: {message}\r\n"),
            }
        }

        std::thread::sleep(Duration::from_millis(20));
    }

    engine.shutdown();
    Ok(())
}
