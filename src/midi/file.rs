//! Standard MIDI File parsing into absolute-time note events.
//!
//! Tempo changes may live in any track (format 1 files keep them in track 0),
//! so a single global tempo map is built from all tracks before any tick is
//! converted to seconds.

use std::collections::HashSet;
use std::path::Path;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use tracing::info;

use crate::error::{Error, Result};
use crate::events::{NoteKind, RawEvent};

const DEFAULT_TEMPO_US: u32 = 500_000; // 120 bpm

#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub index: usize,
    pub name: String,
    /// The track's channel, or `None` when it mixes several.
    pub channel: Option<u8>,
    pub note_count: usize,
    pub is_percussion: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub name: String,
    pub duration: f64,
    pub track_count: usize,
    pub note_count: usize,
    /// Initial tempo in beats per minute.
    pub tempo_bpm: f64,
    pub tracks: Vec<TrackInfo>,
}

/// Tick-to-seconds conversion: a sorted list of (absolute tick, seconds at
/// that tick, microseconds per quarter from that tick on).
struct TempoMap {
    ticks_per_beat: f64,
    segments: Vec<(u64, f64, u32)>,
}

impl TempoMap {
    /// `changes` holds (absolute tick, tempo in us/quarter), unsorted.
    fn new(ticks_per_beat: u16, mut changes: Vec<(u64, u32)>) -> Self {
        changes.sort_by_key(|&(tick, _)| tick);
        if changes.first().is_none_or(|&(tick, _)| tick != 0) {
            changes.insert(0, (0, DEFAULT_TEMPO_US));
        }
        let mut segments = Vec::with_capacity(changes.len());
        let mut sec = 0.0;
        let mut prev_tick = 0u64;
        let mut prev_tempo = changes[0].1;
        for &(tick, tempo) in &changes {
            sec += (tick - prev_tick) as f64 * prev_tempo as f64 / 1e6 / ticks_per_beat as f64;
            segments.push((tick, sec, tempo));
            prev_tick = tick;
            prev_tempo = tempo;
        }
        Self {
            ticks_per_beat: ticks_per_beat as f64,
            segments,
        }
    }

    fn tick_to_sec(&self, tick: u64) -> f64 {
        let idx = self.segments.partition_point(|&(t, _, _)| t <= tick) - 1;
        let (seg_tick, seg_sec, tempo) = self.segments[idx];
        seg_sec + (tick - seg_tick) as f64 * tempo as f64 / 1e6 / self.ticks_per_beat
    }

    fn initial_bpm(&self) -> f64 {
        60e6 / self.segments[0].2 as f64
    }
}

/// Converter that also covers SMPTE-timed files, where ticks map to seconds
/// at a fixed rate and tempo events are irrelevant.
enum TimeBase {
    Tempo(TempoMap),
    Fixed { secs_per_tick: f64 },
}

impl TimeBase {
    fn tick_to_sec(&self, tick: u64) -> f64 {
        match self {
            TimeBase::Tempo(map) => map.tick_to_sec(tick),
            TimeBase::Fixed { secs_per_tick } => tick as f64 * secs_per_tick,
        }
    }

    fn initial_bpm(&self) -> f64 {
        match self {
            TimeBase::Tempo(map) => map.initial_bpm(),
            TimeBase::Fixed { .. } => 120.0,
        }
    }
}

pub fn parse_file(path: &Path) -> Result<(Vec<RawEvent>, FileInfo)> {
    let bytes = std::fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path
        .file_stem()
        .map_or_else(|| path.display().to_string(), |s| s.to_string_lossy().into_owned());
    parse_bytes(&bytes, &name)
}

pub fn parse_bytes(bytes: &[u8], name: &str) -> Result<(Vec<RawEvent>, FileInfo)> {
    let smf = Smf::parse(bytes)?;

    let time_base = match smf.header.timing {
        Timing::Metrical(tpb) => {
            let mut changes = Vec::new();
            for track in &smf.tracks {
                let mut tick = 0u64;
                for event in track {
                    tick += u64::from(event.delta.as_int());
                    if let TrackEventKind::Meta(MetaMessage::Tempo(us)) = event.kind {
                        changes.push((tick, us.as_int()));
                    }
                }
            }
            TimeBase::Tempo(TempoMap::new(tpb.as_int(), changes))
        }
        Timing::Timecode(fps, subframe) => TimeBase::Fixed {
            secs_per_tick: 1.0 / (f64::from(fps.as_f32()) * subframe as f64),
        },
    };

    let mut events = Vec::new();
    let mut tracks = Vec::new();
    for (index, track) in smf.tracks.iter().enumerate() {
        let mut tick = 0u64;
        let mut track_name = None;
        let mut channels = HashSet::new();
        let mut note_count = 0usize;
        for event in track {
            tick += u64::from(event.delta.as_int());
            match event.kind {
                TrackEventKind::Midi { channel, message } => {
                    let channel = channel.as_int();
                    channels.insert(channel);
                    let time = time_base.tick_to_sec(tick);
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            note_count += 1;
                            events.push(RawEvent::note_on(
                                time,
                                key.as_int(),
                                vel.as_int(),
                                index,
                                channel,
                            ));
                        }
                        // Running-status files release with NoteOn vel 0.
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            events.push(RawEvent::note_off(time, key.as_int(), index, channel));
                        }
                        _ => {}
                    }
                }
                TrackEventKind::Meta(MetaMessage::TrackName(raw)) => {
                    track_name = Some(String::from_utf8_lossy(raw).into_owned());
                }
                _ => {}
            }
        }
        let channel = (channels.len() == 1).then(|| channels.into_iter().next().unwrap_or(0));
        tracks.push(TrackInfo {
            index,
            name: track_name.unwrap_or_else(|| format!("Track {index}")),
            channel,
            note_count,
            is_percussion: channel == Some(9),
        });
    }

    events.sort_by(|a, b| {
        a.time
            .total_cmp(&b.time)
            .then_with(|| (a.kind == NoteKind::On).cmp(&(b.kind == NoteKind::On)))
    });

    let info = FileInfo {
        name: name.to_owned(),
        duration: events.last().map_or(0.0, |e| e.time),
        track_count: tracks.len(),
        note_count: events.iter().filter(|e| e.kind == NoteKind::On).count(),
        tempo_bpm: time_base.initial_bpm(),
        tracks,
    };
    info!(
        name = %info.name,
        tracks = info.track_count,
        notes = info.note_count,
        duration = info.duration,
        "parsed midi file"
    );
    Ok((events, info))
}
