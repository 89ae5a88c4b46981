//! Live MIDI input over system ports.

use midir::{Ignore, MidiInput, MidiInputConnection};
use tracing::info;

use crate::error::{Error, Result};
use crate::events::NoteKind;

const CLIENT_NAME: &str = "qinkey-in";

/// An open connection to a MIDI input port. Dropping it disconnects.
pub struct MidiListener {
    port_name: String,
    conn: Option<MidiInputConnection<()>>,
}

impl MidiListener {
    /// Names of all currently available input ports.
    pub fn list_ports() -> Result<Vec<String>> {
        let mut input = MidiInput::new(CLIENT_NAME).map_err(|e| Error::MidiInput(e.to_string()))?;
        input.ignore(Ignore::All);
        Ok(input
            .ports()
            .iter()
            .filter_map(|p| input.port_name(p).ok())
            .collect())
    }

    /// Connect to the first port whose name contains `fragment`
    /// (case-insensitive). The callback runs on the driver's thread, so it
    /// must stay short and never block.
    pub fn connect(
        fragment: &str,
        callback: impl Fn(NoteKind, u8, u8) + Send + 'static,
    ) -> Result<Self> {
        let mut input = MidiInput::new(CLIENT_NAME).map_err(|e| Error::MidiInput(e.to_string()))?;
        input.ignore(Ignore::All);

        let wanted = fragment.to_lowercase();
        let port = input
            .ports()
            .into_iter()
            .find(|p| {
                input
                    .port_name(p)
                    .is_ok_and(|name| name.to_lowercase().contains(&wanted))
            })
            .ok_or_else(|| Error::PortNotFound(fragment.to_owned()))?;
        let port_name = input
            .port_name(&port)
            .map_err(|e| Error::MidiInput(e.to_string()))?;

        let conn = input
            .connect(
                &port,
                CLIENT_NAME,
                move |_timestamp, message, _state: &mut ()| {
                    if let Some((kind, pitch, velocity)) = parse_message(message) {
                        callback(kind, pitch, velocity);
                    }
                },
                (),
            )
            .map_err(|e| Error::MidiInput(e.to_string()))?;

        info!(port = %port_name, "midi input connected");
        Ok(Self {
            port_name,
            conn: Some(conn),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn close(mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close();
            info!(port = %self.port_name, "midi input disconnected");
        }
    }
}

/// Decode a raw channel-voice message into a note event. NoteOn with
/// velocity 0 is a release, per running-status convention.
fn parse_message(data: &[u8]) -> Option<(NoteKind, u8, u8)> {
    let (&status, rest) = data.split_first()?;
    let (&pitch, rest) = rest.split_first()?;
    let velocity = rest.first().copied().unwrap_or(0);
    match status & 0xF0 {
        0x90 if velocity > 0 => Some((NoteKind::On, pitch, velocity)),
        0x90 | 0x80 => Some((NoteKind::Off, pitch, 0)),
        _ => None,
    }
}
