//! MIDI output via midir
//!
//! Sends chime notes to a synth's MIDI port (FluidSynth, TiMidity, hardware).
//! The instrument is selected with a General MIDI program change.

use std::sync::Mutex;

use midir::{MidiOutput, MidiOutputConnection};
use tracing::info;

use crate::chime::Pitch;
use crate::engine::{EngineError, NoteSink};

const ALL_NOTES_OFF: u8 = 123;
const CONTROL_CHANGE: u8 = 0xB0;
const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;
const PROGRAM_CHANGE: u8 = 0xC0;

/// Information about a discovered MIDI port
#[derive(Debug, Clone)]
pub struct MidiPortInfo {
    pub index: usize,
    pub name: String,
}

/// List available MIDI output ports
pub fn list_output_ports() -> Result<Vec<MidiPortInfo>, EngineError> {
    let midi_out =
        MidiOutput::new("chimes-scan").map_err(|e| EngineError::Output(e.to_string()))?;

    let ports = midi_out
        .ports()
        .iter()
        .enumerate()
        .filter_map(|(i, port)| {
            midi_out
                .port_name(port)
                .ok()
                .map(|name| MidiPortInfo { index: i, name })
        })
        .collect();

    Ok(ports)
}

/// Note sink writing to one MIDI output port on one channel
pub struct MidiOutSink {
    connection: Mutex<Option<MidiOutputConnection>>,
    channel: u8,
    pub port_name: String,
}

impl MidiOutSink {
    /// Open the first output port whose name contains `port_pattern`.
    pub fn open(port_pattern: &str, channel: u8) -> Result<Self, EngineError> {
        let midi_out =
            MidiOutput::new("chimes-out").map_err(|e| EngineError::Output(e.to_string()))?;

        let ports = midi_out.ports();
        let port = ports
            .iter()
            .find(|p| {
                midi_out
                    .port_name(p)
                    .map(|n| n.contains(port_pattern))
                    .unwrap_or(false)
            })
            .ok_or_else(|| EngineError::Output(format!("port not found: {}", port_pattern)))?;

        let port_name = midi_out
            .port_name(port)
            .map_err(|e| EngineError::Output(e.to_string()))?;

        let connection = midi_out
            .connect(port, "chimes-output")
            .map_err(|e| EngineError::Output(e.to_string()))?;

        info!("Opened MIDI output: {}", port_name);

        Ok(Self {
            connection: Mutex::new(Some(connection)),
            channel: channel & 0x0F,
            port_name,
        })
    }

    fn send(&self, data: &[u8]) -> Result<(), EngineError> {
        let mut guard = self.connection.lock().expect("midi output mutex poisoned");
        match guard.as_mut() {
            Some(conn) => conn
                .send(data)
                .map_err(|e| EngineError::Output(e.to_string())),
            None => Err(EngineError::Output("connection closed".to_string())),
        }
    }

    /// Close the connection
    pub fn close(&self) {
        let mut guard = self.connection.lock().expect("midi output mutex poisoned");
        if let Some(conn) = guard.take() {
            conn.close();
            info!("Closed MIDI output: {}", self.port_name);
        }
    }
}

impl NoteSink for MidiOutSink {
    fn program_change(&self, program: u8) -> Result<(), EngineError> {
        self.send(&[PROGRAM_CHANGE | self.channel, program & 0x7F])
    }

    fn note_on(&self, pitch: Pitch, velocity: u8) -> Result<(), EngineError> {
        self.send(&[NOTE_ON | self.channel, pitch.0 & 0x7F, velocity & 0x7F])
    }

    fn note_off(&self, pitch: Pitch) -> Result<(), EngineError> {
        self.send(&[NOTE_OFF | self.channel, pitch.0 & 0x7F, 0])
    }

    fn all_notes_off(&self) {
        // Best effort: a closed port has nothing sounding.
        let _ = self.send(&[CONTROL_CHANGE | self.channel, ALL_NOTES_OFF, 0]);
    }
}

impl Drop for MidiOutSink {
    fn drop(&mut self) {
        self.close();
    }
}
