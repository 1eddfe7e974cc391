use std::cell::RefCell;

use anyhow::{anyhow, Result};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiInputPort};
use tracing::{info, warn};

use crate::input::{HitCallback, HitSource, InputDevice, NoteOn};

const CLIENT_NAME: &str = "rudiment";

/// Decodes a channel-voice note-on. Note-offs and zero-velocity note-ons
/// yield `None`.
pub fn parse_note_on(message: &[u8]) -> Option<NoteOn> {
    let &[status, note, velocity, ..] = message else {
        return None;
    };
    if status & 0xF0 != 0x90 || velocity == 0 {
        return None;
    }
    Some(NoteOn {
        note: note & 0x7F,
        velocity: velocity & 0x7F,
    })
}

/// Keeps the ports whose name contains `filter`, or all of them.
pub fn select_ports<P>(ports: Vec<(String, P)>, filter: Option<&str>) -> Vec<(String, P)> {
    ports
        .into_iter()
        .filter(|(name, _)| filter.map_or(true, |filter| name.contains(filter)))
        .collect()
}

fn enumerate_ports(filter: Option<&str>) -> Result<Vec<(String, MidiInputPort)>> {
    let input = MidiInput::new(CLIENT_NAME)?;
    let ports = input
        .ports()
        .into_iter()
        .map(|port| {
            let name = input.port_name(&port).unwrap_or_else(|_| "Unknown".into());
            (name, port)
        })
        .collect();
    Ok(select_ports(ports, filter))
}

pub struct MidiManager;

impl MidiManager {
    pub fn list_inputs() -> Result<Vec<InputDevice>> {
        Ok(enumerate_ports(None)?
            .into_iter()
            .map(|(name, _)| InputDevice { name })
            .collect())
    }
}

/// Listens on every enumerated MIDI input, or only on `port_filter` when set.
/// The ports found by `list_inputs` are the ones `on_hit` opens.
pub struct MidirSource {
    port_filter: Option<String>,
    enumerated: RefCell<Option<Vec<(String, MidiInputPort)>>>,
    connections: Vec<MidiInputConnection<()>>,
}

impl MidirSource {
    pub fn new(port_filter: Option<String>) -> Self {
        Self {
            port_filter,
            enumerated: RefCell::new(None),
            connections: Vec::new(),
        }
    }

    fn connect(
        &self,
        name: &str,
        port: &MidiInputPort,
        callback: HitCallback,
    ) -> Result<MidiInputConnection<()>> {
        let mut input = MidiInput::new(CLIENT_NAME)?;
        input.ignore(Ignore::All);
        input
            .connect(
                port,
                CLIENT_NAME,
                move |_stamp, message, _| {
                    if let Some(strike) = parse_note_on(message) {
                        callback(strike);
                    }
                },
                (),
            )
            .map_err(|err| anyhow!("midi connect error on {name:?}: {err}"))
    }
}

impl HitSource for MidirSource {
    fn name(&self) -> &str {
        "midi"
    }

    fn list_inputs(&self) -> Result<Vec<InputDevice>> {
        let ports = enumerate_ports(self.port_filter.as_deref())?;
        let devices = ports
            .iter()
            .map(|(name, _)| InputDevice { name: name.clone() })
            .collect();
        *self.enumerated.borrow_mut() = Some(ports);
        Ok(devices)
    }

    fn on_hit(&mut self, callback: HitCallback) -> Result<()> {
        self.detach();
        let ports = match self.enumerated.borrow_mut().take() {
            Some(ports) => ports,
            None => enumerate_ports(self.port_filter.as_deref())?,
        };
        let mut failures = Vec::new();
        for (name, port) in ports {
            match self.connect(&name, &port, callback.clone()) {
                Ok(connection) => {
                    info!(port = %name, "listening for midi input");
                    self.connections.push(connection);
                }
                Err(err) => {
                    warn!(port = %name, %err, "could not open midi port");
                    failures.push(name);
                }
            }
        }
        if self.connections.is_empty() && !failures.is_empty() {
            return Err(anyhow!("no midi port could be opened: {}", failures.join(", ")));
        }
        Ok(())
    }

    fn detach(&mut self) {
        for connection in self.connections.drain(..) {
            connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_inputs_does_not_panic() {
        // MIDI input availability varies by environment; just ensure no panic.
        let _ = MidiManager::list_inputs();
    }

    #[test]
    fn only_sounding_note_ons_count() {
        assert_eq!(
            parse_note_on(&[0x99, 38, 101]),
            Some(NoteOn {
                note: 38,
                velocity: 101
            })
        );
        assert_eq!(parse_note_on(&[0x90, 36, 0]), None);
        assert_eq!(parse_note_on(&[0x80, 36, 64]), None);
        assert_eq!(parse_note_on(&[0xB0, 64, 127]), None);
        assert_eq!(parse_note_on(&[0x90, 36]), None);
    }

    #[test]
    fn port_filter_matches_substring() {
        let ports = vec![
            ("Roland TD-17 MIDI 1".to_string(), 0),
            ("IAC Driver Bus 1".to_string(), 1),
            ("Roland TD-17 MIDI 2".to_string(), 2),
        ];
        let picked = select_ports(ports.clone(), Some("TD-17"));
        assert_eq!(picked.iter().map(|(_, port)| *port).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(select_ports(ports.clone(), None), ports);
        assert!(select_ports(ports, Some("SPD-SX")).is_empty());
    }

    #[test]
    fn listing_remembers_ports_for_registration() {
        let source = MidirSource::new(Some("no such drum module".into()));
        // Enumeration may fail where no MIDI backend exists.
        if let Ok(devices) = source.list_inputs() {
            assert!(devices.is_empty());
            assert_eq!(source.enumerated.borrow().as_ref().map(Vec::len), Some(0));
        }
    }
}
