use crate::channel_batch::{Channel, DmxValue};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[cfg(feature = "midi")]
pub use self::connection::{connect_mappings, get_input, get_inputs, ThreadReference};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MidiMapping {
    pub port: String,
    // 1-16, as printed on the hardware
    pub midi_channel: u8,
    pub cc: u8,
    pub dmx_channel: Channel,
    #[serde(default)]
    pub min: DmxValue,
    #[serde(default = "full_scale")]
    pub max: DmxValue,
}

fn full_scale() -> DmxValue {
    255
}

impl MidiMapping {
    pub fn status_byte(&self) -> u8 {
        176 - 1 + self.midi_channel.max(1).min(16)
    }

    pub fn is_on_port(&self, port_name: &str) -> bool {
        normalize_port_name(&self.port) == normalize_port_name(port_name)
    }

    pub fn apply(&self, message: &[u8]) -> Option<(Channel, DmxValue)> {
        if message.len() == 3 && message[0] == self.status_byte() && message[1] == self.cc {
            Some((self.dmx_channel, scale_cc(message[2], self.min, self.max)))
        } else {
            None
        }
    }
}

pub fn scale_cc(value: u8, min: DmxValue, max: DmxValue) -> DmxValue {
    let f_value = mask7(value) as f64 / 127.0;
    let scaled = min as f64 + f_value * (max as f64 - min as f64);
    scaled.round().max(0.0).min(255.0) as DmxValue
}

/// 7 bit mask
#[inline(always)]
pub fn mask7(input: u8) -> u8 {
    input & 0b01111111
}

// strips the client index prefix and "20:0" style suffix some backends add
pub fn normalize_port_name(name: &str) -> String {
    lazy_static! {
        static ref RE: Regex = Regex::new(r"^([0-9]- )?(.+?)( [0-9]+:[0-9]+)?$").unwrap();
    }
    RE.replace(name, "${2}").into_owned()
}

#[cfg_attr(not(feature = "midi"), allow(dead_code))]
#[derive(Debug, PartialEq, Eq)]
enum PortChange {
    Connect(usize),
    Disconnect,
    Keep,
}

// decided from the live connection, not the last port seen, so a refused
// connect is tried again while the port stays visible
#[cfg_attr(not(feature = "midi"), allow(dead_code))]
fn port_change(connected: bool, port: Option<usize>) -> PortChange {
    match (connected, port) {
        (false, Some(index)) => PortChange::Connect(index),
        (true, None) => PortChange::Disconnect,
        _ => PortChange::Keep,
    }
}

#[cfg(feature = "midi")]
mod connection {
    use super::{normalize_port_name, port_change, MidiMapping, PortChange};
    use crate::error::{Error, Result};
    use crate::shared_output::SharedDmxOutput;
    use midir::{MidiInput, MidiInputConnection};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;
    use tracing::{info, warn};

    const APP_NAME: &str = "DMX Batcher";

    pub struct ThreadReference {
        alive: Arc<AtomicBool>,
    }

    impl Drop for ThreadReference {
        fn drop(&mut self) {
            self.alive.store(false, Ordering::Relaxed);
        }
    }

    struct MidiInputMessage {
        stamp: u64,
        data: Vec<u8>,
    }

    // Keeps trying to (re)connect to the named port once a second for as
    // long as the returned reference is held.
    pub fn get_input<F>(port_name: &str, callback: F) -> ThreadReference
    where
        F: FnMut(u64, &[u8]) + Send + 'static,
    {
        let port_name_notify = String::from(port_name);
        let (tx, rx) = mpsc::channel::<MidiInputMessage>();
        let alive = Arc::new(AtomicBool::new(true));
        let alive_reconnect = Arc::clone(&alive);

        thread::spawn(move || {
            let mut callback = callback;
            for msg in rx {
                callback(msg.stamp, &msg.data)
            }
        });

        thread::spawn(move || {
            let mut current_input: Option<MidiInputConnection<()>> = None;
            while alive_reconnect.load(Ordering::Relaxed) {
                let input = match MidiInput::new(APP_NAME) {
                    Ok(input) => input,
                    Err(err) => {
                        warn!(error = %err, "could not open midi input client");
                        thread::sleep(Duration::from_secs(1));
                        continue;
                    }
                };
                let current_port = get_input_port_index(&input, &port_name_notify);
                match port_change(current_input.is_some(), current_port) {
                    PortChange::Connect(index) => {
                        let tx_input = tx.clone();
                        let connected = input.connect(
                            index,
                            &port_name_notify,
                            move |stamp, msg, _| {
                                let _ = tx_input.send(MidiInputMessage {
                                    stamp,
                                    data: Vec::from(msg),
                                });
                            },
                            (),
                        );
                        // a failed connect leaves us disconnected, retried next pass
                        current_input = match connected {
                            Ok(connection) => {
                                info!(port = %port_name_notify, "midi input connected");
                                Some(connection)
                            }
                            Err(err) => {
                                warn!(port = %port_name_notify, error = %err, "midi input connect failed");
                                None
                            }
                        };
                    }
                    PortChange::Disconnect => {
                        if let Some(current_input) = current_input.take() {
                            current_input.close();
                        }
                        info!(port = %port_name_notify, "midi input disconnected");
                    }
                    PortChange::Keep => (),
                }
                thread::sleep(Duration::from_secs(1));
            }
        });

        ThreadReference { alive }
    }

    pub fn get_inputs() -> Result<Vec<String>> {
        let input = MidiInput::new(APP_NAME).map_err(|err| Error::Midi(err.to_string()))?;
        let mut result = Vec::new();
        for i in 0..input.port_count() {
            let name = input
                .port_name(i)
                .map_err(|err| Error::Midi(err.to_string()))?;
            result.push(normalize_port_name(&name));
        }
        Ok(result)
    }

    // one input per distinct port, each feeding every mapping on that port
    pub fn connect_mappings(
        mappings: &[MidiMapping],
        output: &SharedDmxOutput,
    ) -> Vec<ThreadReference> {
        let mut by_port: HashMap<String, Vec<MidiMapping>> = HashMap::new();
        for mapping in mappings {
            by_port
                .entry(normalize_port_name(&mapping.port))
                .or_insert_with(Vec::new)
                .push(mapping.clone());
        }

        by_port
            .into_iter()
            .map(|(port, port_mappings)| {
                let output = output.clone();
                get_input(&port, move |_stamp, message| {
                    for mapping in &port_mappings {
                        if let Some((channel, value)) = mapping.apply(message) {
                            if let Err(err) = output.queue_update(channel, value) {
                                warn!(error = %err, "dropping midi update");
                            }
                        }
                    }
                })
            })
            .collect()
    }

    fn get_input_port_index(input: &MidiInput, name: &str) -> Option<usize> {
        let normalized_name = normalize_port_name(name);
        for i in 0..input.port_count() {
            if let Ok(ref name) = input.port_name(i) {
                if normalize_port_name(name) == normalized_name {
                    return Some(i);
                }
            }
        }
        None
    }
}
