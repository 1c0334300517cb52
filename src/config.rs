use crate::autopilot::{AutopilotConfig, Lfo};
use crate::error::Result;
use crate::midi_input::MidiMapping;
use crate::options::OptimizerOptions;
use serde::{Deserialize, Serialize};
use serde_json::to_writer_pretty;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::time::Duration;
use tracing::info;

impl Config {
    pub fn read<P: AsRef<Path>>(filepath: P) -> Result<Self> {
        let file = File::open(filepath)?;
        let reader = BufReader::new(file);

        let config = serde_json::from_reader(reader)?;
        Ok(config)
    }

    pub fn read_or_default<P: AsRef<Path>>(filepath: P) -> Result<Self> {
        let filepath = filepath.as_ref();
        match File::open(filepath) {
            Ok(file) => Ok(serde_json::from_reader(BufReader::new(file))?),
            Err(ref err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %filepath.display(), "no config file, using defaults");
                Ok(Config::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn write<P: AsRef<Path>>(&self, filepath: P) -> Result<()> {
        to_writer_pretty(&File::create(filepath)?, self)?;
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            options: OptimizerOptions::default(),
            frame_interval_ms: default_frame_interval_ms(),
            output: OutputConfig::Stdout,
            autopilot: vec![
                // rgb par cycling at different rates
                AutopilotConfig {
                    channel: 0,
                    lfo: Lfo {
                        speed: 40,
                        skew: 64,
                        ..Lfo::default()
                    },
                    min: 0,
                    max: 255,
                    flicker: 0,
                    seed: 0,
                },
                AutopilotConfig {
                    channel: 1,
                    lfo: Lfo {
                        speed: 50,
                        skew: 64,
                        offset: 96,
                        ..Lfo::default()
                    },
                    min: 0,
                    max: 255,
                    flicker: 0,
                    seed: 0,
                },
                AutopilotConfig {
                    channel: 2,
                    lfo: Lfo {
                        speed: 60,
                        skew: 64,
                        offset: 32,
                        ..Lfo::default()
                    },
                    min: 0,
                    max: 255,
                    flicker: 0,
                    seed: 0,
                },
                // dimmer with a candle-ish wobble
                AutopilotConfig {
                    channel: 3,
                    lfo: Lfo {
                        speed: 20,
                        hold: 40,
                        skew: 100,
                        ..Lfo::default()
                    },
                    min: 120,
                    max: 255,
                    flicker: 6,
                    seed: 42,
                },
            ],
            midi_mappings: vec![MidiMapping {
                port: String::from("Midi Fighter Twister"),
                midi_channel: 1,
                cc: 0,
                dmx_channel: 3,
                min: 0,
                max: 255,
            }],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub options: OptimizerOptions,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub autopilot: Vec<AutopilotConfig>,
    #[serde(default)]
    pub midi_mappings: Vec<MidiMapping>,
}

fn default_frame_interval_ms() -> u64 {
    16
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum OutputConfig {
    Stdout,
    File { path: String },
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig::Stdout
    }
}
