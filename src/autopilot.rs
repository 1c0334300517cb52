use crate::channel_batch::{Channel, DmxValue};
use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;

lazy_static! {
    static ref RATES: [Duration; 10] = [
        Duration::from_secs(16),
        Duration::from_secs(8),
        Duration::from_secs(6),
        Duration::from_secs(4),
        Duration::from_secs(2),
        Duration::from_millis(1500),
        Duration::from_secs(1),
        Duration::from_millis(500),
        Duration::from_millis(250),
        Duration::from_millis(125)
    ];
}

// midi 0-127 for all shape values
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Lfo {
    pub skew: u8,
    pub hold: u8,
    pub speed: u8,
    pub offset: u8,
}

impl Default for Lfo {
    fn default() -> Self {
        Lfo {
            skew: 0,
            hold: 0,
            speed: 50,
            offset: 64,
        }
    }
}

impl Lfo {
    pub fn cycle_duration(&self) -> Duration {
        let rate_index = (self.speed.min(127) as f64 * (RATES.len() as f64 / 128.0)) as usize;
        RATES[rate_index]
    }

    // Returns a value between 0 and 1
    pub fn value_at(&self, pos: Duration) -> f64 {
        let cycle = self.cycle_duration().as_secs_f64();
        let offset = cycle * ((self.offset.min(127) as f64 - 64.0) / 64.0) / 2.0;
        let phase = (pos.as_secs_f64() + offset).rem_euclid(cycle) / cycle;
        let mid = self.skew.min(127) as f64 / 127.0;
        let hold = self.hold.min(126) as f64 / 127.0;
        if mid <= 0.0 {
            1.0 - get_held_pos(phase, hold)
        } else if phase < mid {
            get_held_pos(phase / mid, hold)
        } else {
            1.0 - get_held_pos((phase - mid) / (1.0 - mid), hold)
        }
    }
}

fn get_held_pos(pos: f64, hold: f64) -> f64 {
    if pos < (1.0 - hold) {
        pos / (1.0 - hold)
    } else {
        1.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AutopilotConfig {
    pub channel: Channel,
    #[serde(default)]
    pub lfo: Lfo,
    #[serde(default)]
    pub min: DmxValue,
    #[serde(default = "full_scale")]
    pub max: DmxValue,
    // random +/- jitter applied on top of the wave
    #[serde(default)]
    pub flicker: u8,
    #[serde(default)]
    pub seed: u64,
}

fn full_scale() -> DmxValue {
    255
}

pub struct AutopilotTrack {
    channel: Channel,
    lfo: Lfo,
    min: DmxValue,
    max: DmxValue,
    flicker: u8,
    rng: StdRng,
}

impl AutopilotTrack {
    pub fn new(config: &AutopilotConfig) -> Self {
        AutopilotTrack {
            channel: config.channel,
            lfo: config.lfo,
            min: config.min,
            max: config.max,
            flicker: config.flicker,
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn value_at(&mut self, pos: Duration) -> DmxValue {
        let wave = self.lfo.value_at(pos);
        let range = self.max as f64 - self.min as f64;
        let mut value = self.min as f64 + wave * range;
        if self.flicker > 0 {
            let jitter = self.flicker as i32;
            value += self.rng.gen_range(-jitter..=jitter) as f64;
        }
        value.round().max(0.0).min(255.0) as DmxValue
    }
}

pub struct Autopilot {
    tracks: Vec<AutopilotTrack>,
}

impl Autopilot {
    pub fn new(configs: &[AutopilotConfig]) -> Self {
        Autopilot {
            tracks: configs.iter().map(AutopilotTrack::new).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn sample(&mut self, pos: Duration) -> Vec<(Channel, DmxValue)> {
        self.tracks
            .iter_mut()
            .map(|track| (track.channel(), track.value_at(pos)))
            .collect()
    }
}
