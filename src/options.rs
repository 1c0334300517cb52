use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct OptimizerOptions {
    pub max_updates_per_frame: usize,
    pub throttle_ms: u64,
    pub change_threshold: u8,
    // advisory, treated the same as max_updates_per_frame
    pub batch_size: usize,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        OptimizerOptions {
            max_updates_per_frame: 512,
            throttle_ms: 16,
            change_threshold: 1,
            batch_size: 512,
        }
    }
}

impl OptimizerOptions {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    // a cap of zero would never drain anything and spin on rescheduling
    pub fn flush_cap(&self) -> usize {
        self.max_updates_per_frame.min(self.batch_size).max(1)
    }

    pub fn merge(&mut self, update: &OptionsUpdate) {
        if let Some(value) = update.max_updates_per_frame {
            self.max_updates_per_frame = value;
        }
        if let Some(value) = update.throttle_ms {
            self.throttle_ms = value;
        }
        if let Some(value) = update.change_threshold {
            self.change_threshold = value;
        }
        if let Some(value) = update.batch_size {
            self.batch_size = value;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(default)]
pub struct OptionsUpdate {
    pub max_updates_per_frame: Option<usize>,
    pub throttle_ms: Option<u64>,
    pub change_threshold: Option<u8>,
    pub batch_size: Option<usize>,
}
