use circular_queue::CircularQueue;
use std::time::Duration;

const FLUSH_HISTORY: usize = 32;

pub struct OptimizerStats {
    pub queued: u64,
    pub suppressed: u64,
    pub coalesced: u64,
    pub batches_sent: u64,
    pub channels_sent: u64,
    pub throttled_frames: u64,
    last_flush_at: Option<Duration>,
    flush_intervals: CircularQueue<Duration>,
}

impl OptimizerStats {
    pub fn new() -> Self {
        OptimizerStats {
            queued: 0,
            suppressed: 0,
            coalesced: 0,
            batches_sent: 0,
            channels_sent: 0,
            throttled_frames: 0,
            last_flush_at: None,
            flush_intervals: CircularQueue::with_capacity(FLUSH_HISTORY),
        }
    }

    pub fn record_batch(&mut self, size: usize, at: Duration) {
        self.batches_sent += 1;
        self.channels_sent += size as u64;
        if let Some(last) = self.last_flush_at {
            self.flush_intervals.push(at.saturating_sub(last));
        }
        self.last_flush_at = Some(at);
    }

    pub fn average_flush_interval(&self) -> Option<Duration> {
        let count = self.flush_intervals.len() as u32;
        if count > 0 {
            Some(self.flush_intervals.iter().sum::<Duration>() / count)
        } else {
            None
        }
    }

    pub fn flush_rate_hz(&self) -> Option<f64> {
        match self.average_flush_interval() {
            Some(interval) if interval > Duration::from_secs(0) => {
                Some(1.0 / interval.as_secs_f64())
            }
            _ => None,
        }
    }

    pub fn average_batch_size(&self) -> f64 {
        if self.batches_sent > 0 {
            self.channels_sent as f64 / self.batches_sent as f64
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            queued: self.queued,
            suppressed: self.suppressed,
            coalesced: self.coalesced,
            batches_sent: self.batches_sent,
            channels_sent: self.channels_sent,
            throttled_frames: self.throttled_frames,
            flush_rate_hz: self.flush_rate_hz(),
        }
    }
}

// plain copy for handing across threads
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatsSnapshot {
    pub queued: u64,
    pub suppressed: u64,
    pub coalesced: u64,
    pub batches_sent: u64,
    pub channels_sent: u64,
    pub throttled_frames: u64,
    pub flush_rate_hz: Option<f64>,
}

impl Default for OptimizerStats {
    fn default() -> Self {
        OptimizerStats::new()
    }
}
