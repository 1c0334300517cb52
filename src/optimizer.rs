use crate::channel_batch::{Channel, ChannelBatch, DmxValue};
use crate::frame_scheduler::{FrameHandle, FrameScheduler};
use crate::options::{OptimizerOptions, OptionsUpdate};
use crate::sink::BatchSink;
use crate::stats::OptimizerStats;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::mem;
use std::time::Duration;
use tracing::{debug, trace};

/// Coalesces high-frequency channel writes into rate-limited batches.
///
/// Updates are filtered against the last value delivered for the same
/// channel, kept last-write-wins until the next frame, then drained to the
/// sink no more often than the throttle interval allows. At most one frame
/// is ever requested from the scheduler at a time.
///
/// The host owns the frame loop: whenever a handle requested through the
/// scheduler comes due it must call [`DmxOptimizer::run_frame`]. Call
/// [`DmxOptimizer::clear`] on teardown so no requested frame is left behind.
pub struct DmxOptimizer<S, K>
where
    S: FrameScheduler,
    K: BatchSink,
{
    scheduler: S,
    sink: K,
    options: OptimizerOptions,
    pending: IndexMap<Channel, DmxValue>,
    last_sent: HashMap<Channel, DmxValue>,
    scheduled: Option<FrameHandle>,
    last_flush_at: Option<Duration>,
    stats: OptimizerStats,
}

impl<S, K> DmxOptimizer<S, K>
where
    S: FrameScheduler,
    K: BatchSink,
{
    pub fn new(scheduler: S, sink: K, options: OptimizerOptions) -> Self {
        DmxOptimizer {
            scheduler,
            sink,
            options,
            pending: IndexMap::new(),
            last_sent: HashMap::new(),
            scheduled: None,
            last_flush_at: None,
            stats: OptimizerStats::new(),
        }
    }

    /// Returns whether the update was admitted.
    pub fn queue_update(&mut self, channel: Channel, value: DmxValue) -> bool {
        let admitted = self.admit(channel, value);
        if admitted {
            self.schedule_flush();
        }
        admitted
    }

    /// Returns how many of the updates were admitted.
    pub fn queue_updates<I>(&mut self, updates: I) -> usize
    where
        I: IntoIterator<Item = (Channel, DmxValue)>,
    {
        let mut admitted = 0;
        for (channel, value) in updates {
            if self.admit(channel, value) {
                admitted += 1;
            }
        }
        if admitted > 0 {
            self.schedule_flush();
        }
        admitted
    }

    /// Entry point for the host when a requested frame comes due. Handles
    /// that were cancelled or superseded are ignored.
    pub fn run_frame(&mut self, handle: FrameHandle) {
        if self.scheduled != Some(handle) {
            trace!(frame = handle.id(), "ignoring stale frame");
            return;
        }
        self.flush();
    }

    /// Drains everything right now, ignoring the per-frame cap and the
    /// throttle window.
    pub fn flush_immediate(&mut self) {
        self.cancel_scheduled();
        let now = self.scheduler.now();
        let batch = self.drain(None);
        if !batch.is_empty() {
            self.deliver(&batch, now);
        }
        self.last_flush_at = Some(now);
    }

    // Drops pending updates without sending. Last sent values are kept so
    // later updates are still compared against what went out.
    pub fn clear(&mut self) {
        self.cancel_scheduled();
        self.pending.clear();
    }

    pub fn reset(&mut self) {
        self.clear();
        self.last_sent.clear();
        self.last_flush_at = None;
        self.stats = OptimizerStats::new();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn update_options(&mut self, update: OptionsUpdate) {
        self.options.merge(&update);
        debug!(options = ?self.options, "optimizer options updated");
    }

    pub fn options(&self) -> &OptimizerOptions {
        &self.options
    }

    pub fn is_flush_scheduled(&self) -> bool {
        self.scheduled.is_some()
    }

    pub fn stats(&self) -> &OptimizerStats {
        &self.stats
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    fn admit(&mut self, channel: Channel, value: DmxValue) -> bool {
        self.stats.queued += 1;
        if let Some(&last) = self.last_sent.get(&channel) {
            let delta = (i16::from(value) - i16::from(last)).unsigned_abs();
            if delta < u16::from(self.options.change_threshold) {
                self.stats.suppressed += 1;
                // the wire is already close enough, an older pending value would overwrite it
                if self.pending.shift_remove(&channel).is_some() {
                    self.stats.coalesced += 1;
                }
                trace!(channel, value, last, "update below change threshold");
                return false;
            }
        }
        if self.pending.insert(channel, value).is_some() {
            self.stats.coalesced += 1;
        }
        true
    }

    fn schedule_flush(&mut self) {
        if self.scheduled.is_none() {
            self.scheduled = Some(self.scheduler.request_frame());
        }
    }

    fn schedule_flush_in(&mut self, delay: Duration) {
        if self.scheduled.is_none() {
            self.scheduled = Some(self.scheduler.request_frame_in(delay));
        }
    }

    fn cancel_scheduled(&mut self) {
        if let Some(handle) = self.scheduled.take() {
            self.scheduler.cancel_frame(handle);
        }
    }

    fn flush(&mut self) {
        // cleared before any early return so a reschedule can register again
        self.scheduled = None;

        if self.pending.is_empty() {
            return;
        }

        let now = self.scheduler.now();
        let throttle = self.options.throttle();
        if let Some(last) = self.last_flush_at {
            let elapsed = now.saturating_sub(last);
            if elapsed < throttle {
                self.stats.throttled_frames += 1;
                let remaining = throttle - elapsed;
                debug!(
                    pending = self.pending.len(),
                    wait = ?remaining,
                    "flush deferred by throttle"
                );
                self.schedule_flush_in(remaining);
                return;
            }
        }

        let batch = self.drain(Some(self.options.flush_cap()));
        if !batch.is_empty() {
            self.deliver(&batch, now);
        }

        if !self.pending.is_empty() {
            self.schedule_flush();
        }
    }

    fn drain(&mut self, limit: Option<usize>) -> ChannelBatch {
        let take = match limit {
            Some(cap) => cap.min(self.pending.len()),
            None => self.pending.len(),
        };

        let mut batch = ChannelBatch::with_capacity(take);
        let mut entries = mem::replace(&mut self.pending, IndexMap::new()).into_iter();
        for (channel, value) in entries.by_ref().take(take) {
            batch.insert(channel, value);
            self.last_sent.insert(channel, value);
        }
        self.pending = entries.collect();
        batch
    }

    fn deliver(&mut self, batch: &ChannelBatch, now: Duration) {
        debug!(
            channels = batch.len(),
            remaining = self.pending.len(),
            "flushing dmx batch"
        );
        self.sink.send_batch(batch);
        self.last_flush_at = Some(now);
        self.stats.record_batch(batch.len(), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_scheduler::{FrameRequest, ManualScheduler};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Vec<ChannelBatch>>>);

    impl Recorder {
        fn batches(&self) -> Vec<ChannelBatch> {
            self.0.borrow().clone()
        }

        fn count(&self) -> usize {
            self.0.borrow().len()
        }
    }

    impl BatchSink for Recorder {
        fn send_batch(&mut self, batch: &ChannelBatch) {
            self.0.borrow_mut().push(batch.clone());
        }
    }

    type TestOptimizer = DmxOptimizer<ManualScheduler, Recorder>;

    fn optimizer_with(options: OptimizerOptions) -> (TestOptimizer, Recorder) {
        let recorder = Recorder::default();
        let optimizer = DmxOptimizer::new(ManualScheduler::new(), recorder.clone(), options);
        (optimizer, recorder)
    }

    fn optimizer() -> (TestOptimizer, Recorder) {
        optimizer_with(OptimizerOptions::default())
    }

    fn fire_frames(optimizer: &mut TestOptimizer) {
        for handle in optimizer.scheduler_mut().take_requested() {
            optimizer.run_frame(handle);
        }
    }

    fn batch(entries: &[(Channel, DmxValue)]) -> ChannelBatch {
        entries.iter().cloned().collect()
    }

    #[test]
    fn same_channel_keeps_only_latest_value() {
        let (mut optimizer, sent) = optimizer();
        optimizer.queue_update(5, 10);
        optimizer.queue_update(5, 200);
        assert_eq!(optimizer.pending_count(), 1);

        optimizer.flush_immediate();
        assert_eq!(sent.batches(), vec![batch(&[(5, 200)])]);
        assert_eq!(optimizer.stats().coalesced, 1);
    }

    #[test]
    fn repeated_value_counts_once() {
        let (mut optimizer, _sent) = optimizer();
        assert!(optimizer.queue_update(0, 128));
        assert!(optimizer.queue_update(0, 128));
        assert_eq!(optimizer.pending_count(), 1);
    }

    #[test]
    fn unchanged_value_after_send_is_suppressed() {
        let (mut optimizer, sent) = optimizer();
        optimizer.queue_update(0, 128);
        optimizer.flush_immediate();

        assert!(!optimizer.queue_update(0, 128));
        assert_eq!(optimizer.pending_count(), 0);

        // delta of 1 is not below a threshold of 1
        assert!(optimizer.queue_update(0, 129));
        assert_eq!(optimizer.pending_count(), 1);
        optimizer.flush_immediate();
        assert_eq!(sent.batches(), vec![batch(&[(0, 128)]), batch(&[(0, 129)])]);
    }

    #[test]
    fn sub_threshold_changes_are_dropped_in_both_directions() {
        let (mut optimizer, _sent) = optimizer_with(OptimizerOptions {
            change_threshold: 5,
            ..OptimizerOptions::default()
        });
        optimizer.queue_update(2, 100);
        optimizer.flush_immediate();

        assert!(!optimizer.queue_update(2, 104));
        assert!(!optimizer.queue_update(2, 96));
        assert_eq!(optimizer.pending_count(), 0);
        assert_eq!(optimizer.stats().suppressed, 2);

        assert!(optimizer.queue_update(2, 105));
        assert!(optimizer.queue_update(2, 95));
        assert_eq!(optimizer.pending_count(), 1);
    }

    #[test]
    fn returning_to_last_sent_value_drops_pending_change() {
        let (mut optimizer, sent) = optimizer();
        optimizer.queue_update(0, 128);
        optimizer.flush_immediate();

        assert!(optimizer.queue_update(0, 200));
        assert!(!optimizer.queue_update(0, 128));
        assert_eq!(optimizer.pending_count(), 0);

        optimizer.flush_immediate();
        assert_eq!(sent.batches(), vec![batch(&[(0, 128)])]);

        // still compared against 128, so the next real move goes out
        assert!(optimizer.queue_update(0, 129));
        optimizer.flush_immediate();
        assert_eq!(sent.batches(), vec![batch(&[(0, 128)]), batch(&[(0, 129)])]);
    }

    #[test]
    fn sub_threshold_update_keeps_other_pending_channels_in_order() {
        let (mut optimizer, sent) = optimizer_with(OptimizerOptions {
            change_threshold: 5,
            ..OptimizerOptions::default()
        });
        optimizer.queue_updates(vec![(1, 10), (2, 20), (3, 30)]);
        optimizer.flush_immediate();

        optimizer.queue_updates(vec![(1, 50), (2, 60), (3, 70)]);
        assert!(!optimizer.queue_update(2, 22));
        assert_eq!(optimizer.pending_count(), 2);

        optimizer.flush_immediate();
        let last = sent.batches().pop().unwrap();
        assert_eq!(last, batch(&[(1, 50), (3, 70)]));
        assert_eq!(last.iter().map(|(channel, _)| channel).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn slow_ramp_below_threshold_never_sends() {
        let (mut optimizer, sent) = optimizer_with(OptimizerOptions {
            change_threshold: 3,
            ..OptimizerOptions::default()
        });
        optimizer.queue_update(1, 0);
        optimizer.flush_immediate();

        // each step is compared to the last *sent* value, not the last queued
        for value in &[1, 2] {
            optimizer.queue_update(1, *value);
        }
        optimizer.flush_immediate();
        assert_eq!(sent.count(), 1);
    }

    #[test]
    fn suppressed_update_does_not_request_a_frame() {
        let (mut optimizer, _sent) = optimizer();
        optimizer.queue_update(9, 50);
        optimizer.flush_immediate();
        let registrations = optimizer.scheduler().registrations();

        optimizer.queue_update(9, 50);
        assert_eq!(optimizer.scheduler().registrations(), registrations);
        assert!(!optimizer.is_flush_scheduled());
    }

    #[test]
    fn flush_is_capped_and_remainder_follows() {
        let (mut optimizer, sent) = optimizer_with(OptimizerOptions {
            max_updates_per_frame: 2,
            ..OptimizerOptions::default()
        });
        optimizer.queue_updates((0..5).map(|channel| (channel, 10)));
        assert_eq!(optimizer.pending_count(), 5);

        fire_frames(&mut optimizer);
        assert_eq!(sent.count(), 1);
        assert_eq!(sent.batches()[0].len(), 2);
        assert_eq!(optimizer.pending_count(), 3);
        assert!(optimizer.is_flush_scheduled());

        for _ in 0..2 {
            optimizer.scheduler_mut().advance(Duration::from_millis(16));
            fire_frames(&mut optimizer);
        }
        assert_eq!(optimizer.pending_count(), 0);
        assert!(!optimizer.is_flush_scheduled());

        let sizes: Vec<usize> = sent.batches().iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        let mut channels: Vec<Channel> = sent
            .batches()
            .into_iter()
            .flat_map(|b| b.into_iter().map(|(channel, _)| channel))
            .collect();
        channels.sort();
        assert_eq!(channels, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn immediate_flush_sends_everything_at_once() {
        let (mut optimizer, sent) = optimizer_with(OptimizerOptions {
            max_updates_per_frame: 2,
            ..OptimizerOptions::default()
        });
        for channel in 0..6 {
            optimizer.queue_update(channel, 200);
        }
        assert!(optimizer.is_flush_scheduled());

        optimizer.flush_immediate();
        assert_eq!(sent.count(), 1);
        assert_eq!(sent.batches()[0].len(), 6);
        assert_eq!(optimizer.pending_count(), 0);
        assert!(!optimizer.is_flush_scheduled());
        assert_eq!(optimizer.scheduler().pending_frames(), 0);
        assert_eq!(optimizer.scheduler().cancellations(), 1);
    }

    #[test]
    fn immediate_flush_ignores_throttle() {
        let (mut optimizer, sent) = optimizer();
        optimizer.queue_update(0, 1);
        optimizer.flush_immediate();
        optimizer.queue_update(0, 2);
        optimizer.flush_immediate();
        assert_eq!(sent.count(), 2);
    }

    #[test]
    fn immediate_flush_with_nothing_pending_sends_nothing() {
        let (mut optimizer, sent) = optimizer();
        optimizer.flush_immediate();
        assert_eq!(sent.count(), 0);
    }

    #[test]
    fn clear_discards_without_sending() {
        let (mut optimizer, sent) = optimizer();
        optimizer.queue_update(3, 30);
        optimizer.clear();
        assert_eq!(optimizer.pending_count(), 0);
        assert!(!optimizer.is_flush_scheduled());
        assert_eq!(optimizer.scheduler().pending_frames(), 0);

        fire_frames(&mut optimizer);
        assert_eq!(sent.count(), 0);
    }

    #[test]
    fn clear_keeps_last_sent_but_reset_forgets_it() {
        let (mut optimizer, _sent) = optimizer();
        optimizer.queue_update(7, 70);
        optimizer.flush_immediate();

        optimizer.clear();
        assert!(!optimizer.queue_update(7, 70));
        assert_eq!(optimizer.pending_count(), 0);

        optimizer.reset();
        assert!(optimizer.queue_update(7, 70));
        assert_eq!(optimizer.pending_count(), 1);
    }

    #[test]
    fn reset_restarts_throttle_clock() {
        let (mut optimizer, sent) = optimizer();
        optimizer.queue_update(0, 1);
        fire_frames(&mut optimizer);
        assert_eq!(sent.count(), 1);

        optimizer.reset();
        assert_eq!(optimizer.stats().batches_sent, 0);
        optimizer.queue_update(0, 1);
        fire_frames(&mut optimizer);
        assert_eq!(sent.count(), 2);
    }

    #[test]
    fn batch_queue_scenario() {
        let (mut optimizer, sent) = optimizer();
        let admitted = optimizer.queue_updates(vec![(0, 128), (1, 255), (2, 64)]);
        assert_eq!(admitted, 3);
        assert_eq!(optimizer.pending_count(), 3);

        optimizer.flush_immediate();
        assert_eq!(sent.batches(), vec![batch(&[(0, 128), (1, 255), (2, 64)])]);
        assert_eq!(optimizer.pending_count(), 0);
    }

    #[test]
    fn batch_queue_schedules_once() {
        let (mut optimizer, _sent) = optimizer();
        optimizer.queue_updates(vec![(0, 1), (1, 2)]);
        optimizer.queue_updates(vec![(2, 3)]);
        assert_eq!(optimizer.scheduler().registrations(), 1);
    }

    #[test]
    fn batch_queue_with_nothing_admitted_schedules_nothing() {
        let (mut optimizer, _sent) = optimizer();
        optimizer.queue_updates(vec![(0, 5)]);
        optimizer.flush_immediate();
        let registrations = optimizer.scheduler().registrations();

        assert_eq!(optimizer.queue_updates(vec![(0, 5)]), 0);
        assert_eq!(optimizer.queue_updates(Vec::<(Channel, DmxValue)>::new()), 0);
        assert_eq!(optimizer.scheduler().registrations(), registrations);
    }

    #[test]
    fn overwrite_before_flush_scenario() {
        let (mut optimizer, sent) = optimizer();
        optimizer.queue_update(5, 10);
        optimizer.queue_update(5, 200);
        assert_eq!(optimizer.pending_count(), 1);

        fire_frames(&mut optimizer);
        assert_eq!(sent.batches(), vec![batch(&[(5, 200)])]);
    }

    #[test]
    fn scheduling_is_idempotent() {
        let (mut optimizer, _sent) = optimizer();
        optimizer.queue_update(0, 10);
        optimizer.queue_update(1, 20);
        assert_eq!(optimizer.scheduler().registrations(), 1);
        assert_eq!(optimizer.scheduler().pending_frames(), 1);
    }

    #[test]
    fn different_channels_share_a_batch() {
        let (mut optimizer, sent) = optimizer();
        optimizer.queue_update(0, 10);
        optimizer.queue_update(400, 20);
        fire_frames(&mut optimizer);
        assert_eq!(sent.batches(), vec![batch(&[(0, 10), (400, 20)])]);
    }

    #[test]
    fn throttle_defers_until_window_closes() {
        let (mut optimizer, sent) = optimizer();
        optimizer.queue_update(0, 10);
        fire_frames(&mut optimizer);
        assert_eq!(sent.count(), 1);

        optimizer.scheduler_mut().advance(Duration::from_millis(4));
        optimizer.queue_update(0, 20);
        fire_frames(&mut optimizer);
        assert_eq!(sent.count(), 1);
        assert_eq!(optimizer.pending_count(), 1);
        assert_eq!(optimizer.stats().throttled_frames, 1);

        let request = optimizer.scheduler().last_request().unwrap();
        assert_eq!(request.delay, Some(Duration::from_millis(12)));

        optimizer.scheduler_mut().advance(Duration::from_millis(12));
        fire_frames(&mut optimizer);
        assert_eq!(sent.batches(), vec![batch(&[(0, 10)]), batch(&[(0, 20)])]);
        assert!(!optimizer.is_flush_scheduled());
    }

    #[test]
    fn updates_during_throttle_join_the_deferred_flush() {
        let (mut optimizer, sent) = optimizer();
        optimizer.queue_update(0, 10);
        fire_frames(&mut optimizer);

        optimizer.queue_update(1, 1);
        fire_frames(&mut optimizer);
        let registrations = optimizer.scheduler().registrations();

        optimizer.queue_update(2, 2);
        optimizer.queue_update(1, 3);
        assert_eq!(optimizer.scheduler().registrations(), registrations);

        optimizer.scheduler_mut().advance(Duration::from_millis(16));
        fire_frames(&mut optimizer);
        assert_eq!(sent.batches()[1], batch(&[(1, 3), (2, 2)]));
    }

    #[test]
    fn stale_frame_handle_is_ignored() {
        let (mut optimizer, sent) = optimizer();
        optimizer.queue_update(0, 10);
        let FrameRequest { handle, .. } = optimizer.scheduler().last_request().unwrap();

        optimizer.clear();
        optimizer.queue_update(1, 10);
        optimizer.run_frame(handle);
        assert_eq!(sent.count(), 0);
        assert_eq!(optimizer.pending_count(), 1);

        fire_frames(&mut optimizer);
        assert_eq!(sent.batches(), vec![batch(&[(1, 10)])]);
    }

    #[test]
    fn empty_frame_does_not_call_sink() {
        let (mut optimizer, sent) = optimizer();
        optimizer.queue_update(0, 10);
        let FrameRequest { handle, .. } = optimizer.scheduler().last_request().unwrap();
        optimizer.flush_immediate();

        // a host that already dequeued the frame before it was cancelled
        optimizer.run_frame(handle);
        assert_eq!(sent.count(), 1);
    }

    #[test]
    fn options_apply_to_next_flush() {
        let (mut optimizer, sent) = optimizer();
        optimizer.queue_updates((0..4).map(|channel| (channel, 1)));
        optimizer.update_options(OptionsUpdate {
            max_updates_per_frame: Some(3),
            throttle_ms: Some(0),
            ..OptionsUpdate::default()
        });
        assert_eq!(optimizer.options().change_threshold, 1);

        fire_frames(&mut optimizer);
        fire_frames(&mut optimizer);
        let sizes: Vec<usize> = sent.batches().iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 1]);
    }

    #[test]
    fn failed_sends_still_count_as_sent() {
        let mut optimizer = DmxOptimizer::new(
            ManualScheduler::new(),
            |_batch: &ChannelBatch| {
                // network error swallowed by the caller's wrapper
            },
            OptimizerOptions::default(),
        );
        optimizer.queue_update(0, 99);
        optimizer.flush_immediate();
        assert!(!optimizer.queue_update(0, 99));
    }

    #[test]
    fn channels_outside_dmx_range_are_forwarded() {
        let (mut optimizer, sent) = optimizer();
        optimizer.queue_update(9000, 255);
        optimizer.flush_immediate();
        assert_eq!(sent.batches(), vec![batch(&[(9000, 255)])]);
    }
}
