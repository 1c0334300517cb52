use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameHandle(u64);

impl FrameHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Per-frame callback registration plus a monotonic clock.
///
/// Implementations only record requests. The host is responsible for
/// calling `DmxOptimizer::run_frame` with each handle once it is due.
pub trait FrameScheduler {
    fn request_frame(&mut self) -> FrameHandle;

    /// Request a frame no earlier than `delay` from now. Hosts without a
    /// timer can fall back to the next frame.
    fn request_frame_in(&mut self, _delay: Duration) -> FrameHandle {
        self.request_frame()
    }

    fn cancel_frame(&mut self, handle: FrameHandle);

    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRequest {
    pub handle: FrameHandle,
    pub delay: Option<Duration>,
}

// Deterministic host: time only moves when told to.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    now: Duration,
    next_id: u64,
    requested: Vec<FrameRequest>,
    registrations: usize,
    cancellations: usize,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, duration: Duration) {
        self.now += duration;
    }

    pub fn registrations(&self) -> usize {
        self.registrations
    }

    pub fn cancellations(&self) -> usize {
        self.cancellations
    }

    pub fn pending_frames(&self) -> usize {
        self.requested.len()
    }

    pub fn last_request(&self) -> Option<FrameRequest> {
        self.requested.last().copied()
    }

    /// Hand out every outstanding request, oldest first.
    pub fn take_requested(&mut self) -> Vec<FrameHandle> {
        self.requested.drain(..).map(|request| request.handle).collect()
    }

    fn register(&mut self, delay: Option<Duration>) -> FrameHandle {
        self.next_id += 1;
        self.registrations += 1;
        let handle = FrameHandle(self.next_id);
        self.requested.push(FrameRequest { handle, delay });
        handle
    }
}

impl FrameScheduler for ManualScheduler {
    fn request_frame(&mut self) -> FrameHandle {
        self.register(None)
    }

    fn request_frame_in(&mut self, delay: Duration) -> FrameHandle {
        self.register(Some(delay))
    }

    fn cancel_frame(&mut self, handle: FrameHandle) {
        let before = self.requested.len();
        self.requested.retain(|request| request.handle != handle);
        if self.requested.len() != before {
            self.cancellations += 1;
        }
    }

    fn now(&self) -> Duration {
        self.now
    }
}

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

// Fixed-interval host for running outside a display refresh loop. Frames
// land on a grid of `frame_interval` measured from construction.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    frame_interval: Duration,
    next_id: u64,
    due: Vec<(FrameHandle, Duration)>,
}

impl FrameTimer {
    pub fn new(frame_interval: Duration) -> Self {
        FrameTimer {
            start: Instant::now(),
            frame_interval: frame_interval.max(Duration::from_millis(1)),
            next_id: 0,
            due: Vec::new(),
        }
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    pub fn next_frame_boundary(&self, now: Duration) -> Duration {
        let interval = self.frame_interval.as_nanos();
        let frames = now.as_nanos() / interval + 1;
        duration_from_nanos(frames * interval)
    }

    pub fn time_until_next(&self) -> Option<Duration> {
        let now = self.now();
        self.due
            .iter()
            .map(|(_, at)| at.saturating_sub(now))
            .min()
    }

    pub fn take_due(&mut self) -> Vec<FrameHandle> {
        let now = self.now();
        let mut ready: Vec<(FrameHandle, Duration)> = Vec::new();
        self.due.retain(|&(handle, at)| {
            if at <= now {
                ready.push((handle, at));
                false
            } else {
                true
            }
        });
        ready.sort_by_key(|&(handle, at)| (at, handle));
        ready.into_iter().map(|(handle, _)| handle).collect()
    }

    pub fn is_idle(&self) -> bool {
        self.due.is_empty()
    }

    fn register(&mut self, at: Duration) -> FrameHandle {
        self.next_id += 1;
        let handle = FrameHandle(self.next_id);
        self.due.push((handle, at));
        handle
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        FrameTimer::new(DEFAULT_FRAME_INTERVAL)
    }
}

impl FrameScheduler for FrameTimer {
    fn request_frame(&mut self) -> FrameHandle {
        let at = self.next_frame_boundary(self.now());
        self.register(at)
    }

    fn request_frame_in(&mut self, delay: Duration) -> FrameHandle {
        let at = self.now() + delay;
        self.register(at)
    }

    fn cancel_frame(&mut self, handle: FrameHandle) {
        self.due.retain(|&(other, _)| other != handle);
    }

    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

fn duration_from_nanos(nanos: u128) -> Duration {
    Duration::new(
        (nanos / 1_000_000_000) as u64,
        (nanos % 1_000_000_000) as u32,
    )
}
