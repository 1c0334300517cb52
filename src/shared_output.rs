use crate::channel_batch::{Channel, DmxValue};
use crate::error::{Error, Result};
use crate::frame_scheduler::FrameTimer;
use crate::optimizer::DmxOptimizer;
use crate::options::{OptimizerOptions, OptionsUpdate};
use crate::sink::BatchSink;
use crate::stats::StatsSnapshot;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::debug;

// Spawns the thread that owns the optimizer. Every clone of the returned
// handle feeds the same channel space, so writes from different sources
// are coalesced together.
pub fn get_shared_output<K>(
    sink: K,
    options: OptimizerOptions,
    frame_interval: Duration,
) -> SharedDmxOutput
where
    K: BatchSink + Send + 'static,
{
    let (tx, rx) = mpsc::channel();

    // event loop
    thread::spawn(move || {
        let mut optimizer = DmxOptimizer::new(FrameTimer::new(frame_interval), sink, options);
        loop {
            let received = match optimizer.scheduler().time_until_next() {
                Some(wait) => rx.recv_timeout(wait),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match received {
                Ok(SharedDmxOutputEvent::Close) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(event) => handle_event(&mut optimizer, event),
                Err(RecvTimeoutError::Timeout) => (),
            }

            // a steady stream of events would otherwise starve the frames
            for handle in optimizer.scheduler_mut().take_due() {
                optimizer.run_frame(handle);
            }
        }

        optimizer.clear();
        debug!("dmx output closed");
    });

    SharedDmxOutput { tx }
}

fn handle_event<K: BatchSink>(
    optimizer: &mut DmxOptimizer<FrameTimer, K>,
    event: SharedDmxOutputEvent,
) {
    match event {
        SharedDmxOutputEvent::Queue(channel, value) => {
            optimizer.queue_update(channel, value);
        }
        SharedDmxOutputEvent::QueueMany(updates) => {
            optimizer.queue_updates(updates);
        }
        SharedDmxOutputEvent::FlushImmediate(done) => {
            optimizer.flush_immediate();
            let _ = done.send(());
        }
        SharedDmxOutputEvent::Clear => optimizer.clear(),
        SharedDmxOutputEvent::Reset => optimizer.reset(),
        SharedDmxOutputEvent::UpdateOptions(update) => optimizer.update_options(update),
        SharedDmxOutputEvent::PendingCount(reply) => {
            let _ = reply.send(optimizer.pending_count());
        }
        SharedDmxOutputEvent::Stats(reply) => {
            let _ = reply.send(optimizer.stats().snapshot());
        }
        SharedDmxOutputEvent::Close => (),
    }
}

#[derive(Debug, Clone)]
pub struct SharedDmxOutput {
    tx: mpsc::Sender<SharedDmxOutputEvent>,
}

impl SharedDmxOutput {
    pub fn queue_update(&self, channel: Channel, value: DmxValue) -> Result<()> {
        self.send(SharedDmxOutputEvent::Queue(channel, value))
    }

    pub fn queue_updates<I>(&self, updates: I) -> Result<()>
    where
        I: IntoIterator<Item = (Channel, DmxValue)>,
    {
        let updates: Vec<_> = updates.into_iter().collect();
        if updates.is_empty() {
            return Ok(());
        }
        self.send(SharedDmxOutputEvent::QueueMany(updates))
    }

    // blocks until the sink has been handed everything that was pending
    pub fn flush_immediate(&self) -> Result<()> {
        let (done_tx, done_rx) = mpsc::channel();
        self.send(SharedDmxOutputEvent::FlushImmediate(done_tx))?;
        done_rx.recv().map_err(|_| Error::OutputClosed)
    }

    pub fn clear(&self) -> Result<()> {
        self.send(SharedDmxOutputEvent::Clear)
    }

    pub fn reset(&self) -> Result<()> {
        self.send(SharedDmxOutputEvent::Reset)
    }

    pub fn update_options(&self, update: OptionsUpdate) -> Result<()> {
        self.send(SharedDmxOutputEvent::UpdateOptions(update))
    }

    pub fn pending_count(&self) -> Result<usize> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(SharedDmxOutputEvent::PendingCount(reply_tx))?;
        reply_rx.recv().map_err(|_| Error::OutputClosed)
    }

    pub fn stats(&self) -> Result<StatsSnapshot> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(SharedDmxOutputEvent::Stats(reply_tx))?;
        reply_rx.recv().map_err(|_| Error::OutputClosed)
    }

    // Stops the output thread for every clone. Anything still pending is
    // discarded, call flush_immediate first to keep it.
    pub fn close(&self) -> Result<()> {
        self.send(SharedDmxOutputEvent::Close)
    }

    fn send(&self, event: SharedDmxOutputEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| Error::OutputClosed)
    }
}

#[derive(Debug)]
enum SharedDmxOutputEvent {
    Queue(Channel, DmxValue),
    QueueMany(Vec<(Channel, DmxValue)>),
    FlushImmediate(mpsc::Sender<()>),
    Clear,
    Reset,
    UpdateOptions(OptionsUpdate),
    PendingCount(mpsc::Sender<usize>),
    Stats(mpsc::Sender<StatsSnapshot>),
    Close,
}
