use crate::channel_batch::ChannelBatch;
use std::io::Write;
use std::sync::mpsc;
use tracing::warn;

// The optimizer never looks at what happens after a hand-off. Failures
// are the sink's business.
pub trait BatchSink {
    fn send_batch(&mut self, batch: &ChannelBatch);
}

impl<F> BatchSink for F
where
    F: FnMut(&ChannelBatch),
{
    fn send_batch(&mut self, batch: &ChannelBatch) {
        self(batch)
    }
}

// hands batches to a network thread without waiting on it
pub struct ForwardingSink {
    tx: mpsc::Sender<ChannelBatch>,
}

impl ForwardingSink {
    pub fn new(tx: mpsc::Sender<ChannelBatch>) -> Self {
        ForwardingSink { tx }
    }
}

impl BatchSink for ForwardingSink {
    fn send_batch(&mut self, batch: &ChannelBatch) {
        if self.tx.send(batch.clone()).is_err() {
            warn!(channels = batch.len(), "batch receiver has hung up, dropping batch");
        }
    }
}

pub struct JsonLinesSink<W: Write> {
    writer: W,
    failures: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink {
            writer,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_batch(&mut self, batch: &ChannelBatch) -> crate::Result<()> {
        serde_json::to_writer(&mut self.writer, batch)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write> BatchSink for JsonLinesSink<W> {
    fn send_batch(&mut self, batch: &ChannelBatch) {
        if let Err(err) = self.write_batch(batch) {
            self.failures += 1;
            warn!(error = %err, channels = batch.len(), "failed to write DMX batch");
        }
    }
}
