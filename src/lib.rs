pub mod autopilot;
pub mod channel_batch;
pub mod config;
pub mod error;
pub mod frame_scheduler;
pub mod midi_input;
pub mod optimizer;
pub mod options;
pub mod shared_output;
pub mod sink;
pub mod stats;
pub mod trace;

pub use channel_batch::{Channel, ChannelBatch, DmxValue};
pub use error::{Error, Result};
pub use frame_scheduler::{FrameHandle, FrameScheduler, FrameTimer, ManualScheduler};
pub use optimizer::DmxOptimizer;
pub use options::{OptimizerOptions, OptionsUpdate};
pub use shared_output::{get_shared_output, SharedDmxOutput};
pub use sink::{BatchSink, ForwardingSink, JsonLinesSink};
pub use stats::{OptimizerStats, StatsSnapshot};
