use clap::Parser;
use dmx_batcher::autopilot::Autopilot;
use dmx_batcher::config::{Config, OutputConfig};
use dmx_batcher::{get_shared_output, trace, Error, JsonLinesSink, Result, SharedDmxOutput};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "dmx-batcher", about = "Coalesce DMX channel writes into throttled batches")]
struct Args {
    #[arg(long, default_value = "dmx-batcher.json")]
    config: PathBuf,

    /// Write the default config to this path and exit
    #[arg(long)]
    write_default_config: Option<PathBuf>,

    /// Stop after this many seconds instead of running forever
    #[arg(long)]
    run_for: Option<f64>,

    /// How often autopilot tracks are sampled, in milliseconds
    #[arg(long, default_value_t = 5)]
    tick_ms: u64,

    /// Print the available MIDI input ports and exit
    #[arg(long)]
    list_ports: bool,
}

fn main() {
    trace::init_tracing();
    let args = Args::parse();
    if let Err(err) = run(args) {
        error!(error = %err, "dmx-batcher failed");
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    if let Some(path) = args.write_default_config {
        Config::default().write(&path)?;
        info!(path = %path.display(), "wrote default config");
        return Ok(());
    }

    if args.list_ports {
        return list_ports();
    }

    let config = Config::read_or_default(&args.config)?;
    let output = open_output(&config)?;

    #[cfg(feature = "midi")]
    let _midi_inputs = dmx_batcher::midi_input::connect_mappings(&config.midi_mappings, &output);

    #[cfg(not(feature = "midi"))]
    {
        if !config.midi_mappings.is_empty() {
            warn!(
                mappings = config.midi_mappings.len(),
                "built without midi support, ignoring midi mappings"
            );
        }
    }

    let mut autopilot = Autopilot::new(&config.autopilot);
    let run_for = match args.run_for {
        Some(secs) if secs.is_finite() && secs >= 0.0 => Some(Duration::from_secs_f64(secs)),
        Some(secs) => {
            warn!(secs, "ignoring invalid --run-for");
            None
        }
        None => None,
    };
    let tick = Duration::from_millis(args.tick_ms.max(1));
    let start = Instant::now();
    let mut last_report = start;

    info!(tracks = config.autopilot.len(), "dmx output running");

    loop {
        let pos = start.elapsed();
        if let Some(limit) = run_for {
            if pos >= limit {
                break;
            }
        }

        if !autopilot.is_empty() {
            output.queue_updates(autopilot.sample(pos))?;
        }

        if last_report.elapsed() >= Duration::from_secs(5) {
            last_report = Instant::now();
            let stats = output.stats()?;
            debug!(
                batches = stats.batches_sent,
                suppressed = stats.suppressed,
                coalesced = stats.coalesced,
                rate_hz = ?stats.flush_rate_hz,
                "dmx output stats"
            );
        }

        // keep app alive
        thread::sleep(tick);
    }

    output.flush_immediate()?;
    let stats = output.stats()?;
    info!(
        batches = stats.batches_sent,
        channels = stats.channels_sent,
        suppressed = stats.suppressed,
        coalesced = stats.coalesced,
        throttled = stats.throttled_frames,
        rate_hz = ?stats.flush_rate_hz,
        "dmx output finished"
    );
    output.close()
}

fn open_output(config: &Config) -> Result<SharedDmxOutput> {
    let output = match config.output {
        OutputConfig::Stdout => get_shared_output(
            JsonLinesSink::new(io::stdout()),
            config.options,
            config.frame_interval(),
        ),
        OutputConfig::File { ref path } => get_shared_output(
            JsonLinesSink::new(BufWriter::new(File::create(path)?)),
            config.options,
            config.frame_interval(),
        ),
    };
    Ok(output)
}

#[cfg(feature = "midi")]
fn list_ports() -> Result<()> {
    for name in dmx_batcher::midi_input::get_inputs()? {
        println!("{}", name);
    }
    Ok(())
}

#[cfg(not(feature = "midi"))]
fn list_ports() -> Result<()> {
    Err(Error::Midi(String::from(
        "built without midi support, rebuild with --features midi",
    )))
}
