use anyhow::Context;
use checkpoint_commit::{
    shutdown_requested, AckOutcome, CheckpointConfig, CheckpointEngine, CodecRegistry,
    ConsumerControl, PartitionKey,
};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Feed a simulated partitioned log of integers through the checkpoint engine
///
/// Each partition's state is the running sum of its records. Run it twice
/// against a durable store to watch the second run resume where the first
/// one stopped.
#[derive(Parser)]
#[command(name = "checkpoint-sim")]
#[command(about = "Simulate a stateful consumer committing through checkpoints", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to a TOML or YAML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Consumer group, when no configuration file is given
    #[arg(long, default_value = "checkpoint-sim")]
    group: String,

    /// State store to use, overriding the configuration
    #[arg(long)]
    store: Option<String>,

    /// Topic of the simulated log
    #[arg(long, default_value = "numbers")]
    topic: String,

    /// Number of partitions
    #[arg(short = 'p', long, default_value = "3")]
    partitions: i32,

    /// Records in each partition
    #[arg(short = 'n', long, default_value = "100")]
    records: i64,

    /// Pause between two polls
    #[arg(long, default_value = "10ms", value_parser = humantime_serde::re::humantime::parse_duration)]
    poll_interval: Duration,
}

#[derive(Debug, Default)]
struct Cursor {
    position: i64,
    paused: bool,
}

/// In-memory log whose record at offset `n` carries the value `n`
#[derive(Clone)]
struct SimulatedLog {
    records: i64,
    cursors: Arc<Mutex<HashMap<PartitionKey, Cursor>>>,
}

impl SimulatedLog {
    fn new(records: i64) -> Self {
        Self {
            records,
            cursors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn cursors(&self) -> std::sync::MutexGuard<'_, HashMap<PartitionKey, Cursor>> {
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next record of every partition that has one, advancing past it
    fn poll(&self) -> Vec<(PartitionKey, i64)> {
        let mut cursors = self.cursors();
        let mut batch: Vec<_> = cursors
            .iter_mut()
            .filter(|(_, cursor)| !cursor.paused && cursor.position < self.records)
            .map(|(key, cursor)| {
                let offset = cursor.position;
                cursor.position += 1;
                (key.clone(), offset)
            })
            .collect();
        batch.sort();
        batch
    }

    /// No partition that can still be polled has records left; paused
    /// partitions never deliver again, so they do not hold the loop open
    fn exhausted(&self) -> bool {
        self.cursors()
            .values()
            .all(|cursor| cursor.paused || cursor.position >= self.records)
    }
}

impl ConsumerControl for SimulatedLog {
    fn seek(&self, key: &PartitionKey, offset: i64) {
        debug!("Seek {} to {}", key, offset);
        self.cursors().entry(key.clone()).or_default().position = offset;
    }

    fn pause(&self, keys: &[PartitionKey]) {
        let mut cursors = self.cursors();
        for key in keys {
            warn!("Pausing {}", key);
            cursors.entry(key.clone()).or_default().paused = true;
        }
    }

    fn resume(&self, keys: &[PartitionKey]) {
        let mut cursors = self.cursors();
        for key in keys {
            info!("Resuming {}", key);
            cursors.entry(key.clone()).or_default().paused = false;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .init();

    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    if let Err(e) = run(cli).await {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn load_config(cli: &Cli) -> anyhow::Result<CheckpointConfig> {
    let mut config = match &cli.config {
        Some(path) => CheckpointConfig::load(path)
            .await
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => {
            let mut config = CheckpointConfig::new(cli.group.clone());
            config.merge_env_vars()?;
            config
        }
    };
    if let Some(store) = &cli.store {
        config.state_store = store.clone();
    }
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli).await?;
    let log = SimulatedLog::new(cli.records);

    let engine: CheckpointEngine<i64> = CheckpointEngine::builder(config)
        .codecs(CodecRegistry::json())
        .consumer(Arc::new(log.clone()))
        .initial_state(|| 0)
        .build()
        .await
        .context("Failed to build checkpoint engine")?;
    engine.start();

    let keys: Vec<_> = (0..cli.partitions)
        .map(|p| PartitionKey::new(cli.topic.clone(), p))
        .collect();
    let report = engine.assign(&keys).await?;
    for failure in &report.failed {
        warn!("{}", failure);
    }

    let completed = tokio::select! {
        _ = consume(&engine, &log, cli.poll_interval) => true,
        _ = shutdown_requested() => false,
    };

    if completed {
        engine.flush().await;
        print_checkpoints(&engine, &keys).await;
    }

    let flushed = engine.shutdown().await;
    info!(
        persisted = flushed.persisted,
        failed = flushed.failed,
        "Simulation finished"
    );
    if flushed.failed > 0 {
        anyhow::bail!("{} partition(s) could not be committed", flushed.failed);
    }
    Ok(())
}

async fn consume(engine: &CheckpointEngine<i64>, log: &SimulatedLog, poll_interval: Duration) {
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;
        if log.exhausted() {
            info!("All partitions consumed");
            return;
        }

        for (key, offset) in log.poll() {
            let Some(mut handle) = engine.receive(&key, offset) else {
                continue;
            };
            handle.transform(0, |sum| sum + offset);
            engine.acknowledge(handle, AckOutcome::Ack).await;
        }

        if !engine.liveness().is_healthy() {
            debug!("Engine unhealthy: {}", engine.liveness());
        }
    }
}

async fn print_checkpoints(engine: &CheckpointEngine<i64>, keys: &[PartitionKey]) {
    match engine.store().fetch_many(keys).await {
        Ok(records) => {
            println!("{:<20} {:>10}  state", "partition", "offset");
            for key in keys {
                match records.get(key) {
                    Some(record) => println!(
                        "{:<20} {:>10}  {}",
                        key.to_string(),
                        record.offset,
                        String::from_utf8_lossy(&record.state)
                    ),
                    None => println!("{:<20} {:>10}  -", key.to_string(), "-"),
                }
            }
        }
        Err(e) => warn!("Failed to read back checkpoints: {}", e),
    }
}
