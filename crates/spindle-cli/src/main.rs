//! spindle - operator CLI for Spindle queues

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use spindle_core::app::QueueRegistry;
use spindle_core::config::SpindleConfig;
use spindle_core::domain::{Delay, Recurrence, Schedule};
use spindle_core::impls::{InMemoryStore, RedisStore};
use spindle_core::ports::{Clock, QueueStore, SystemClock};
use spindle_core::queue::{JobQueue, QueueCore};
use spindle_core::telemetry;
use spindle_core::typed::{MiddlewareChain, TracingMiddleware};

mod jobs;

use jobs::{Echo, Heartbeat};

#[derive(Parser)]
#[command(name = "spindle")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to config/spindle.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print structure sizes and counters of a queue (every configured queue if omitted)
    Stats { queue: Option<String> },

    /// Move abandoned ids from processing back to work
    Recover { queue: String },

    /// Enqueue an echo job
    Enqueue {
        queue: String,
        message: String,

        /// Run after this many seconds instead of immediately
        #[arg(long)]
        delay_secs: Option<i64>,

        /// Fail this many times before succeeding
        #[arg(long, default_value_t = 0)]
        fail_times: u32,
    },

    /// Run echo workers for every configured queue until Ctrl-C
    Worker,

    /// End-to-end demo: a retrying, a scheduled and a periodic job
    Demo {
        /// Use the configured Redis instead of an in-process store
        #[arg(long)]
        redis: bool,

        /// How long to let the workers run
        #[arg(long, default_value_t = 8)]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SpindleConfig::from_file(path),
        None => SpindleConfig::load(),
    }
    .context("failed to load configuration")?;
    telemetry::init(config.log.format);

    match cli.command {
        Commands::Stats { queue } => stats(&config, queue).await,
        Commands::Recover { queue } => recover(&config, &queue).await,
        Commands::Enqueue {
            queue,
            message,
            delay_secs,
            fail_times,
        } => enqueue(&config, &queue, message, delay_secs, fail_times).await,
        Commands::Worker => worker(&config).await,
        Commands::Demo { redis, seconds } => demo(&config, redis, seconds).await,
    }
}

async fn redis_store(config: &SpindleConfig) -> Result<Arc<dyn QueueStore>> {
    let store = RedisStore::connect(&config.redis.url)
        .await
        .with_context(|| format!("failed to connect to {}", config.redis.url))?;
    Ok(Arc::new(store))
}

async fn stats(config: &SpindleConfig, queue: Option<String>) -> Result<()> {
    let names = match queue {
        Some(name) => vec![name],
        None if config.queues.is_empty() => bail!("no queue given and none configured"),
        None => config.queues.clone(),
    };
    let store = redis_store(config).await?;
    for name in names {
        let core = QueueCore::new(&name, Arc::clone(&store), Arc::new(SystemClock));
        let stats = core.stats().await?;
        println!("{name}: {}", serde_json::to_string(&stats)?);
    }
    Ok(())
}

async fn recover(config: &SpindleConfig, queue: &str) -> Result<()> {
    let store = redis_store(config).await?;
    let moved = QueueCore::new(queue, store, Arc::new(SystemClock)).prepare().await?;
    println!("{queue}: moved {moved} id(s) back to work");
    Ok(())
}

async fn enqueue(
    config: &SpindleConfig,
    queue: &str,
    message: String,
    delay_secs: Option<i64>,
    fail_times: u32,
) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = redis_store(config).await?;
    let jobs = JobQueue::<Echo>::new(queue, store, Arc::clone(&clock));
    let schedule = delay_secs.map(|secs| Schedule::after(Delay::Seconds(secs), &clock.now()));
    let id = jobs
        .enqueue(jobs.record(Echo { message, fail_times }), schedule)
        .await?;
    println!("{queue}: enqueued {id}");
    Ok(())
}

async fn worker(config: &SpindleConfig) -> Result<()> {
    if config.queues.is_empty() {
        bail!("no queues configured (set `queues` or SPINDLE__QUEUES)");
    }
    let mut registry =
        QueueRegistry::new(redis_store(config).await?).with_worker_config(config.worker_config());
    for name in &config.queues {
        registry.register::<Echo>(name, MiddlewareChain::new().with(TracingMiddleware))?;
    }

    let workers = registry.start();
    tracing::info!(queues = workers.len(), "workers running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    workers.shutdown_and_join().await;
    Ok(())
}

async fn demo(config: &SpindleConfig, redis: bool, seconds: u64) -> Result<()> {
    let store: Arc<dyn QueueStore> = if redis {
        redis_store(config).await?
    } else {
        Arc::new(InMemoryStore::new())
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut registry = QueueRegistry::new(store)
        .with_clock(Arc::clone(&clock))
        .with_worker_config(config.worker_config());
    let echo = registry.register::<Echo>("demo:echo", MiddlewareChain::new().with(TracingMiddleware))?;
    let heartbeat = registry.register::<Heartbeat>("demo:heartbeat", MiddlewareChain::new())?;

    let now = clock.now();
    registry
        .enqueue_to(
            &echo,
            Echo {
                message: "hello after two failures".to_string(),
                fail_times: 2,
            },
            None,
        )
        .await?;
    registry
        .enqueue_to(
            &echo,
            Echo {
                message: "hello from the future".to_string(),
                fail_times: 0,
            },
            Some(Schedule::after(Delay::Seconds(3), &now)),
        )
        .await?;
    registry
        .enqueue_to(
            &heartbeat,
            Heartbeat {
                label: "demo".to_string(),
            },
            Some(Schedule::periodic(Recurrence::secondly(2)?, &now)),
        )
        .await?;

    let workers = registry.start();
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        signal = tokio::signal::ctrl_c() => signal?,
    }
    workers.shutdown_and_join().await;

    for name in registry.names() {
        let stats = registry.stats(name).await?;
        println!("{name}: {}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}
