//! frame-loop: drives a task manager against the wall clock.
//!
//! Ticks a [`FrameClock`] once per frame, paces frames with the epoch
//! limiter, and turns SIGINT/SIGTERM into deferred interrupts: the first
//! lets the current frame finish, the third aborts the process.

use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use cadence_core::{SchedulerConfig, load_dotenv};
use cadence_scheduler::{
    Clock, EpochLimiter, EventSink, FrameClock, InterruptAction, InterruptToken, LogSink, TaskEvent,
    TaskManager, TaskSpec, TaskStatus, pause, sequence,
};

/// Runs after every other task so the next frame sees a fresh time stamp.
const CLOCK_TICK_SORT: i32 = 1000;

// ── CLI ─────────────────────────────────────────────────────────────

/// Cooperative frame loop driving a task manager.
#[derive(Parser, Debug)]
#[command(name = "frame-loop", version, about)]
struct Cli {
    /// Path to a scheduler TOML config file.
    #[arg(long, env = "CADENCE_CONFIG")]
    config: Option<String>,

    /// Stop after this many frames.
    #[arg(long, env = "CADENCE_FRAMES")]
    frames: Option<u64>,

    /// Frame budget in seconds (overrides the config file).
    #[arg(long)]
    max_epoch: Option<f64>,

    /// Publish the extra do-later events.
    #[arg(long)]
    verbose: bool,

    /// Log every event as a JSON envelope.
    #[arg(long)]
    json_events: bool,
}

// ── Event output ────────────────────────────────────────────────────

/// Logs each event's wire envelope as one JSON line.
struct JsonLinesSink;

impl EventSink for JsonLinesSink {
    fn publish(&self, event: &TaskEvent) {
        match serde_json::to_string(&event.envelope()) {
            Ok(line) => info!(target: "frame_loop::events", "{line}"),
            Err(e) => warn!(error = %e, topic = event.topic(), "failed to encode event"),
        }
    }
}

// ── Signals ─────────────────────────────────────────────────────────

fn deliver(token: &InterruptToken) {
    if token.raise() == InterruptAction::Abort {
        error!("interrupted repeatedly, aborting");
        std::process::exit(130);
    }
}

async fn forward_signals(token: InterruptToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let (mut sigint, mut sigterm) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "failed to register signal handlers");
                    return;
                }
            };
        loop {
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
            deliver(&token);
        }
    }

    #[cfg(not(unix))]
    {
        while tokio::signal::ctrl_c().await.is_ok() {
            deliver(&token);
        }
    }
}

/// Listen for signals on a dedicated thread; the task manager itself is
/// single-threaded.
fn spawn_signal_listener(token: InterruptToken) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    std::thread::Builder::new()
        .name("signals".into())
        .spawn(move || runtime.block_on(forward_signals(token)))?;
    Ok(())
}

// ── main ────────────────────────────────────────────────────────────

fn load_config(cli: &Cli) -> anyhow::Result<SchedulerConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let config = SchedulerConfig::from_file(path)
                .with_context(|| format!("loading scheduler config from {path}"))?;
            info!(path = %path, "loaded scheduler config");
            config
        }
        None => SchedulerConfig::from_env().context("reading scheduler config from env")?,
    };
    if let Some(max_epoch) = cli.max_epoch {
        config.max_epoch_duration = max_epoch;
    }
    if cli.verbose {
        config.verbose = true;
    }
    config.validate().context("invalid scheduler config")?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    config.log_summary();

    let token = InterruptToken::new();
    spawn_signal_listener(token.clone())?;

    let clock = Rc::new(FrameClock::new());
    let sink: Rc<dyn EventSink> = if cli.json_events { Rc::new(JsonLinesSink) } else { Rc::new(LogSink) };
    let manager = TaskManager::builder(config.clone())
        .clock(Rc::clone(&clock) as Rc<dyn Clock>)
        .events(sink)
        .yield_policy(Box::new(EpochLimiter::new(config.max_epoch_duration)))
        .interrupt(token)
        .build();

    let tick = Rc::clone(&clock);
    manager.spawn(
        TaskSpec::new("clock-tick", move |_| {
            tick.tick();
            TaskStatus::Cont
        })
        .sort(CLOCK_TICK_SORT),
    )?;

    let heartbeat_clock = Rc::clone(&clock);
    manager.do_method_later(1.0, "heartbeat", move |_| {
        info!(
            frame = heartbeat_clock.frame_count(),
            fps = heartbeat_clock.average_frame_rate(),
            "heartbeat"
        );
        TaskStatus::Again
    })?;

    manager.spawn(sequence([
        pause(0.5),
        TaskSpec::new("warm-up-done", |_| {
            info!("warm-up complete");
            TaskStatus::Done
        }),
    ]))?;

    if let Some(limit) = cli.frames {
        let stopper = manager.downgrade();
        let limit_clock = Rc::clone(&clock);
        manager.spawn(
            TaskSpec::new("frame-limit", move |_| {
                if limit_clock.frame_count() < limit {
                    return TaskStatus::Cont;
                }
                if let Some(manager) = stopper.upgrade() {
                    manager.stop();
                }
                TaskStatus::Done
            })
            .sort(CLOCK_TICK_SORT - 1),
        )?;
    }

    info!("frame-loop starting");
    manager.run()?;

    let metrics = manager.metrics();
    info!(
        frames = metrics.frames,
        executions = metrics.total_executions(),
        faults = metrics.faults,
        "frame-loop finished"
    );
    info!("\n{manager}");
    manager.destroy();
    Ok(())
}
