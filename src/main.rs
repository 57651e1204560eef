//! Keymove - keyboard gesture engine
//!
//! Replays recorded frame logs or follows a live frame stream on stdin and
//! reports completed and failed gestures.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keymove::config::{AppConfig, ConfigWatcher, EngineConfig};
use keymove::frame::{FrameRecord, KeyboardFrame};
use keymove::{keys, replay, Engine, MatchEvent};

/// Keymove - detect timed keyboard gestures in a frame stream
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the gesture library
    #[arg(short, long, env = "KEYMOVE_CONFIG", default_value = "gestures.yaml")]
    config: String,

    /// Replay a recorded frame log (JSON Lines)
    #[arg(short, long, conflicts_with = "live")]
    frames: Option<String>,

    /// Read frames from stdin, one JSON record per line
    #[arg(long)]
    live: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Print events as JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// List known key names and virtual-key codes
    #[arg(long)]
    list_keys: bool,

    /// Print the JSON schema of the gesture library
    #[arg(long)]
    print_schema: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level, args.log_json)?;

    if args.list_keys {
        list_keys();
        return Ok(());
    }

    if args.print_schema {
        println!("{}", AppConfig::json_schema()?);
        return Ok(());
    }

    if let Some(path) = &args.frames {
        return run_replay(&args, path).await;
    }

    if args.live {
        return run_live(&args).await;
    }

    anyhow::bail!("Nothing to do: pass --frames <log>, --live, --list-keys or --print-schema")
}

fn build_engine(config: &AppConfig) -> Result<Engine> {
    let mut engine = Engine::new(config.engine.clone());
    for def in &config.patterns {
        engine
            .add_pattern(def)
            .with_context(|| format!("Failed to register pattern '{}'", def.id))?;
    }
    engine.start();
    Ok(engine)
}

async fn run_replay(args: &Args, path: &str) -> Result<()> {
    let config = AppConfig::load(&args.config).await?;
    info!(
        "Loaded {} pattern(s) from {}",
        config.patterns.len(),
        args.config
    );

    let mut engine = build_engine(&config)?;
    let frames = replay::read_frame_log(path).await?;
    let events = replay::replay(&mut engine, frames)?;

    for event in &events {
        print_event(event, args.json)?;
    }

    let completed = events.iter().filter(|e| e.as_completed().is_some()).count();
    info!(
        "{} completed, {} failed",
        completed,
        events.len() - completed
    );
    Ok(())
}

async fn run_live(args: &Args) -> Result<()> {
    let (mut watcher, config) = ConfigWatcher::new(args.config.clone()).await?;
    let mut engine = build_engine(&config)?;
    info!(
        "Live mode: {} pattern(s), reading frames from stdin",
        config.patterns.len()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = make_ticker(&config.engine);

    // Producer clock: last frame timestamp plus wall time since it arrived
    let mut clock: Option<(u64, Instant)> = None;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("Input closed");
                    break;
                };
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let frame = match serde_json::from_str::<FrameRecord>(line) {
                    Ok(record) => KeyboardFrame::from(record),
                    Err(e) => {
                        warn!("Skipping malformed frame: {}", e);
                        continue;
                    }
                };
                let ts = frame.timestamp;
                match engine.add_frame(frame) {
                    Ok(events) => {
                        clock = Some((ts, Instant::now()));
                        for event in &events {
                            print_event(event, args.json)?;
                        }
                    }
                    Err(e) => warn!("Frame rejected: {}", e),
                }
            }

            _ = ticker.tick() => {
                let Some((ts, at)) = clock else { continue };
                let now = ts.saturating_add(at.elapsed().as_millis() as u64);
                for event in &engine.tick(now)? {
                    print_event(event, args.json)?;
                }
            }

            Some(new_config) = watcher.next_config() => {
                match engine.reconfigure(&new_config.engine, &new_config.patterns) {
                    Ok(true) => {
                        // Frame numbering restarts with the rebuilt buffer
                        ticker = make_ticker(&new_config.engine);
                        clock = None;
                    }
                    Ok(false) => info!("Gesture library swapped"),
                    Err(e) => warn!("Reload rejected (keeping current library): {}", e),
                }
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    // Let anything still in its grace window out
    if let Some((ts, _)) = clock {
        for event in &engine.tick(ts.saturating_add(engine.config().grace_ms))? {
            print_event(event, args.json)?;
        }
    }
    engine.stop();
    Ok(())
}

fn make_ticker(config: &EngineConfig) -> tokio::time::Interval {
    let mut ticker =
        tokio::time::interval(std::time::Duration::from_millis(config.frame_interval_ms()));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker
}

fn print_event(event: &MatchEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        MatchEvent::Completed(c) => println!(
            "{} {} [{}..{}ms] confidence={}",
            "✔".green().bold(),
            c.id.bold(),
            c.start_time,
            c.end_time,
            c.confidence
        ),
        MatchEvent::Failed(f) => println!(
            "{} {} ({}) @ {}ms",
            "✘".red(),
            f.id.dimmed(),
            f.reason,
            f.at_time
        ),
    }
    Ok(())
}

fn list_keys() {
    println!("\n{}", "=== Known keys ===".bold().cyan());
    for (code, key) in keys::known_keys() {
        println!("  {:#04x}  {}", code, key.as_str().yellow());
    }
    println!(
        "\n{}",
        "Other virtual-key codes normalize to vk_0xNN.".dimmed()
    );
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // Logs go to stderr so stdout stays a clean event stream
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    debug!("CTRL+C received");
}
