use anyhow::{bail, Context, Result};
use gridpoll::{load_config, ClientCredentials, PollerConfig};
use poll_runner::{PollManager, Secrets};
use std::path::Path;
use tracing::{info, warn};

const USAGE: &str = "usage: poll-runner [run | once | status | reset <endpoint_id>]";

#[tokio::main]
async fn main() -> Result<()> {
    // Secrets may live in a .env file next to the binary
    let _ = dotenvy::dotenv();

    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gridpoll=info,poll_runner=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("run");

    let config = read_config()?;

    match command {
        "run" => run(&config).await,
        "once" => once(&config).await,
        "status" => status(&config),
        "reset" => {
            let endpoint_id = args.get(1).context(USAGE)?;
            reset(&config, endpoint_id)
        }
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }
}

/// Loads `GRIDPOLL_CONFIG`, else `gridpoll.toml` if present, else defaults.
fn read_config() -> Result<PollerConfig> {
    if let Ok(path) = std::env::var("GRIDPOLL_CONFIG") {
        let config = load_config(&path)?;
        info!(path = %path, "Configuration loaded");
        return Ok(config);
    }
    if Path::new("gridpoll.toml").exists() {
        let config = load_config("gridpoll.toml")?;
        info!(path = "gridpoll.toml", "Configuration loaded");
        return Ok(config);
    }
    info!("No config file found, using defaults");
    Ok(PollerConfig::default())
}

fn required_secrets() -> Result<Secrets> {
    let username = std::env::var("GRIDPOLL_USERNAME").context("GRIDPOLL_USERNAME is required")?;
    let password = std::env::var("GRIDPOLL_PASSWORD").context("GRIDPOLL_PASSWORD is required")?;
    let subscription_key = std::env::var("GRIDPOLL_SUBSCRIPTION_KEY")
        .context("GRIDPOLL_SUBSCRIPTION_KEY is required")?;
    Ok(Secrets {
        credentials: ClientCredentials::new(username, password),
        subscription_key,
    })
}

// status and reset only touch local state
fn offline_secrets() -> Secrets {
    Secrets {
        credentials: ClientCredentials::new("", ""),
        subscription_key: String::new(),
    }
}

async fn run(config: &PollerConfig) -> Result<()> {
    info!("Poll runner starting...");
    let mut manager = PollManager::from_config(config, required_secrets()?)?;
    let started = manager.start();
    info!(schedulers_started = started, "Poll runner started");

    // Report counters every poll interval until the shutdown signal
    let mut report = tokio::time::interval(config.api.poll_interval());
    report.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately, before any cycle has finished
    report.tick().await;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.context("Failed to listen for ctrl_c signal")?;
                break;
            }
            _ = report.tick() => manager.log_status().await,
        }
    }
    info!("Shutdown signal received");

    manager.shutdown().await;
    info!("Poll runner stopped");
    Ok(())
}

async fn once(config: &PollerConfig) -> Result<()> {
    let manager = PollManager::from_config(config, required_secrets()?)?;
    let outcomes = manager.run_once_all().await;

    let failed = outcomes.iter().filter(|o| o.is_failure()).count();
    let total = manager.pollers().len();
    info!(
        endpoints = total,
        committed = outcomes.iter().filter(|o| o.is_success()).count(),
        noop = outcomes.iter().filter(|o| o.is_noop()).count(),
        failed = failed,
        "Single pass finished"
    );

    // A panicked task produces no outcome at all
    let incomplete = failed + total.saturating_sub(outcomes.len());
    if incomplete > 0 {
        bail!("{} of {} endpoints did not complete", incomplete, total);
    }
    Ok(())
}

fn status(config: &PollerConfig) -> Result<()> {
    let manager = PollManager::from_config(config, offline_secrets())?;

    for poller in manager.pollers() {
        let id = &poller.endpoint().id;
        match poller.status() {
            Ok(Some(watermark)) => println!(
                "{}: last_to={} last_poll={} records={}",
                id, watermark.last_to, watermark.last_poll_time, watermark.last_record_count
            ),
            Ok(None) => println!("{}: never polled", id),
            Err(e) => {
                println!("{}: {}", id, e);
                continue;
            }
        }
        match poller.next_window() {
            Ok(window) if window.is_noop() => println!("  next: nothing new yet"),
            Ok(window) => println!("  next: {}", window),
            Err(e) => warn!(endpoint = %id, error = %e, "Failed to plan next window"),
        }
    }
    Ok(())
}

fn reset(config: &PollerConfig, endpoint_id: &str) -> Result<()> {
    let manager = PollManager::from_config(config, offline_secrets())?;
    let poller = manager
        .poller(endpoint_id)
        .with_context(|| format!("Unknown endpoint '{}'", endpoint_id))?;

    if poller.reset()? {
        println!("{}: watermark cleared, next run bootstraps", endpoint_id);
    } else {
        println!("{}: no watermark to clear", endpoint_id);
    }
    Ok(())
}
