//! Balloon flight reconstruction CLI
//!
//! Rebuilds flights from the last 24 hourly telemetry snapshots and prints
//! them as JSON on stdout. Logs go to stderr.

use balloontrack::{
    assembler,
    client::DEFAULT_BASE_URL,
    tracker::{self, Tracker, TrackerBuilder},
    weather::{OpenMeteoClient, WeatherConfig, WeatherSampler, DEFAULT_WEATHER_URL},
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "balloontrack")]
#[command(about = "Balloon flight reconstruction from hourly snapshots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory URL holding 00.json .. 23.json
    #[arg(long, env = "BALLOON_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Caching proxy tried when the upstream fails
    #[arg(long, env = "BALLOON_PROXY_URL")]
    proxy_url: Option<String>,

    /// Directory of saved snapshots tried last
    #[arg(long, env = "BALLOON_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Fetch all hours at once
    #[arg(long)]
    concurrent: bool,

    /// Match threshold in kilometres for anonymous records
    #[arg(long, default_value = "200")]
    threshold_km: f64,

    /// Reference time in epoch milliseconds (defaults to now)
    #[arg(long)]
    now: Option<i64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct all flights in the window
    Track {
        /// Print one overview entry per flight instead of full trajectories
        #[arg(long)]
        summary: bool,
    },

    /// Show a single hour without cross-hour matching
    Snapshot {
        /// Hour index, 0 is the most recent
        #[arg(long, default_value = "0")]
        hour: usize,
    },

    /// Show one flight's trajectory
    Flight {
        /// Flight id as printed by `track`
        #[arg(long)]
        id: String,

        /// Attach sampled weather observations
        #[arg(long)]
        weather: bool,

        /// Weather API base URL
        #[arg(long, env = "BALLOON_WEATHER_URL", default_value = DEFAULT_WEATHER_URL)]
        weather_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let now_ms = cli.now.unwrap_or_else(tracker::now_ms);
    let timeout = Duration::from_secs(cli.timeout);

    let tracker = TrackerBuilder::new()
        .base_url(cli.base_url)
        .proxy_url(cli.proxy_url)
        .data_dir(cli.data_dir)
        .timeout(timeout)
        .concurrent(cli.concurrent)
        .match_threshold_km(cli.threshold_km)
        .build()?;

    match cli.command {
        Commands::Track { summary } => {
            track(&tracker, now_ms, summary).await?;
        }

        Commands::Snapshot { hour } => {
            let view = tracker.snapshot(hour, now_ms).await;
            if view.is_empty() {
                tracing::warn!("No balloons in hour {:02}", hour);
            }
            print_json(&view)?;
        }

        Commands::Flight {
            id,
            weather,
            weather_url,
        } => {
            show_flight(&tracker, now_ms, &id, weather.then_some(weather_url), timeout).await?;
        }
    }

    Ok(())
}

async fn track(
    tracker: &Tracker,
    now_ms: i64,
    summary: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Reconstructing flights, reference time {}", now_ms);

    let report = tracker.run(now_ms).await;

    if report.flights.is_empty() {
        tracing::warn!("No flights in the window");
    }

    if summary {
        print_json(&assembler::summaries(&report.flights))
    } else {
        print_json(&report.flights)
    }
}

async fn show_flight(
    tracker: &Tracker,
    now_ms: i64,
    id: &str,
    weather_url: Option<String>,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut report = tracker.run(now_ms).await;

    let flight = report
        .flights
        .get_mut(id)
        .ok_or_else(|| format!("No flight with id {}", id))?;

    if let Some(url) = weather_url {
        let config = WeatherConfig::default()
            .with_base_url(url)
            .with_timeout(timeout);
        let sampler = WeatherSampler::new(OpenMeteoClient::new(config.clone())?, config);
        let merged = sampler.enrich(flight).await;
        tracing::info!("Weather attached to {} of {} points", merged, flight.points.len());
    }

    print_json(&*flight)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
