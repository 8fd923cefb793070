//! Flight reconstruction for high-altitude balloon telemetry.
//!
//! The upstream feed publishes 24 hourly snapshots of balloon positions with
//! no identity that reliably persists between them. This library:
//! - Loads the hourly documents from a list of fallback sources
//! - Normalizes loosely shaped records (tuples, objects, field aliases)
//! - Recovers distinct flights by greedy nearest-neighbour matching
//! - Assembles ordered trajectories and per-flight overviews
//! - Samples trajectories for weather observations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │    Loader    │───▶│  Normalizer  │───▶│   Resolver   │───▶│  Assembler   │
//! │  (24 hours)  │    │  (records)   │    │  (identity)  │    │(trajectories)│
//! └──────────────┘    └──────────────┘    └──────────────┘    └──────────────┘
//!         │                                                           │
//!         └──────────────────────────┬────────────────────────────────┘
//!                                    ▼
//!                            ┌──────────────┐          ┌──────────────┐
//!                            │   Tracker    │          │   Weather    │
//!                            │(orchestrator)│          │  (sampler)   │
//!                            └──────────────┘          └──────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use balloontrack::tracker::{now_ms, TrackerBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tracker = TrackerBuilder::new()
//!         .proxy_url(Some("http://localhost:8080/treasure".to_string()))
//!         .build()?;
//!
//!     let report = tracker.run(now_ms()).await;
//!     for flight in &report.flights {
//!         println!("{}: {} points", flight.id, flight.points.len());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod client;
pub mod loader;
pub mod normalize;
pub mod resolver;
pub mod tracker;
pub mod types;
pub mod weather;

pub use assembler::{finalize, snapshot_view, summaries};
pub use client::{ClientConfig, TelemetryClient};
pub use loader::{SnapshotLoader, SnapshotSource};
pub use normalize::normalize;
pub use resolver::{haversine_km, FlightResolver, ResolverConfig};
pub use tracker::{reconstruct, Tracker, TrackerBuilder};
pub use types::{BalloonSummary, Flight, FlightSet, NormalizedPoint, RawRecord};
pub use weather::{OpenMeteoClient, WeatherConfig, WeatherSampler};
