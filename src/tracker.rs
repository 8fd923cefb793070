//! Reconstruction orchestrator: load the window, resolve, assemble.

use crate::assembler::{finalize, snapshot_view};
use crate::client::{ClientConfig, ClientError, TelemetryClient, DEFAULT_BASE_URL};
use crate::loader::{DirSource, HttpSource, LoaderConfig, Snapshot, SnapshotLoader};
use crate::resolver::{resolve, FlightResolver, ResolverConfig};
use crate::types::{BalloonSummary, FlightSet, RawRecord};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Statistics for one reconstruction run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub hours_loaded: usize,
    pub hours_empty: usize,
    pub records_received: usize,
    pub records_rejected: usize,
    pub flights: usize,
    pub elapsed_ms: u64,
}

/// Output of one run.
#[derive(Debug, Clone)]
pub struct TrackReport {
    pub flights: FlightSet,
    pub stats: RunStats,
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Resolve and finalize a window of hourly record lists. Pure and
/// deterministic for fixed input.
pub fn reconstruct(hours: &[Vec<RawRecord>], now_ms: i64, config: &ResolverConfig) -> FlightSet {
    finalize(resolve(hours, now_ms, config))
}

/// Rebuilds flights from the 24-hour window on every run. Nothing carries
/// over between runs.
pub struct Tracker {
    loader: SnapshotLoader,
    config: ResolverConfig,
}

impl Tracker {
    pub fn new(loader: SnapshotLoader, config: ResolverConfig) -> Self {
        Self { loader, config }
    }

    /// Run one full reconstruction with `now_ms` as the reference time for
    /// records without a timestamp.
    pub async fn run(&self, now_ms: i64) -> TrackReport {
        let start = Instant::now();
        let snapshots = self.loader.load_window().await;
        self.resolve_snapshots(&snapshots, now_ms, start)
    }

    fn resolve_snapshots(&self, snapshots: &[Snapshot], now_ms: i64, start: Instant) -> TrackReport {
        let mut stats = RunStats::default();
        let mut resolver = FlightResolver::new(self.config.clone());

        for snapshot in snapshots {
            if snapshot.is_loaded() {
                stats.hours_loaded += 1;
            } else {
                stats.hours_empty += 1;
            }
            stats.records_received += snapshot.records.len();
            resolver.ingest_hour(snapshot.hour, &snapshot.records, now_ms);
        }

        stats.records_rejected = resolver.rejected();
        let flights = finalize(resolver.into_flights());
        stats.flights = flights.len();
        stats.elapsed_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            "Run: hours={}/{}, records={}, rejected={}, flights={}, took={}ms",
            stats.hours_loaded,
            snapshots.len(),
            stats.records_received,
            stats.records_rejected,
            stats.flights,
            stats.elapsed_ms
        );

        TrackReport { flights, stats }
    }

    /// Overview of one hour on its own, without cross-hour matching.
    pub async fn snapshot(&self, hour: usize, now_ms: i64) -> Vec<BalloonSummary> {
        let snapshot = self.loader.load_hour(hour).await;
        snapshot_view(&snapshot.records, hour, now_ms)
    }
}

/// Builder for a tracker over HTTP and on-disk candidates.
pub struct TrackerBuilder {
    base_url: String,
    proxy_url: Option<String>,
    data_dir: Option<PathBuf>,
    timeout: Duration,
    loader_config: LoaderConfig,
    resolver_config: ResolverConfig,
}

impl TrackerBuilder {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            proxy_url: None,
            data_dir: None,
            timeout: Duration::from_secs(10),
            loader_config: LoaderConfig::default(),
            resolver_config: ResolverConfig::default(),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Second HTTP candidate, tried when the upstream fails.
    pub fn proxy_url(mut self, url: Option<String>) -> Self {
        self.proxy_url = url;
        self
    }

    /// Directory of saved documents, tried last.
    pub fn data_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.data_dir = dir;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.loader_config.concurrent = concurrent;
        self
    }

    pub fn match_threshold_km(mut self, km: f64) -> Self {
        self.resolver_config.match_threshold_km = km;
        self
    }

    pub fn build(self) -> Result<Tracker, ClientError> {
        let mut loader = SnapshotLoader::new(self.loader_config);

        let upstream = ClientConfig::new(self.base_url).with_timeout(self.timeout);
        loader.push_source(Box::new(HttpSource::new(TelemetryClient::new(upstream)?)));

        if let Some(proxy) = self.proxy_url {
            let proxy = ClientConfig::new(proxy).with_timeout(self.timeout);
            loader.push_source(Box::new(HttpSource::new(TelemetryClient::new(proxy)?)));
        }

        if let Some(dir) = self.data_dir {
            loader.push_source(Box::new(DirSource::new(dir)));
        }

        Ok(Tracker::new(loader, self.resolver_config))
    }
}

impl Default for TrackerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemorySource;
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::tempdir;

    const NOW: i64 = 1_700_000_000_000;

    #[tokio::test]
    async fn test_run_collects_stats() {
        let source = MemorySource::new()
            .with_hour(0, json!([[10.0, 20.0, 5000], ["x", 1]]))
            .with_hour(1, json!({"balloons": [[10.1, 20.1, 5100]]}))
            .with_hour(5, json!({"a": {"id": "B42", "lat": -30, "lon": 100}}));

        let tracker = Tracker::new(
            SnapshotLoader::new(LoaderConfig::default()).with_source(source),
            ResolverConfig::default(),
        );
        let report = tracker.run(NOW).await;

        assert_eq!(report.stats.hours_loaded, 3);
        assert_eq!(report.stats.hours_empty, 21);
        assert_eq!(report.stats.records_received, 4);
        assert_eq!(report.stats.records_rejected, 1);
        assert_eq!(report.stats.flights, 2);

        let anon = report.flights.get("anon-0-10000_20000").unwrap();
        assert_eq!(anon.points.len(), 2);
        // hour 1 is older than hour 0
        assert_eq!(anon.latest().unwrap().lat, 10.0);
        assert!(report.flights.contains("B42"));
    }

    #[tokio::test]
    async fn test_snapshot_view() {
        let tracker = Tracker::new(
            SnapshotLoader::new(LoaderConfig::default())
                .with_source(MemorySource::new().with_hour(3, json!([[1.5, 2.0], [3.0, 4.0]]))),
            ResolverConfig::default(),
        );
        let view = tracker.snapshot(3, NOW).await;
        let ids: Vec<_> = view.iter().map(|b| b.id.clone()).collect();
        assert_eq!(ids, vec!["arr-1.5_2_0", "arr-3_4_1"]);
        assert!(tracker.snapshot(4, NOW).await.is_empty());
    }

    #[tokio::test]
    async fn test_builder_falls_back_to_data_dir() {
        let server = MockServer::start_async().await;
        let upstream = server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(500);
            })
            .await;

        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("00.json"), "[[10.0, 20.0, 5000]]").unwrap();

        let tracker = TrackerBuilder::new()
            .base_url(server.base_url())
            .timeout(Duration::from_secs(2))
            .data_dir(Some(dir.path().to_path_buf()))
            .concurrent(true)
            .build()
            .unwrap();

        let report = tracker.run(NOW).await;
        upstream.assert_hits_async(24).await;
        assert_eq!(report.stats.hours_loaded, 1);
        assert_eq!(report.flights.len(), 1);
    }

    #[test]
    fn test_reconstruct_is_deterministic() {
        let hours = vec![
            vec![RawRecord::from(json!([0.0, 0.0])), RawRecord::from(json!([30.0, 30.0]))],
            vec![RawRecord::from(json!([0.5, 0.5])), RawRecord::from(json!({"id": "X", "lat": 0, "lon": 0}))],
            vec![RawRecord::from(json!([30.5, 30.0]))],
        ];
        let a = reconstruct(&hours, NOW, &ResolverConfig::default());
        let b = reconstruct(&hours, NOW, &ResolverConfig::default());
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
