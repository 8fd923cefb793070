//! Snapshot loader: one hourly document to a flat list of raw records.
//!
//! Each hour is tried against an ordered list of candidate sources. A
//! candidate that errors, times out, returns a non-success status or an
//! undecodable body is skipped; the first non-null JSON body wins. An hour
//! with no usable candidate yields no records and the window carries on.

use crate::client::{ClientError, TelemetryClient};
use crate::types::RawRecord;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Hours in the rolling window.
pub const WINDOW_HOURS: usize = 24;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Client error: {0}")]
    Client(#[from] ClientError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("No document for hour {0}")]
    Missing(usize),
}

/// A place hourly documents can be read from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> String;

    /// Fetch and decode the document for `hour`.
    async fn fetch(&self, hour: usize) -> Result<Value, SourceError>;
}

/// Source backed by an HTTP host.
pub struct HttpSource {
    client: TelemetryClient,
}

impl HttpSource {
    pub fn new(client: TelemetryClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SnapshotSource for HttpSource {
    fn name(&self) -> String {
        self.client.base_url().to_string()
    }

    async fn fetch(&self, hour: usize) -> Result<Value, SourceError> {
        Ok(self.client.fetch_hour(hour).await?)
    }
}

/// Source backed by a directory of saved documents named `00.json` .. `23.json`.
pub struct DirSource {
    dir: PathBuf,
}

impl DirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, hour: usize) -> PathBuf {
        self.dir.join(format!("{:02}.json", hour))
    }
}

#[async_trait]
impl SnapshotSource for DirSource {
    fn name(&self) -> String {
        self.dir.display().to_string()
    }

    async fn fetch(&self, hour: usize) -> Result<Value, SourceError> {
        let data = tokio::fs::read(self.path_for(hour)).await?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// In-memory documents, for replaying captured payloads.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    docs: HashMap<usize, Value>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hour(mut self, hour: usize, doc: Value) -> Self {
        self.docs.insert(hour, doc);
        self
    }
}

#[async_trait]
impl SnapshotSource for MemorySource {
    fn name(&self) -> String {
        "memory".to_string()
    }

    async fn fetch(&self, hour: usize) -> Result<Value, SourceError> {
        self.docs.get(&hour).cloned().ok_or(SourceError::Missing(hour))
    }
}

/// Flatten a decoded document into its record list.
///
/// In order of precedence: a top-level list is used as is; an object with a
/// list-valued `balloons` field yields that list; any other object yields its
/// values in document order. Scalars yield nothing.
pub fn flatten_document(doc: Value) -> Vec<RawRecord> {
    match doc {
        Value::Array(items) => items.into_iter().map(RawRecord::from).collect(),
        Value::Object(mut map) => {
            if matches!(map.get("balloons"), Some(Value::Array(_))) {
                if let Some(Value::Array(items)) = map.remove("balloons") {
                    return items.into_iter().map(RawRecord::from).collect();
                }
            }
            map.into_iter().map(|(_, v)| RawRecord::from(v)).collect()
        }
        _ => Vec::new(),
    }
}

/// One hour's records and where they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub hour: usize,
    pub records: Vec<RawRecord>,
    /// Candidate that produced the document, `None` when every candidate failed.
    pub source: Option<String>,
}

impl Snapshot {
    pub fn empty(hour: usize) -> Self {
        Self {
            hour,
            records: Vec::new(),
            source: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.source.is_some()
    }
}

/// Configuration for the loader.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Number of hours in the window
    pub hours: usize,
    /// Fetch all hours at once instead of one after another
    pub concurrent: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            hours: WINDOW_HOURS,
            concurrent: false,
        }
    }
}

/// Loads hourly snapshots from an ordered list of candidate sources.
pub struct SnapshotLoader {
    sources: Vec<Box<dyn SnapshotSource>>,
    config: LoaderConfig,
}

impl SnapshotLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            sources: Vec::new(),
            config,
        }
    }

    /// Append a candidate. Candidates are tried in the order added.
    pub fn with_source(mut self, source: impl SnapshotSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn push_source(&mut self, source: Box<dyn SnapshotSource>) {
        self.sources.push(source);
    }

    /// Load one hour. Never fails: total failure is an empty snapshot.
    pub async fn load_hour(&self, hour: usize) -> Snapshot {
        for source in &self.sources {
            match source.fetch(hour).await {
                Ok(Value::Null) => {
                    tracing::debug!("Hour {:02} from {}: null document", hour, source.name());
                }
                Ok(doc) => {
                    let records = flatten_document(doc);
                    tracing::debug!(
                        "Hour {:02}: {} records from {}",
                        hour,
                        records.len(),
                        source.name()
                    );
                    return Snapshot {
                        hour,
                        records,
                        source: Some(source.name()),
                    };
                }
                Err(e) => {
                    tracing::debug!("Hour {:02} from {} failed: {}", hour, source.name(), e);
                }
            }
        }

        tracing::warn!("No data for hour {:02}", hour);
        Snapshot::empty(hour)
    }

    /// Load the whole window, ordered by hour index ascending.
    ///
    /// With `concurrent` set the fetches overlap, but the returned buffer is
    /// still in hour order so resolution stays sequential.
    pub async fn load_window(&self) -> Vec<Snapshot> {
        if self.config.concurrent {
            join_all((0..self.config.hours).map(|hour| self.load_hour(hour))).await
        } else {
            let mut snapshots = Vec::with_capacity(self.config.hours);
            for hour in 0..self.config.hours {
                snapshots.push(self.load_hour(hour).await);
            }
            snapshots
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_flatten_list() {
        let records = flatten_document(json!([[1, 2], {"lat": 3, "lon": 4}]));
        assert_eq!(records.len(), 2);
        assert!(records[0].is_array());
    }

    #[test]
    fn test_flatten_balloons_field() {
        let records = flatten_document(json!({"generated": 1, "balloons": [[1, 2], [3, 4], [5, 6]]}));
        assert_eq!(records.len(), 3);
        assert_eq!(records[2], RawRecord::from(json!([5, 6])));
    }

    #[test]
    fn test_flatten_object_values() {
        let records = flatten_document(json!({"b": [1, 2], "a": {"lat": 3, "lon": 4}}));
        assert_eq!(
            records,
            vec![
                RawRecord::from(json!([1, 2])),
                RawRecord::from(json!({"lat": 3, "lon": 4})),
            ]
        );

        // non-list `balloons` is just another value
        let records = flatten_document(json!({"balloons": {"lat": 1, "lon": 2}}));
        assert_eq!(records, vec![RawRecord::from(json!({"lat": 1, "lon": 2}))]);
    }

    #[test]
    fn test_flatten_scalar() {
        assert!(flatten_document(json!(42)).is_empty());
        assert!(flatten_document(json!("oops")).is_empty());
    }

    #[tokio::test]
    async fn test_first_candidate_wins() {
        let loader = SnapshotLoader::new(LoaderConfig::default())
            .with_source(MemorySource::new().with_hour(0, json!([[1, 1]])))
            .with_source(MemorySource::new().with_hour(0, json!([[2, 2], [3, 3]])));

        let snapshot = loader.load_hour(0).await;
        assert_eq!(snapshot.records, vec![RawRecord::from(json!([1, 1]))]);
        assert_eq!(snapshot.source.as_deref(), Some("memory"));
    }

    #[tokio::test]
    async fn test_null_body_falls_through() {
        let loader = SnapshotLoader::new(LoaderConfig::default())
            .with_source(MemorySource::new().with_hour(4, Value::Null))
            .with_source(MemorySource::new().with_hour(4, json!({"balloons": [[9, 9]]})));

        let snapshot = loader.load_hour(4).await;
        assert_eq!(snapshot.records.len(), 1);
        assert!(snapshot.is_loaded());
    }

    #[tokio::test]
    async fn test_all_candidates_fail() {
        let loader = SnapshotLoader::new(LoaderConfig::default()).with_source(MemorySource::new());
        let snapshot = loader.load_hour(2).await;
        assert_eq!(snapshot, Snapshot::empty(2));

        let window = SnapshotLoader::new(LoaderConfig::default()).load_window().await;
        assert_eq!(window.len(), WINDOW_HOURS);
        assert!(window.iter().all(|s| !s.is_loaded() && s.records.is_empty()));
    }

    #[tokio::test]
    async fn test_window_order() {
        let mut source = MemorySource::new();
        for hour in 0..WINDOW_HOURS {
            source = source.with_hour(hour, json!([[hour, hour]]));
        }

        for concurrent in [false, true] {
            let loader = SnapshotLoader::new(LoaderConfig {
                concurrent,
                ..Default::default()
            })
            .with_source(source.clone());

            let window = loader.load_window().await;
            let hours: Vec<_> = window.iter().map(|s| s.hour).collect();
            assert_eq!(hours, (0..WINDOW_HOURS).collect::<Vec<_>>());
            assert_eq!(window[17].records, vec![RawRecord::from(json!([17, 17]))]);
        }
    }

    #[tokio::test]
    async fn test_dir_source() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("05.json"), r#"{"balloons": [[1.0, 2.0, 3.0]]}"#).unwrap();
        std::fs::write(dir.path().join("06.json"), "[[1.0, 2.0], [").unwrap();

        let source = DirSource::new(dir.path());
        assert_eq!(source.path_for(5), dir.path().join("05.json"));
        assert!(source.fetch(5).await.is_ok());
        assert!(matches!(source.fetch(6).await, Err(SourceError::Json(_))));
        assert!(matches!(source.fetch(7).await, Err(SourceError::Io(_))));
    }

    #[tokio::test]
    async fn test_http_then_dir_fallback() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/00.json");
                then.status(200).json_body(json!([[10.0, 20.0, 5000]]));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/01.json");
                then.status(500);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/02.json");
                then.status(200).body("{\"balloons\": [[1, 2],");
            })
            .await;

        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("01.json"), "[[5, 5]]").unwrap();
        std::fs::write(dir.path().join("02.json"), "[[6, 6], [7, 7]]").unwrap();

        let client = TelemetryClient::new(
            ClientConfig::new(server.base_url()).with_timeout(Duration::from_secs(2)),
        )
        .unwrap();
        let loader = SnapshotLoader::new(LoaderConfig::default())
            .with_source(HttpSource::new(client))
            .with_source(DirSource::new(dir.path()));

        let s0 = loader.load_hour(0).await;
        assert_eq!(s0.source.as_deref(), Some(server.base_url().as_str()));
        assert_eq!(s0.records.len(), 1);

        let s1 = loader.load_hour(1).await;
        assert_eq!(s1.records, vec![RawRecord::from(json!([5, 5]))]);

        let s2 = loader.load_hour(2).await;
        assert_eq!(s2.records.len(), 2);

        let s3 = loader.load_hour(3).await;
        assert!(!s3.is_loaded());
    }
}
