//! Weather enrichment for reconstructed trajectories.
//!
//! A flight can carry hundreds of points, so only a bounded, evenly strided
//! sample is looked up (the final point is always included). Lookups run in
//! small batches with a pause in between. A failed lookup leaves that point
//! without weather and is never reported to the caller.

use crate::types::{Flight, NormalizedPoint, Observation};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

pub const DEFAULT_WEATHER_URL: &str = "https://api.open-meteo.com";

const CURRENT_FIELDS: &str =
    "temperature_2m,relative_humidity_2m,wind_speed_10m,wind_direction_10m,surface_pressure,weather_code";

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Server returned error status: {status}")]
    ServerError { status: StatusCode },
    #[error("Response has no current conditions")]
    MissingCurrent,
}

/// Point-to-observation lookup.
#[async_trait]
pub trait WeatherLookup: Send + Sync {
    async fn lookup(&self, lat: f64, lon: f64) -> Result<Observation, WeatherError>;
}

/// Configuration for weather lookups and sampling.
#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Maximum points looked up per flight
    pub max_samples: usize,
    /// Lookups in flight at a time
    pub concurrency: usize,
    /// Pause between batches
    pub batch_delay: Duration,
    /// Extra attempts after the first failure
    pub retries: u32,
    /// Backoff unit, multiplied by the attempt number
    pub backoff: Duration,
    /// Memoize results by coordinates rounded to 2 decimals
    pub cache: bool,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_WEATHER_URL.to_string(),
            timeout: Duration::from_secs(8),
            max_samples: 24,
            concurrency: 4,
            batch_delay: Duration::from_millis(250),
            retries: 2,
            backoff: Duration::from_millis(400),
            cache: true,
        }
    }
}

impl WeatherConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Evenly strided indices into a sequence of `len` points, at most `cap` of
/// them, always ending with `len - 1`.
pub fn sample_indices(len: usize, cap: usize) -> Vec<usize> {
    if len == 0 || cap == 0 {
        return Vec::new();
    }
    if len <= cap {
        return (0..len).collect();
    }

    let stride = len.div_ceil(cap);
    let mut indices: Vec<usize> = (0..len).step_by(stride).collect();
    if indices.last() != Some(&(len - 1)) {
        if indices.len() >= cap {
            indices.pop();
        }
        indices.push(len - 1);
    }
    indices
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: Option<CurrentConditions>,
}

#[derive(Debug, Deserialize)]
struct CurrentConditions {
    time: Option<String>,
    temperature_2m: Option<f64>,
    relative_humidity_2m: Option<f64>,
    wind_speed_10m: Option<f64>,
    wind_direction_10m: Option<f64>,
    surface_pressure: Option<f64>,
    weather_code: Option<i32>,
}

impl From<CurrentConditions> for Observation {
    fn from(c: CurrentConditions) -> Self {
        Self {
            time: c.time,
            temperature_c: c.temperature_2m,
            relative_humidity: c.relative_humidity_2m,
            wind_speed_kmh: c.wind_speed_10m,
            wind_direction_deg: c.wind_direction_10m,
            surface_pressure_hpa: c.surface_pressure,
            weather_code: c.weather_code,
        }
    }
}

type CacheKey = (i64, i64);

fn cache_key(lat: f64, lon: f64) -> CacheKey {
    ((lat * 100.0).round() as i64, (lon * 100.0).round() as i64)
}

/// Open-Meteo current-conditions client with retry and a coordinate cache.
pub struct OpenMeteoClient {
    client: Client,
    config: WeatherConfig,
    cache: Mutex<HashMap<CacheKey, Observation>>,
}

impl OpenMeteoClient {
    pub fn new(config: WeatherConfig) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .user_agent(format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            config,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }

    fn url(&self, lat: f64, lon: f64) -> String {
        format!(
            "{}/v1/forecast?latitude={:.4}&longitude={:.4}&current={}",
            self.config.base_url.trim_end_matches('/'),
            lat,
            lon,
            CURRENT_FIELDS
        )
    }

    async fn request(&self, lat: f64, lon: f64) -> Result<Observation, WeatherError> {
        let url = self.url(lat, lon);
        tracing::debug!("Fetching weather: {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WeatherError::ServerError { status });
        }

        let body: ForecastResponse = response.json().await?;
        body.current
            .map(Observation::from)
            .ok_or(WeatherError::MissingCurrent)
    }
}

#[async_trait]
impl WeatherLookup for OpenMeteoClient {
    async fn lookup(&self, lat: f64, lon: f64) -> Result<Observation, WeatherError> {
        let key = cache_key(lat, lon);
        if self.config.cache {
            let hit = self.cache.lock().get(&key).cloned();
            if let Some(hit) = hit {
                return Ok(hit);
            }
        }

        let mut attempt = 0;
        loop {
            match self.request(lat, lon).await {
                Ok(observation) => {
                    if self.config.cache {
                        self.cache.lock().insert(key, observation.clone());
                    }
                    return Ok(observation);
                }
                Err(e) if attempt < self.config.retries => {
                    attempt += 1;
                    let wait = self.config.backoff * attempt;
                    tracing::debug!("Weather lookup failed ({}), retry {} in {:?}", e, attempt, wait);
                    sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Samples a trajectory and merges observations onto it.
pub struct WeatherSampler<L> {
    lookup: L,
    config: WeatherConfig,
}

impl<L: WeatherLookup> WeatherSampler<L> {
    pub fn new(lookup: L, config: WeatherConfig) -> Self {
        Self { lookup, config }
    }

    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    /// Look up weather for the sampled points of `points`.
    ///
    /// Returns `(index, observation)` for every lookup that succeeded.
    pub async fn observe(&self, points: &[NormalizedPoint]) -> Vec<(usize, Observation)> {
        let indices = sample_indices(points.len(), self.config.max_samples);
        let mut found = Vec::with_capacity(indices.len());

        for (n, batch) in indices.chunks(self.config.concurrency.max(1)).enumerate() {
            if n > 0 && !self.config.batch_delay.is_zero() {
                sleep(self.config.batch_delay).await;
            }

            let lookups = batch.iter().map(|&i| {
                let (lat, lon) = points[i].position();
                async move { (i, self.lookup.lookup(lat, lon).await) }
            });

            for (i, result) in join_all(lookups).await {
                match result {
                    Ok(observation) => found.push((i, observation)),
                    Err(e) => tracing::debug!("No weather for point {}: {}", i, e),
                }
            }
        }

        found
    }

    /// Attach observations to the flight's sampled points. Returns how many
    /// points received weather.
    pub async fn enrich(&self, flight: &mut Flight) -> usize {
        let found = self.observe(&flight.points).await;
        let merged = found.len();
        for (i, observation) in found {
            flight.points[i].weather = Some(observation);
        }
        tracing::debug!("Flight {}: weather on {} points", flight.id, merged);
        merged
    }
}
