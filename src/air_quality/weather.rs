//! Temperature and humidity cache
//!
//! The measurements dataset is large and shared by every station, so it is
//! fetched in bulk, split per station and kept on disk:
//! `{data_dir}/temperature/station_{id}.json` and
//! `{data_dir}/humidity/station_{id}.json`.

use chrono::{NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use super::moe::{Measurement, MoeClient, ITEM_HUMIDITY, ITEM_TEMPERATURE, MEASUREMENTS_DATASET};
use super::AirboxError;

const TEMPERATURE_DIR: &str = "temperature";
const HUMIDITY_DIR: &str = "humidity";
const MONITOR_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";
/// Monitor dates are Asia/Taipei local time, which has no DST
const TAIPEI_UTC_OFFSET_HOURS: i64 = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    #[serde(rename = "siteid")]
    pub site_id: String,
    pub value: Option<f64>,
    pub time: String,
}

/// Per-station series loaded from the cache
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationWeather {
    pub temperature: Vec<WeatherReading>,
    pub humidity: Vec<WeatherReading>,
}

/// Counts from one bulk fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub temperature: usize,
    pub humidity: usize,
    pub stations: usize,
}

pub struct WeatherCache {
    moe: Arc<MoeClient>,
    data_dir: PathBuf,
    /// Hours of history to keep, also the per-station record target
    window_hours: usize,
    /// Stations that always get files after a fetch, even empty ones
    stations: Vec<String>,
    max_empty_fetch: u32,
    fetch_lock: Mutex<()>,
}

impl WeatherCache {
    pub fn new(
        moe: Arc<MoeClient>,
        data_dir: impl Into<PathBuf>,
        window_hours: usize,
        stations: Vec<String>,
        max_empty_fetch: u32,
    ) -> Self {
        Self {
            moe,
            data_dir: data_dir.into(),
            window_hours,
            stations,
            max_empty_fetch: max_empty_fetch.max(1),
            fetch_lock: Mutex::new(()),
        }
    }

    fn station_file(&self, kind: &str, site_id: &str) -> PathBuf {
        self.data_dir
            .join(kind)
            .join(format!("station_{site_id}.json"))
    }

    /// Refresh the whole cache; concurrent refreshes run one at a time
    pub async fn refresh(&self) -> Result<FetchSummary, AirboxError> {
        let _guard = self.fetch_lock.lock().await;
        self.fetch_and_save().await
    }

    /// Load a station's series, filling the cache first if either file is missing.
    /// A file still missing after the fetch yields an empty series.
    pub async fn load(&self, site_id: &str) -> Result<StationWeather, AirboxError> {
        tracing::info!(site_id, "loading temperature and humidity");
        if !is_safe_site_id(site_id) {
            return Ok(StationWeather::default());
        }

        let temperature_path = self.station_file(TEMPERATURE_DIR, site_id);
        let humidity_path = self.station_file(HUMIDITY_DIR, site_id);

        if !(file_exists(&temperature_path).await && file_exists(&humidity_path).await) {
            let _guard = self.fetch_lock.lock().await;
            // another request may have filled the cache while we waited
            if !(file_exists(&temperature_path).await && file_exists(&humidity_path).await) {
                self.fetch_and_save().await?;
            }
        }

        Ok(StationWeather {
            temperature: read_series(&temperature_path).await?,
            humidity: read_series(&humidity_path).await?,
        })
    }

    async fn fetch_and_save(&self) -> Result<FetchSummary, AirboxError> {
        tracing::info!("fetching temperature and humidity");

        let mut temperature: HashMap<String, Vec<WeatherReading>> = HashMap::new();
        let mut humidity: HashMap<String, Vec<WeatherReading>> = HashMap::new();
        let (mut temperature_count, mut humidity_count) = (0usize, 0usize);

        let target = self.window_hours * self.stations.len().max(1);
        let now = Utc::now().naive_utc();
        let window = TimeDelta::hours(i64::try_from(self.window_hours).unwrap_or(i64::MAX));

        let mut offset = 0;
        let mut consecutive_empty = 0;

        while (temperature_count < target || humidity_count < target)
            && offset < self.moe.max_offset()
        {
            let page: Vec<Measurement> = self.moe.fetch(MEASUREMENTS_DATASET, Some(offset)).await?;
            if page.is_empty() {
                break;
            }
            let before = temperature_count + humidity_count;

            for record in page {
                let Some(recorded_at) = parse_monitor_date(&record.monitor_date) else {
                    continue;
                };
                if now - recorded_at > window || !is_safe_site_id(&record.site_id) {
                    continue;
                }

                let (series, count) = match record.item.as_str() {
                    ITEM_TEMPERATURE => (&mut temperature, &mut temperature_count),
                    ITEM_HUMIDITY => (&mut humidity, &mut humidity_count),
                    _ => continue,
                };
                series
                    .entry(record.site_id.clone())
                    .or_default()
                    .push(WeatherReading {
                        site_id: record.site_id,
                        value: record.concentration,
                        time: record.monitor_date,
                    });
                *count += 1;
            }

            offset += self.moe.page_size();

            if temperature_count + humidity_count == before {
                consecutive_empty += 1;
                if consecutive_empty >= self.max_empty_fetch {
                    tracing::warn!(offset, "weather fetch made no progress, stopping");
                    break;
                }
            } else {
                consecutive_empty = 0;
            }
        }

        let summary = FetchSummary {
            temperature: temperature_count,
            humidity: humidity_count,
            stations: temperature.len().max(humidity.len()),
        };

        // stations missing from the dataset still get (empty) files, so
        // loading them does not trigger another bulk fetch
        for site_id in self.stations.iter().filter(|id| is_safe_site_id(id)) {
            temperature.entry(site_id.clone()).or_default();
            humidity.entry(site_id.clone()).or_default();
        }

        self.save(TEMPERATURE_DIR, &temperature).await?;
        self.save(HUMIDITY_DIR, &humidity).await?;

        tracing::info!(?summary, "weather cache updated");
        Ok(summary)
    }

    async fn save(
        &self,
        kind: &str,
        series: &HashMap<String, Vec<WeatherReading>>,
    ) -> Result<(), AirboxError> {
        tokio::fs::create_dir_all(self.data_dir.join(kind)).await?;
        for (site_id, readings) in series {
            let path = self.station_file(kind, site_id);
            // write-then-rename so readers never see a partial file
            let tmp = path.with_extension("json.tmp");
            tokio::fs::write(&tmp, serde_json::to_vec_pretty(readings)?).await?;
            tokio::fs::rename(&tmp, &path).await?;
        }
        Ok(())
    }

    /// Refresh the cache every `period` until `shutdown` fires.
    /// The first refresh happens one period after the call.
    pub fn spawn_refresher(
        self: Arc<Self>,
        period: Duration,
        shutdown: Arc<Notify>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh().await {
                            tracing::error!("weather refresh failed: {e}");
                        }
                    }
                    () = shutdown.notified() => {
                        tracing::info!("weather refresher stopped");
                        break;
                    }
                }
            }
        })
    }
}

/// Parse a monitor date into naive UTC
fn parse_monitor_date(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, MONITOR_DATE_FORMAT)
        .ok()
        .map(|local| local - TimeDelta::hours(TAIPEI_UTC_OFFSET_HOURS))
}

/// Site ids end up in file names; only plain identifiers are accepted
fn is_safe_site_id(site_id: &str) -> bool {
    !site_id.is_empty()
        && site_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn read_series(path: &Path) -> Result<Vec<WeatherReading>, AirboxError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "no cached series");
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}
