//! Air-quality processor
//!
//! Resolves an address to coordinates, picks the nearest monitoring station
//! with a PM2.5 dataset, and reports its recent PM2.5 readings together with
//! cached temperature and humidity. Chart data of the last run is published
//! to a [`PlotStore`].

mod geo;
mod geocode;
mod moe;
mod report;
mod weather;

pub use geo::{haversine_km, nearest_station, LatLon};
pub use geocode::Geocoder;
pub use moe::{MoeClient, Pm25Reading, Station};
pub use report::{
    AirQualityReport, PlotLookupError, PlotSet, PlotStore, Pm25Summary, StationSummary,
    PLOT_NAMES, REPORT_SCHEMA,
};
pub use weather::{StationWeather, WeatherCache, WeatherReading};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::AirboxConfig;
use crate::processor::{AddressProcessor, ProcessError, ProcessOutcome};

#[derive(Debug, Error)]
pub enum AirboxError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected upstream payload: {0}")]
    Payload(String),
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AirboxError> for ProcessError {
    fn from(e: AirboxError) -> Self {
        tracing::error!("air quality lookup failed: {e}");
        match e {
            AirboxError::Http(_) | AirboxError::Payload(_) => {
                Self::server("upstream_error", "air quality data source unavailable")
            }
            AirboxError::Io(_) | AirboxError::Json(_) => {
                Self::server("cache_error", "weather cache unavailable")
            }
        }
    }
}

pub struct AirQualityProcessor {
    geocoder: Geocoder,
    moe: Arc<MoeClient>,
    weather: Arc<WeatherCache>,
    plots: Arc<PlotStore>,
    station_endpoints: HashMap<String, String>,
    target_records: usize,
}

impl AirQualityProcessor {
    pub fn from_config(config: &AirboxConfig, plots: Arc<PlotStore>) -> Result<Self, AirboxError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let moe = Arc::new(MoeClient::new(
            http.clone(),
            &config.moe_api_url,
            config.moe_api_key.clone(),
            config.page_size,
            config.max_offset,
        ));
        let weather = Arc::new(WeatherCache::new(
            Arc::clone(&moe),
            &config.data_dir,
            config.target_records(),
            config.station_endpoints.keys().cloned().collect(),
            config.max_empty_fetch,
        ));

        Ok(Self {
            geocoder: Geocoder::new(http, &config.geocode_url, config.google_api_key.clone()),
            moe,
            weather,
            plots,
            station_endpoints: config.station_endpoints.clone(),
            target_records: config.target_records(),
        })
    }

    /// Shared handle to the temperature/humidity cache, for the background refresher
    pub fn weather_cache(&self) -> Arc<WeatherCache> {
        Arc::clone(&self.weather)
    }

    async fn report(&self, address: &str) -> Result<AirQualityReport, ProcessError> {
        let location = self
            .geocoder
            .locate(address)
            .await?
            .ok_or_else(|| ProcessError::client("address_not_found", "Invalid address"))?;

        let stations: Vec<Station> = self
            .moe
            .stations()
            .await?
            .into_iter()
            .filter(|s| self.station_endpoints.contains_key(&s.site_id))
            .collect();

        let (station, distance_km) = nearest_station(location, &stations).ok_or_else(|| {
            ProcessError::server("no_station", "no monitoring station with PM2.5 data")
        })?;
        tracing::info!(
            site_id = %station.site_id,
            site_name = %station.site_name,
            distance_km,
            "nearest station"
        );

        let endpoint = self.station_endpoints.get(&station.site_id).ok_or_else(|| {
            ProcessError::server("no_station", "no monitoring station with PM2.5 data")
        })?;
        let pm25 = self.moe.pm25_readings(endpoint, self.target_records).await?;
        let weather = self.weather.load(&station.site_id).await?;

        self.plots.publish(PlotSet::build(&pm25, &weather)).await;

        Ok(AirQualityReport {
            schema: REPORT_SCHEMA,
            address: address.to_string(),
            location,
            station: StationSummary::new(station, distance_km),
            pm25: Pm25Summary::from_readings(&pm25),
            plots: PLOT_NAMES,
        })
    }
}

#[async_trait]
impl AddressProcessor for AirQualityProcessor {
    async fn process(&self, address: &str) -> Result<ProcessOutcome, ProcessError> {
        let report = self.report(address).await?;
        serde_json::to_value(report)
            .map_err(|e| ProcessError::server("encoding_error", e.to_string()))
    }
}
