//! Air-quality report and chart data

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::geo::LatLon;
use super::moe::{Pm25Reading, Station};
use super::weather::{StationWeather, WeatherReading};

pub const REPORT_SCHEMA: &str = "air-quality/v1";
pub const PLOT_TOTAL: &str = "total";
pub const PLOT_PM25_AVERAGE: &str = "pm25_average";
pub const PLOT_NAMES: [&str; 2] = [PLOT_TOTAL, PLOT_PM25_AVERAGE];

#[derive(Debug, Clone, Serialize)]
pub struct AirQualityReport {
    pub schema: &'static str,
    pub address: String,
    pub location: LatLon,
    pub station: StationSummary,
    pub pm25: Pm25Summary,
    pub plots: [&'static str; 2],
}

#[derive(Debug, Clone, Serialize)]
pub struct StationSummary {
    pub site_id: String,
    pub site_name: String,
    pub area_name: String,
    pub county: String,
    pub township: String,
    pub lat: f64,
    pub lon: f64,
    pub distance_km: f64,
}

impl StationSummary {
    pub fn new(station: &Station, distance_km: f64) -> Self {
        Self {
            site_id: station.site_id.clone(),
            site_name: station.site_name.clone(),
            area_name: station.area_name.clone(),
            county: station.county.clone(),
            township: station.township.clone(),
            lat: station.lat,
            lon: station.lon,
            distance_km,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pm25Summary {
    pub records: usize,
    pub latest: Option<LatestReading>,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestReading {
    pub time: String,
    pub value: f64,
}

impl Pm25Summary {
    pub fn from_readings(readings: &[Pm25Reading]) -> Self {
        let valued = || readings.iter().filter_map(|r| r.pm25.map(|v| (r, v)));

        let latest = valued()
            .max_by(|(a, _), (b, _)| a.time.cmp(&b.time))
            .map(|(r, value)| LatestReading {
                time: r.time.clone(),
                value,
            });

        Self {
            records: readings.len(),
            latest,
            average: mean(valued().map(|(_, v)| v)).map(|(avg, _)| avg),
        }
    }
}

/// One hour of the combined chart
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TotalPoint {
    pub time: String,
    pub pm25: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAverage {
    pub date: String,
    pub average: f64,
    pub samples: usize,
}

/// Chart data published by a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlotSet {
    pub total: Vec<TotalPoint>,
    pub pm25_average: Vec<DailyAverage>,
}

impl PlotSet {
    pub fn build(pm25: &[Pm25Reading], weather: &StationWeather) -> Self {
        Self {
            total: total_series(pm25, weather),
            pm25_average: daily_averages(pm25),
        }
    }
}

/// Join PM2.5, temperature and humidity on timestamp, oldest first
fn total_series(pm25: &[Pm25Reading], weather: &StationWeather) -> Vec<TotalPoint> {
    let mut points: BTreeMap<String, TotalPoint> = BTreeMap::new();

    for r in pm25 {
        point_at(&mut points, &r.time).pm25 = r.pm25;
    }
    for WeatherReading { value, time, .. } in &weather.temperature {
        point_at(&mut points, time).temperature = *value;
    }
    for WeatherReading { value, time, .. } in &weather.humidity {
        point_at(&mut points, time).humidity = *value;
    }

    points.into_values().collect()
}

fn point_at<'a>(points: &'a mut BTreeMap<String, TotalPoint>, time: &str) -> &'a mut TotalPoint {
    points
        .entry(time.to_string())
        .or_insert_with(|| TotalPoint {
            time: time.to_string(),
            ..TotalPoint::default()
        })
}

fn daily_averages(pm25: &[Pm25Reading]) -> Vec<DailyAverage> {
    let mut days: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for r in pm25 {
        if let (Some(value), Some(date)) = (r.pm25, r.time.get(..10)) {
            days.entry(date).or_default().push(value);
        }
    }

    days.into_iter()
        .filter_map(|(date, values)| {
            mean(values.into_iter()).map(|(average, samples)| DailyAverage {
                date: date.to_string(),
                average,
                samples,
            })
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl Iterator<Item = f64>) -> Option<(f64, usize)> {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| (sum / n as f64, n))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotLookupError {
    /// Not one of [`PLOT_NAMES`]
    Unknown,
    /// No successful run has published charts yet
    Unavailable,
}

/// Latest published charts; each successful run replaces the previous set
#[derive(Default)]
pub struct PlotStore {
    current: RwLock<Option<Arc<PlotSet>>>,
}

impl PlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, plots: PlotSet) {
        *self.current.write().await = Some(Arc::new(plots));
    }

    pub async fn get(&self, name: &str) -> Result<serde_json::Value, PlotLookupError> {
        if !PLOT_NAMES.contains(&name) {
            return Err(PlotLookupError::Unknown);
        }
        let plots = self
            .current
            .read()
            .await
            .clone()
            .ok_or(PlotLookupError::Unavailable)?;

        let data = if name == PLOT_TOTAL {
            serde_json::to_value(&plots.total)
        } else {
            serde_json::to_value(&plots.pm25_average)
        };
        // plain structs of strings and numbers always serialize
        Ok(data.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pm25(time: &str, value: Option<f64>) -> Pm25Reading {
        Pm25Reading {
            county: "臺北市".to_string(),
            site_name: "中山".to_string(),
            site_id: "12".to_string(),
            pm25: value,
            time: time.to_string(),
        }
    }

    fn weather(time: &str, value: f64) -> WeatherReading {
        WeatherReading {
            site_id: "12".to_string(),
            value: Some(value),
            time: time.to_string(),
        }
    }

    #[test]
    fn test_pm25_summary() {
        let readings = vec![
            pm25("2024-05-01 02:00", Some(12.0)),
            pm25("2024-05-01 03:00", None),
            pm25("2024-05-01 01:00", Some(18.0)),
        ];
        let summary = Pm25Summary::from_readings(&readings);
        assert_eq!(summary.records, 3);
        assert_eq!(
            summary.latest,
            Some(LatestReading {
                time: "2024-05-01 02:00".to_string(),
                value: 12.0
            })
        );
        assert_eq!(summary.average, Some(15.0));
    }

    #[test]
    fn test_pm25_summary_empty() {
        let summary = Pm25Summary::from_readings(&[]);
        assert_eq!(summary.records, 0);
        assert!(summary.latest.is_none());
        assert!(summary.average.is_none());
    }

    #[test]
    fn test_total_series_joins_and_sorts() {
        let readings = vec![
            pm25("2024-05-01 02:00", Some(10.0)),
            pm25("2024-05-01 01:00", Some(20.0)),
        ];
        let weather = StationWeather {
            temperature: vec![weather("2024-05-01 01:00", 25.5)],
            humidity: vec![weather("2024-05-01 00:00", 80.0)],
        };

        let total = PlotSet::build(&readings, &weather).total;
        let times: Vec<_> = total.iter().map(|p| p.time.as_str()).collect();
        assert_eq!(
            times,
            ["2024-05-01 00:00", "2024-05-01 01:00", "2024-05-01 02:00"]
        );
        assert_eq!(total[0].humidity, Some(80.0));
        assert_eq!(total[0].pm25, None);
        assert_eq!(total[1].pm25, Some(20.0));
        assert_eq!(total[1].temperature, Some(25.5));
    }

    #[test]
    fn test_daily_averages() {
        let readings = vec![
            pm25("2024-05-02 01:00", Some(30.0)),
            pm25("2024-05-01 01:00", Some(10.0)),
            pm25("2024-05-01 02:00", Some(20.0)),
            pm25("2024-05-03 01:00", None),
        ];
        let days = daily_averages(&readings);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, "2024-05-01");
        assert_eq!(days[0].average, 15.0);
        assert_eq!(days[0].samples, 2);
        assert_eq!(days[1].date, "2024-05-02");
    }

    #[test]
    fn test_report_serializes_schema() {
        let report = AirQualityReport {
            schema: REPORT_SCHEMA,
            address: "臺北市中山區".to_string(),
            location: LatLon { lat: 25.06, lon: 121.53 },
            station: StationSummary {
                site_id: "12".to_string(),
                site_name: "中山".to_string(),
                area_name: String::new(),
                county: "臺北市".to_string(),
                township: String::new(),
                lat: 25.06,
                lon: 121.52,
                distance_km: 0.7,
            },
            pm25: Pm25Summary::from_readings(&[]),
            plots: PLOT_NAMES,
        };
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["schema"], "air-quality/v1");
        assert_eq!(json["station"]["distance_km"], 0.7);
        assert!(json["pm25"]["latest"].is_null());
        assert_eq!(json["plots"], serde_json::json!(["total", "pm25_average"]));
    }

    #[tokio::test]
    async fn test_plot_store_lookup() {
        let store = PlotStore::new();
        assert_eq!(store.get("total").await, Err(PlotLookupError::Unavailable));
        assert_eq!(store.get("pie").await, Err(PlotLookupError::Unknown));

        store
            .publish(PlotSet::build(
                &[pm25("2024-05-01 01:00", Some(5.0))],
                &StationWeather::default(),
            ))
            .await;
        let total = store.get("total").await.expect("published");
        assert_eq!(total[0]["pm25"], 5.0);
        let avg = store.get("pm25_average").await.expect("published");
        assert_eq!(avg[0]["date"], "2024-05-01");

        store.publish(PlotSet::default()).await;
        assert_eq!(store.get("total").await, Ok(serde_json::json!([])));
    }
}
