//! Ministry of Environment open-data client
//!
//! Datasets come back either as a bare JSON array or wrapped in
//! `{"records": [...]}`; numeric fields are usually strings.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};

use super::geo::LatLon;
use super::AirboxError;

/// Station list dataset
pub const STATIONS_DATASET: &str = "aqx_p_07";
/// Hourly readings of every station and item (temperature, humidity, ...)
pub const MEASUREMENTS_DATASET: &str = "aqx_p_35";

pub const ITEM_PM25: &str = "PM2.5";
pub const ITEM_TEMPERATURE: &str = "AMB_TEMP";
pub const ITEM_HUMIDITY: &str = "RH";

/// Air-quality monitoring station
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Station {
    #[serde(rename = "siteid", deserialize_with = "lenient_string")]
    pub site_id: String,
    #[serde(rename = "sitename", default)]
    pub site_name: String,
    #[serde(default)]
    pub county: String,
    #[serde(default)]
    pub township: String,
    #[serde(rename = "areaname", default)]
    pub area_name: String,
    #[serde(rename = "twd97lat", deserialize_with = "lenient_f64")]
    pub lat: f64,
    #[serde(rename = "twd97lon", deserialize_with = "lenient_f64")]
    pub lon: f64,
}

impl Station {
    pub const fn location(&self) -> LatLon {
        LatLon {
            lat: self.lat,
            lon: self.lon,
        }
    }
}

/// One hourly reading as published by the MOE datasets
#[derive(Debug, Clone, Deserialize)]
pub struct Measurement {
    #[serde(rename = "siteid", deserialize_with = "lenient_string")]
    pub site_id: String,
    #[serde(rename = "sitename", default)]
    pub site_name: String,
    #[serde(default)]
    pub county: String,
    #[serde(rename = "itemengname", default)]
    pub item: String,
    /// Missing or non-numeric ("x", "") readings become `None`
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub concentration: Option<f64>,
    /// `%Y-%m-%d %H:%M`, Asia/Taipei
    #[serde(rename = "monitordate", default)]
    pub monitor_date: String,
}

/// PM2.5 reading kept for a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pm25Reading {
    pub county: String,
    pub site_name: String,
    pub site_id: String,
    pub pm25: Option<f64>,
    pub time: String,
}

impl From<Measurement> for Pm25Reading {
    fn from(m: Measurement) -> Self {
        Self {
            county: m.county,
            site_name: m.site_name,
            site_id: m.site_id,
            pm25: m.concentration,
            time: m.monitor_date,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Records<T> {
    List(Vec<T>),
    Wrapped { records: Vec<T> },
}

impl<T> Records<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::List(v) | Self::Wrapped { records: v } => v,
        }
    }
}

pub struct MoeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    page_size: u32,
    max_offset: u32,
}

impl MoeClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
        page_size: u32,
        max_offset: u32,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            page_size: page_size.max(1),
            max_offset,
        }
    }

    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    pub const fn max_offset(&self) -> u32 {
        self.max_offset
    }

    /// Fetch one page of a dataset
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        dataset: &str,
        offset: Option<u32>,
    ) -> Result<Vec<T>, AirboxError> {
        let mut query: Vec<(&str, String)> = Vec::with_capacity(2);
        if let Some(key) = &self.api_key {
            query.push(("api_key", key.clone()));
        }
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }

        let url = format!("{}/{dataset}", self.base_url);
        tracing::debug!(dataset, ?offset, "fetching MOE dataset");

        let records: Records<T> = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(records.into_vec())
    }

    pub async fn stations(&self) -> Result<Vec<Station>, AirboxError> {
        tracing::info!("getting air quality stations");
        self.fetch(STATIONS_DATASET, None).await
    }

    /// Page through a station's PM2.5 dataset until `target` readings are
    /// collected, a page comes back empty, or the offset cap is reached
    pub async fn pm25_readings(
        &self,
        dataset: &str,
        target: usize,
    ) -> Result<Vec<Pm25Reading>, AirboxError> {
        tracing::info!(dataset, target, "getting pollution data");
        let mut readings = Vec::with_capacity(target);
        let mut offset = 0;

        while readings.len() < target && offset < self.max_offset {
            let page: Vec<Measurement> = self.fetch(dataset, Some(offset)).await?;
            if page.is_empty() {
                break;
            }
            let remaining = target - readings.len();
            readings.extend(
                page.into_iter()
                    .filter(|m| m.item == ITEM_PM25)
                    .take(remaining)
                    .map(Pm25Reading::from),
            );
            offset += self.page_size;
        }

        Ok(readings)
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn lenient_opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite()))
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    lenient_opt_f64(d)?.ok_or_else(|| serde::de::Error::custom("expected a numeric value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(server: &mockito::ServerGuard, page_size: u32) -> MoeClient {
        MoeClient::new(
            reqwest::Client::new(),
            &server.url(),
            Some("test-key".to_string()),
            page_size,
            30_000,
        )
    }

    fn pm25_page(site: &str, hours: &[u32]) -> String {
        let records: Vec<_> = hours
            .iter()
            .flat_map(|h| {
                [
                    serde_json::json!({
                        "siteid": site, "sitename": "中山", "county": "臺北市",
                        "itemengname": "PM2.5", "concentration": format!("{h}"),
                        "monitordate": format!("2024-05-01 {h:02}:00"),
                    }),
                    serde_json::json!({
                        "siteid": site, "sitename": "中山", "county": "臺北市",
                        "itemengname": "PM10", "concentration": "40",
                        "monitordate": format!("2024-05-01 {h:02}:00"),
                    }),
                ]
            })
            .collect();
        serde_json::Value::Array(records).to_string()
    }

    #[test]
    fn test_station_lenient_fields() {
        let json = r#"[{"siteid": 12, "sitename": "中山", "county": "臺北市",
            "township": "中山區", "areaname": "北部空品區",
            "twd97lat": "25.062361", "twd97lon": 121.526528}]"#;
        let stations: Vec<Station> = serde_json::from_str(json).expect("parse");
        assert_eq!(stations[0].site_id, "12");
        assert!((stations[0].lat - 25.062_361).abs() < 1e-9);
        assert!((stations[0].lon - 121.526_528).abs() < 1e-9);
    }

    #[test]
    fn test_measurement_bad_concentration_is_none() {
        let m: Measurement = serde_json::from_str(
            r#"{"siteid": "12", "itemengname": "PM2.5", "concentration": "x",
                "monitordate": "2024-05-01 10:00"}"#,
        )
        .expect("parse");
        assert_eq!(m.concentration, None);
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        let m: Measurement = serde_json::from_str(
            r#"{"siteid": "12", "itemengname": "PM2.5", "concentration": "NaN",
                "monitordate": "2024-05-01 10:00"}"#,
        )
        .expect("parse");
        assert_eq!(m.concentration, None);

        let station = serde_json::from_str::<Station>(
            r#"{"siteid": "12", "sitename": "中山", "county": "臺北市",
                "twd97lat": "NaN", "twd97lon": "inf"}"#,
        );
        assert!(station.is_err());
    }

    #[tokio::test]
    async fn test_stations_accepts_wrapped_records() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/aqx_p_07")
            .match_query(mockito::Matcher::UrlEncoded(
                "api_key".into(),
                "test-key".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"records": [{"siteid": "1", "sitename": "基隆", "county": "基隆市",
                    "township": "信義區", "areaname": "北部空品區",
                    "twd97lat": "25.129167", "twd97lon": "121.760056"}]}"#,
            )
            .create_async()
            .await;

        let stations = client(&server, 1000).stations().await.expect("stations");
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].site_name, "基隆");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_pm25_readings_pages_until_target() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/aqx_p_237")
            .match_query(mockito::Matcher::UrlEncoded("offset".into(), "0".into()))
            .with_status(200)
            .with_body(pm25_page("12", &[0, 1, 2]))
            .create_async()
            .await;
        let second = server
            .mock("GET", "/aqx_p_237")
            .match_query(mockito::Matcher::UrlEncoded("offset".into(), "6".into()))
            .with_status(200)
            .with_body(pm25_page("12", &[3, 4, 5]))
            .create_async()
            .await;

        let readings = client(&server, 6)
            .pm25_readings("aqx_p_237", 4)
            .await
            .expect("readings");

        assert_eq!(readings.len(), 4);
        assert!(readings.iter().all(|r| r.site_id == "12"));
        assert_eq!(readings[3].time, "2024-05-01 03:00");
        assert_eq!(readings[3].pm25, Some(3.0));
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_pm25_readings_stop_on_empty_page() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/aqx_p_237")
            .match_query(mockito::Matcher::UrlEncoded("offset".into(), "0".into()))
            .with_status(200)
            .with_body(pm25_page("12", &[0]))
            .create_async()
            .await;
        server
            .mock("GET", "/aqx_p_237")
            .match_query(mockito::Matcher::UrlEncoded("offset".into(), "2".into()))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let readings = client(&server, 2)
            .pm25_readings("aqx_p_237", 72)
            .await
            .expect("readings");
        assert_eq!(readings.len(), 1);
    }

    #[tokio::test]
    async fn test_upstream_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/aqx_p_07")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let err = client(&server, 1000).stations().await.expect_err("503");
        assert!(matches!(err, AirboxError::Http(_)));
    }
}
