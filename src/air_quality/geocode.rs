//! Google Geocoding client

use serde::Deserialize;

use super::geo::LatLon;
use super::AirboxError;

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default = "default_status")]
    status: String,
    #[serde(default)]
    error_message: Option<String>,
}

fn default_status() -> String {
    "OK".to_string()
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Location,
}

#[derive(Debug, Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

pub struct Geocoder {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl Geocoder {
    pub fn new(http: reqwest::Client, url: &str, api_key: Option<String>) -> Self {
        Self {
            http,
            url: url.to_string(),
            api_key,
        }
    }

    /// Coordinates of the first match, or `None` when the address resolves to nothing
    pub async fn locate(&self, address: &str) -> Result<Option<LatLon>, AirboxError> {
        tracing::info!(address, "getting latitude and longitude");

        let mut query = vec![("address", address)];
        if let Some(key) = self.api_key.as_deref() {
            query.push(("key", key));
        }

        let body: GeocodeResponse = self
            .http
            .get(&self.url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match body.status.as_str() {
            "OK" | "ZERO_RESULTS" => Ok(body
                .results
                .into_iter()
                .next()
                .map(|r| LatLon {
                    lat: r.geometry.location.lat,
                    lon: r.geometry.location.lng,
                })),
            status => Err(AirboxError::Payload(format!(
                "geocoder returned {status}: {}",
                body.error_message.unwrap_or_default()
            ))),
        }
    }
}
