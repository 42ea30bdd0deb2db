// Configuration types module
// One struct per config file section

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub performance: PerformanceConfig,
    pub http: HttpConfig,
    #[serde(default)]
    pub health: HealthConfig,
    pub run: RunConfig,
    pub airbox: AirboxConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Runtime worker threads; one per core when unset
    pub workers: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `airbox=debug,info`; `RUST_LOG` wins when set
    pub level: String,
    pub access_log: bool,
    /// `text` or `json`
    pub format: String,
    /// combined, common, json, or a `$variable` pattern
    pub access_log_format: String,
    /// Stdout when unset
    #[serde(default)]
    pub log_file: Option<String>,
}

/// Connection limits and timeouts, in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct PerformanceConfig {
    /// Idle time before a connection is closed; 0 disables keep-alive
    pub keep_alive_timeout: u64,
    /// Time allowed for receiving request headers
    pub read_timeout: u64,
    pub write_timeout: u64,
    pub max_connections: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    /// Sent as the `Server` header
    pub server_name: String,
    pub enable_cors: bool,
    /// Largest accepted request body, in bytes
    pub max_body_size: u64,
}

/// Liveness/readiness probes
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub liveness_path: String,
    pub readiness_path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            liveness_path: "/healthz".to_string(),
            readiness_path: "/readyz".to_string(),
        }
    }
}

/// `/run` endpoint configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    /// Longest accepted address, in characters
    pub max_address_len: usize,
    /// Deadline for a single processor call; no deadline when unset
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

/// Air-quality processor configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AirboxConfig {
    /// Google Geocoding endpoint
    pub geocode_url: String,
    /// Ministry of Environment open data base URL
    pub moe_api_url: String,
    #[serde(default)]
    pub google_api_key: Option<String>,
    #[serde(default)]
    pub moe_api_key: Option<String>,
    /// Days of hourly history to collect
    pub past_days: u32,
    pub records_per_day: u32,
    /// Offset step when paging through MOE datasets
    pub page_size: u32,
    /// Paging stops once the offset reaches this value
    pub max_offset: u32,
    /// Consecutive unproductive pages tolerated while filling the weather cache
    pub max_empty_fetch: u32,
    pub refresh_interval_secs: u64,
    /// Timeout for each upstream HTTP request
    pub request_timeout_secs: u64,
    /// Directory holding the temperature/humidity cache
    pub data_dir: String,
    /// Station id -> PM2.5 dataset name (e.g. "12" -> "aqx_p_237")
    #[serde(default)]
    pub station_endpoints: HashMap<String, String>,
}

impl AirboxConfig {
    /// Number of hourly records expected per station
    pub const fn target_records(&self) -> usize {
        (self.records_per_day * self.past_days) as usize
    }
}
