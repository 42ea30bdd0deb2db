// Configuration module entry point
// Manages application configuration and runtime state

mod state;
mod types;

use std::net::SocketAddr;

// Re-export public types
pub use state::AppState;
pub use types::{
    AirboxConfig, Config, HealthConfig, HttpConfig, LoggingConfig, PerformanceConfig, RunConfig,
    ServerConfig,
};

const DEFAULT_CONFIG_PATH: &str = "config";

impl Config {
    /// Load configuration from the default path ("config", any supported extension)
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from specified file path (without extension)
    ///
    /// Layers, lowest priority first: built-in defaults, the file, `AIRBOX__*`
    /// environment variables. `GOOGLE_API_KEY` and `MOE_API_KEY` fill the API
    /// keys when nothing else sets them.
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        Self::load_with_env(config_path, None)
    }

    /// `env` replaces the process environment when set
    fn load_with_env(
        config_path: &str,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("AIRBOX")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env.clone()),
            )
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("logging.level", "info")?
            .set_default("logging.access_log", true)?
            .set_default("logging.format", "text")?
            .set_default("logging.access_log_format", "combined")?
            .set_default("performance.keep_alive_timeout", 75)?
            .set_default("performance.read_timeout", 120)?
            .set_default("performance.write_timeout", 120)?
            .set_default("http.server_name", "airbox/0.1")?
            .set_default("http.enable_cors", false)?
            .set_default("http.max_body_size", 65_536)? // 64KB
            .set_default("run.max_address_len", 512)?
            .set_default(
                "airbox.geocode_url",
                "https://maps.googleapis.com/maps/api/geocode/json",
            )?
            .set_default("airbox.moe_api_url", "https://data.moenv.gov.tw/api/v2")?
            .set_default("airbox.past_days", 3)?
            .set_default("airbox.records_per_day", 24)?
            .set_default("airbox.page_size", 1000)?
            .set_default("airbox.max_offset", 30_000)?
            .set_default("airbox.max_empty_fetch", 3)?
            .set_default("airbox.refresh_interval_secs", 3600)?
            .set_default("airbox.request_timeout_secs", 30)?
            .set_default("airbox.data_dir", "data")?
            .build()?;

        let mut cfg: Self = settings.try_deserialize()?;
        cfg.apply_key_fallbacks(|name| match &env {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        });
        Ok(cfg)
    }

    fn apply_key_fallbacks(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.airbox.google_api_key.is_none() {
            self.airbox.google_api_key = var("GOOGLE_API_KEY");
        }
        if self.airbox.moe_api_key.is_none() {
            self.airbox.moe_api_key = var("MOE_API_KEY");
        }
    }

    pub fn get_socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("Invalid address: {e}"))
    }
}
