// Application state module
// Holds everything a request needs: configuration, the run handler and chart data

use std::sync::Arc;

use super::types::Config;
use crate::air_quality::PlotStore;
use crate::handler::RunHandler;

/// Application state shared by all connections
pub struct AppState {
    pub config: Config,
    pub run_handler: RunHandler,
    pub plots: Arc<PlotStore>,
}

impl AppState {
    pub fn new(config: &Config, run_handler: RunHandler, plots: Arc<PlotStore>) -> Self {
        Self {
            config: config.clone(),
            run_handler,
            plots,
        }
    }

    pub const fn access_log_enabled(&self) -> bool {
        self.config.logging.access_log
    }
}
