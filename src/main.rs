use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use airbox::air_quality::{AirQualityProcessor, PlotStore};
use airbox::config::{AppState, Config};
use airbox::handler::RunHandler;
use airbox::logger;
use airbox::server::{self, SignalHandler};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Config path (without extension) may be given as the first argument
    let cfg = match std::env::args().nth(1) {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };
    let _log_guard = logger::init(&cfg.logging)?;

    // Size the runtime by `server.workers`, default is one thread per core
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(workers) = cfg.server.workers {
        runtime_builder.worker_threads(workers);
    }
    let runtime = runtime_builder.build()?;

    runtime.block_on(async_main(cfg))
}

async fn async_main(cfg: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = cfg.get_socket_addr()?;
    let listener = server::create_reusable_listener(addr)?;

    let plots = Arc::new(PlotStore::new());
    let processor = Arc::new(AirQualityProcessor::from_config(
        &cfg.airbox,
        Arc::clone(&plots),
    )?);
    if cfg.airbox.station_endpoints.is_empty() {
        logger::log_warning("No station endpoints configured; every query will fail with no_station");
    }

    let refresher_shutdown = Arc::new(Notify::new());
    let refresher = processor.weather_cache().spawn_refresher(
        Duration::from_secs(cfg.airbox.refresh_interval_secs.max(1)),
        Arc::clone(&refresher_shutdown),
    );

    let run_handler = RunHandler::from_config(processor, &cfg.run);
    let state = Arc::new(AppState::new(&cfg, run_handler, plots));
    let active_connections = Arc::new(AtomicUsize::new(0));

    let signals = Arc::new(SignalHandler::new());
    server::start_signal_handler(Arc::clone(&signals));

    logger::log_server_start(&addr, &cfg);

    // Use LocalSet for spawn_local support
    let local = tokio::task::LocalSet::new();
    let result = local
        .run_until(server::start_server_loop(
            listener,
            state,
            active_connections,
            Arc::clone(&signals.shutdown),
        ))
        .await;

    refresher_shutdown.notify_one();
    if let Err(e) = refresher.await {
        logger::log_error(&format!("Weather refresher ended abnormally: {e}"));
    }
    result
}
