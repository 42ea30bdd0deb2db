//! airbox: address to air-quality lookup over HTTP
//!
//! `POST /run` with `{"address": "..."}` hands the address to an injected
//! [`processor::AddressProcessor`]; the bundled [`air_quality::AirQualityProcessor`]
//! reports PM2.5, temperature and humidity at the nearest monitoring station.

pub mod air_quality;
pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod logger;
pub mod processor;
pub mod server;
