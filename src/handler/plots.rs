//! `GET /plots/{name}` handler

use hyper::StatusCode;

use crate::air_quality::{PlotLookupError, PlotStore};
use crate::http::{self, JsonResponse};

/// Path prefix of chart routes
pub const PLOTS_PREFIX: &str = "/plots/";

/// Serve chart data published by the last successful run
pub async fn serve_plot(plots: &PlotStore, name: &str) -> JsonResponse {
    match plots.get(name).await {
        Ok(data) => http::json_response(StatusCode::OK, &data),
        Err(PlotLookupError::Unknown) => http::error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            &format!("unknown plot '{name}'"),
        ),
        Err(PlotLookupError::Unavailable) => http::error_response(
            StatusCode::NOT_FOUND,
            "plot_unavailable",
            "no plot data yet; run a query first",
        ),
    }
}
