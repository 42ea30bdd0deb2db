//! Request routing dispatch module
//!
//! Entry point for HTTP request processing: method gating, body limits,
//! route matching and dispatch, response headers and access logging.

use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, REFERER, SERVER, USER_AGENT};
use hyper::{Method, Request, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use super::plots::{self, PLOTS_PREFIX};
use crate::config::AppState;
use crate::error::INVALID_REQUEST;
use crate::http::{self, JsonResponse};
use crate::logger::{self, AccessLogEntry};

/// Routes accepting `POST {"address": ...}`
const RUN_PATHS: [&str; 2] = ["/run", "/air-quality/query"];

/// Main entry point for HTTP request handling
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
    peer_addr: SocketAddr,
) -> Result<JsonResponse, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let started = Instant::now();
    let mut entry = state
        .access_log_enabled()
        .then(|| access_entry(&req, peer_addr));

    let mut response = route_request(req, &state).await;
    decorate(&mut response, &state);

    if let Some(entry) = entry.as_mut() {
        entry.status = response.status().as_u16();
        entry.body_bytes = response.body().size_hint().exact().unwrap_or(0);
        entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        logger::log_access(entry, &state.config.logging.access_log_format);
    }

    Ok(response)
}

async fn route_request<B>(req: Request<B>, state: &AppState) -> JsonResponse
where
    B: Body<Data = Bytes>,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    // 1. Check HTTP method
    if let Some(resp) = check_http_method(req.method(), state.config.http.enable_cors) {
        return resp;
    }

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    // 2. Health check endpoints (highest priority, always fast)
    let health = &state.config.health;
    if health.enabled && (path == health.liveness_path || path == health.readiness_path) {
        return if method == Method::POST {
            http::build_405_response()
        } else {
            http::build_health_response("ok")
        };
    }

    // 3. Run endpoints
    if RUN_PATHS.contains(&path.as_str()) {
        if method != Method::POST {
            return http::build_405_response();
        }
        let body = match read_body(req, state.config.http.max_body_size).await {
            Ok(body) => body,
            Err(resp) => return resp,
        };
        return state.run_handler.respond(&body).await;
    }

    // 4. Chart data
    if let Some(name) = path.strip_prefix(PLOTS_PREFIX) {
        if method == Method::POST {
            return http::build_405_response();
        }
        return plots::serve_plot(&state.plots, name).await;
    }

    http::build_404_response(&path)
}

/// Check HTTP method and answer OPTIONS and unsupported methods directly
fn check_http_method(method: &Method, enable_cors: bool) -> Option<JsonResponse> {
    match *method {
        Method::GET | Method::HEAD | Method::POST => None,
        Method::OPTIONS => Some(http::build_options_response(enable_cors)),
        _ => {
            logger::log_warning(&format!("Method not allowed: {method}"));
            Some(http::build_405_response())
        }
    }
}

/// Collect the request body, rejecting anything over `max_body_size`.
/// A declared Content-Length is checked before reading.
async fn read_body<B>(req: Request<B>, max_body_size: u64) -> Result<Bytes, JsonResponse>
where
    B: Body<Data = Bytes>,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    if let Some(size) = declared_length(&req) {
        if size > max_body_size {
            logger::log_error(&format!(
                "Request body too large: {size} bytes (max: {max_body_size})"
            ));
            return Err(http::build_413_response(max_body_size));
        }
    }

    let limit = usize::try_from(max_body_size).unwrap_or(usize::MAX);
    match Limited::new(req.into_body(), limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            logger::log_error(&format!("Request body exceeded {max_body_size} bytes"));
            Err(http::build_413_response(max_body_size))
        }
        Err(e) => {
            logger::log_warning(&format!("Failed to read request body: {e}"));
            Err(http::error_response(
                StatusCode::BAD_REQUEST,
                INVALID_REQUEST,
                "failed to read request body",
            ))
        }
    }
}

fn declared_length<B>(req: &Request<B>) -> Option<u64> {
    let value = req.headers().get(CONTENT_LENGTH)?;
    match value.to_str().ok().and_then(|s| s.parse::<u64>().ok()) {
        Some(size) => Some(size),
        None => {
            logger::log_warning(&format!(
                "Invalid Content-Length value: {value:?}, skipping size check"
            ));
            None
        }
    }
}

/// Add `Server` and CORS headers to every response
fn decorate(response: &mut JsonResponse, state: &AppState) {
    let headers = response.headers_mut();
    if let Ok(name) = HeaderValue::from_str(&state.config.http.server_name) {
        headers.insert(SERVER, name);
    }
    if state.config.http.enable_cors {
        headers
            .entry("Access-Control-Allow-Origin")
            .or_insert(HeaderValue::from_static("*"));
    }
}

fn access_entry<B>(req: &Request<B>, peer_addr: SocketAddr) -> AccessLogEntry {
    let header = |name: HeaderName| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    };

    let mut entry = AccessLogEntry::new(
        peer_addr.ip().to_string(),
        req.method().to_string(),
        req.uri().path().to_string(),
    );
    entry.query = req.uri().query().map(ToString::to_string);
    entry.http_version = format!("{:?}", req.version())
        .trim_start_matches("HTTP/")
        .to_string();
    entry.referer = header(REFERER);
    entry.user_agent = header(USER_AGENT);
    entry
}
