//! HTTP response building module
//!
//! Every body this service produces is JSON, including 404/405/413.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::error::ErrorBody;
use crate::logger;

pub type JsonResponse = Response<Full<Bytes>>;

/// Build JSON response
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> JsonResponse {
    let json = match serde_json::to_vec(body) {
        Ok(j) => j,
        Err(e) => {
            logger::log_error(&format!("Failed to serialize response: {e}"));
            return raw_json(
                StatusCode::INTERNAL_SERVER_ERROR,
                Bytes::from_static(
                    br#"{"error":{"code":"internal_error","message":"internal server error"}}"#,
                ),
            );
        }
    };

    raw_json(status, Bytes::from(json))
}

/// Build `{"error": {...}}` response
pub fn error_response(status: StatusCode, code: &str, message: &str) -> JsonResponse {
    json_response(status, &ErrorBody::new(code, message))
}

fn raw_json(status: StatusCode, body: Bytes) -> JsonResponse {
    let len = body.len();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Content-Length", len)
        .body(Full::new(body))
        .unwrap_or_else(|e| {
            log_build_error(status.as_str(), &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Build 404 Not Found response
pub fn build_404_response(path: &str) -> JsonResponse {
    error_response(
        StatusCode::NOT_FOUND,
        "not_found",
        &format!("no route for {path}"),
    )
}

/// Build 405 Method Not Allowed response
pub fn build_405_response() -> JsonResponse {
    let mut resp = error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        "method_not_allowed",
        "method not allowed",
    );
    resp.headers_mut().insert(
        "Allow",
        hyper::header::HeaderValue::from_static("GET, HEAD, POST, OPTIONS"),
    );
    resp
}

/// Build 413 Payload Too Large response
pub fn build_413_response(max_body_size: u64) -> JsonResponse {
    error_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        "payload_too_large",
        &format!("request body exceeds {max_body_size} bytes"),
    )
}

/// Build OPTIONS response (preflight request)
pub fn build_options_response(enable_cors: bool) -> JsonResponse {
    let mut builder = Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Allow", "GET, HEAD, POST, OPTIONS");

    if enable_cors {
        builder = builder
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, HEAD, POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .header("Access-Control-Max-Age", "86400");
    }

    builder.body(Full::new(Bytes::new())).unwrap_or_else(|e| {
        log_build_error("OPTIONS", &e);
        Response::new(Full::new(Bytes::new()))
    })
}

/// Build health check response
pub fn build_health_response(status: &str) -> JsonResponse {
    json_response(StatusCode::OK, &serde_json::json!({ "status": status }))
}

/// Log response build error
fn log_build_error(status: &str, error: &hyper::http::Error) {
    logger::log_error(&format!("Failed to build {status} response: {error}"));
}
