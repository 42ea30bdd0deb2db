//! `/run` request handler
//!
//! `Received -> Validated -> Processed -> Responded`. Invalid input and
//! processing failures short-circuit to an error response. Nothing is kept
//! between calls, so one handler serves all connections concurrently.

use futures::FutureExt;
use hyper::StatusCode;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use crate::error::RunError;
use crate::http::{self, JsonResponse};
use crate::logger;
use crate::processor::{AddressProcessor, AddressValidator, MaxLength, ProcessOutcome};

/// Validated `/run` payload; the address is always trimmed and non-empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    address: String,
}

impl RunRequest {
    pub fn new(address: &str) -> Result<Self, RunError> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(RunError::Validation(
                "`address` must not be empty".to_string(),
            ));
        }
        Ok(Self {
            address: trimmed.to_string(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Parse and validate a raw JSON body. Unknown fields are ignored.
    pub fn parse(body: &[u8]) -> Result<Self, RunError> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| RunError::Validation(format!("request body is not valid JSON: {e}")))?;

        let serde_json::Value::Object(mut fields) = value else {
            return Err(RunError::Validation(
                "request body must be a JSON object".to_string(),
            ));
        };

        match fields.remove("address") {
            None => Err(RunError::Validation(
                "missing required field `address`".to_string(),
            )),
            Some(serde_json::Value::String(address)) => Self::new(&address),
            Some(_) => Err(RunError::Validation(
                "`address` must be a string".to_string(),
            )),
        }
    }
}

/// Validates requests and delegates them to the injected processor
#[derive(Clone)]
pub struct RunHandler {
    processor: Arc<dyn AddressProcessor>,
    validator: Arc<dyn AddressValidator>,
    deadline: Option<Duration>,
}

impl RunHandler {
    pub fn new(processor: Arc<dyn AddressProcessor>) -> Self {
        Self {
            processor,
            validator: Arc::new(|_: &str| -> Result<(), String> { Ok(()) }),
            deadline: None,
        }
    }

    /// Build from `[run]` settings
    pub fn from_config(processor: Arc<dyn AddressProcessor>, run: &crate::config::RunConfig) -> Self {
        Self::new(processor)
            .with_validator(Arc::new(MaxLength(run.max_address_len)))
            .with_deadline(run.deadline_secs.map(Duration::from_secs))
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn AddressValidator>) -> Self {
        self.validator = validator;
        self
    }

    #[must_use]
    pub const fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run one validated request through the processor, exactly once
    pub async fn handle(&self, request: RunRequest) -> Result<ProcessOutcome, RunError> {
        self.validator
            .validate(&request.address)
            .map_err(RunError::Validation)?;

        // a panic in the processor surfaces as an internal error
        let call = AssertUnwindSafe(self.processor.process(&request.address)).catch_unwind();

        let result = match self.deadline {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| RunError::DeadlineExceeded(limit))?,
            None => call.await,
        };

        match result {
            Ok(outcome) => outcome.map_err(RunError::from),
            Err(panic) => Err(RunError::Internal(panic_message(panic.as_ref()))),
        }
    }

    /// Parse, validate and process a raw body
    pub async fn handle_body(&self, body: &[u8]) -> Result<ProcessOutcome, RunError> {
        let request = RunRequest::parse(body)?;
        self.handle(request).await
    }

    /// Full HTTP mapping: outcome as a `200` JSON body, or the error envelope
    pub async fn respond(&self, body: &[u8]) -> JsonResponse {
        match self.handle_body(body).await {
            Ok(outcome) => http::json_response(StatusCode::OK, &outcome),
            Err(err) => {
                log_run_error(&err);
                http::json_response(err.status(), &err.to_body())
            }
        }
    }
}

fn log_run_error(err: &RunError) {
    match err {
        RunError::Validation(msg) => tracing::debug!(code = err.code(), "rejected /run: {msg}"),
        RunError::Processing(e) => {
            tracing::warn!(code = err.code(), cause = ?e.cause, "processing failed: {}", e.message);
        }
        RunError::DeadlineExceeded(_) | RunError::Internal(_) => logger::log_error(&err.to_string()),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("processor panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("processor panicked: {s}")
    } else {
        "processor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::ProcessError;
    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use std::sync::Mutex;

    /// Echoes the address back and records every call
    #[derive(Default)]
    struct EchoProcessor {
        calls: Mutex<Vec<String>>,
    }

    impl EchoProcessor {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl AddressProcessor for EchoProcessor {
        async fn process(&self, address: &str) -> Result<ProcessOutcome, ProcessError> {
            self.calls.lock().expect("calls lock").push(address.to_string());
            // yield so concurrent calls interleave
            tokio::task::yield_now().await;
            Ok(serde_json::json!({ "address": address, "status": "done" }))
        }
    }

    struct FailingProcessor(ProcessError);

    #[async_trait]
    impl AddressProcessor for FailingProcessor {
        async fn process(&self, _address: &str) -> Result<ProcessOutcome, ProcessError> {
            Err(self.0.clone())
        }
    }

    struct PanickingProcessor;

    #[async_trait]
    impl AddressProcessor for PanickingProcessor {
        async fn process(&self, _address: &str) -> Result<ProcessOutcome, ProcessError> {
            panic!("secret connection string");
        }
    }

    struct SlowProcessor;

    #[async_trait]
    impl AddressProcessor for SlowProcessor {
        async fn process(&self, _address: &str) -> Result<ProcessOutcome, ProcessError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(serde_json::json!({}))
        }
    }

    async fn respond_json(handler: &RunHandler, body: &str) -> (StatusCode, serde_json::Value) {
        let resp = handler.respond(body.as_bytes()).await;
        let status = resp.status();
        let bytes = resp.into_body().collect().await.expect("body").to_bytes();
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[test]
    fn test_parse_accepts_and_trims() {
        let req = RunRequest::parse(br#"{"address": "  10.0.0.5 ", "extra": 1}"#).expect("valid");
        assert_eq!(req.address(), "10.0.0.5");
    }

    #[test]
    fn test_new_trims_and_rejects_blank() {
        assert_eq!(RunRequest::new(" a ").expect("valid").address(), "a");
        assert!(matches!(
            RunRequest::new("  \t"),
            Err(RunError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_rejections() {
        let cases: &[&[u8]] = &[
            b"{}",
            br#"{"addr": "x"}"#,
            br#"{"address": ""}"#,
            br#"{"address": "   "}"#,
            br#"{"address": 123}"#,
            br#"{"address": null}"#,
            br#"{"address": ["a"]}"#,
            br#"["address"]"#,
            b"not json",
            b"",
        ];
        for body in cases {
            let err = RunRequest::parse(body).expect_err("should reject");
            assert!(
                matches!(err, RunError::Validation(_)),
                "{:?} gave {err:?}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[tokio::test]
    async fn test_valid_address_returns_outcome() {
        let processor = Arc::new(EchoProcessor::default());
        let handler = RunHandler::new(processor.clone());

        let (status, body) = respond_json(&handler, r#"{"address": "10.0.0.5"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "address": "10.0.0.5", "status": "done" }));
        assert_eq!(processor.calls(), vec!["10.0.0.5".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_requests_never_reach_processor() {
        let processor = Arc::new(EchoProcessor::default());
        let handler = RunHandler::new(processor.clone());

        for body in [
            "{}",
            r#"{"addr": "x"}"#,
            r#"{"address": ""}"#,
            r#"{"address": 123}"#,
        ] {
            let (status, json) = respond_json(&handler, body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {body}");
            assert_eq!(json["error"]["code"], "invalid_request");
            assert!(json["error"]["message"].is_string());
        }
        assert!(processor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_handle_always_sees_trimmed_address() {
        let processor = Arc::new(EchoProcessor::default());
        let handler = RunHandler::new(processor.clone());

        let request = RunRequest::new("  10.0.0.5\n").expect("valid");
        let outcome = handler.handle(request).await.expect("success");
        assert_eq!(outcome["address"], "10.0.0.5");
        assert_eq!(processor.calls(), vec!["10.0.0.5".to_string()]);
    }

    #[tokio::test]
    async fn test_custom_validator_runs_before_processor() {
        let processor = Arc::new(EchoProcessor::default());
        let handler = RunHandler::new(processor.clone()).with_validator(Arc::new(MaxLength(3)));

        let (status, json) = respond_json(&handler, r#"{"address": "abcd"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "invalid_request");
        assert!(processor.calls().is_empty());

        let (status, _) = respond_json(&handler, r#"{"address": "abc"}"#).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_processing_errors_keep_classification() {
        let handler = RunHandler::new(Arc::new(FailingProcessor(ProcessError::client(
            "address_not_found",
            "Invalid address",
        ))));
        let (status, json) = respond_json(&handler, r#"{"address": "nowhere"}"#).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["error"]["code"], "address_not_found");
        assert_eq!(json["error"]["message"], "Invalid address");

        let handler = RunHandler::new(Arc::new(FailingProcessor(ProcessError::server(
            "upstream_error",
            "geocoder unreachable",
        ))));
        let (status, json) = respond_json(&handler, r#"{"address": "x"}"#).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["error"]["code"], "upstream_error");
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let handler = RunHandler::new(Arc::new(PanickingProcessor));
        let (status, json) = respond_json(&handler, r#"{"address": "x"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"]["code"], "internal_error");
        assert!(!json.to_string().contains("secret"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_only_when_configured() {
        let handler =
            RunHandler::new(Arc::new(SlowProcessor)).with_deadline(Some(Duration::from_secs(5)));
        let (status, json) = respond_json(&handler, r#"{"address": "x"}"#).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json["error"]["code"], "deadline_exceeded");

        // without a deadline the slow call completes
        let handler = RunHandler::new(Arc::new(SlowProcessor));
        let (status, _) = respond_json(&handler, r#"{"address": "x"}"#).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_repeated_request_is_handled_identically() {
        let processor = Arc::new(EchoProcessor::default());
        let handler = RunHandler::new(processor.clone());

        let first = respond_json(&handler, r#"{"address": "10.0.0.5"}"#).await;
        let second = respond_json(&handler, r#"{"address": "10.0.0.5"}"#).await;
        assert_eq!(first, second);
        assert_eq!(processor.calls().len(), 2);

        let first = respond_json(&handler, "{}").await;
        let second = respond_json(&handler, "{}").await;
        assert_eq!(first, second);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_are_correlated() {
        let processor = Arc::new(EchoProcessor::default());
        let handler = RunHandler::new(processor.clone());

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let address = format!("10.0.0.{i}");
                    let body = serde_json::json!({ "address": address }).to_string();
                    let outcome = handler.handle_body(body.as_bytes()).await;
                    (address, outcome)
                })
            })
            .collect();

        for joined in futures::future::join_all(tasks).await {
            let (address, outcome) = joined.expect("task");
            let outcome = outcome.expect("success");
            assert_eq!(outcome["address"], address.as_str());
        }
        assert_eq!(processor.calls().len(), 32);
    }
}
