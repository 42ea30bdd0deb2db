//! Request handler module
//!
//! Routing dispatch plus the `/run` and `/plots` handlers.

pub mod plots;
pub mod router;
pub mod run;

// Re-export main entry points
pub use router::handle_request;
pub use run::{RunHandler, RunRequest};
