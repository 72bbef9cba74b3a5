//! HTTP endpoints for scraping and probing the operator
//!
//! Serves `/metrics` in the Prometheus text format and `/healthz` for liveness.

mod server;

pub use server::{router, run_server};
