//! Control-plane operator: reconcilers for control-plane services
//!
//! This crate drives the web console and the API server toward the state declared
//! in their operator configuration resources, including the staged migration of the
//! API server from a DaemonSet to a Deployment.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod services;

#[cfg(feature = "metrics")]
pub mod rest_api;

pub use crate::error::{Error, Result};
