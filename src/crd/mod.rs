//! Custom Resource Definitions for the control-plane operator
//!
//! This module defines the operator configuration resources that declare the
//! desired state of each managed service.

mod api_server;
pub mod types;
mod web_console;

#[cfg(test)]
mod tests;

pub use api_server::{
    ApiServerConfig, ApiServerOperatorConfig, ApiServerOperatorConfigSpec,
};
pub use types::*;
pub use web_console::{
    ClusterInfo, ConsoleConfig, ExtensionsConfig, WebConsoleOperatorConfig,
    WebConsoleOperatorConfigSpec,
};

/// Well-known name of the configuration object every reconciler reads
pub const INSTANCE_NAME: &str = "instance";

/// Access to the operator-owned parts of a configuration resource
pub trait OperatorManifest {
    fn operator_spec(&self) -> &OperatorSpec;

    fn operator_status(&self) -> Option<&OperatorStatus>;

    fn set_operator_status(&mut self, status: OperatorStatus);
}
