//! ApiServerOperatorConfig Custom Resource Definition
//!
//! The API server moved from a per-node DaemonSet (3.10) to a replicated
//! Deployment (3.11); the reconciler migrates between the two.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{OperatorSpec, OperatorStatus, ServingInfo};
use super::OperatorManifest;

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apiserver.operator.controlplane.io",
    version = "v1alpha1",
    kind = "ApiServerOperatorConfig",
    status = "OperatorStatus",
    shortname = "asoc",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".spec.managementState"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.lastSuccessfulVersion"}"#,
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".status.targetVersionAvailability.version"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerOperatorConfigSpec {
    #[serde(flatten)]
    pub operator: OperatorSpec,

    /// Overrides merged over the default API server configuration
    #[serde(default)]
    pub api_server_config: ApiServerConfig,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serving_info: Option<ServingInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors_allowed_origins: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_enabled: Option<bool>,
}

impl OperatorManifest for ApiServerOperatorConfig {
    fn operator_spec(&self) -> &OperatorSpec {
        &self.spec.operator
    }

    fn operator_status(&self) -> Option<&OperatorStatus> {
        self.status.as_ref()
    }

    fn set_operator_status(&mut self, status: OperatorStatus) {
        self.status = Some(status);
    }
}
