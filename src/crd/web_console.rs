//! WebConsoleOperatorConfig Custom Resource Definition
//!
//! Declares how the web console should be deployed. The console has a single
//! deployable topology.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{OperatorSpec, OperatorStatus, ServingInfo};
use super::OperatorManifest;

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "webconsole.operator.controlplane.io",
    version = "v1alpha1",
    kind = "WebConsoleOperatorConfig",
    status = "OperatorStatus",
    shortname = "wcoc",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".spec.managementState"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.lastSuccessfulVersion"}"#,
    printcolumn = r#"{"name":"Available","type":"string","jsonPath":".status.conditions[?(@.type=='Available')].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WebConsoleOperatorConfigSpec {
    #[serde(flatten)]
    pub operator: OperatorSpec,

    /// Overrides merged over the default console configuration
    #[serde(default)]
    pub web_console_config: ConsoleConfig,
}

/// Console configuration file contents
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serving_info: Option<ServingInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_info: Option<ClusterInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<BTreeMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<ExtensionsConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_public_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_public_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logout_public_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_public_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging_public_url: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stylesheet_urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, String>>,
}

impl OperatorManifest for WebConsoleOperatorConfig {
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
