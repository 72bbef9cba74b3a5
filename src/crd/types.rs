//! Shared types for the operator configuration resources
//!
//! Every managed service is driven by a cluster-scoped configuration object named
//! `instance`. The spec half is owned by the cluster administrator, the status half
//! is owned by the reconciler.

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Whether the operator should act on its managed service
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ManagementState {
    /// Drive the service toward the declared state
    #[default]
    #[serde(alias = "Enabled")]
    Managed,
    /// Leave the service alone
    Unmanaged,
    /// Tear the service down
    #[serde(alias = "Disabled")]
    Removed,
}

impl fmt::Display for ManagementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagementState::Managed => write!(f, "Managed"),
            ManagementState::Unmanaged => write!(f, "Unmanaged"),
            ManagementState::Removed => write!(f, "Removed"),
        }
    }
}

/// Fields common to every operator configuration spec
///
/// Optional fields distinguish "not specified" (`None`, existing value kept) from an
/// explicit value, including an explicit zero.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorSpec {
    #[serde(default)]
    pub management_state: ManagementState,

    /// Image of the managed workload, e.g. `quay.io/openshift/origin-web-console:v3.11`
    pub image_pull_spec: String,

    /// Version the managed service should be running
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Verbosity passed to the managed process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<i64>,
}

/// Status written back by the reconciler
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<OperatorCondition>,

    /// Availability of the version that currently serves traffic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version_availability: Option<VersionAvailability>,

    /// Availability of the version being migrated to, only while a migration runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version_availability: Option<VersionAvailability>,

    /// Last spec.version that was fully applied without errors
    #[serde(default)]
    pub last_successful_version: String,

    #[serde(default)]
    pub last_unsuccessful_run_errors: Vec<String>,
}

/// Readiness of one deployed version of the managed service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionAvailability {
    pub version: String,
    #[serde(default)]
    pub updated_replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub generations: Vec<GenerationHistory>,
}

impl VersionAvailability {
    /// Last generation this operator wrote for the given workload
    pub fn last_generation(&self, resource: &str, namespace: &str, name: &str) -> Option<i64> {
        self.generations
            .iter()
            .find(|g| g.resource == resource && g.namespace == namespace && g.name == name)
            .map(|g| g.last_generation)
    }

    /// Record the generation of a workload we just wrote
    pub fn record_generation(&mut self, history: GenerationHistory) {
        match self.generations.iter_mut().find(|g| {
            g.group == history.group
                && g.resource == history.resource
                && g.namespace == history.namespace
                && g.name == history.name
        }) {
            Some(existing) => existing.last_generation = history.last_generation,
            None => self.generations.push(history),
        }
    }
}

/// Generation of a workload as last observed after this operator wrote it
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationHistory {
    pub group: String,
    pub resource: String,
    pub namespace: String,
    pub name: String,
    pub last_generation: i64,
}

/// Operator condition following Kubernetes API conventions
///
/// Conditions are keyed by `type_`; see [`crate::controller::conditions`] for upserts.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCondition {
    /// Type of condition (e.g., "Available", "SyncSuccessful")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the status changed
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

/// TLS serving configuration shared by the managed servers
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServingInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ca: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests_in_flight: Option<i64>,
    /// Replaced as a whole when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub named_certificates: Option<Vec<NamedCertificate>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NamedCertificate {
    #[serde(default)]
    pub names: Vec<String>,
    pub cert_file: String,
    pub key_file: String,
}
