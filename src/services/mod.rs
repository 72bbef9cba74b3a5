//! The concrete managed services
//!
//! Each service turns its operator manifest into the required objects, applies them
//! step by step and reports availability back into the manifest status.

pub mod api_server;
pub mod assets;
pub mod web_console;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, PodTemplateSpec};
use kube::api::ObjectMeta;
use serde::Serialize;
use tracing::warn;

use crate::controller::merge::MergeFrom;
use crate::crd::{LoggingConfig, OperatorSpec};
use crate::error::{Error, Result};

pub use api_server::ApiServerService;
pub use web_console::WebConsoleService;

/// Keep the value of a step, or record its error and carry on
pub(crate) fn record<T>(errors: &mut Vec<Error>, step: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Step {} failed: {}", step, e);
            errors.push(e);
            None
        }
    }
}

/// Component configuration: defaults, then the manifest log level, then overrides
pub(crate) fn effective_config<C>(
    defaults: &C,
    overrides: &C,
    spec: &OperatorSpec,
    log_level: impl Fn(&mut C) -> &mut Option<i64>,
) -> C
where
    C: MergeFrom + Clone,
{
    // merge results are compared on the config map, not here
    let mut unused = false;
    let mut config = defaults.clone();

    let mut logging = LoggingConfig {
        level: *log_level(&mut config),
    };
    if let Some(required) = &spec.logging {
        logging.merge_from(&mut unused, required);
    }
    *log_level(&mut config) = logging.level;

    config.merge_from(&mut unused, overrides);
    config
}

/// A config map holding `config` as YAML under `key`
pub(crate) fn config_map<C: Serialize>(
    namespace: &str,
    name: &str,
    key: &str,
    config: &C,
) -> Result<ConfigMap> {
    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            key.to_string(),
            serde_yaml::to_string(config)?,
        )])),
        ..Default::default()
    })
}

/// Put the manifest's image and node selector on a pod template
pub(crate) fn customize_pod_template(
    template: &mut PodTemplateSpec,
    container: &str,
    spec: &OperatorSpec,
) {
    let Some(pod) = template.spec.as_mut() else {
        return;
    };
    if !spec.image_pull_spec.is_empty() {
        if let Some(c) = pod.containers.iter_mut().find(|c| c.name == container) {
            c.image = Some(spec.image_pull_spec.clone());
        }
    }
    if let Some(node_selector) = &spec.node_selector {
        pod.node_selector = Some(node_selector.clone());
    }
}
