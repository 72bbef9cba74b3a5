//! Per-kind merge rules for the managed object kinds

use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, DaemonSetUpdateStrategy, Deployment, DeploymentSpec,
    DeploymentStrategy,
};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, Secret, Service, ServicePort, ServiceSpec, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
};

use super::{
    ensure_object_meta, ensure_pod_template_spec, merge_named, merge_named_opt, replace_entry,
    replace_if_set, set_i32_if_set, set_if_set, set_string_if_set,
};

/// Secret type the API server assumes when none is given
pub const DEFAULT_SECRET_TYPE: &str = "Opaque";

pub fn ensure_namespace(modified: &mut bool, existing: &mut Namespace, required: &Namespace) {
    ensure_object_meta(modified, &mut existing.metadata, &required.metadata);
}

pub fn ensure_service_account(
    modified: &mut bool,
    existing: &mut ServiceAccount,
    required: &ServiceAccount,
) {
    ensure_object_meta(modified, &mut existing.metadata, &required.metadata);
}

/// Service spec merge; `clusterIP` and node ports assigned by the server survive
pub fn ensure_service(modified: &mut bool, existing: &mut Service, required: &Service) {
    ensure_object_meta(modified, &mut existing.metadata, &required.metadata);

    let Some(required_spec) = &required.spec else {
        return;
    };
    let Some(existing_spec) = existing.spec.as_mut() else {
        existing.spec = Some(required_spec.clone());
        *modified = true;
        return;
    };
    ensure_service_spec(modified, existing_spec, required_spec);
}

fn ensure_service_spec(modified: &mut bool, existing: &mut ServiceSpec, required: &ServiceSpec) {
    // replaced, never unioned, so a repointed selector drops the old labels
    set_if_set(modified, &mut existing.selector, &required.selector);
    merge_named_opt(
        modified,
        &mut existing.ports,
        &required.ports,
        service_port_name,
        ensure_service_port,
    );
    set_if_set(modified, &mut existing.type_, &required.type_);
    set_if_set(modified, &mut existing.cluster_ip, &required.cluster_ip);
    set_if_set(
        modified,
        &mut existing.session_affinity,
        &required.session_affinity,
    );
}

fn service_port_name(port: &ServicePort) -> String {
    port.name.clone().unwrap_or_else(|| port.port.to_string())
}

fn ensure_service_port(modified: &mut bool, existing: &mut ServicePort, required: &ServicePort) {
    set_i32_if_set(modified, &mut existing.port, required.port);
    set_if_set(modified, &mut existing.name, &required.name);
    set_if_set(modified, &mut existing.target_port, &required.target_port);
    set_if_set(modified, &mut existing.protocol, &required.protocol);
    set_if_set(modified, &mut existing.node_port, &required.node_port);
    set_if_set(modified, &mut existing.app_protocol, &required.app_protocol);
}

/// Config payloads replace the existing maps wholesale
pub fn ensure_config_map(modified: &mut bool, existing: &mut ConfigMap, required: &ConfigMap) {
    ensure_object_meta(modified, &mut existing.metadata, &required.metadata);
    set_if_set(modified, &mut existing.data, &required.data);
    set_if_set(modified, &mut existing.binary_data, &required.binary_data);
}

/// Secret merge over already-folded data (see `apply_secret`)
pub fn ensure_secret(modified: &mut bool, existing: &mut Secret, required: &Secret) {
    ensure_object_meta(modified, &mut existing.metadata, &required.metadata);
    set_if_set(modified, &mut existing.data, &required.data);

    let required_type = required.type_.as_deref().unwrap_or(DEFAULT_SECRET_TYPE);
    if existing.type_.as_deref().unwrap_or(DEFAULT_SECRET_TYPE) != required_type {
        existing.type_ = Some(required_type.to_string());
        *modified = true;
    }
}

pub fn ensure_deployment(modified: &mut bool, existing: &mut Deployment, required: &Deployment) {
    ensure_object_meta(modified, &mut existing.metadata, &required.metadata);

    let Some(required_spec) = &required.spec else {
        return;
    };
    let Some(existing_spec) = existing.spec.as_mut() else {
        existing.spec = Some(required_spec.clone());
        *modified = true;
        return;
    };
    ensure_deployment_spec(modified, existing_spec, required_spec);
}

fn ensure_deployment_spec(
    modified: &mut bool,
    existing: &mut DeploymentSpec,
    required: &DeploymentSpec,
) {
    set_if_set(modified, &mut existing.replicas, &required.replicas);
    set_if_set(
        modified,
        &mut existing.min_ready_seconds,
        &required.min_ready_seconds,
    );
    set_if_set(
        modified,
        &mut existing.revision_history_limit,
        &required.revision_history_limit,
    );
    set_if_set(
        modified,
        &mut existing.progress_deadline_seconds,
        &required.progress_deadline_seconds,
    );
    set_if_set(modified, &mut existing.paused, &required.paused);
    replace_if_set(modified, &mut existing.selector, &required.selector);
    ensure_deployment_strategy(modified, &mut existing.strategy, &required.strategy);
    ensure_pod_template_spec(modified, &mut existing.template, &required.template);
}

pub fn ensure_daemon_set(modified: &mut bool, existing: &mut DaemonSet, required: &DaemonSet) {
    ensure_object_meta(modified, &mut existing.metadata, &required.metadata);

    let Some(required_spec) = &required.spec else {
        return;
    };
    let Some(existing_spec) = existing.spec.as_mut() else {
        existing.spec = Some(required_spec.clone());
        *modified = true;
        return;
    };
    ensure_daemon_set_spec(modified, existing_spec, required_spec);
}

fn ensure_daemon_set_spec(
    modified: &mut bool,
    existing: &mut DaemonSetSpec,
    required: &DaemonSetSpec,
) {
    set_if_set(
        modified,
        &mut existing.min_ready_seconds,
        &required.min_ready_seconds,
    );
    set_if_set(
        modified,
        &mut existing.revision_history_limit,
        &required.revision_history_limit,
    );
    replace_if_set(modified, &mut existing.selector, &required.selector);
    ensure_daemon_set_update_strategy(
        modified,
        &mut existing.update_strategy,
        &required.update_strategy,
    );
    ensure_pod_template_spec(modified, &mut existing.template, &required.template);
}

/// Rolling update parameters the server defaults survive when unset;
/// switching to `Recreate` drops them
fn ensure_deployment_strategy(
    modified: &mut bool,
    existing: &mut Option<DeploymentStrategy>,
    required: &Option<DeploymentStrategy>,
) {
    let Some(required) = required else {
        return;
    };
    let existing = existing.get_or_insert_with(|| {
        *modified = true;
        DeploymentStrategy::default()
    });

    set_if_set(modified, &mut existing.type_, &required.type_);
    if existing.type_.as_deref() == Some("Recreate") {
        if existing.rolling_update.take().is_some() {
            *modified = true;
        }
        return;
    }
    if let Some(required) = &required.rolling_update {
        let existing = existing.rolling_update.get_or_insert_with(|| {
            *modified = true;
            Default::default()
        });
        set_if_set(modified, &mut existing.max_unavailable, &required.max_unavailable);
        set_if_set(modified, &mut existing.max_surge, &required.max_surge);
    }
}

fn ensure_daemon_set_update_strategy(
    modified: &mut bool,
    existing: &mut Option<DaemonSetUpdateStrategy>,
    required: &Option<DaemonSetUpdateStrategy>,
) {
    let Some(required) = required else {
        return;
    };
    let existing = existing.get_or_insert_with(|| {
        *modified = true;
        DaemonSetUpdateStrategy::default()
    });

    set_if_set(modified, &mut existing.type_, &required.type_);
    if existing.type_.as_deref() == Some("OnDelete") {
        if existing.rolling_update.take().is_some() {
            *modified = true;
        }
        return;
    }
    if let Some(required) = &required.rolling_update {
        let existing = existing.rolling_update.get_or_insert_with(|| {
            *modified = true;
            Default::default()
        });
        set_if_set(modified, &mut existing.max_unavailable, &required.max_unavailable);
        set_if_set(modified, &mut existing.max_surge, &required.max_surge);
    }
}

pub fn ensure_cluster_role_binding(
    modified: &mut bool,
    existing: &mut ClusterRoleBinding,
    required: &ClusterRoleBinding,
) {
    ensure_object_meta(modified, &mut existing.metadata, &required.metadata);
    replace_if_set(modified, &mut existing.role_ref, &required.role_ref);
    set_if_set(modified, &mut existing.subjects, &required.subjects);
}

pub fn ensure_custom_resource_definition(
    modified: &mut bool,
    existing: &mut CustomResourceDefinition,
    required: &CustomResourceDefinition,
) {
    ensure_object_meta(modified, &mut existing.metadata, &required.metadata);
    ensure_custom_resource_definition_spec(modified, &mut existing.spec, &required.spec);
}

/// Only the fields a generated definition carries are compared, so the
/// conversion strategy and names the server fills in do not count as drift
fn ensure_custom_resource_definition_spec(
    modified: &mut bool,
    existing: &mut CustomResourceDefinitionSpec,
    required: &CustomResourceDefinitionSpec,
) {
    set_string_if_set(modified, &mut existing.group, &required.group);
    set_string_if_set(modified, &mut existing.scope, &required.scope);
    ensure_custom_resource_definition_names(modified, &mut existing.names, &required.names);
    if !required.versions.is_empty() {
        merge_named(
            modified,
            &mut existing.versions,
            &required.versions,
            |v| v.name.clone(),
            replace_entry,
        );
    }
    set_if_set(modified, &mut existing.conversion, &required.conversion);
    set_if_set(
        modified,
        &mut existing.preserve_unknown_fields,
        &required.preserve_unknown_fields,
    );
}

fn ensure_custom_resource_definition_names(
    modified: &mut bool,
    existing: &mut CustomResourceDefinitionNames,
    required: &CustomResourceDefinitionNames,
) {
    set_string_if_set(modified, &mut existing.kind, &required.kind);
    set_string_if_set(modified, &mut existing.plural, &required.plural);
    set_if_set(modified, &mut existing.singular, &required.singular);
    set_if_set(modified, &mut existing.list_kind, &required.list_kind);
    set_if_set(modified, &mut existing.short_names, &required.short_names);
    set_if_set(modified, &mut existing.categories, &required.categories);
}
