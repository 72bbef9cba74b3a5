//! Pod template merge shared by Deployments and DaemonSets

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, HTTPGetAction, PodSpec,
    PodTemplateSpec, Probe, SecretVolumeSource, TCPSocketAction, Volume, VolumeMount,
};

use super::{
    ensure_object_meta, merge_map, merge_named, merge_named_opt, replace_entry, set_i32_if_set,
    set_if_set, set_string_if_set,
};

pub fn ensure_pod_template_spec(
    modified: &mut bool,
    existing: &mut PodTemplateSpec,
    required: &PodTemplateSpec,
) {
    if let Some(required_meta) = &required.metadata {
        let existing_meta = existing.metadata.get_or_insert_with(Default::default);
        ensure_object_meta(modified, existing_meta, required_meta);
    }

    if let Some(required_spec) = &required.spec {
        match existing.spec.as_mut() {
            Some(existing_spec) => ensure_pod_spec(modified, existing_spec, required_spec),
            None => {
                existing.spec = Some(required_spec.clone());
                *modified = true;
            }
        }
    }
}

pub fn ensure_pod_spec(modified: &mut bool, existing: &mut PodSpec, required: &PodSpec) {
    merge_named(
        modified,
        &mut existing.containers,
        &required.containers,
        |c| c.name.clone(),
        ensure_container,
    );
    merge_named_opt(
        modified,
        &mut existing.init_containers,
        &required.init_containers,
        |c| c.name.clone(),
        ensure_container,
    );
    merge_named_opt(
        modified,
        &mut existing.volumes,
        &required.volumes,
        |v| v.name.clone(),
        ensure_volume,
    );

    set_if_set(
        modified,
        &mut existing.service_account_name,
        &required.service_account_name,
    );
    merge_map(modified, &mut existing.node_selector, &required.node_selector);
    set_if_set(
        modified,
        &mut existing.security_context,
        &required.security_context,
    );
    set_if_set(modified, &mut existing.tolerations, &required.tolerations);
    set_if_set(modified, &mut existing.affinity, &required.affinity);
    set_if_set(
        modified,
        &mut existing.priority_class_name,
        &required.priority_class_name,
    );
    set_if_set(
        modified,
        &mut existing.termination_grace_period_seconds,
        &required.termination_grace_period_seconds,
    );
    set_if_set(modified, &mut existing.host_network, &required.host_network);
    set_if_set(modified, &mut existing.dns_policy, &required.dns_policy);
}

pub fn ensure_container(modified: &mut bool, existing: &mut Container, required: &Container) {
    set_string_if_set(modified, &mut existing.name, &required.name);
    set_if_set(modified, &mut existing.image, &required.image);
    set_if_set(
        modified,
        &mut existing.image_pull_policy,
        &required.image_pull_policy,
    );
    set_if_set(modified, &mut existing.working_dir, &required.working_dir);

    // all-or-nothing
    set_if_set(modified, &mut existing.command, &required.command);
    set_if_set(modified, &mut existing.args, &required.args);
    set_if_set(modified, &mut existing.env_from, &required.env_from);
    set_if_set(modified, &mut existing.resources, &required.resources);
    ensure_probe(
        modified,
        &mut existing.liveness_probe,
        &required.liveness_probe,
    );
    ensure_probe(
        modified,
        &mut existing.readiness_probe,
        &required.readiness_probe,
    );
    ensure_probe(modified, &mut existing.startup_probe, &required.startup_probe);
    set_if_set(
        modified,
        &mut existing.security_context,
        &required.security_context,
    );
    set_if_set(
        modified,
        &mut existing.termination_message_policy,
        &required.termination_message_policy,
    );

    merge_env(modified, &mut existing.env, &required.env);
    merge_named_opt(
        modified,
        &mut existing.ports,
        &required.ports,
        port_name,
        ensure_container_port,
    );
    merge_named_opt(
        modified,
        &mut existing.volume_mounts,
        &required.volume_mounts,
        |m| m.name.clone(),
        ensure_volume_mount,
    );
}

/// Probe merge; timings and thresholds the server defaults survive when unset
fn ensure_probe(modified: &mut bool, existing: &mut Option<Probe>, required: &Option<Probe>) {
    let Some(required) = required else {
        return;
    };
    let Some(existing) = existing.as_mut() else {
        *existing = Some(required.clone());
        *modified = true;
        return;
    };

    if probe_handler(existing) != probe_handler(required) {
        existing.exec = required.exec.clone();
        existing.http_get = required.http_get.clone();
        existing.tcp_socket = required.tcp_socket.clone();
        existing.grpc = required.grpc.clone();
        *modified = true;
    } else {
        set_if_set(modified, &mut existing.exec, &required.exec);
        set_if_set(modified, &mut existing.grpc, &required.grpc);
        if let (Some(existing), Some(required)) = (existing.http_get.as_mut(), &required.http_get) {
            ensure_http_get(modified, existing, required);
        }
        if let (Some(existing), Some(required)) =
            (existing.tcp_socket.as_mut(), &required.tcp_socket)
        {
            ensure_tcp_socket(modified, existing, required);
        }
    }

    set_if_set(
        modified,
        &mut existing.initial_delay_seconds,
        &required.initial_delay_seconds,
    );
    set_if_set(modified, &mut existing.timeout_seconds, &required.timeout_seconds);
    set_if_set(modified, &mut existing.period_seconds, &required.period_seconds);
    set_if_set(
        modified,
        &mut existing.success_threshold,
        &required.success_threshold,
    );
    set_if_set(
        modified,
        &mut existing.failure_threshold,
        &required.failure_threshold,
    );
    set_if_set(
        modified,
        &mut existing.termination_grace_period_seconds,
        &required.termination_grace_period_seconds,
    );
}

/// Which handler a probe uses; a probe carries exactly one
fn probe_handler(probe: &Probe) -> &'static str {
    if probe.exec.is_some() {
        "exec"
    } else if probe.http_get.is_some() {
        "httpGet"
    } else if probe.tcp_socket.is_some() {
        "tcpSocket"
    } else if probe.grpc.is_some() {
        "grpc"
    } else {
        ""
    }
}

fn ensure_http_get(modified: &mut bool, existing: &mut HTTPGetAction, required: &HTTPGetAction) {
    replace_entry(modified, &mut existing.port, &required.port);
    set_if_set(modified, &mut existing.path, &required.path);
    set_if_set(modified, &mut existing.scheme, &required.scheme);
    set_if_set(modified, &mut existing.host, &required.host);
    set_if_set(modified, &mut existing.http_headers, &required.http_headers);
}

fn ensure_tcp_socket(
    modified: &mut bool,
    existing: &mut TCPSocketAction,
    required: &TCPSocketAction,
) {
    replace_entry(modified, &mut existing.port, &required.port);
    set_if_set(modified, &mut existing.host, &required.host);
}

/// Which source a volume draws from
fn volume_source(volume: &Volume) -> &'static str {
    if volume.config_map.is_some() {
        "configMap"
    } else if volume.secret.is_some() {
        "secret"
    } else {
        "other"
    }
}

/// Config map and secret volumes keep a server-defaulted `defaultMode`; any
/// other source, or a change of source, replaces the whole entry
fn ensure_volume(modified: &mut bool, existing: &mut Volume, required: &Volume) {
    if volume_source(required) == "other" || volume_source(existing) != volume_source(required) {
        replace_entry(modified, existing, required);
        return;
    }

    if let (Some(existing), Some(required)) = (existing.config_map.as_mut(), &required.config_map) {
        ensure_config_map_volume(modified, existing, required);
    }
    if let (Some(existing), Some(required)) = (existing.secret.as_mut(), &required.secret) {
        ensure_secret_volume(modified, existing, required);
    }
}

fn ensure_config_map_volume(
    modified: &mut bool,
    existing: &mut ConfigMapVolumeSource,
    required: &ConfigMapVolumeSource,
) {
    set_if_set(modified, &mut existing.name, &required.name);
    set_if_set(modified, &mut existing.items, &required.items);
    set_if_set(modified, &mut existing.default_mode, &required.default_mode);
    set_if_set(modified, &mut existing.optional, &required.optional);
}

fn ensure_secret_volume(
    modified: &mut bool,
    existing: &mut SecretVolumeSource,
    required: &SecretVolumeSource,
) {
    set_if_set(modified, &mut existing.secret_name, &required.secret_name);
    set_if_set(modified, &mut existing.items, &required.items);
    set_if_set(modified, &mut existing.default_mode, &required.default_mode);
    set_if_set(modified, &mut existing.optional, &required.optional);
}

/// Env vars are unioned by name; existing-only variables survive
fn merge_env(modified: &mut bool, existing: &mut Option<Vec<EnvVar>>, required: &Option<Vec<EnvVar>>) {
    let Some(required) = required.as_ref().filter(|r| !r.is_empty()) else {
        return;
    };

    let existing = existing.get_or_insert_with(Vec::new);
    for required in required {
        match existing.iter_mut().find(|e| e.name == required.name) {
            Some(existing) => replace_entry(modified, existing, required),
            None => {
                existing.push(required.clone());
                *modified = true;
            }
        }
    }
}

/// Unnamed ports are identified by their number
fn port_name(port: &ContainerPort) -> String {
    port.name
        .clone()
        .unwrap_or_else(|| port.container_port.to_string())
}

fn ensure_container_port(modified: &mut bool, existing: &mut ContainerPort, required: &ContainerPort) {
    set_i32_if_set(modified, &mut existing.container_port, required.container_port);
    set_if_set(modified, &mut existing.name, &required.name);
    set_if_set(modified, &mut existing.protocol, &required.protocol);
    set_if_set(modified, &mut existing.host_port, &required.host_port);
    set_if_set(modified, &mut existing.host_ip, &required.host_ip);
}

fn ensure_volume_mount(modified: &mut bool, existing: &mut VolumeMount, required: &VolumeMount) {
    set_string_if_set(modified, &mut existing.mount_path, &required.mount_path);
    set_if_set(modified, &mut existing.read_only, &required.read_only);
    set_if_set(modified, &mut existing.sub_path, &required.sub_path);
    set_if_set(
        modified,
        &mut existing.mount_propagation,
        &required.mount_propagation,
    );
}
