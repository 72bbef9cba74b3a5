//! Full reconciles of the managed services against in-memory stores
//!
//! Run with: cargo test --test reconcile_flow

use std::collections::BTreeMap;
use std::sync::Arc;

use control_plane_operator::controller::conditions::{
    find_condition, CONDITION_STATUS_FALSE, CONDITION_STATUS_TRUE, CONDITION_TYPE_AVAILABLE,
};
use control_plane_operator::controller::store::{MemoryStore, StoreOp};
use control_plane_operator::controller::{
    MemoryStores, ObjectKey, ObjectStore, OperatorReconciler, Reconcile,
};
use control_plane_operator::crd::{
    ApiServerOperatorConfig, ApiServerOperatorConfigSpec, ManagementState, OperatorSpec,
    OperatorStatus, WebConsoleOperatorConfig, WebConsoleOperatorConfigSpec, INSTANCE_NAME,
};
use control_plane_operator::services::{
    api_server, web_console, ApiServerService, WebConsoleService,
};
use k8s_openapi::api::apps::v1::{
    DaemonSetStatus, DeploymentStatus, RollingUpdateDaemonSet, RollingUpdateDeployment,
};
use k8s_openapi::api::core::v1::{EnvVar, PodSpec, Probe};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

fn instance_meta() -> ObjectMeta {
    ObjectMeta {
        name: Some(INSTANCE_NAME.to_string()),
        generation: Some(1),
        ..Default::default()
    }
}

fn operator_spec(version: &str, image: &str) -> OperatorSpec {
    OperatorSpec {
        management_state: ManagementState::Managed,
        image_pull_spec: image.to_string(),
        version: version.to_string(),
        ..Default::default()
    }
}

fn status_of<K>(store: &MemoryStore<K>) -> OperatorStatus
where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + serde::Serialize
        + serde::de::DeserializeOwned
        + control_plane_operator::crd::OperatorManifest,
{
    store
        .object(&ObjectKey::cluster(INSTANCE_NAME))
        .and_then(|m| m.operator_status().cloned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Web console
// ---------------------------------------------------------------------------

struct WebConsoleFixture {
    stores: MemoryStores,
    manifests: Arc<MemoryStore<WebConsoleOperatorConfig>>,
    reconciler: OperatorReconciler<WebConsoleService>,
}

fn web_console(state: ManagementState) -> WebConsoleFixture {
    let stores = MemoryStores::default();
    let manifests = Arc::new(MemoryStore::default());
    let mut spec = operator_spec("3.11.0", "quay.io/openshift/origin-web-console:v3.11");
    spec.management_state = state;
    manifests.insert(WebConsoleOperatorConfig {
        metadata: instance_meta(),
        spec: WebConsoleOperatorConfigSpec {
            operator: spec,
            ..Default::default()
        },
        status: None,
    });

    let service = WebConsoleService::new(stores.stores()).unwrap();
    let manifest_store: Arc<dyn ObjectStore<WebConsoleOperatorConfig>> = manifests.clone();
    WebConsoleFixture {
        reconciler: OperatorReconciler::new(service, manifest_store),
        stores,
        manifests,
    }
}

fn console_key(name: &str) -> ObjectKey {
    ObjectKey::namespaced(web_console::NAMESPACE, name)
}

#[tokio::test]
async fn web_console_creates_every_object() {
    let fx = web_console(ManagementState::Managed);

    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    assert!(fx
        .stores
        .namespaces
        .contains(&ObjectKey::cluster(web_console::NAMESPACE)));
    assert!(fx.stores.services.contains(&console_key("webconsole")));
    assert!(fx.stores.service_accounts.contains(&console_key("webconsole")));
    assert!(fx
        .stores
        .config_maps
        .contains(&console_key(web_console::CONFIG_MAP_NAME)));
    assert!(fx
        .stores
        .deployments
        .contains(&console_key(web_console::DEPLOYMENT_NAME)));

    let status = status_of(&fx.manifests);
    assert_eq!(status.last_successful_version, "3.11.0");
    // nothing is ready yet
    assert_eq!(
        find_condition(&status.conditions, CONDITION_TYPE_AVAILABLE)
            .unwrap()
            .status,
        CONDITION_STATUS_FALSE
    );
}

#[tokio::test]
async fn web_console_failing_step_does_not_block_others() {
    let fx = web_console(ManagementState::Managed);
    fx.stores.services.fail(StoreOp::Create, "admission denied");

    let err = fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap_err();
    assert_eq!(err.to_string(), "Store error: admission denied");

    assert!(!fx.stores.services.contains(&console_key("webconsole")));
    assert!(fx.stores.service_accounts.contains(&console_key("webconsole")));
    assert!(fx
        .stores
        .deployments
        .contains(&console_key(web_console::DEPLOYMENT_NAME)));

    let status = status_of(&fx.manifests);
    assert_eq!(
        status.last_unsuccessful_run_errors,
        vec!["Store error: admission denied"]
    );
    assert_eq!(status.last_successful_version, "");

    fx.stores.services.clear_failures();
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();
    assert_eq!(status_of(&fx.manifests).last_successful_version, "3.11.0");
}

#[tokio::test]
async fn web_console_second_reconcile_writes_nothing() {
    let fx = web_console(ManagementState::Managed);

    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();
    let writes = fx.stores.write_count();
    let manifest_writes = fx.manifests.write_count();

    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    assert_eq!(fx.stores.write_count(), writes);
    assert_eq!(fx.manifests.write_count(), manifest_writes);
}

/// Fill in the probe fields the API server defaults when a template omits them
fn default_probes(pod: &mut PodSpec) {
    let fill = |probe: &mut Option<Probe>| {
        if let Some(probe) = probe.as_mut() {
            probe.timeout_seconds.get_or_insert(1);
            probe.period_seconds.get_or_insert(10);
            probe.success_threshold.get_or_insert(1);
            probe.failure_threshold.get_or_insert(3);
        }
    };
    for container in &mut pod.containers {
        fill(&mut container.readiness_probe);
        fill(&mut container.liveness_probe);
        container.termination_message_policy = Some("File".to_string());
    }
    for volume in pod.volumes.iter_mut().flatten() {
        if let Some(config_map) = volume.config_map.as_mut() {
            config_map.default_mode.get_or_insert(420);
        }
        if let Some(secret) = volume.secret.as_mut() {
            secret.default_mode.get_or_insert(420);
        }
    }
}

#[tokio::test]
async fn web_console_server_defaults_cause_no_writes() {
    let fx = web_console(ManagementState::Managed);
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    fx.stores
        .deployments
        .modify(&console_key(web_console::DEPLOYMENT_NAME), |d| {
            let spec = d.spec.as_mut().unwrap();
            if let Some(rolling) = spec
                .strategy
                .as_mut()
                .and_then(|s| s.rolling_update.as_mut())
            {
                rolling.max_surge = Some(IntOrString::String("25%".to_string()));
            }
            spec.revision_history_limit = Some(10);
            spec.progress_deadline_seconds = Some(600);
            default_probes(spec.template.spec.as_mut().unwrap());
        });
    let writes = fx.stores.deployments.write_count();

    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    assert_eq!(fx.stores.deployments.write_count(), writes);
}

#[tokio::test]
async fn web_console_outside_edit_reverted_after_failed_rewrite() {
    let fx = web_console(ManagementState::Managed);
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    let key = console_key(web_console::DEPLOYMENT_NAME);
    fx.stores.deployments.modify(&key, |d| {
        let container = &mut d.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0];
        container.env = Some(vec![EnvVar {
            name: "INJECTED".to_string(),
            value: Some("1".to_string()),
            ..Default::default()
        }]);
        d.metadata.generation = d.metadata.generation.map(|g| g + 1);
    });

    fx.stores.deployments.fail(StoreOp::Update, "conflict");
    assert!(fx.reconciler.reconcile(INSTANCE_NAME).await.is_err());
    fx.stores.deployments.clear_failures();
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    let deployment = fx.stores.deployments.object(&key).unwrap();
    let env = deployment.spec.unwrap().template.spec.unwrap().containers[0]
        .env
        .clone();
    assert!(env.unwrap_or_default().iter().all(|e| e.name != "INJECTED"));
}

#[tokio::test]
async fn web_console_reports_ready_replicas() {
    let fx = web_console(ManagementState::Managed);
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    fx.stores
        .deployments
        .modify(&console_key(web_console::DEPLOYMENT_NAME), |d| {
            d.status = Some(DeploymentStatus {
                ready_replicas: Some(1),
                updated_replicas: Some(1),
                ..Default::default()
            });
        });
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    let status = status_of(&fx.manifests);
    assert_eq!(
        status.current_version_availability.unwrap().ready_replicas,
        1
    );
    assert_eq!(
        find_condition(&status.conditions, CONDITION_TYPE_AVAILABLE)
            .unwrap()
            .status,
        CONDITION_STATUS_TRUE
    );
}

#[tokio::test]
async fn web_console_config_change_forces_rollout() {
    let fx = web_console(ManagementState::Managed);
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    fx.manifests.modify(&ObjectKey::cluster(INSTANCE_NAME), |m| {
        m.spec.web_console_config.log_level = Some(5);
    });
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    let deployment = fx
        .stores
        .deployments
        .object(&console_key(web_console::DEPLOYMENT_NAME))
        .unwrap();
    let annotations = deployment
        .spec
        .unwrap()
        .template
        .metadata
        .unwrap()
        .annotations
        .unwrap_or_default();
    assert!(annotations.contains_key(control_plane_operator::controller::apply::FORCE_ROLLOUT_ANNOTATION));
}

#[tokio::test]
async fn web_console_unmanaged_writes_nothing() {
    let fx = web_console(ManagementState::Unmanaged);

    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    assert_eq!(fx.stores.write_count(), 0);
    assert_eq!(fx.manifests.write_count(), 0);
}

#[tokio::test]
async fn web_console_removed_deletes_namespace() {
    let fx = web_console(ManagementState::Managed);
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    fx.manifests.modify(&ObjectKey::cluster(INSTANCE_NAME), |m| {
        m.spec.operator.management_state = ManagementState::Removed;
    });
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    assert!(!fx
        .stores
        .namespaces
        .contains(&ObjectKey::cluster(web_console::NAMESPACE)));
    assert_eq!(status_of(&fx.manifests), OperatorStatus::default());

    // the namespace is already gone
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();
}

// ---------------------------------------------------------------------------
// API server migration
// ---------------------------------------------------------------------------

struct ApiServerFixture {
    stores: MemoryStores,
    manifests: Arc<MemoryStore<ApiServerOperatorConfig>>,
    reconciler: OperatorReconciler<ApiServerService>,
}

fn api_server_fixture(version: &str) -> ApiServerFixture {
    let stores = MemoryStores::default();
    let manifests = Arc::new(MemoryStore::default());
    manifests.insert(ApiServerOperatorConfig {
        metadata: instance_meta(),
        spec: ApiServerOperatorConfigSpec {
            operator: operator_spec(version, &hypershift(version)),
            ..Default::default()
        },
        status: None,
    });

    let service = ApiServerService::new(stores.stores()).unwrap();
    let manifest_store: Arc<dyn ObjectStore<ApiServerOperatorConfig>> = manifests.clone();
    ApiServerFixture {
        reconciler: OperatorReconciler::new(service, manifest_store),
        stores,
        manifests,
    }
}

fn hypershift(version: &str) -> String {
    format!("quay.io/openshift/origin-hypershift:v{version}")
}

fn apiserver_key(name: &str) -> ObjectKey {
    ObjectKey::namespaced(api_server::NAMESPACE, name)
}

fn entry_selector(stores: &MemoryStores) -> BTreeMap<String, String> {
    stores
        .services
        .object(&apiserver_key(api_server::SERVICE_NAME))
        .and_then(|s| s.spec)
        .and_then(|s| s.selector)
        .unwrap_or_default()
}

fn set_version(fx: &ApiServerFixture, version: &str) {
    fx.manifests.modify(&ObjectKey::cluster(INSTANCE_NAME), |m| {
        m.spec.operator.version = version.to_string();
        m.spec.operator.image_pull_spec = hypershift(version);
    });
}

fn set_target_ready(fx: &ApiServerFixture, ready: i32) {
    fx.stores
        .deployments
        .modify(&apiserver_key(api_server::TARGET_DEPLOYMENT), |d| {
            d.status = Some(DeploymentStatus {
                ready_replicas: Some(ready),
                updated_replicas: Some(ready),
                ..Default::default()
            });
        });
}

#[tokio::test]
async fn api_server_runs_source_topology() {
    let fx = api_server_fixture("3.10.0");

    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    assert!(fx
        .stores
        .daemon_sets
        .contains(&apiserver_key(api_server::SOURCE_DAEMON_SET)));
    assert!(fx
        .stores
        .cluster_role_bindings
        .contains(&ObjectKey::cluster(api_server::CLUSTER_ROLE_BINDING_NAME)));
    assert!(!fx
        .stores
        .deployments
        .contains(&apiserver_key(api_server::TARGET_DEPLOYMENT)));
    assert_eq!(entry_selector(&fx.stores)["apiserver"], "true");

    let status = status_of(&fx.manifests);
    assert_eq!(status.last_successful_version, "3.10.0");
    assert!(status.target_version_availability.is_none());
}

#[tokio::test]
async fn api_server_cut_over_waits_for_ready_target() {
    let fx = api_server_fixture("3.10.0");
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();
    fx.stores
        .daemon_sets
        .modify(&apiserver_key(api_server::SOURCE_DAEMON_SET), |d| {
            d.status = Some(DaemonSetStatus {
                number_available: Some(3),
                updated_number_scheduled: Some(3),
                ..Default::default()
            });
        });

    set_version(&fx, "3.11.0");

    // first pass creates the target and yields
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();
    assert!(fx
        .stores
        .deployments
        .contains(&apiserver_key(api_server::TARGET_DEPLOYMENT)));

    // target converged but not ready
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    assert!(fx
        .stores
        .daemon_sets
        .contains(&apiserver_key(api_server::SOURCE_DAEMON_SET)));
    assert_eq!(entry_selector(&fx.stores)["apiserver"], "true");
    let status = status_of(&fx.manifests);
    assert_eq!(status.last_successful_version, "3.10.0");
    assert_eq!(
        status.current_version_availability.unwrap().ready_replicas,
        3
    );
    assert_eq!(status.target_version_availability.unwrap().version, "3.11.0");

    // the source keeps its own image while migrating
    let daemon_set = fx
        .stores
        .daemon_sets
        .object(&apiserver_key(api_server::SOURCE_DAEMON_SET))
        .unwrap();
    assert_eq!(
        daemon_set.spec.unwrap().template.spec.unwrap().containers[0]
            .image
            .as_deref(),
        Some(hypershift("3.10.0").as_str())
    );
}

#[tokio::test]
async fn api_server_cut_over_completes_once_target_is_ready() {
    let fx = api_server_fixture("3.10.0");
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();
    set_version(&fx, "3.11.0");
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    set_target_ready(&fx, 1);
    let target_writes = fx.stores.deployments.write_count();
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    // target untouched, traffic moved, source gone
    assert_eq!(fx.stores.deployments.write_count(), target_writes);
    let selector = entry_selector(&fx.stores);
    assert_eq!(selector.len(), 1);
    assert_eq!(selector["app"], "openshift-apiserver");
    assert!(!fx
        .stores
        .daemon_sets
        .contains(&apiserver_key(api_server::SOURCE_DAEMON_SET)));
    assert!(!fx
        .stores
        .config_maps
        .contains(&apiserver_key(api_server::SOURCE_CONFIG_MAP)));

    let status = status_of(&fx.manifests);
    assert_eq!(status.last_successful_version, "3.11.0");
    assert_eq!(status.current_version_availability.unwrap().version, "3.11.0");
    assert!(status.target_version_availability.is_none());

    // from now on only the target topology is synced
    let writes = fx.stores.write_count();
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();
    assert_eq!(fx.stores.write_count(), writes);
}

#[tokio::test]
async fn api_server_server_defaults_cause_no_writes() {
    let fx = api_server_fixture("3.10.0");
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    fx.stores
        .daemon_sets
        .modify(&apiserver_key(api_server::SOURCE_DAEMON_SET), |d| {
            let spec = d.spec.as_mut().unwrap();
            if let Some(strategy) = spec.update_strategy.as_mut() {
                strategy.rolling_update = Some(RollingUpdateDaemonSet {
                    max_unavailable: Some(IntOrString::Int(1)),
                    max_surge: Some(IntOrString::Int(0)),
                });
            }
            spec.revision_history_limit = Some(10);
            default_probes(spec.template.spec.as_mut().unwrap());
        });
    let writes = fx.stores.write_count();

    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    assert_eq!(fx.stores.write_count(), writes);
}

#[tokio::test]
async fn api_server_target_defaults_cause_no_writes() {
    let fx = api_server_fixture("3.11.0");
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    fx.stores
        .deployments
        .modify(&apiserver_key(api_server::TARGET_DEPLOYMENT), |d| {
            let spec = d.spec.as_mut().unwrap();
            if let Some(strategy) = spec.strategy.as_mut() {
                strategy.rolling_update = Some(RollingUpdateDeployment {
                    max_unavailable: Some(IntOrString::String("25%".to_string())),
                    max_surge: Some(IntOrString::String("25%".to_string())),
                });
            }
            default_probes(spec.template.spec.as_mut().unwrap());
        });
    let writes = fx.stores.write_count();

    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    assert_eq!(fx.stores.write_count(), writes);
}

#[tokio::test]
async fn api_server_source_read_error_keeps_source_image() {
    let fx = api_server_fixture("3.10.0");
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();
    set_version(&fx, "3.11.0");
    fx.stores.daemon_sets.fail(StoreOp::Get, "connection reset");

    assert!(fx.reconciler.reconcile(INSTANCE_NAME).await.is_err());

    let status = status_of(&fx.manifests);
    assert!(status
        .last_unsuccessful_run_errors
        .iter()
        .any(|e| e.contains("connection reset")));
    assert_eq!(status.last_successful_version, "3.10.0");
    assert_eq!(entry_selector(&fx.stores)["apiserver"], "true");
    let daemon_set = fx
        .stores
        .daemon_sets
        .object(&apiserver_key(api_server::SOURCE_DAEMON_SET))
        .unwrap();
    assert_eq!(
        daemon_set.spec.unwrap().template.spec.unwrap().containers[0]
            .image
            .as_deref(),
        Some(hypershift("3.10.0").as_str())
    );
}

#[tokio::test]
async fn api_server_cut_over_blocked_by_target_error() {
    let fx = api_server_fixture("3.10.0");
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();
    set_version(&fx, "3.11.0");
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();
    set_target_ready(&fx, 2);

    fx.manifests.modify(&ObjectKey::cluster(INSTANCE_NAME), |m| {
        m.spec.operator.replicas = Some(5);
    });
    fx.stores.deployments.fail(StoreOp::Update, "quota exceeded");

    assert!(fx.reconciler.reconcile(INSTANCE_NAME).await.is_err());
    assert!(fx
        .stores
        .daemon_sets
        .contains(&apiserver_key(api_server::SOURCE_DAEMON_SET)));
    assert_eq!(entry_selector(&fx.stores)["apiserver"], "true");
    assert_eq!(status_of(&fx.manifests).last_successful_version, "3.10.0");
}

#[tokio::test]
async fn api_server_downgrade_is_unrecognized() {
    let fx = api_server_fixture("3.11.0");
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    set_version(&fx, "3.10.0");
    let writes = fx.stores.write_count();
    let err = fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap_err();

    assert!(err.to_string().contains("unrecognized state"));
    assert_eq!(fx.stores.write_count(), writes);
    let status = status_of(&fx.manifests);
    assert_eq!(status.last_successful_version, "3.11.0");
    assert_eq!(status.last_unsuccessful_run_errors.len(), 1);
}

#[tokio::test]
async fn api_server_removed_deletes_namespace_and_binding() {
    let fx = api_server_fixture("3.11.0");
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    fx.manifests.modify(&ObjectKey::cluster(INSTANCE_NAME), |m| {
        m.spec.operator.management_state = ManagementState::Removed;
    });
    fx.reconciler.reconcile(INSTANCE_NAME).await.unwrap();

    assert!(!fx
        .stores
        .namespaces
        .contains(&ObjectKey::cluster(api_server::NAMESPACE)));
    assert!(!fx
        .stores
        .cluster_role_bindings
        .contains(&ObjectKey::cluster(api_server::CLUSTER_ROLE_BINDING_NAME)));
}
