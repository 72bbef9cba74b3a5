//! API server: migrates from a per-node DaemonSet to a replicated Deployment
//!
//! Versions `[3.10.0, 3.11.0)` run the DaemonSet `apiserver`, versions
//! `[3.11.0, 3.12.0)` run the Deployment `openshift-apiserver`. Both share the
//! namespace, the service account and the auth delegator binding. Service `api`
//! selects the pods of whichever topology serves traffic.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use tracing::{debug, instrument};

use super::assets::ApiServerAssets;
use super::{config_map, customize_pod_template, effective_config, record};
use crate::controller::apply::{
    apply_cluster_role_binding, apply_config_map, apply_daemon_set, apply_deployment,
    apply_namespace, apply_service, apply_service_account, delete_namespace, delete_object,
};
use crate::controller::availability::{
    daemon_set_availability, deployment_availability, Observed, DAEMON_SETS, DEPLOYMENTS,
};
use crate::controller::managed::ObjectKind;
use crate::controller::migration::{
    parse_version, sync_staged, Side, StagedMigration, StagedTopology, TopologySync,
    VersionRange,
};
use crate::controller::reconciler::{ManagedService, SyncReport};
use crate::controller::store::{ObjectKey, Stores};
use crate::crd::{
    ApiServerOperatorConfig, ApiServerOperatorConfigSpec, OperatorSpec, OperatorStatus,
    VersionAvailability,
};
use crate::error::{Error, Result};

pub const NAMESPACE: &str = "openshift-apiserver";
pub const SERVICE_NAME: &str = "api";
pub const CLUSTER_ROLE_BINDING_NAME: &str = "system:openshift:apiserver-auth-delegator";
pub const CONTAINER_NAME: &str = "apiserver";
pub const CONFIG_KEY: &str = "config.yaml";

pub const SOURCE_DAEMON_SET: &str = "apiserver";
pub const SOURCE_CONFIG_MAP: &str = "apiserver-config";
pub const TARGET_DEPLOYMENT: &str = "openshift-apiserver";
pub const TARGET_CONFIG_MAP: &str = "openshift-apiserver-config";

const SOURCE_MIN: &str = "3.10.0";
const SOURCE_MAX: &str = "3.11.0";
const TARGET_MIN: &str = "3.11.0";
const TARGET_MAX: &str = "3.12.0";

/// Pod labels the `api` service selects for each topology
pub fn entry_selector(side: Side) -> BTreeMap<String, String> {
    let (key, value) = match side {
        Side::Source => ("apiserver", "true"),
        Side::Target => ("app", "openshift-apiserver"),
    };
    BTreeMap::from([(key.to_string(), value.to_string())])
}

fn container_image(daemon_set: DaemonSet) -> Option<String> {
    daemon_set
        .spec?
        .template
        .spec?
        .containers
        .into_iter()
        .find(|c| c.name == CONTAINER_NAME)?
        .image
}

/// The two API server topologies and the objects they share
pub struct ApiServerTopology {
    stores: Stores,
    assets: ApiServerAssets,
    migration: StagedMigration,
}

impl ApiServerTopology {
    fn range(&self, side: Side) -> &VersionRange {
        match side {
            Side::Source => &self.migration.source,
            Side::Target => &self.migration.target,
        }
    }

    fn in_range(&self, side: Side, version: &str) -> bool {
        parse_version(version)
            .map(|v| self.range(side).contains(&v))
            .unwrap_or(false)
    }

    /// Version a side serves: the desired one if it belongs there, else the last applied
    fn side_version(&self, side: Side, spec: &OperatorSpec, status: &OperatorStatus) -> String {
        if self.in_range(side, &spec.version) || status.last_successful_version.is_empty() {
            spec.version.clone()
        } else {
            status.last_successful_version.clone()
        }
    }

    /// Availability previously recorded for a side, wherever it currently lives
    fn previous<'a>(
        &self,
        side: Side,
        status: &'a OperatorStatus,
    ) -> Option<&'a VersionAvailability> {
        [
            status.current_version_availability.as_ref(),
            status.target_version_availability.as_ref(),
        ]
        .into_iter()
        .flatten()
        .find(|a| self.in_range(side, &a.version))
    }

    /// The manifest settings the source workload takes
    ///
    /// While migrating away, the source keeps the image it runs instead of taking
    /// the target image from the manifest.
    async fn source_workload_spec(&self, spec: &OperatorSpec) -> Result<OperatorSpec> {
        let mut workload = spec.clone();
        if !self.in_range(Side::Source, &spec.version) {
            workload.image_pull_spec = self.live_source_image().await?.unwrap_or_default();
        }
        Ok(workload)
    }

    /// Image of the running source container; `None` when the DaemonSet is gone
    async fn live_source_image(&self) -> Result<Option<String>> {
        match self
            .stores
            .daemon_sets
            .get(&ObjectKey::namespaced(NAMESPACE, SOURCE_DAEMON_SET))
            .await
        {
            Ok(daemon_set) => Ok(container_image(daemon_set)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn config_map(&self, side: Side, spec: &ApiServerOperatorConfigSpec) -> Result<ConfigMap> {
        let config = effective_config(
            &self.assets.config,
            &spec.api_server_config,
            &spec.operator,
            |c| &mut c.log_level,
        );
        let name = match side {
            Side::Source => SOURCE_CONFIG_MAP,
            Side::Target => TARGET_CONFIG_MAP,
        };
        config_map(NAMESPACE, name, CONFIG_KEY, &config)
    }

    fn daemon_set(&self, workload: &OperatorSpec) -> DaemonSet {
        let mut daemon_set = self.assets.daemon_set.clone();
        if let Some(ds_spec) = daemon_set.spec.as_mut() {
            customize_pod_template(&mut ds_spec.template, CONTAINER_NAME, workload);
        }
        daemon_set
    }

    fn deployment(&self, spec: &OperatorSpec) -> Deployment {
        let mut deployment = self.assets.deployment.clone();
        if let Some(deployment_spec) = deployment.spec.as_mut() {
            if spec.replicas.is_some() {
                deployment_spec.replicas = spec.replicas;
            }
            customize_pod_template(&mut deployment_spec.template, CONTAINER_NAME, spec);
        }
        deployment
    }

    fn entry_service(&self, side: Side) -> Service {
        let mut service = self.assets.service.clone();
        if let Some(service_spec) = service.spec.as_mut() {
            service_spec.selector = Some(entry_selector(side));
        }
        service
    }

    /// Apply a side's config map, returning whether it changed
    async fn sync_config(
        &self,
        side: Side,
        spec: &ApiServerOperatorConfigSpec,
        errors: &mut Vec<Error>,
    ) -> bool {
        let applied = match self.config_map(side, spec) {
            Ok(required) => apply_config_map(self.stores.config_maps.as_ref(), &required).await,
            Err(e) => Err(e),
        };
        record(errors, "config map", applied)
            .map(|(_, changed)| changed)
            .unwrap_or(false)
    }

    async fn sync_source(
        &self,
        manifest: &ApiServerOperatorConfig,
        status: &OperatorStatus,
    ) -> TopologySync {
        let spec = &manifest.spec;
        let mut errors = Vec::new();
        let config_changed = self.sync_config(Side::Source, spec, &mut errors).await;

        let previous = self.previous(Side::Source, status);
        let expected_generation =
            previous.and_then(|a| a.last_generation(DAEMON_SETS, NAMESPACE, SOURCE_DAEMON_SET));
        let applied = match self.source_workload_spec(&spec.operator).await {
            Ok(workload) => {
                apply_daemon_set(
                    self.stores.daemon_sets.as_ref(),
                    &self.daemon_set(&workload),
                    expected_generation,
                    config_changed,
                )
                .await
            }
            Err(e) => Err(e),
        };
        let applied = record(&mut errors, "daemon set", applied);
        let changed = applied.as_ref().is_some_and(|(_, changed)| *changed);
        let live = match applied {
            Some(_) => None,
            None => self
                .stores
                .daemon_sets
                .get(&ObjectKey::namespaced(NAMESPACE, SOURCE_DAEMON_SET))
                .await
                .ok(),
        };
        let observed = match &applied {
            Some((daemon_set, _)) => Observed::Applied(daemon_set),
            None => live.as_ref().into(),
        };

        let availability = daemon_set_availability(
            &self.side_version(Side::Source, &spec.operator, status),
            observed,
            &errors,
            previous,
        );
        TopologySync {
            changed: changed || config_changed,
            errors,
            availability,
        }
    }

    async fn sync_target(
        &self,
        manifest: &ApiServerOperatorConfig,
        status: &OperatorStatus,
    ) -> TopologySync {
        let spec = &manifest.spec;
        let mut errors = Vec::new();
        let config_changed = self.sync_config(Side::Target, spec, &mut errors).await;

        let previous = self.previous(Side::Target, status);
        let expected_generation =
            previous.and_then(|a| a.last_generation(DEPLOYMENTS, NAMESPACE, TARGET_DEPLOYMENT));
        let applied = apply_deployment(
            self.stores.deployments.as_ref(),
            &self.deployment(&spec.operator),
            expected_generation,
            config_changed,
        )
        .await;
        let applied = record(&mut errors, "deployment", applied);
        let changed = applied.as_ref().is_some_and(|(_, changed)| *changed);
        let live = match applied {
            Some(_) => None,
            None => self
                .stores
                .deployments
                .get(&ObjectKey::namespaced(NAMESPACE, TARGET_DEPLOYMENT))
                .await
                .ok(),
        };
        let observed = match &applied {
            Some((deployment, _)) => Observed::Applied(deployment),
            None => live.as_ref().into(),
        };

        let availability = deployment_availability(
            &self.side_version(Side::Target, &spec.operator, status),
            observed,
            &errors,
            previous,
        );
        TopologySync {
            changed: changed || config_changed,
            errors,
            availability,
        }
    }
}

#[async_trait]
impl StagedTopology<ApiServerOperatorConfig> for ApiServerTopology {
    async fn sync_shared(&self, _manifest: &ApiServerOperatorConfig) -> Vec<Error> {
        let stores = &self.stores;
        let mut errors = Vec::new();
        record(
            &mut errors,
            "namespace",
            apply_namespace(stores.namespaces.as_ref(), &self.assets.namespace).await,
        );
        record(
            &mut errors,
            "service account",
            apply_service_account(stores.service_accounts.as_ref(), &self.assets.service_account)
                .await,
        );
        record(
            &mut errors,
            "cluster role binding",
            apply_cluster_role_binding(
                stores.cluster_role_bindings.as_ref(),
                &self.assets.cluster_role_binding,
            )
            .await,
        );
        errors
    }

    #[instrument(skip_all, fields(side = %side))]
    async fn sync(
        &self,
        side: Side,
        manifest: &ApiServerOperatorConfig,
        status: &OperatorStatus,
    ) -> TopologySync {
        match side {
            Side::Source => self.sync_source(manifest, status).await,
            Side::Target => self.sync_target(manifest, status).await,
        }
    }

    async fn route_to(&self, side: Side, _manifest: &ApiServerOperatorConfig) -> Result<bool> {
        let (_, changed) =
            apply_service(self.stores.services.as_ref(), &self.entry_service(side)).await?;
        if changed {
            debug!("Service {} now selects the {} topology", SERVICE_NAME, side);
        }
        Ok(changed)
    }

    async fn retire(&self, side: Side, _manifest: &ApiServerOperatorConfig) -> Result<()> {
        let objects = match side {
            Side::Source => [
                (ObjectKind::DaemonSet, SOURCE_DAEMON_SET),
                (ObjectKind::ConfigMap, SOURCE_CONFIG_MAP),
            ],
            Side::Target => [
                (ObjectKind::Deployment, TARGET_DEPLOYMENT),
                (ObjectKind::ConfigMap, TARGET_CONFIG_MAP),
            ],
        };
        for (kind, name) in objects {
            self.stores
                .delete(kind, &ObjectKey::namespaced(NAMESPACE, name))
                .await?;
        }
        Ok(())
    }
}

pub struct ApiServerService {
    migration: StagedMigration,
    topology: ApiServerTopology,
}

impl ApiServerService {
    pub fn new(stores: Stores) -> Result<Self> {
        let migration = StagedMigration {
            source: VersionRange::new(SOURCE_MIN, SOURCE_MAX)?,
            target: VersionRange::new(TARGET_MIN, TARGET_MAX)?,
        };
        Ok(Self {
            topology: ApiServerTopology {
                stores,
                assets: ApiServerAssets::load()?,
                migration: migration.clone(),
            },
            migration,
        })
    }

    pub fn topology(&self) -> &ApiServerTopology {
        &self.topology
    }
}

#[async_trait]
impl ManagedService for ApiServerService {
    type Manifest = ApiServerOperatorConfig;

    fn name(&self) -> &str {
        "apiserver"
    }

    async fn sync(
        &self,
        manifest: &ApiServerOperatorConfig,
        status: &mut OperatorStatus,
    ) -> SyncReport {
        sync_staged(
            &self.migration,
            &self.topology,
            manifest,
            &manifest.spec.operator.version,
            status,
        )
        .await
    }

    async fn remove(&self, _manifest: &ApiServerOperatorConfig) -> Result<()> {
        let stores = &self.topology.stores;
        let mut errors = Vec::new();
        if let Err(e) = delete_namespace(stores.namespaces.as_ref(), NAMESPACE).await {
            errors.push(e);
        }
        if let Err(e) = delete_object(
            stores.cluster_role_bindings.as_ref(),
            &ObjectKey::cluster(CLUSTER_ROLE_BINDING_NAME),
        )
        .await
        {
            errors.push(e);
        }
        Error::aggregate(errors)
    }
}
