//! Web console: a single-topology service
//!
//! Objects are applied in order namespace, service, service account, config map,
//! deployment. A failing step does not stop the ones after it.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use tracing::{debug, instrument};

use super::assets::WebConsoleAssets;
use super::{config_map, customize_pod_template, effective_config, record};
use crate::controller::apply::{
    apply_config_map, apply_deployment, apply_namespace, apply_service, apply_service_account,
    delete_namespace,
};
use crate::controller::availability::{deployment_availability, Observed, DEPLOYMENTS};
use crate::controller::reconciler::{ManagedService, SyncReport};
use crate::controller::store::{ObjectKey, Stores};
use crate::crd::{OperatorStatus, WebConsoleOperatorConfig, WebConsoleOperatorConfigSpec};
use crate::error::Result;

pub const NAMESPACE: &str = "openshift-web-console";
pub const DEPLOYMENT_NAME: &str = "webconsole";
pub const CONTAINER_NAME: &str = "webconsole";
pub const CONFIG_MAP_NAME: &str = "webconsole-config";
pub const CONFIG_KEY: &str = "webconsole-config.yaml";

pub struct WebConsoleService {
    stores: Stores,
    assets: WebConsoleAssets,
}

impl WebConsoleService {
    pub fn new(stores: Stores) -> Result<Self> {
        Ok(Self {
            stores,
            assets: WebConsoleAssets::load()?,
        })
    }

    fn config_map(&self, spec: &WebConsoleOperatorConfigSpec) -> Result<ConfigMap> {
        let config = effective_config(
            &self.assets.config,
            &spec.web_console_config,
            &spec.operator,
            |c| &mut c.log_level,
        );
        config_map(NAMESPACE, CONFIG_MAP_NAME, CONFIG_KEY, &config)
    }

    fn deployment(&self, spec: &WebConsoleOperatorConfigSpec) -> Deployment {
        let mut deployment = self.assets.deployment.clone();
        if let Some(deployment_spec) = deployment.spec.as_mut() {
            if spec.operator.replicas.is_some() {
                deployment_spec.replicas = spec.operator.replicas;
            }
            customize_pod_template(&mut deployment_spec.template, CONTAINER_NAME, &spec.operator);
        }
        deployment
    }
}

#[async_trait]
impl ManagedService for WebConsoleService {
    type Manifest = WebConsoleOperatorConfig;

    fn name(&self) -> &str {
        "webconsole"
    }

    #[instrument(skip_all, fields(version = %manifest.spec.operator.version))]
    async fn sync(
        &self,
        manifest: &WebConsoleOperatorConfig,
        status: &mut OperatorStatus,
    ) -> SyncReport {
        let spec = &manifest.spec;
        let stores = &self.stores;
        let mut errors = Vec::new();

        record(
            &mut errors,
            "namespace",
            apply_namespace(stores.namespaces.as_ref(), &self.assets.namespace).await,
        );
        record(
            &mut errors,
            "service",
            apply_service(stores.services.as_ref(), &self.assets.service).await,
        );
        record(
            &mut errors,
            "service account",
            apply_service_account(stores.service_accounts.as_ref(), &self.assets.service_account)
                .await,
        );

        let config_changed = match self.config_map(spec) {
            Ok(required) => record(
                &mut errors,
                "config map",
                apply_config_map(stores.config_maps.as_ref(), &required).await,
            )
            .map(|(_, changed)| changed)
            .unwrap_or(false),
            Err(e) => {
                errors.push(e);
                false
            }
        };
        if config_changed {
            debug!("Console configuration changed, forcing a rollout");
        }

        let previous = status.current_version_availability.as_ref();
        let expected_generation =
            previous.and_then(|a| a.last_generation(DEPLOYMENTS, NAMESPACE, DEPLOYMENT_NAME));
        let applied = record(
            &mut errors,
            "deployment",
            apply_deployment(
                stores.deployments.as_ref(),
                &self.deployment(spec),
                expected_generation,
                config_changed,
            )
            .await,
        )
        .map(|(deployment, _)| deployment);
        // read back for replica counts only; the apply error is already recorded
        let live = match applied {
            Some(_) => None,
            None => stores
                .deployments
                .get(&ObjectKey::namespaced(NAMESPACE, DEPLOYMENT_NAME))
                .await
                .ok(),
        };
        let observed = match &applied {
            Some(deployment) => Observed::Applied(deployment),
            None => live.as_ref().into(),
        };

        let availability =
            deployment_availability(&spec.operator.version, observed, &errors, previous);
        status.current_version_availability = Some(availability);
        status.target_version_availability = None;
        SyncReport::converged(errors)
    }

    async fn remove(&self, _manifest: &WebConsoleOperatorConfig) -> Result<()> {
        delete_namespace(self.stores.namespaces.as_ref(), NAMESPACE).await?;
        Ok(())
    }
}
