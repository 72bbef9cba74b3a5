//! Get-or-create-or-update for every managed object kind
//!
//! Each `apply_*` reads the live object, creates it when absent, otherwise runs the
//! kind's merge policy and writes only when the merge reported a change. The
//! returned flag tells the caller whether a write happened.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PodTemplateSpec, Secret, Service, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::ByteString;
use kube::Resource;
use tracing::{debug, info, instrument};

use super::merge::{self, DEFAULT_SECRET_TYPE};
use super::store::{ObjectKey, ObjectStore};
use crate::error::{Error, Result};

/// Pod template annotation bumped to force a new rollout
pub const FORCE_ROLLOUT_ANNOTATION: &str = "operator.controlplane.io/force-rollout";

type EnsureFn<K> = fn(&mut bool, &mut K, &K);

/// The four-state apply shared by every kind
async fn apply_with<K>(
    store: &dyn ObjectStore<K>,
    required: &K,
    ensure: EnsureFn<K>,
) -> Result<(K, bool)>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    let key = ObjectKey::of(required);
    let mut existing = match store.get(&key).await {
        Ok(existing) => existing,
        Err(e) if e.is_not_found() => {
            info!("Creating {} {}", K::kind(&()), key);
            let created = store.create(required).await?;
            return Ok((created, true));
        }
        Err(e) => return Err(e),
    };

    let mut modified = false;
    ensure(&mut modified, &mut existing, required);
    if !modified {
        debug!("{} {} is up to date", K::kind(&()), key);
        return Ok((existing, false));
    }

    info!("Updating {} {}", K::kind(&()), key);
    let updated = store.update(&existing).await?;
    Ok((updated, true))
}

#[instrument(skip_all, fields(name = ?required.metadata.name))]
pub async fn apply_namespace(
    store: &dyn ObjectStore<Namespace>,
    required: &Namespace,
) -> Result<(Namespace, bool)> {
    apply_with(store, required, merge::ensure_namespace).await
}

#[instrument(skip_all, fields(name = ?required.metadata.name, namespace = ?required.metadata.namespace))]
pub async fn apply_service(
    store: &dyn ObjectStore<Service>,
    required: &Service,
) -> Result<(Service, bool)> {
    apply_with(store, required, merge::ensure_service).await
}

#[instrument(skip_all, fields(name = ?required.metadata.name, namespace = ?required.metadata.namespace))]
pub async fn apply_service_account(
    store: &dyn ObjectStore<ServiceAccount>,
    required: &ServiceAccount,
) -> Result<(ServiceAccount, bool)> {
    apply_with(store, required, merge::ensure_service_account).await
}

#[instrument(skip_all, fields(name = ?required.metadata.name, namespace = ?required.metadata.namespace))]
pub async fn apply_config_map(
    store: &dyn ObjectStore<ConfigMap>,
    required: &ConfigMap,
) -> Result<(ConfigMap, bool)> {
    apply_with(store, required, merge::ensure_config_map).await
}

#[instrument(skip_all, fields(name = ?required.metadata.name))]
pub async fn apply_cluster_role_binding(
    store: &dyn ObjectStore<ClusterRoleBinding>,
    required: &ClusterRoleBinding,
) -> Result<(ClusterRoleBinding, bool)> {
    apply_with(store, required, merge::ensure_cluster_role_binding).await
}

#[instrument(skip_all, fields(name = ?required.metadata.name))]
pub async fn apply_custom_resource_definition(
    store: &dyn ObjectStore<CustomResourceDefinition>,
    required: &CustomResourceDefinition,
) -> Result<(CustomResourceDefinition, bool)> {
    apply_with(store, required, merge::ensure_custom_resource_definition).await
}

/// Apply a Secret
///
/// `stringData` is folded into `data` first. The secret type cannot be changed in
/// place, so a type change deletes and re-creates the secret.
#[instrument(skip_all, fields(name = ?required.metadata.name, namespace = ?required.metadata.namespace))]
pub async fn apply_secret(
    store: &dyn ObjectStore<Secret>,
    required: &Secret,
) -> Result<(Secret, bool)> {
    let required = fold_string_data(required)?;
    let key = ObjectKey::of(&required);

    let mut existing = match store.get(&key).await {
        Ok(existing) => existing,
        Err(e) if e.is_not_found() => {
            info!("Creating Secret {}", key);
            return Ok((store.create(&required).await?, true));
        }
        Err(e) => return Err(e),
    };

    if existing.type_.as_deref().unwrap_or(DEFAULT_SECRET_TYPE)
        != required.type_.as_deref().unwrap_or(DEFAULT_SECRET_TYPE)
    {
        info!(
            "Secret {} changed type from {:?} to {:?}, re-creating",
            key, existing.type_, required.type_
        );
        delete_object(store, &key).await?;
        return Ok((store.create(&required).await?, true));
    }

    let mut modified = false;
    merge::ensure_secret(&mut modified, &mut existing, &required);
    if !modified {
        return Ok((existing, false));
    }
    info!("Updating Secret {}", key);
    Ok((store.update(&existing).await?, true))
}

/// Fold `stringData` into `data` and default the type
///
/// A key present in both with different contents is rejected.
pub fn fold_string_data(required: &Secret) -> Result<Secret> {
    let mut folded = required.clone();
    if let Some(string_data) = folded.string_data.take() {
        let data = folded.data.get_or_insert_with(BTreeMap::new);
        for (key, value) in string_data {
            let value = ByteString(value.into_bytes());
            match data.get(&key) {
                Some(existing) if *existing != value => return Err(Error::SecretConflict { key }),
                _ => {
                    data.insert(key, value);
                }
            }
        }
    }
    folded
        .type_
        .get_or_insert_with(|| DEFAULT_SECRET_TYPE.to_string());
    Ok(folded)
}

/// Apply a Deployment
///
/// When `expected_generation` is known and the live generation differs, somebody
/// else changed the workload; its spec is rewritten from `required` even if the
/// merge saw no difference. `force_rollout` stamps the pod template so the pods
/// restart, used when their mounted configuration changed.
#[instrument(skip_all, fields(name = ?required.metadata.name, namespace = ?required.metadata.namespace))]
pub async fn apply_deployment(
    store: &dyn ObjectStore<Deployment>,
    required: &Deployment,
    expected_generation: Option<i64>,
    force_rollout: bool,
) -> Result<(Deployment, bool)> {
    let mut required = required.clone();
    if force_rollout {
        if let Some(spec) = required.spec.as_mut() {
            stamp_force_rollout(&mut spec.template);
        }
    }

    let key = ObjectKey::of(&required);
    let mut existing = match store.get(&key).await {
        Ok(existing) => existing,
        Err(e) if e.is_not_found() => {
            info!("Creating Deployment {}", key);
            return Ok((store.create(&required).await?, true));
        }
        Err(e) => return Err(e),
    };

    let drifted = generation_drifted(existing.metadata.generation, expected_generation);
    let mut modified = false;
    if drifted && required.spec.is_some() {
        info!("Deployment {} was changed outside the operator, rewriting spec", key);
        merge::ensure_object_meta(&mut modified, &mut existing.metadata, &required.metadata);
        existing.spec = required.spec.clone();
    } else {
        merge::ensure_deployment(&mut modified, &mut existing, &required);
        if !modified {
            return Ok((existing, false));
        }
    }

    info!("Updating Deployment {}", key);
    Ok((store.update(&existing).await?, true))
}

/// Apply a DaemonSet; same contract as [`apply_deployment`]
#[instrument(skip_all, fields(name = ?required.metadata.name, namespace = ?required.metadata.namespace))]
pub async fn apply_daemon_set(
    store: &dyn ObjectStore<DaemonSet>,
    required: &DaemonSet,
    expected_generation: Option<i64>,
    force_rollout: bool,
) -> Result<(DaemonSet, bool)> {
    let mut required = required.clone();
    if force_rollout {
        if let Some(spec) = required.spec.as_mut() {
            stamp_force_rollout(&mut spec.template);
        }
    }

    let key = ObjectKey::of(&required);
    let mut existing = match store.get(&key).await {
        Ok(existing) => existing,
        Err(e) if e.is_not_found() => {
            info!("Creating DaemonSet {}", key);
            return Ok((store.create(&required).await?, true));
        }
        Err(e) => return Err(e),
    };

    let drifted = generation_drifted(existing.metadata.generation, expected_generation);
    let mut modified = false;
    if drifted && required.spec.is_some() {
        info!("DaemonSet {} was changed outside the operator, rewriting spec", key);
        merge::ensure_object_meta(&mut modified, &mut existing.metadata, &required.metadata);
        existing.spec = required.spec.clone();
    } else {
        merge::ensure_daemon_set(&mut modified, &mut existing, &required);
        if !modified {
            return Ok((existing, false));
        }
    }

    info!("Updating DaemonSet {}", key);
    Ok((store.update(&existing).await?, true))
}

fn generation_drifted(live: Option<i64>, expected: Option<i64>) -> bool {
    matches!(expected, Some(expected) if live != Some(expected))
}

fn stamp_force_rollout(template: &mut PodTemplateSpec) {
    template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(
            FORCE_ROLLOUT_ANNOTATION.to_string(),
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
        );
}

/// Delete an object, returning whether it existed
pub async fn delete_object<K>(store: &dyn ObjectStore<K>, key: &ObjectKey) -> Result<bool>
where
    K: Resource<DynamicType = ()> + Send + Sync + 'static,
{
    match store.delete(key).await {
        Ok(()) => {
            info!("Deleted {} {}", K::kind(&()), key);
            Ok(true)
        }
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete a namespace and, through it, everything the operator put in it
#[instrument(skip(store))]
pub async fn delete_namespace(store: &dyn ObjectStore<Namespace>, name: &str) -> Result<bool> {
    delete_object(store, &ObjectKey::cluster(name)).await
}
