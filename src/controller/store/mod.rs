//! Typed access to the remote object store
//!
//! Reconcilers never talk to the API server directly; they go through one
//! [`ObjectStore`] per managed kind. Production wiring uses [`KubeStore`], tests and
//! dry runs use [`MemoryStore`].

mod kube_store;
mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{Client, Resource};

use crate::error::Result;

pub use kube_store::KubeStore;
pub use memory::{MemoryStore, StoreOp};

/// Identity of a live object: optional namespace plus name
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key of an object from its metadata
    pub fn of<K: Resource>(obj: &K) -> Self {
        let meta = obj.meta();
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}", namespace, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Get/Create/Update/Delete for one object kind
///
/// `get` and `delete` report an absent object as [`crate::Error::NotFound`].
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<K>;

    async fn create(&self, obj: &K) -> Result<K>;

    async fn update(&self, obj: &K) -> Result<K>;

    /// Write only the status of `obj`
    async fn update_status(&self, obj: &K) -> Result<K> {
        self.update(obj).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()>;
}

/// One store per managed object kind
#[derive(Clone)]
pub struct Stores {
    pub namespaces: Arc<dyn ObjectStore<Namespace>>,
    pub services: Arc<dyn ObjectStore<Service>>,
    pub service_accounts: Arc<dyn ObjectStore<ServiceAccount>>,
    pub config_maps: Arc<dyn ObjectStore<ConfigMap>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    pub deployments: Arc<dyn ObjectStore<Deployment>>,
    pub daemon_sets: Arc<dyn ObjectStore<DaemonSet>>,
    pub cluster_role_bindings: Arc<dyn ObjectStore<ClusterRoleBinding>>,
    pub custom_resource_definitions: Arc<dyn ObjectStore<CustomResourceDefinition>>,
}

impl Stores {
    /// Stores backed by the Kubernetes API
    pub fn from_client(client: Client) -> Self {
        Self {
            namespaces: Arc::new(KubeStore::<Namespace>::cluster(client.clone())),
            services: Arc::new(KubeStore::<Service>::namespaced(client.clone())),
            service_accounts: Arc::new(KubeStore::<ServiceAccount>::namespaced(
                client.clone(),
            )),
            config_maps: Arc::new(KubeStore::<ConfigMap>::namespaced(client.clone())),
            secrets: Arc::new(KubeStore::<Secret>::namespaced(client.clone())),
            deployments: Arc::new(KubeStore::<Deployment>::namespaced(client.clone())),
            daemon_sets: Arc::new(KubeStore::<DaemonSet>::namespaced(client.clone())),
            cluster_role_bindings: Arc::new(KubeStore::<ClusterRoleBinding>::cluster(
                client.clone(),
            )),
            custom_resource_definitions: Arc::new(
                KubeStore::<CustomResourceDefinition>::cluster(client),
            ),
        }
    }
}

/// In-memory stores with their concrete handles kept for inspection
#[derive(Clone, Default)]
pub struct MemoryStores {
    pub namespaces: Arc<MemoryStore<Namespace>>,
    pub services: Arc<MemoryStore<Service>>,
    pub service_accounts: Arc<MemoryStore<ServiceAccount>>,
    pub config_maps: Arc<MemoryStore<ConfigMap>>,
    pub secrets: Arc<MemoryStore<Secret>>,
    pub deployments: Arc<MemoryStore<Deployment>>,
    pub daemon_sets: Arc<MemoryStore<DaemonSet>>,
    pub cluster_role_bindings: Arc<MemoryStore<ClusterRoleBinding>>,
    pub custom_resource_definitions: Arc<MemoryStore<CustomResourceDefinition>>,
}

impl MemoryStores {
    pub fn stores(&self) -> Stores {
        Stores {
            namespaces: self.namespaces.clone(),
            services: self.services.clone(),
            service_accounts: self.service_accounts.clone(),
            config_maps: self.config_maps.clone(),
            secrets: self.secrets.clone(),
            deployments: self.deployments.clone(),
            daemon_sets: self.daemon_sets.clone(),
            cluster_role_bindings: self.cluster_role_bindings.clone(),
            custom_resource_definitions: self.custom_resource_definitions.clone(),
        }
    }

    /// Create/update/delete calls recorded across every kind
    pub fn write_count(&self) -> usize {
        self.namespaces.write_count()
            + self.services.write_count()
            + self.service_accounts.write_count()
            + self.config_maps.write_count()
            + self.secrets.write_count()
            + self.deployments.write_count()
            + self.daemon_sets.write_count()
            + self.cluster_role_bindings.write_count()
            + self.custom_resource_definitions.write_count()
    }
}
