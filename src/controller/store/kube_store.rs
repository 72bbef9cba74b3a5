//! [`ObjectStore`] backed by the Kubernetes API

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{ObjectKey, ObjectStore};
use crate::error::{Error, Result};

type ApiFactory<K> = Box<dyn Fn(Option<&str>) -> Api<K> + Send + Sync>;

/// Typed client for one kind, namespaced or cluster-scoped
pub struct KubeStore<K> {
    api: ApiFactory<K>,
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + 'static,
{
    pub fn namespaced(client: Client) -> Self {
        Self {
            api: Box::new(move |namespace| match namespace {
                Some(namespace) => Api::namespaced(client.clone(), namespace),
                None => Api::default_namespaced(client.clone()),
            }),
        }
    }
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = ClusterResourceScope> + 'static,
{
    pub fn cluster(client: Client) -> Self {
        Self {
            api: Box::new(move |_| Api::all(client.clone())),
        }
    }
}

impl<K: Resource> KubeStore<K> {
    fn api_for(&self, obj: &K) -> Api<K> {
        (self.api)(obj.meta().namespace.as_deref())
    }
}

fn map_error<K>(err: kube::Error, key: &ObjectKey) -> Error
where
    K: Resource<DynamicType = ()>,
{
    match err {
        kube::Error::Api(e) if e.code == 404 => Error::NotFound {
            kind: K::kind(&()).to_string(),
            name: key.to_string(),
        },
        e => Error::KubeError(e),
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<K> {
        (self.api)(key.namespace.as_deref())
            .get(&key.name)
            .await
            .map_err(|e| map_error::<K>(e, key))
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        debug!("Creating {} {}", K::kind(&()), key);
        self.api_for(obj)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| map_error::<K>(e, &key))
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        debug!("Updating {} {}", K::kind(&()), key);
        self.api_for(obj)
            .replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_error::<K>(e, &key))
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let data = serde_json::to_vec(obj)?;
        self.api_for(obj)
            .replace_status(&key.name, &PostParams::default(), data)
            .await
            .map_err(|e| map_error::<K>(e, &key))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        debug!("Deleting {} {}", K::kind(&()), key);
        (self.api)(key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| map_error::<K>(e, key))
    }
}
