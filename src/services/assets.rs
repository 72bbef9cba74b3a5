//! Manifest templates compiled into the binary
//!
//! Templates are decoded once when a service is constructed. A template that does
//! not decode is a build defect, so construction fails with [`Error::Template`]
//! and the process does not start.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Namespace, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use kube::Resource;
use serde::de::DeserializeOwned;

use crate::controller::managed::{decode_as, ManagedObject};
use crate::crd::{ApiServerConfig, ConsoleConfig};
use crate::error::{Error, Result};

macro_rules! asset {
    ($path:literal) => {
        ($path, include_str!(concat!("../../assets/", $path)))
    };
}

type Asset = (&'static str, &'static str);

const WEBCONSOLE_NAMESPACE: Asset = asset!("webconsole/namespace.yaml");
const WEBCONSOLE_SERVICE: Asset = asset!("webconsole/service.yaml");
const WEBCONSOLE_SERVICE_ACCOUNT: Asset = asset!("webconsole/service-account.yaml");
const WEBCONSOLE_CONFIG: Asset = asset!("webconsole/config.yaml");
const WEBCONSOLE_DEPLOYMENT: Asset = asset!("webconsole/deployment.yaml");

const APISERVER_NAMESPACE: Asset = asset!("apiserver/namespace.yaml");
const APISERVER_SERVICE_ACCOUNT: Asset = asset!("apiserver/service-account.yaml");
const APISERVER_CLUSTER_ROLE_BINDING: Asset = asset!("apiserver/cluster-role-binding.yaml");
const APISERVER_SERVICE: Asset = asset!("apiserver/service.yaml");
const APISERVER_CONFIG: Asset = asset!("apiserver/config.yaml");
const APISERVER_DAEMON_SET: Asset = asset!("apiserver/daemonset.yaml");
const APISERVER_DEPLOYMENT: Asset = asset!("apiserver/deployment.yaml");

fn object<K>((name, text): Asset) -> Result<K>
where
    K: Resource<DynamicType = ()> + TryFrom<ManagedObject, Error = Error>,
{
    decode_as(text.as_bytes()).map_err(|e| template_error(name, e))
}

fn config<T: DeserializeOwned>((name, text): Asset) -> Result<T> {
    serde_yaml::from_str(text).map_err(|e| template_error(name, e))
}

fn template_error(name: &str, e: impl std::fmt::Display) -> Error {
    Error::Template {
        name: name.to_string(),
        message: e.to_string(),
    }
}

/// Default objects of the web console
#[derive(Clone, Debug)]
pub struct WebConsoleAssets {
    pub namespace: Namespace,
    pub service: Service,
    pub service_account: ServiceAccount,
    pub config: ConsoleConfig,
    pub deployment: Deployment,
}

impl WebConsoleAssets {
    pub fn load() -> Result<Self> {
        Ok(Self {
            namespace: object(WEBCONSOLE_NAMESPACE)?,
            service: object(WEBCONSOLE_SERVICE)?,
            service_account: object(WEBCONSOLE_SERVICE_ACCOUNT)?,
            config: config(WEBCONSOLE_CONFIG)?,
            deployment: object(WEBCONSOLE_DEPLOYMENT)?,
        })
    }
}

/// Default objects of the API server, both topologies
#[derive(Clone, Debug)]
pub struct ApiServerAssets {
    pub namespace: Namespace,
    pub service_account: ServiceAccount,
    pub cluster_role_binding: ClusterRoleBinding,
    pub service: Service,
    pub config: ApiServerConfig,
    pub daemon_set: DaemonSet,
    pub deployment: Deployment,
}

impl ApiServerAssets {
    pub fn load() -> Result<Self> {
        Ok(Self {
            namespace: object(APISERVER_NAMESPACE)?,
            service_account: object(APISERVER_SERVICE_ACCOUNT)?,
            cluster_role_binding: object(APISERVER_CLUSTER_ROLE_BINDING)?,
            service: object(APISERVER_SERVICE)?,
            config: config(APISERVER_CONFIG)?,
            daemon_set: object(APISERVER_DAEMON_SET)?,
            deployment: object(APISERVER_DEPLOYMENT)?,
        })
    }
}
