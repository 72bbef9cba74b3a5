//! The closed set of object kinds this operator manages
//!
//! Templates decode into a [`ManagedObject`]; code that handles "any managed
//! object" matches on it exhaustively instead of inspecting runtime types.

use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::Resource;

use super::apply;
use super::store::{ObjectKey, Stores};
use crate::error::{Error, Result};

macro_rules! managed_kinds {
    ($($variant:ident => $store:ident),* $(,)?) => {
        /// Kind of a managed object
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum ObjectKind {
            $($variant,)*
        }

        impl ObjectKind {
            pub const ALL: &'static [ObjectKind] = &[$(ObjectKind::$variant,)*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ObjectKind::$variant => stringify!($variant),)*
                }
            }
        }

        impl FromStr for ObjectKind {
            type Err = Error;

            fn from_str(kind: &str) -> Result<Self> {
                match kind {
                    $(stringify!($variant) => Ok(ObjectKind::$variant),)*
                    other => Err(Error::ConfigError(format!(
                        "unsupported object kind {other:?}"
                    ))),
                }
            }
        }

        /// A decoded object of one of the managed kinds
        #[derive(Clone, Debug, PartialEq)]
        pub enum ManagedObject {
            $($variant($variant),)*
        }

        impl ManagedObject {
            pub fn kind(&self) -> ObjectKind {
                match self {
                    $(ManagedObject::$variant(_) => ObjectKind::$variant,)*
                }
            }

            pub fn key(&self) -> ObjectKey {
                match self {
                    $(ManagedObject::$variant(obj) => ObjectKey::of(obj),)*
                }
            }
        }

        $(
            impl From<$variant> for ManagedObject {
                fn from(obj: $variant) -> Self {
                    ManagedObject::$variant(obj)
                }
            }

            impl TryFrom<ManagedObject> for $variant {
                type Error = Error;

                fn try_from(obj: ManagedObject) -> Result<Self, Self::Error> {
                    match obj {
                        ManagedObject::$variant(obj) => Ok(obj),
                        other => Err(Error::ConfigError(format!(
                            "expected {}, found {} {}",
                            stringify!($variant),
                            other.kind(),
                            other.key()
                        ))),
                    }
                }
            }
        )*

        impl Stores {
            /// Delete any managed object; an absent object is not an error
            pub async fn delete(&self, kind: ObjectKind, key: &ObjectKey) -> Result<bool> {
                match kind {
                    $(ObjectKind::$variant => {
                        apply::delete_object(self.$store.as_ref(), key).await
                    })*
                }
            }
        }
    };
}

managed_kinds! {
    Namespace => namespaces,
    Service => services,
    ServiceAccount => service_accounts,
    ConfigMap => config_maps,
    Secret => secrets,
    Deployment => deployments,
    DaemonSet => daemon_sets,
    ClusterRoleBinding => cluster_role_bindings,
    CustomResourceDefinition => custom_resource_definitions,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Stores {
    /// Apply any managed object with its kind's merge policy, returning whether it changed
    pub async fn apply(&self, obj: &ManagedObject) -> Result<bool> {
        let changed = match obj {
            ManagedObject::Namespace(o) => {
                apply::apply_namespace(self.namespaces.as_ref(), o).await?.1
            }
            ManagedObject::Service(o) => apply::apply_service(self.services.as_ref(), o).await?.1,
            ManagedObject::ServiceAccount(o) => {
                apply::apply_service_account(self.service_accounts.as_ref(), o)
                    .await?
                    .1
            }
            ManagedObject::ConfigMap(o) => {
                apply::apply_config_map(self.config_maps.as_ref(), o).await?.1
            }
            ManagedObject::Secret(o) => apply::apply_secret(self.secrets.as_ref(), o).await?.1,
            ManagedObject::Deployment(o) => {
                apply::apply_deployment(self.deployments.as_ref(), o, None, false)
                    .await?
                    .1
            }
            ManagedObject::DaemonSet(o) => {
                apply::apply_daemon_set(self.daemon_sets.as_ref(), o, None, false)
                    .await?
                    .1
            }
            ManagedObject::ClusterRoleBinding(o) => {
                apply::apply_cluster_role_binding(self.cluster_role_bindings.as_ref(), o)
                    .await?
                    .1
            }
            ManagedObject::CustomResourceDefinition(o) => {
                apply::apply_custom_resource_definition(
                    self.custom_resource_definitions.as_ref(),
                    o,
                )
                .await?
                .1
            }
        };
        Ok(changed)
    }
}

/// Decode a YAML manifest into the managed kind named by its `kind` field
pub fn decode_object(bytes: &[u8]) -> Result<ManagedObject> {
    let value: serde_yaml::Value = serde_yaml::from_slice(bytes)?;
    let kind = value
        .get("kind")
        .and_then(serde_yaml::Value::as_str)
        .ok_or_else(|| Error::ConfigError("manifest has no kind".to_string()))?;

    let obj = match kind.parse::<ObjectKind>()? {
        ObjectKind::Namespace => ManagedObject::Namespace(serde_yaml::from_value(value)?),
        ObjectKind::Service => ManagedObject::Service(serde_yaml::from_value(value)?),
        ObjectKind::ServiceAccount => {
            ManagedObject::ServiceAccount(serde_yaml::from_value(value)?)
        }
        ObjectKind::ConfigMap => ManagedObject::ConfigMap(serde_yaml::from_value(value)?),
        ObjectKind::Secret => ManagedObject::Secret(serde_yaml::from_value(value)?),
        ObjectKind::Deployment => ManagedObject::Deployment(serde_yaml::from_value(value)?),
        ObjectKind::DaemonSet => ManagedObject::DaemonSet(serde_yaml::from_value(value)?),
        ObjectKind::ClusterRoleBinding => {
            ManagedObject::ClusterRoleBinding(serde_yaml::from_value(value)?)
        }
        ObjectKind::CustomResourceDefinition => {
            ManagedObject::CustomResourceDefinition(serde_yaml::from_value(value)?)
        }
    };
    Ok(obj)
}

/// Decode a manifest that must be of kind `K`
pub fn decode_as<K>(bytes: &[u8]) -> Result<K>
where
    K: Resource<DynamicType = ()> + TryFrom<ManagedObject, Error = Error>,
{
    let obj = decode_object(bytes)?;
    if obj.kind().as_str() != K::kind(&()) {
        return Err(Error::ConfigError(format!(
            "expected {}, found {}",
            K::kind(&()),
            obj.kind()
        )));
    }
    K::try_from(obj)
}
