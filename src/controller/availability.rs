//! Version availability derived from live workload status

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::ResourceExt;

use crate::crd::{GenerationHistory, VersionAvailability};
use crate::error::Error;

const APPS_GROUP: &str = "apps";
pub const DEPLOYMENTS: &str = "deployments";
pub const DAEMON_SETS: &str = "daemonsets";

/// How a workload was observed in this run
///
/// Only an `Applied` workload, one this operator just wrote or found unchanged,
/// has its generation recorded. A workload merely read back after a failed apply
/// reports replicas but leaves the recorded generation alone, so an outside edit
/// is still detected on the next run.
#[derive(Clone, Copy, Debug)]
pub enum Observed<'a, W> {
    Applied(&'a W),
    Live(&'a W),
    Missing,
}

impl<'a, W> Observed<'a, W> {
    fn workload(&self) -> Option<&'a W> {
        match *self {
            Observed::Applied(w) | Observed::Live(w) => Some(w),
            Observed::Missing => None,
        }
    }

    fn applied(&self) -> Option<&'a W> {
        match *self {
            Observed::Applied(w) => Some(w),
            _ => None,
        }
    }
}

impl<'a, W> From<Option<&'a W>> for Observed<'a, W> {
    fn from(workload: Option<&'a W>) -> Self {
        workload.map_or(Observed::Missing, Observed::Live)
    }
}

/// Availability of `version` served by `deployment`
///
/// `previous` carries the generation history of earlier runs so entries for
/// other workloads survive.
pub fn deployment_availability(
    version: &str,
    deployment: Observed<'_, Deployment>,
    errors: &[Error],
    previous: Option<&VersionAvailability>,
) -> VersionAvailability {
    let mut availability = base(version, errors, previous);
    if let Some(status) = deployment.workload().and_then(|d| d.status.as_ref()) {
        availability.updated_replicas = status.updated_replicas.unwrap_or(0);
        availability.ready_replicas = status.ready_replicas.unwrap_or(0);
    }
    if let Some(deployment) = deployment.applied() {
        if let Some(generation) = deployment.metadata.generation {
            availability.record_generation(GenerationHistory {
                group: APPS_GROUP.to_string(),
                resource: DEPLOYMENTS.to_string(),
                namespace: deployment.namespace().unwrap_or_default(),
                name: deployment.name_any(),
                last_generation: generation,
            });
        }
    }
    availability
}

/// Availability of `version` served by `daemon_set`
pub fn daemon_set_availability(
    version: &str,
    daemon_set: Observed<'_, DaemonSet>,
    errors: &[Error],
    previous: Option<&VersionAvailability>,
) -> VersionAvailability {
    let mut availability = base(version, errors, previous);
    if let Some(status) = daemon_set.workload().and_then(|d| d.status.as_ref()) {
        availability.updated_replicas = status.updated_number_scheduled.unwrap_or(0);
        availability.ready_replicas = status.number_available.unwrap_or(0);
    }
    if let Some(daemon_set) = daemon_set.applied() {
        if let Some(generation) = daemon_set.metadata.generation {
            availability.record_generation(GenerationHistory {
                group: APPS_GROUP.to_string(),
                resource: DAEMON_SETS.to_string(),
                namespace: daemon_set.namespace().unwrap_or_default(),
                name: daemon_set.name_any(),
                last_generation: generation,
            });
        }
    }
    availability
}

fn base(
    version: &str,
    errors: &[Error],
    previous: Option<&VersionAvailability>,
) -> VersionAvailability {
    VersionAvailability {
        version: version.to_string(),
        updated_replicas: 0,
        ready_replicas: 0,
        errors: errors.iter().map(ToString::to_string).collect(),
        generations: previous.map(|p| p.generations.clone()).unwrap_or_default(),
    }
}
