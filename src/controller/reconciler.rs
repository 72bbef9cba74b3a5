//! Generic reconciler for an operator configuration resource
//!
//! Reads the `instance` manifest, branches on its management state, lets the
//! managed service sync its objects and writes the outcome back into the status.

use std::sync::Arc;

use async_trait::async_trait;
use kube::Resource;
use tracing::{debug, info, instrument, warn};

use super::conditions::set_availability_conditions;
use super::runner::Reconcile;
use super::store::{ObjectKey, ObjectStore};
use crate::crd::{ManagementState, OperatorManifest, OperatorStatus};
use crate::error::{Error, Result};

/// Whether a sync reached the desired version
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The desired version is fully applied
    Converged,
    /// More reconciles are needed, e.g. a migration waiting for readiness
    Progressing,
}

/// Result of one sync: its outcome plus every step error, in step order
#[derive(Debug)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub errors: Vec<Error>,
}

impl SyncReport {
    pub fn converged(errors: Vec<Error>) -> Self {
        Self {
            outcome: SyncOutcome::Converged,
            errors,
        }
    }
}

/// The objects one operator manages on behalf of its manifest
#[async_trait]
pub trait ManagedService: Send + Sync {
    type Manifest: OperatorManifest + Resource + Clone + Send + Sync + 'static;

    /// Controller name used in logs and metrics
    fn name(&self) -> &str;

    /// Drive every managed object toward the manifest
    ///
    /// Steps are isolated: a failing step is recorded in the report and the
    /// remaining steps still run. Availabilities are written into `status`.
    async fn sync(&self, manifest: &Self::Manifest, status: &mut OperatorStatus) -> SyncReport;

    /// Tear down everything the service owns
    async fn remove(&self, manifest: &Self::Manifest) -> Result<()>;
}

pub struct OperatorReconciler<S: ManagedService> {
    service: S,
    manifests: Arc<dyn ObjectStore<S::Manifest>>,
}

impl<S: ManagedService> OperatorReconciler<S> {
    pub fn new(service: S, manifests: Arc<dyn ObjectStore<S::Manifest>>) -> Self {
        Self { service, manifests }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    async fn write_status(&self, manifest: &S::Manifest, status: OperatorStatus) -> Result<()> {
        if manifest.operator_status().cloned().unwrap_or_default() == status {
            debug!("Status unchanged, skipping write");
            return Ok(());
        }
        let mut updated = manifest.clone();
        updated.set_operator_status(status);
        self.manifests.update_status(&updated).await?;
        Ok(())
    }

    async fn sync_managed(&self, manifest: &S::Manifest) -> Result<()> {
        let spec = manifest.operator_spec();
        let mut status = manifest.operator_status().cloned().unwrap_or_default();
        status.last_unsuccessful_run_errors.clear();

        let report = self.service.sync(manifest, &mut status).await;

        if report.errors.is_empty() && report.outcome == SyncOutcome::Converged {
            if status.last_successful_version != spec.version {
                info!("Version {} is now applied", spec.version);
            }
            status.last_successful_version = spec.version.clone();
        }
        status.last_unsuccessful_run_errors =
            report.errors.iter().map(ToString::to_string).collect();
        for e in &report.errors {
            warn!("{} sync step failed: {}", self.service.name(), e);
        }

        set_availability_conditions(&mut status);
        status.observed_generation = manifest.meta().generation;

        let mut errors = report.errors;
        if let Err(e) = self.write_status(manifest, status).await {
            errors.push(e);
        }
        Error::aggregate(errors)
    }
}

#[async_trait]
impl<S: ManagedService> Reconcile for OperatorReconciler<S> {
    fn name(&self) -> &str {
        self.service.name()
    }

    #[instrument(skip(self), fields(controller = %self.service.name()))]
    async fn reconcile(&self, key: &str) -> Result<()> {
        let manifest = match self.manifests.get(&ObjectKey::cluster(key)).await {
            Ok(manifest) => manifest,
            Err(e) if e.is_not_found() => {
                debug!("Manifest {} not found, nothing to do", key);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match manifest.operator_spec().management_state {
            ManagementState::Unmanaged => {
                debug!("{} is unmanaged", key);
                Ok(())
            }
            ManagementState::Removed => {
                info!("Removing {}", self.service.name());
                self.service.remove(&manifest).await?;
                self.write_status(&manifest, OperatorStatus::default()).await
            }
            ManagementState::Managed => self.sync_managed(&manifest).await,
        }
    }
}
