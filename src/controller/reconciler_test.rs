//! Tests for the reconciler module
//!
//! These tests verify the manifest-level reconcile flow:
//! - Management state branching (Managed, Unmanaged, Removed)
//! - Version bookkeeping in the status
//! - Error aggregation and condition updates
//! - Status write suppression when nothing changed

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use kube::api::ObjectMeta;

    use crate::controller::conditions::{
        find_condition, CONDITION_STATUS_FALSE, CONDITION_STATUS_TRUE,
        CONDITION_TYPE_AVAILABLE, CONDITION_TYPE_SYNC_SUCCESSFUL,
    };
    use crate::controller::reconciler::*;
    use crate::controller::runner::Reconcile;
    use crate::controller::store::{MemoryStore, ObjectKey, ObjectStore, StoreOp};
    use crate::crd::{
        ManagementState, OperatorSpec, OperatorStatus, VersionAvailability,
        WebConsoleOperatorConfig, WebConsoleOperatorConfigSpec, INSTANCE_NAME,
    };
    use crate::error::{Error, Result};

    /// Service whose sync result is scripted by the test
    #[derive(Default)]
    struct ScriptedService {
        syncs: AtomicUsize,
        removals: AtomicUsize,
        progressing: bool,
        step_errors: Mutex<Vec<String>>,
        ready_replicas: i32,
    }

    #[async_trait]
    impl ManagedService for Arc<ScriptedService> {
        type Manifest = WebConsoleOperatorConfig;

        fn name(&self) -> &str {
            "scripted"
        }

        async fn sync(
            &self,
            manifest: &WebConsoleOperatorConfig,
            status: &mut OperatorStatus,
        ) -> SyncReport {
            self.syncs.fetch_add(1, Ordering::SeqCst);
            let errors: Vec<Error> = self
                .step_errors
                .lock()
                .unwrap()
                .iter()
                .map(|m| Error::StoreError(m.clone()))
                .collect();
            status.current_version_availability = Some(VersionAvailability {
                version: manifest.spec.operator.version.clone(),
                ready_replicas: self.ready_replicas,
                updated_replicas: self.ready_replicas,
                errors: errors.iter().map(ToString::to_string).collect(),
                generations: vec![],
            });
            SyncReport {
                outcome: if self.progressing {
                    SyncOutcome::Progressing
                } else {
                    SyncOutcome::Converged
                },
                errors,
            }
        }

        async fn remove(&self, _: &WebConsoleOperatorConfig) -> Result<()> {
            self.removals.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manifest(state: ManagementState, version: &str) -> WebConsoleOperatorConfig {
        WebConsoleOperatorConfig {
            metadata: ObjectMeta {
                name: Some(INSTANCE_NAME.to_string()),
                generation: Some(3),
                ..Default::default()
            },
            spec: WebConsoleOperatorConfigSpec {
                operator: OperatorSpec {
                    management_state: state,
                    image_pull_spec: "quay.io/openshift/origin-web-console:v3.11".to_string(),
                    version: version.to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
            status: None,
        }
    }

    fn setup(
        service: ScriptedService,
        manifest: Option<WebConsoleOperatorConfig>,
    ) -> (
        OperatorReconciler<Arc<ScriptedService>>,
        Arc<ScriptedService>,
        Arc<MemoryStore<WebConsoleOperatorConfig>>,
    ) {
        let service = Arc::new(service);
        let store = Arc::new(MemoryStore::default());
        if let Some(manifest) = manifest {
            store.insert(manifest);
        }
        let manifests: Arc<dyn ObjectStore<WebConsoleOperatorConfig>> = store.clone();
        (
            OperatorReconciler::new(Arc::clone(&service), manifests),
            service,
            store,
        )
    }

    fn status_of(store: &MemoryStore<WebConsoleOperatorConfig>) -> OperatorStatus {
        store
            .object(&ObjectKey::cluster(INSTANCE_NAME))
            .and_then(|m| m.status)
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Management state
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_missing_manifest_is_not_an_error() {
        let (reconciler, service, _) = setup(ScriptedService::default(), None);

        reconciler.reconcile(INSTANCE_NAME).await.unwrap();
        assert_eq!(service.syncs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unmanaged_does_nothing() {
        let (reconciler, service, store) = setup(
            ScriptedService::default(),
            Some(manifest(ManagementState::Unmanaged, "3.11.0")),
        );

        reconciler.reconcile(INSTANCE_NAME).await.unwrap();

        assert_eq!(service.syncs.load(Ordering::SeqCst), 0);
        assert_eq!(service.removals.load(Ordering::SeqCst), 0);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_removed_tears_down_and_clears_status() {
        let mut removed = manifest(ManagementState::Removed, "3.11.0");
        removed.status = Some(OperatorStatus {
            last_successful_version: "3.11.0".to_string(),
            ..Default::default()
        });
        let (reconciler, service, store) = setup(ScriptedService::default(), Some(removed));

        reconciler.reconcile(INSTANCE_NAME).await.unwrap();

        assert_eq!(service.removals.load(Ordering::SeqCst), 1);
        assert_eq!(service.syncs.load(Ordering::SeqCst), 0);
        assert_eq!(status_of(&store), OperatorStatus::default());

        // already cleared: no second status write
        let writes = store.write_count();
        reconciler.reconcile(INSTANCE_NAME).await.unwrap();
        assert_eq!(store.write_count(), writes);
    }

    // -----------------------------------------------------------------------
    // Managed
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_success_records_version_and_conditions() {
        let service = ScriptedService {
            ready_replicas: 2,
            ..Default::default()
        };
        let (reconciler, _, store) =
            setup(service, Some(manifest(ManagementState::Managed, "3.11.0")));

        reconciler.reconcile(INSTANCE_NAME).await.unwrap();

        let status = status_of(&store);
        assert_eq!(status.last_successful_version, "3.11.0");
        assert_eq!(status.observed_generation, Some(3));
        assert!(status.last_unsuccessful_run_errors.is_empty());
        assert_eq!(
            find_condition(&status.conditions, CONDITION_TYPE_AVAILABLE)
                .unwrap()
                .status,
            CONDITION_STATUS_TRUE
        );
        assert_eq!(
            find_condition(&status.conditions, CONDITION_TYPE_SYNC_SUCCESSFUL)
                .unwrap()
                .status,
            CONDITION_STATUS_TRUE
        );
    }

    #[tokio::test]
    async fn test_step_errors_are_aggregated_into_status() {
        let service = ScriptedService {
            ready_replicas: 1,
            step_errors: Mutex::new(vec!["service failed".to_string(), "deployment failed".to_string()]),
            ..Default::default()
        };
        let (reconciler, _, store) =
            setup(service, Some(manifest(ManagementState::Managed, "3.11.0")));

        let err = reconciler.reconcile(INSTANCE_NAME).await.unwrap_err();
        assert!(matches!(err, Error::Aggregate(ref errors) if errors.len() == 2));

        let status = status_of(&store);
        assert_eq!(status.last_successful_version, "");
        assert_eq!(
            status.last_unsuccessful_run_errors,
            vec!["Store error: service failed", "Store error: deployment failed"]
        );
        assert_eq!(
            find_condition(&status.conditions, CONDITION_TYPE_SYNC_SUCCESSFUL)
                .unwrap()
                .status,
            CONDITION_STATUS_FALSE
        );
    }

    #[tokio::test]
    async fn test_errors_are_cleared_after_recovery() {
        let service = ScriptedService {
            ready_replicas: 1,
            step_errors: Mutex::new(vec!["transient".to_string()]),
            ..Default::default()
        };
        let (reconciler, service, store) =
            setup(service, Some(manifest(ManagementState::Managed, "3.11.0")));

        assert!(reconciler.reconcile(INSTANCE_NAME).await.is_err());
        service.step_errors.lock().unwrap().clear();
        reconciler.reconcile(INSTANCE_NAME).await.unwrap();

        let status = status_of(&store);
        assert!(status.last_unsuccessful_run_errors.is_empty());
        assert_eq!(status.last_successful_version, "3.11.0");
    }

    #[tokio::test]
    async fn test_progressing_sync_keeps_previous_version() {
        let mut migrating = manifest(ManagementState::Managed, "3.11.0");
        migrating.status = Some(OperatorStatus {
            last_successful_version: "3.10.0".to_string(),
            ..Default::default()
        });
        let service = ScriptedService {
            progressing: true,
            ..Default::default()
        };
        let (reconciler, _, store) = setup(service, Some(migrating));

        reconciler.reconcile(INSTANCE_NAME).await.unwrap();

        assert_eq!(status_of(&store).last_successful_version, "3.10.0");
    }

    #[tokio::test]
    async fn test_unchanged_status_is_not_rewritten() {
        let service = ScriptedService {
            ready_replicas: 1,
            ..Default::default()
        };
        let (reconciler, service, store) =
            setup(service, Some(manifest(ManagementState::Managed, "3.11.0")));

        reconciler.reconcile(INSTANCE_NAME).await.unwrap();
        let writes = store.write_count();
        reconciler.reconcile(INSTANCE_NAME).await.unwrap();

        assert_eq!(service.syncs.load(Ordering::SeqCst), 2);
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn test_status_write_failure_is_reported() {
        let service = ScriptedService {
            ready_replicas: 1,
            ..Default::default()
        };
        let (reconciler, _, store) =
            setup(service, Some(manifest(ManagementState::Managed, "3.11.0")));
        store.fail(StoreOp::UpdateStatus, "conflict");

        let err = reconciler.reconcile(INSTANCE_NAME).await.unwrap_err();
        assert!(err.to_string().contains("conflict"));
    }

    #[tokio::test]
    async fn test_get_failure_propagates() {
        let (reconciler, service, store) = setup(
            ScriptedService::default(),
            Some(manifest(ManagementState::Managed, "3.11.0")),
        );
        store.fail(StoreOp::Get, "connection refused");

        assert!(reconciler.reconcile(INSTANCE_NAME).await.is_err());
        assert_eq!(service.syncs.load(Ordering::SeqCst), 0);
    }
}
