//! Controller module for the control-plane operator
//! This module contains the reconciliation engine: object stores, merge
//! policies, apply operations, the work queue and the reconcilers built on them.

pub mod apply;
pub mod availability;
pub mod conditions;
pub mod managed;
pub mod merge;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod migration;
pub mod queue;
pub mod reconciler;
#[cfg(test)]
mod reconciler_test;
pub mod runner;
pub mod store;

pub use managed::{ManagedObject, ObjectKind};
pub use migration::{Side, StagedMigration, StagedTopology, SyncPath, VersionRange};
pub use queue::{ExponentialBackoff, RateLimitingQueue, WorkQueue};
pub use reconciler::{ManagedService, OperatorReconciler, SyncOutcome, SyncReport};
pub use runner::{watch_trigger, Controller, Reconcile};
pub use store::{MemoryStores, ObjectKey, ObjectStore, Stores};
