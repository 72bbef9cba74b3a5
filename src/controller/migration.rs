//! Staged migration between two deployable topologies
//!
//! The path is derived on every reconcile from the last successfully applied
//! version and the desired version, never from in-memory state, so a restarted
//! operator resumes a cut-over where the live objects left it. The source
//! topology is only deleted once the target topology is converged, error-free and
//! has ready replicas.

use std::fmt;

use async_trait::async_trait;
use semver::Version;
use tracing::{info, instrument, warn};

use super::reconciler::{SyncOutcome, SyncReport};
use crate::crd::{OperatorStatus, VersionAvailability};
use crate::error::{Error, Result};

/// Half-open version range `[min, max)`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionRange {
    min: Version,
    max: Version,
}

impl VersionRange {
    pub fn new(min: &str, max: &str) -> Result<Self> {
        let min = parse_version(min)?;
        let max = parse_version(max)?;
        if min >= max {
            return Err(Error::ConfigError(format!(
                "empty version range [{}, {})",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, version: &Version) -> bool {
        *version >= self.min && *version < self.max
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.min, self.max)
    }
}

/// Parse a release version leniently
///
/// A leading `v` is accepted, missing minor/patch components count as zero and
/// pre-release or build suffixes are ignored, so `v3.11` and `3.11.0-rc.1` both
/// parse as `3.11.0`.
pub fn parse_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let core = trimmed
        .split(|c| c == '-' || c == '+')
        .next()
        .unwrap_or_default();

    let mut parts = [0_u64; 3];
    let components: Vec<&str> = core.split('.').collect();
    if core.is_empty() || components.len() > 3 {
        return Err(Error::ConfigError(format!("invalid version {raw:?}")));
    }
    for (slot, component) in parts.iter_mut().zip(&components) {
        *slot = component
            .parse()
            .map_err(|_| Error::ConfigError(format!("invalid version {raw:?}")))?;
    }
    Ok(Version::new(parts[0], parts[1], parts[2]))
}

/// Which half of a staged topology a step acts on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Target => write!(f, "target"),
        }
    }
}

/// Sync path chosen for one reconcile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPath {
    /// Keep running the source topology
    Source,
    /// Keep running the target topology
    Target,
    /// Bring up the target topology, then retire the source one
    CutOver,
}

#[derive(Clone, Debug)]
pub struct StagedMigration {
    pub source: VersionRange,
    pub target: VersionRange,
}

impl StagedMigration {
    /// Pick the sync path for `(current, desired)`
    ///
    /// `current` is the last successfully applied version, `None` (or empty) on the
    /// first run.
    pub fn plan(&self, current: Option<&str>, desired: &str) -> Result<SyncPath> {
        let unrecognized = || Error::UnrecognizedState {
            current: current.unwrap_or_default().to_string(),
            desired: desired.to_string(),
        };

        let desired_version = parse_version(desired).map_err(|_| unrecognized())?;
        let current_version = match current.filter(|c| !c.is_empty()) {
            Some(current) => Some(parse_version(current).map_err(|_| unrecognized())?),
            None => None,
        };

        let in_source = |v: &Version| self.source.contains(v);
        let in_target = |v: &Version| self.target.contains(v);

        match current_version {
            None if in_source(&desired_version) => Ok(SyncPath::Source),
            None if in_target(&desired_version) => Ok(SyncPath::Target),
            Some(ref c) if in_source(c) && in_source(&desired_version) => Ok(SyncPath::Source),
            Some(ref c) if in_target(c) && in_target(&desired_version) => Ok(SyncPath::Target),
            Some(ref c) if in_source(c) && in_target(&desired_version) => Ok(SyncPath::CutOver),
            _ => Err(unrecognized()),
        }
    }
}

/// Result of syncing one side of a staged topology
#[derive(Debug, Default)]
pub struct TopologySync {
    /// Whether any object was created or updated
    pub changed: bool,
    pub errors: Vec<Error>,
    pub availability: VersionAvailability,
}

/// The objects of a service with two deployable topologies
///
/// `M` is the operator manifest driving the service.
#[async_trait]
pub trait StagedTopology<M: Sync>: Send + Sync {
    /// Apply the objects both sides depend on, before either side is synced
    async fn sync_shared(&self, _manifest: &M) -> Vec<Error> {
        Vec::new()
    }

    /// Apply the objects of one side; errors are collected, never short-circuited
    async fn sync(&self, side: Side, manifest: &M, status: &OperatorStatus) -> TopologySync;

    /// Point the externally visible entry point at one side
    async fn route_to(&self, side: Side, manifest: &M) -> Result<bool>;

    /// Delete the objects of one side
    async fn retire(&self, side: Side, manifest: &M) -> Result<()>;
}

/// Run the sync path for the desired version and record availabilities in `status`
#[instrument(skip_all, fields(desired = %desired))]
pub async fn sync_staged<M, T>(
    migration: &StagedMigration,
    topology: &T,
    manifest: &M,
    desired: &str,
    status: &mut OperatorStatus,
) -> SyncReport
where
    M: Sync,
    T: StagedTopology<M> + ?Sized,
{
    let current = Some(status.last_successful_version.as_str()).filter(|c| !c.is_empty());
    let path = match migration.plan(current, desired) {
        Ok(path) => path,
        Err(e) => {
            warn!("{}", e);
            return SyncReport {
                outcome: SyncOutcome::Progressing,
                errors: vec![e],
            };
        }
    };

    let errors = topology.sync_shared(manifest).await;
    match path {
        SyncPath::Source => sync_single(topology, Side::Source, manifest, status, errors).await,
        SyncPath::Target => sync_single(topology, Side::Target, manifest, status, errors).await,
        SyncPath::CutOver => {
            info!(
                "Migrating from {} to {}",
                status.last_successful_version, desired
            );
            cut_over(topology, manifest, status, errors).await
        }
    }
}

async fn sync_single<M, T>(
    topology: &T,
    side: Side,
    manifest: &M,
    status: &mut OperatorStatus,
    mut errors: Vec<Error>,
) -> SyncReport
where
    M: Sync,
    T: StagedTopology<M> + ?Sized,
{
    let sync = topology.sync(side, manifest, status).await;
    errors.extend(sync.errors);
    if let Err(e) = topology.route_to(side, manifest).await {
        errors.push(e);
    }

    status.current_version_availability = Some(sync.availability);
    status.target_version_availability = None;
    SyncReport {
        outcome: SyncOutcome::Converged,
        errors,
    }
}

async fn cut_over<M, T>(
    topology: &T,
    manifest: &M,
    status: &mut OperatorStatus,
    mut errors: Vec<Error>,
) -> SyncReport
where
    M: Sync,
    T: StagedTopology<M> + ?Sized,
{
    let progressing = |errors| SyncReport {
        outcome: SyncOutcome::Progressing,
        errors,
    };

    // keep the source healthy while the target comes up
    let source = topology.sync(Side::Source, manifest, status).await;
    errors.extend(source.errors);
    status.current_version_availability = Some(source.availability);

    let target = topology.sync(Side::Target, manifest, status).await;
    let target_ready = target.availability.ready_replicas > 0;
    errors.extend(target.errors);
    status.target_version_availability = Some(target.availability);

    if target.changed {
        info!("Target topology changed, waiting for it to settle");
        return progressing(errors);
    }
    if !errors.is_empty() {
        info!("Not cutting over while {} error(s) are outstanding", errors.len());
        return progressing(errors);
    }
    if !target_ready {
        info!("Target topology has no ready replicas yet");
        return progressing(errors);
    }

    info!("Target topology is ready, switching traffic");
    if let Err(e) = topology.route_to(Side::Target, manifest).await {
        errors.push(e);
        return progressing(errors);
    }
    if let Err(e) = topology.retire(Side::Source, manifest).await {
        errors.push(e);
        return progressing(errors);
    }

    status.current_version_availability = status.target_version_availability.take();
    SyncReport {
        outcome: SyncOutcome::Converged,
        errors,
    }
}
