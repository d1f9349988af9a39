//! Deployment manager: desired-state releases across a group's members.
//!
//! Each operation loads or writes the desired record strictly before or
//! after fanning out to the members, never while member tasks run. Member
//! failures never fail the call; they end up in that member's status text.
//!
//! Per member, install-or-upgrade is a small state machine: the observed
//! [`MemberState`] selects a [`Transition`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use fleetgrid_core::config::DeploymentConfig;
use fleetgrid_core::group::CLUSTER_NOT_FOUND_STATUS;
use fleetgrid_core::{
    CapabilityHandler, CapabilityState, Cluster, ClusterGetter, FleetError, FleetResult, Group,
    Member,
};
use fleetgrid_state::store::epoch_secs;
use fleetgrid_state::{DeploymentRecord, GroupId, MemberId, StateError, StateStore, TargetRecord};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::drift::{ValuesComparator, bytes_equal, is_stale};
use crate::fanout::run_per_member;
use crate::installer::{PackageInstaller, PackageManifest, PackageRef};
use crate::naming::{generate_unique_release_name, validate_release_name};
use crate::types::*;
use crate::values::render_values;

/// Observed state of a release on one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    NotInstalled,
    Installed { stale: bool },
}

/// Action taken to converge a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Install,
    Upgrade,
    Noop,
}

impl MemberState {
    pub fn transition(self) -> Transition {
        match self {
            MemberState::NotInstalled => Transition::Install,
            MemberState::Installed { stale: true } => Transition::Upgrade,
            MemberState::Installed { stale: false } => Transition::Noop,
        }
    }
}

/// Desired state of one release, detached from the store for member tasks.
struct Desired {
    release_name: String,
    chart_name: String,
    version: String,
    namespace: String,
    values: Value,
    overrides: BTreeMap<MemberId, Value>,
}

impl Desired {
    fn from_record(record: &DeploymentRecord) -> Self {
        Self {
            release_name: record.release_name.clone(),
            chart_name: record.chart_name.clone(),
            version: record.package_version.clone(),
            namespace: record.namespace.clone(),
            values: record.values.clone(),
            overrides: record.overrides(),
        }
    }

    fn render_for(&self, member_id: MemberId) -> serde_json::Result<Vec<u8>> {
        render_values(&self.values, self.overrides.get(&member_id))
    }
}

/// A resolved package about to be applied.
struct Rollout {
    desired: Desired,
    manifest: PackageManifest,
    dry_run: bool,
}

/// Orchestrates group deployments. Cheap to clone.
#[derive(Clone)]
pub struct DeploymentManager {
    store: StateStore,
    clusters: Arc<dyn ClusterGetter>,
    installer: Arc<dyn PackageInstaller>,
    config: DeploymentConfig,
    same_values: ValuesComparator,
}

impl DeploymentManager {
    pub fn new(
        store: StateStore,
        clusters: Arc<dyn ClusterGetter>,
        installer: Arc<dyn PackageInstaller>,
    ) -> Self {
        Self {
            store,
            clusters,
            installer,
            config: DeploymentConfig::default(),
            same_values: bytes_equal,
        }
    }

    pub fn with_config(mut self, config: DeploymentConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the byte-exact values comparison used for drift detection.
    pub fn with_values_comparator(mut self, same_values: ValuesComparator) -> Self {
        self.same_values = same_values;
        self
    }

    // ── Operations ─────────────────────────────────────────────────

    /// Record a new release for the group and roll it out to every member.
    pub async fn create_deployment(
        &self,
        group: &Group,
        organization_name: &str,
        mut request: DeploymentRequest,
    ) -> FleetResult<Vec<TargetStatus>> {
        request.validate()?;
        let generated = request.release_name.is_empty();
        if generated {
            request.release_name = self.fresh_release_name(group.id)?;
            debug!(group_id = group.id, release = %request.release_name, "generated release name");
        } else {
            validate_release_name(&request.release_name)?;
            if !request.dry_run && self.find_record(group.id, &request.release_name)?.is_some() {
                return Err(FleetError::DeploymentAlreadyExists {
                    group_id: group.id,
                    release_name: request.release_name,
                });
            }
        }

        let manifest = self
            .resolve(
                &request.release_name,
                &request.package_name,
                &request.version,
                &request.source,
                organization_name,
            )
            .await?;
        if request.version.is_empty() {
            request.version = manifest.version.clone();
        }
        if request.namespace.is_empty() {
            debug!(release = %request.release_name, namespace = %self.config.default_namespace, "namespace not set, using default");
            request.namespace = self.config.default_namespace.clone();
        }

        let mut targets = BTreeMap::new();
        for member in &group.members {
            targets.insert(
                member.id,
                TargetRecord {
                    member_name: member.name.clone(),
                    values: request.value_overrides.get(&member.id).cloned(),
                    removed_at: None,
                },
            );
        }
        for member_id in request.value_overrides.keys().filter(|id| !group.is_member(**id)) {
            warn!(group_id = group.id, member_id = *member_id, "override for non-member ignored");
        }

        let now = epoch_secs();
        let mut record = DeploymentRecord {
            group_id: group.id,
            organization_name: organization_name.to_string(),
            release_name: request.release_name,
            package_name: request.package_name,
            chart_name: manifest.name.clone(),
            package_version: request.version,
            package_source: request.source,
            namespace: request.namespace,
            description: manifest.description.clone(),
            values: request.values,
            targets,
            created_at: now,
            updated_at: now,
        };
        if !request.dry_run {
            self.insert_new(&mut record, generated)?;
        }
        info!(
            group_id = group.id,
            release = %record.release_name,
            package = %record.package_name,
            version = %record.package_version,
            dry_run = request.dry_run,
            "deployment created"
        );

        Ok(self
            .install_or_upgrade(group, &record, manifest, request.dry_run)
            .await)
    }

    /// Refresh a release's package and, unless values are reused, replace
    /// its values and every override; then roll it out again.
    pub async fn update_deployment(
        &self,
        group: &Group,
        organization_name: &str,
        mut request: DeploymentRequest,
    ) -> FleetResult<Vec<TargetStatus>> {
        request.validate()?;
        if request.release_name.is_empty() {
            return Err(FleetError::InvalidRequest(
                "release name is required".to_string(),
            ));
        }
        let mut record = self.load_record(group.id, &request.release_name)?;

        let manifest = self
            .resolve(
                &request.release_name,
                &request.package_name,
                &request.version,
                &request.source,
                organization_name,
            )
            .await?;
        if request.version.is_empty() {
            request.version = manifest.version.clone();
        }

        record.package_name = request.package_name;
        record.package_source = request.source;
        record.package_version = request.version;
        record.chart_name = manifest.name.clone();
        record.description = manifest.description.clone();
        track_members(&mut record, group);
        if !request.reuse_values {
            record.values = request.values;
            for (member_id, target) in record.targets.iter_mut() {
                target.values = request.value_overrides.get(member_id).cloned();
            }
        }
        record.updated_at = epoch_secs();

        if !request.dry_run {
            self.save(&record)?;
        }
        info!(
            group_id = group.id,
            release = %record.release_name,
            version = %record.package_version,
            reuse_values = request.reuse_values,
            dry_run = request.dry_run,
            "deployment updated"
        );

        Ok(self
            .install_or_upgrade(group, &record, manifest, request.dry_run)
            .await)
    }

    /// Desired state plus live status per current member, followed by a
    /// `stale` entry for every recorded target that left the group.
    pub async fn get_deployment(
        &self,
        group: &Group,
        release_name: &str,
    ) -> FleetResult<DeploymentInfo> {
        let record = self.load_record(group.id, release_name)?;
        let desired = Arc::new(Desired::from_record(&record));

        let mut tasks = Vec::with_capacity(group.members.len());
        for member in &group.members {
            let seed = seed_for(member);
            let cluster = group.clusters.get(&member.id).cloned();
            let installer = self.installer.clone();
            let desired = desired.clone();
            let same_values = self.same_values;
            let task_seed = seed.clone();
            tasks.push((seed, async move {
                match cluster {
                    Some(cluster) => {
                        member_status(
                            installer.as_ref(),
                            cluster.as_ref(),
                            &desired,
                            same_values,
                            task_seed,
                        )
                        .await
                    }
                    None => {
                        let mut status = task_seed.with_status(CLUSTER_NOT_FOUND_STATUS);
                        status.stale = true;
                        status
                    }
                }
            }));
        }
        let mut targets = run_per_member(tasks, self.config.member_timeout()).await;
        targets.extend(self.departed_statuses(group, &record).await);

        Ok(DeploymentInfo::from_record(&record, targets))
    }

    pub fn list_deployments(&self, group: &Group) -> FleetResult<Vec<DeploymentSummary>> {
        Ok(self
            .records(group.id)?
            .iter()
            .map(DeploymentSummary::from)
            .collect())
    }

    /// Remove the release from every recorded target, then drop the record.
    ///
    /// With `force`, member failures are reported as `deleted`.
    pub async fn delete_deployment(
        &self,
        group: &Group,
        release_name: &str,
        force: bool,
    ) -> FleetResult<Vec<TargetStatus>> {
        let record = self.load_record(group.id, release_name)?;
        let targets: Vec<MemberId> = record.targets.keys().copied().collect();

        let mut statuses = self.delete_from_targets(&record, targets).await;
        if force {
            for status in statuses.iter_mut().filter(|s| s.status != DELETED_STATUS) {
                status.status = DELETED_STATUS.to_string();
            }
        }

        self.store
            .delete_deployment(group.id, release_name)
            .map_err(|e| {
                FleetError::state(format!("deleting deployment {release_name} of group {}", group.id), e)
            })?;
        info!(group_id = group.id, release = %release_name, force, "deployment deleted");
        Ok(statuses)
    }

    /// Re-apply a release on every current member, then remove it from
    /// targets that left the group.
    pub async fn sync_deployment(
        &self,
        group: &Group,
        organization_name: &str,
        release_name: &str,
    ) -> FleetResult<Vec<TargetStatus>> {
        let mut record = self.load_record(group.id, release_name)?;
        let manifest = self
            .resolve(
                release_name,
                &record.package_name,
                &record.package_version,
                &record.package_source,
                organization_name,
            )
            .await?;

        track_members(&mut record, group);
        let mut statuses = self.install_or_upgrade(group, &record, manifest, false).await;
        let removed = self.delete_from_departed(group, &record).await;
        for status in removed.iter().filter(|s| s.status == DELETED_STATUS) {
            record.targets.remove(&status.member_id);
        }
        statuses.extend(removed);

        record.updated_at = epoch_secs();
        self.save(&record)?;
        info!(group_id = group.id, release = %release_name, targets = statuses.len(), "deployment synced");
        Ok(statuses)
    }

    // ── Fan-out helpers ────────────────────────────────────────────

    async fn install_or_upgrade(
        &self,
        group: &Group,
        record: &DeploymentRecord,
        manifest: PackageManifest,
        dry_run: bool,
    ) -> Vec<TargetStatus> {
        let rollout = Arc::new(Rollout {
            desired: Desired::from_record(record),
            manifest,
            dry_run,
        });

        let mut tasks = Vec::with_capacity(group.members.len());
        for member in &group.members {
            let seed = seed_for(member);
            let cluster = group.clusters.get(&member.id).cloned();
            let installer = self.installer.clone();
            let rollout = rollout.clone();
            let same_values = self.same_values;
            let task_seed = seed.clone();
            tasks.push((seed, async move {
                match cluster {
                    Some(cluster) => {
                        converge_member(
                            installer.as_ref(),
                            cluster.as_ref(),
                            &rollout,
                            same_values,
                            task_seed,
                        )
                        .await
                    }
                    None => task_seed
                        .with_status(format!("{FAILED_STATUS}: {CLUSTER_NOT_FOUND_STATUS}")),
                }
            }));
        }
        run_per_member(tasks, self.config.member_timeout()).await
    }

    async fn delete_from_targets(
        &self,
        record: &DeploymentRecord,
        member_ids: Vec<MemberId>,
    ) -> Vec<TargetStatus> {
        let mut tasks = Vec::with_capacity(member_ids.len());
        for member_id in member_ids {
            let seed = TargetStatus {
                member_id,
                member_name: record
                    .targets
                    .get(&member_id)
                    .map(|t| t.member_name.clone())
                    .unwrap_or_default(),
                ..Default::default()
            };
            let removed = record
                .targets
                .get(&member_id)
                .is_some_and(TargetRecord::is_removed);
            let clusters = self.clusters.clone();
            let installer = self.installer.clone();
            let release_name = record.release_name.clone();
            let task_seed = seed.clone();
            tasks.push((seed, async move {
                if removed {
                    return task_seed.with_status(DELETED_STATUS);
                }
                delete_on_member(
                    clusters.as_ref(),
                    installer.as_ref(),
                    &release_name,
                    task_seed,
                )
                .await
            }));
        }
        run_per_member(tasks, self.config.member_timeout()).await
    }

    /// Delete the release from recorded targets that are no longer members.
    async fn delete_from_departed(
        &self,
        group: &Group,
        record: &DeploymentRecord,
    ) -> Vec<TargetStatus> {
        let departed: Vec<MemberId> = record
            .targets
            .keys()
            .copied()
            .filter(|id| !group.is_member(*id))
            .collect();
        if departed.is_empty() {
            return Vec::new();
        }
        debug!(group_id = group.id, release = %record.release_name, departed = departed.len(), "removing release from departed members");
        self.delete_from_targets(record, departed).await
    }

    async fn departed_statuses(&self, group: &Group, record: &DeploymentRecord) -> Vec<TargetStatus> {
        let mut statuses = Vec::new();
        for (member_id, target) in record.targets.iter().filter(|(id, _)| !group.is_member(**id)) {
            let mut status = TargetStatus {
                member_id: *member_id,
                member_name: target.member_name.clone(),
                stale: true,
                ..Default::default()
            };
            match self.clusters.resolve_by_id(*member_id).await {
                Ok(Some(cluster)) => {
                    status.cloud = cluster.cloud().to_string();
                    status.distribution = cluster.distribution().to_string();
                    status.status = STALE_STATUS.to_string();
                }
                Ok(None) | Err(_) => {
                    status.status = format!("{STALE_STATUS}, {CLUSTER_NOT_FOUND_STATUS}");
                }
            }
            statuses.push(status);
        }
        statuses
    }

    /// Delete every release of the group from all of its recorded targets.
    async fn teardown(&self, group: &Group) -> FleetResult<()> {
        for record in self.records(group.id)? {
            let targets: Vec<MemberId> = record.targets.keys().copied().collect();
            let statuses = self.delete_from_targets(&record, targets).await;
            for failed in statuses.iter().filter(|s| s.status != DELETED_STATUS) {
                warn!(
                    group_id = group.id,
                    release = %record.release_name,
                    member_id = failed.member_id,
                    status = %failed.status,
                    "release left behind on member"
                );
            }
            self.store
                .delete_deployment(group.id, &record.release_name)
                .map_err(|e| {
                    FleetError::state(
                        format!("deleting deployment {} of group {}", record.release_name, group.id),
                        e,
                    )
                })?;
            info!(group_id = group.id, release = %record.release_name, "deployment torn down");
        }
        Ok(())
    }

    // ── Store / installer access ───────────────────────────────────

    async fn resolve(
        &self,
        release_hint: &str,
        package_name: &str,
        version: &str,
        source: &str,
        organization_name: &str,
    ) -> FleetResult<PackageManifest> {
        let package = PackageRef {
            release_hint: release_hint.to_string(),
            name: package_name.to_string(),
            version: version.to_string(),
            source: source.to_string(),
        };
        self.installer
            .resolve(&package, organization_name)
            .await
            .map_err(|source| {
                warn!(package = %package_name, version = %version, error = %source, "package resolution failed");
                FleetError::PackageResolutionFailed {
                    package: package_name.to_string(),
                    source,
                }
            })
    }

    fn fresh_release_name(&self, group_id: GroupId) -> FleetResult<String> {
        let taken: BTreeSet<String> = self
            .records(group_id)?
            .into_iter()
            .map(|r| r.release_name)
            .collect();
        Ok(generate_unique_release_name(|name| taken.contains(name)))
    }

    /// Store a new record. A generated name taken in the meantime is
    /// replaced by a fresh one; an explicit name is a conflict.
    fn insert_new(&self, record: &mut DeploymentRecord, generated: bool) -> FleetResult<()> {
        loop {
            match self.store.insert_deployment(record) {
                Ok(()) => return Ok(()),
                Err(StateError::AlreadyExists(_)) if generated => {
                    let name = self.fresh_release_name(record.group_id)?;
                    debug!(group_id = record.group_id, taken = %record.release_name, release = %name, "generated release name taken, retrying");
                    record.release_name = name;
                }
                Err(StateError::AlreadyExists(_)) => {
                    return Err(FleetError::DeploymentAlreadyExists {
                        group_id: record.group_id,
                        release_name: record.release_name.clone(),
                    });
                }
                Err(e) => {
                    return Err(FleetError::state(
                        format!("inserting deployment {} of group {}", record.release_name, record.group_id),
                        e,
                    ));
                }
            }
        }
    }

    fn records(&self, group_id: GroupId) -> FleetResult<Vec<DeploymentRecord>> {
        self.store
            .list_deployments(group_id)
            .map_err(|e| FleetError::state(format!("listing deployments of group {group_id}"), e))
    }

    fn find_record(
        &self,
        group_id: GroupId,
        release_name: &str,
    ) -> FleetResult<Option<DeploymentRecord>> {
        self.store.get_deployment(group_id, release_name).map_err(|e| {
            FleetError::state(format!("loading deployment {release_name} of group {group_id}"), e)
        })
    }

    fn load_record(&self, group_id: GroupId, release_name: &str) -> FleetResult<DeploymentRecord> {
        self.find_record(group_id, release_name)?
            .ok_or_else(|| FleetError::DeploymentNotFound {
                group_id,
                release_name: release_name.to_string(),
            })
    }

    fn save(&self, record: &DeploymentRecord) -> FleetResult<()> {
        self.store.put_deployment(record).map_err(|e| {
            FleetError::state(
                format!("saving deployment {} of group {}", record.release_name, record.group_id),
                e,
            )
        })
    }
}

#[async_trait]
impl CapabilityHandler for DeploymentManager {
    async fn reconcile_state(&self, state: &CapabilityState) -> FleetResult<()> {
        let group = &state.group;
        if !state.enabled {
            info!(group_id = group.id, "deployments disabled, tearing down");
            return self.teardown(group).await;
        }

        // Departed targets stay recorded, marked removed once the delete
        // succeeds, and are reported as stale until the release is synced
        // or deleted.
        for mut record in self.records(group.id)? {
            let statuses = self.delete_from_departed(group, &record).await;
            if statuses.is_empty() {
                continue;
            }
            let now = epoch_secs();
            let mut newly_removed = 0;
            for status in statuses.iter().filter(|s| s.status == DELETED_STATUS) {
                if let Some(target) = record
                    .targets
                    .get_mut(&status.member_id)
                    .filter(|t| !t.is_removed())
                {
                    target.removed_at = Some(now);
                    newly_removed += 1;
                }
            }
            if newly_removed > 0 {
                record.updated_at = now;
                self.save(&record)?;
            }
            info!(
                group_id = group.id,
                release = %record.release_name,
                removed = statuses.iter().filter(|s| s.status == DELETED_STATUS).count(),
                failed = statuses.iter().filter(|s| s.status != DELETED_STATUS).count(),
                "release reconciled with membership"
            );
        }
        Ok(())
    }

    async fn validate_state(&self, state: &CapabilityState) -> FleetResult<()> {
        debug!(group_id = state.group.id, members = state.group.members.len(), "deployment capability accepts group state");
        Ok(())
    }

    fn validate_properties(&self, _group: &Group, properties: &Value) -> FleetResult<()> {
        if properties.is_null() || properties.is_object() {
            Ok(())
        } else {
            Err(FleetError::InvalidRequest(
                "deployment properties must be an object".to_string(),
            ))
        }
    }

    /// `up to date`, `stale: <releases>` or the first status query failure.
    async fn members_status(
        &self,
        state: &CapabilityState,
    ) -> FleetResult<BTreeMap<MemberId, String>> {
        let group = &state.group;
        let desired: Arc<Vec<Desired>> = Arc::new(
            self.records(group.id)?
                .iter()
                .map(Desired::from_record)
                .collect(),
        );

        let mut tasks = Vec::with_capacity(group.members.len());
        for member in &group.members {
            let seed = seed_for(member);
            let cluster = group.clusters.get(&member.id).cloned();
            let installer = self.installer.clone();
            let desired = desired.clone();
            let same_values = self.same_values;
            let task_seed = seed.clone();
            tasks.push((seed, async move {
                let Some(cluster) = cluster else {
                    return task_seed.with_status(CLUSTER_NOT_FOUND_STATUS);
                };
                let mut stale = Vec::new();
                for release in desired.iter() {
                    let status = member_status(
                        installer.as_ref(),
                        cluster.as_ref(),
                        release,
                        same_values,
                        task_seed.clone(),
                    )
                    .await;
                    if status.is_failure() {
                        return task_seed.with_status(status.status);
                    }
                    if status.stale {
                        stale.push(release.release_name.clone());
                    }
                }
                if stale.is_empty() {
                    task_seed.with_status(UP_TO_DATE_STATUS)
                } else {
                    task_seed.with_status(format!("{STALE_STATUS}: {}", stale.join(", ")))
                }
            }));
        }

        Ok(run_per_member(tasks, self.config.member_timeout())
            .await
            .into_iter()
            .map(|s| (s.member_id, s.status))
            .collect())
    }
}

// ── Member tasks ───────────────────────────────────────────────────

fn seed_for(member: &Member) -> TargetStatus {
    TargetStatus {
        member_id: member.id,
        member_name: member.name.clone(),
        cloud: member.cloud.clone(),
        distribution: member.distribution.clone(),
        ..Default::default()
    }
}

/// Add current members missing from the record as targets without overrides.
/// A member that rejoined is no longer considered removed.
fn track_members(record: &mut DeploymentRecord, group: &Group) {
    for member in &group.members {
        record
            .targets
            .entry(member.id)
            .and_modify(|t| {
                if !member.name.is_empty() {
                    t.member_name = member.name.clone();
                }
                t.removed_at = None;
            })
            .or_insert_with(|| TargetRecord {
                member_name: member.name.clone(),
                values: None,
                removed_at: None,
            });
    }
}

async fn observe(
    installer: &dyn PackageInstaller,
    connection: &fleetgrid_core::ConnectionDescriptor,
    release_name: &str,
    package_name: &str,
    version: &str,
    values: &[u8],
    same_values: ValuesComparator,
) -> anyhow::Result<MemberState> {
    let installed = installer
        .list_by_name(connection, release_name)
        .await?
        .into_iter()
        .find(|r| r.name == release_name);
    Ok(match installed {
        None => MemberState::NotInstalled,
        Some(release) => MemberState::Installed {
            stale: is_stale(&release, package_name, version, values, same_values),
        },
    })
}

/// Install, upgrade or leave the release on one member.
async fn converge_member(
    installer: &dyn PackageInstaller,
    cluster: &dyn Cluster,
    rollout: &Rollout,
    same_values: ValuesComparator,
    seed: TargetStatus,
) -> TargetStatus {
    let desired = &rollout.desired;
    let release = desired.release_name.as_str();
    let values = match desired.render_for(seed.member_id) {
        Ok(values) => values,
        Err(e) => return seed.with_status(format!("{FAILED_STATUS}: rendering values: {e}")),
    };
    let connection = match cluster.connection().await {
        Ok(connection) => connection,
        Err(e) => return seed.with_status(format!("{FAILED_STATUS}: {e}")),
    };
    let state = match observe(
        installer,
        &connection,
        release,
        &rollout.manifest.name,
        &desired.version,
        &values,
        same_values,
    )
    .await
    {
        Ok(state) => state,
        Err(e) => {
            warn!(member_id = seed.member_id, %release, error = %e, "cannot determine release status");
            return seed.with_status(format!("{FAILED_STATUS}: {e}"));
        }
    };

    let transition = state.transition();
    debug!(member_id = seed.member_id, %release, ?state, ?transition, "converging member");
    let result = match transition {
        Transition::Install => {
            installer
                .install(
                    &connection,
                    &rollout.manifest,
                    &desired.namespace,
                    release,
                    &values,
                    rollout.dry_run,
                )
                .await
        }
        Transition::Upgrade => {
            installer
                .upgrade(&connection, &rollout.manifest, release, &values, rollout.dry_run)
                .await
        }
        Transition::Noop => Ok(()),
    };

    match result {
        Ok(()) => {
            let mut status = seed.with_status(DEPLOYED_STATUS);
            status.version = rollout.manifest.version.clone();
            status
        }
        Err(e) => {
            warn!(member_id = seed.member_id, %release, ?transition, error = %e, "member rollout failed");
            seed.with_status(format!("{FAILED_STATUS}: {e}"))
        }
    }
}

/// Live status of the release on one member.
async fn member_status(
    installer: &dyn PackageInstaller,
    cluster: &dyn Cluster,
    desired: &Desired,
    same_values: ValuesComparator,
    mut seed: TargetStatus,
) -> TargetStatus {
    let release = desired.release_name.as_str();
    let lookup = async {
        let connection = cluster.connection().await?;
        let installed = installer
            .list_by_name(&connection, release)
            .await?
            .into_iter()
            .find(|r| r.name == release);
        anyhow::Ok(installed)
    };
    match lookup.await {
        Err(e) => seed.with_status(format!("{FAILED_STATUS} to get status: {e}")),
        Ok(None) => {
            seed.stale = true;
            seed.with_status(NOT_INSTALLED_STATUS)
        }
        Ok(Some(installed)) => {
            seed.version = installed.package_version.clone();
            seed.stale = match desired.render_for(seed.member_id) {
                Ok(values) => is_stale(
                    &installed,
                    &desired.chart_name,
                    &desired.version,
                    &values,
                    same_values,
                ),
                Err(_) => true,
            };
            seed.with_status(installed.status)
        }
    }
}

async fn delete_on_member(
    clusters: &dyn ClusterGetter,
    installer: &dyn PackageInstaller,
    release_name: &str,
    mut seed: TargetStatus,
) -> TargetStatus {
    let cluster = match clusters.resolve_by_id(seed.member_id).await {
        Ok(Some(cluster)) => cluster,
        Ok(None) | Err(_) => {
            warn!(member_id = seed.member_id, release = %release_name, "member no longer found, release considered deleted");
            return seed.with_status(DELETED_STATUS);
        }
    };
    seed.cloud = cluster.cloud().to_string();
    seed.distribution = cluster.distribution().to_string();
    if seed.member_name.is_empty() {
        seed.member_name = cluster.name().to_string();
    }

    let result = async {
        let connection = cluster.connection().await?;
        installer.delete(&connection, release_name).await
    };
    match result.await {
        Ok(()) => {
            info!(member_id = seed.member_id, release = %release_name, "release deleted from member");
            seed.with_status(DELETED_STATUS)
        }
        Err(e) => {
            warn!(member_id = seed.member_id, release = %release_name, error = %e, "release delete failed");
            seed.with_status(format!("{FAILED_STATUS} to delete release from member: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_observed_state() {
        assert_eq!(MemberState::NotInstalled.transition(), Transition::Install);
        assert_eq!(
            MemberState::Installed { stale: true }.transition(),
            Transition::Upgrade
        );
        assert_eq!(
            MemberState::Installed { stale: false }.transition(),
            Transition::Noop
        );
    }

    #[test]
    fn track_members_keeps_existing_overrides() {
        let mut targets = BTreeMap::new();
        targets.insert(
            10,
            TargetRecord {
                member_name: "old".to_string(),
                values: Some(serde_json::json!({"a": 1})),
                removed_at: Some(5),
            },
        );
        let mut record = DeploymentRecord {
            group_id: 1,
            organization_name: "acme".to_string(),
            release_name: "web".to_string(),
            package_name: "nginx".to_string(),
            chart_name: "nginx".to_string(),
            package_version: "1.0.0".to_string(),
            package_source: "stable".to_string(),
            namespace: "default".to_string(),
            description: String::new(),
            values: Value::Null,
            targets,
            created_at: 0,
            updated_at: 0,
        };
        let group = Group {
            id: 1,
            members: vec![
                Member {
                    id: 10,
                    name: "east".to_string(),
                    ..Default::default()
                },
                Member {
                    id: 11,
                    name: "west".to_string(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        track_members(&mut record, &group);
        assert_eq!(record.targets.len(), 2);
        assert_eq!(record.targets[&10].member_name, "east");
        assert!(record.targets[&10].values.is_some());
        assert!(!record.targets[&10].is_removed());
        assert!(record.targets[&11].values.is_none());
    }
}
