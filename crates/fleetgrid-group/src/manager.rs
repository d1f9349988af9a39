//! Group manager: lifecycle of groups and their capabilities.
//!
//! Persists groups through the `StateStore`, resolves member ids through
//! the `ClusterGetter` and dispatches to capability handlers by name via
//! the `CapabilityRegistry`.

use std::collections::BTreeMap;
use std::sync::Arc;

use fleetgrid_core::group::CLUSTER_NOT_FOUND_STATUS;
use fleetgrid_core::{
    CapabilityHandler, CapabilityRegistry, CapabilityState, ClusterGetter, ClusterHandle,
    CreateGroupRequest, CreateGroupResponse, DEPLOYMENT_CAPABILITY, FleetError, FleetResult,
    Group, Member, UpdateGroupRequest,
};
use fleetgrid_state::{
    CapabilityRecord, GroupId, GroupRecord, MemberId, OrganizationId, StateError, StateStore,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// A capability of a group as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub properties: Value,
    /// Per-member status from the handler; filled by single-capability reads.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub members_status: BTreeMap<MemberId, String>,
}

/// Manages groups, their memberships and their capabilities.
pub struct GroupManager {
    store: StateStore,
    clusters: Arc<dyn ClusterGetter>,
    registry: Arc<CapabilityRegistry>,
}

impl GroupManager {
    pub fn new(
        store: StateStore,
        clusters: Arc<dyn ClusterGetter>,
        registry: Arc<CapabilityRegistry>,
    ) -> Self {
        Self {
            store,
            clusters,
            registry,
        }
    }

    // ── Group lifecycle ────────────────────────────────────────────

    /// Create a group from the ready subset of the requested members.
    ///
    /// Unknown members and members of another group fail the call; members
    /// that are merely not ready are skipped. The deployment capability is
    /// enabled on the new group.
    pub async fn create_group(
        &self,
        organization_id: OrganizationId,
        request: &CreateGroupRequest,
    ) -> FleetResult<CreateGroupResponse> {
        request.validate()?;
        let name = request.name.as_str();

        if self
            .store
            .find_group_by_name(organization_id, name)
            .map_err(|e| FleetError::state(format!("looking up group {name}"), e))?
            .is_some()
        {
            return Err(FleetError::GroupAlreadyExists {
                name: name.to_string(),
                organization_id,
            });
        }

        let mut admitted = Vec::new();
        for member_id in dedup(&request.members) {
            let cluster = self.resolve_member(organization_id, member_id).await?;
            self.ensure_not_grouped_elsewhere(member_id, None)?;

            match cluster.is_ready().await {
                Ok(true) => {
                    info!(member_id, member = %cluster.name(), group = %name, "member joins group");
                    admitted.push(member_id);
                }
                Ok(false) => {
                    warn!(member_id, group = %name, "member not ready, skipped");
                }
                Err(e) => {
                    warn!(member_id, group = %name, error = %e, "member readiness unknown, skipped");
                }
            }
        }
        if admitted.is_empty() {
            return Err(FleetError::NoReadyMembers);
        }

        let record = self
            .store
            .create_group(name, organization_id, &admitted)
            .map_err(|e| match e {
                StateError::AlreadyExists(_) => FleetError::GroupAlreadyExists {
                    name: name.to_string(),
                    organization_id,
                },
                e => FleetError::state(format!("creating group {name}"), e),
            })?;

        if self.registry.contains(DEPLOYMENT_CAPABILITY) {
            self.store
                .put_capability(&CapabilityRecord {
                    group_id: record.id,
                    name: DEPLOYMENT_CAPABILITY.to_string(),
                    enabled: true,
                    properties: Value::Null,
                })
                .map_err(|e| FleetError::state(format!("enabling deployments on group {}", record.id), e))?;
        }

        info!(
            group_id = record.id,
            group = %name,
            organization_id,
            members = admitted.len(),
            "group created"
        );
        Ok(CreateGroupResponse {
            name: record.name,
            id: record.id,
        })
    }

    /// Rename a group and replace its member set.
    ///
    /// Every requested member must resolve and be ready. Each enabled
    /// capability validates the prospective group first; after the commit
    /// each enabled capability reconciles against the committed group.
    pub async fn update_group(
        &self,
        organization_id: OrganizationId,
        group_id: GroupId,
        request: &UpdateGroupRequest,
    ) -> FleetResult<()> {
        request.validate()?;
        let record = self.load_record(group_id)?;
        if record.organization_id != organization_id {
            return Err(FleetError::GroupNotFound(group_id));
        }
        let existing = self.build_group(&record, false).await?;

        let member_ids = dedup(&request.members);
        let mut members = Vec::with_capacity(member_ids.len());
        let mut clusters = BTreeMap::new();
        for member_id in &member_ids {
            let cluster = self.resolve_member(organization_id, *member_id).await?;
            self.ensure_not_grouped_elsewhere(*member_id, Some(group_id))?;

            let ready = cluster.is_ready().await.map_err(|e| {
                FleetError::collaborator(format!("checking readiness of member {member_id}"), e)
            })?;
            if !ready {
                return Err(FleetError::MemberNotReady(*member_id));
            }
            debug!(member_id, group = %existing.name, "member accepted for update");
            members.push(member_snapshot(&cluster));
            clusters.insert(*member_id, cluster);
        }

        let prospective = Group {
            name: request.name.clone(),
            members,
            clusters,
            ..existing.clone()
        };
        debug!(group_id, members = ?prospective.member_ids(), "validating prospective membership");
        for (capability, handler) in self.enabled_handlers(group_id)? {
            let state = capability_state(&capability, prospective.clone(), true);
            if let Err(e) = handler.validate_state(&state).await {
                warn!(group_id, capability = %capability.name, error = %e, "group update rejected");
                return Err(FleetError::UpdateRejected {
                    capability: capability.name,
                    source: Box::new(e),
                });
            }
        }

        let updated = self
            .store
            .update_group(group_id, &request.name, &member_ids)
            .map_err(|e| match e {
                StateError::AlreadyExists(_) => FleetError::GroupAlreadyExists {
                    name: request.name.clone(),
                    organization_id,
                },
                StateError::NotFound(_) => FleetError::GroupNotFound(group_id),
                e => FleetError::state(format!("updating group {group_id}"), e),
            })?;
        info!(group_id, group = %updated.name, members = updated.members.len(), "group updated");

        let committed = self.build_group(&updated, false).await?;
        self.reconcile_enabled(&committed, true).await
    }

    /// Tear down every enabled capability of the group, then delete it.
    pub async fn delete_group(&self, group_id: GroupId) -> FleetResult<()> {
        let record = self.load_record(group_id)?;
        let group = self.build_group(&record, false).await?;

        self.reconcile_enabled(&group, false).await?;

        self.store
            .delete_group(group_id)
            .map_err(|e| FleetError::state(format!("deleting group {group_id}"), e))?;
        info!(group_id, group = %record.name, "group deleted");
        Ok(())
    }

    /// Get a group projection, optionally with live member status.
    pub async fn get_group(&self, group_id: GroupId, with_status: bool) -> FleetResult<Group> {
        let record = self.load_record(group_id)?;
        self.build_group(&record, with_status).await
    }

    /// List the groups of an organization.
    pub async fn list_groups(&self, organization_id: OrganizationId) -> FleetResult<Vec<Group>> {
        let records = self
            .store
            .list_groups(Some(organization_id))
            .map_err(|e| FleetError::state(format!("listing groups of {organization_id}"), e))?;
        let mut groups = Vec::with_capacity(records.len());
        for record in &records {
            groups.push(self.build_group(record, false).await?);
        }
        Ok(groups)
    }

    // ── Capabilities ───────────────────────────────────────────────

    /// All capability records of a group.
    pub async fn capabilities(&self, group_id: GroupId) -> FleetResult<Vec<CapabilityInfo>> {
        self.load_record(group_id)?;
        let records = self
            .store
            .list_capabilities(group_id)
            .map_err(|e| FleetError::state(format!("listing capabilities of group {group_id}"), e))?;
        Ok(records
            .into_iter()
            .map(|r| CapabilityInfo {
                name: r.name,
                enabled: r.enabled,
                properties: r.properties,
                members_status: BTreeMap::new(),
            })
            .collect())
    }

    /// One capability of a group, with the handler's per-member status
    /// when it is enabled.
    pub async fn capability(&self, group_id: GroupId, name: &str) -> FleetResult<CapabilityInfo> {
        let handler = self.registry.get(name)?;
        let group = self.get_group(group_id, false).await?;
        let record = self.load_capability(group_id, name)?;

        let members_status = if record.enabled {
            let state = capability_state(&record, group, true);
            handler.members_status(&state).await?
        } else {
            BTreeMap::new()
        };
        Ok(CapabilityInfo {
            name: record.name,
            enabled: record.enabled,
            properties: record.properties,
            members_status,
        })
    }

    /// Enable a capability with the given properties and let it reconcile.
    pub async fn enable_capability(
        &self,
        group_id: GroupId,
        name: &str,
        properties: Value,
    ) -> FleetResult<()> {
        let handler = self.registry.get(name)?;
        let group = self.get_group(group_id, false).await?;
        handler.validate_properties(&group, &properties)?;

        let record = CapabilityRecord {
            group_id,
            name: name.to_string(),
            enabled: true,
            properties,
        };
        self.save_capability(&record)?;
        info!(group_id, capability = %name, "capability enabled");

        let mut group = group;
        push_unique(&mut group.enabled_capabilities, name);
        handler
            .reconcile_state(&capability_state(&record, group, true))
            .await
    }

    /// Replace the properties of an existing capability.
    pub async fn update_capability(
        &self,
        group_id: GroupId,
        name: &str,
        properties: Value,
    ) -> FleetResult<()> {
        let handler = self.registry.get(name)?;
        let group = self.get_group(group_id, false).await?;
        let mut record = self.load_capability(group_id, name)?;
        handler.validate_properties(&group, &properties)?;

        record.properties = properties;
        self.save_capability(&record)?;
        info!(group_id, capability = %name, enabled = record.enabled, "capability updated");

        if record.enabled {
            handler
                .reconcile_state(&capability_state(&record, group, true))
                .await?;
        }
        Ok(())
    }

    /// Switch a capability off and let its handler tear down.
    pub async fn disable_capability(&self, group_id: GroupId, name: &str) -> FleetResult<()> {
        let handler = self.registry.get(name)?;
        let group = self.get_group(group_id, false).await?;
        let mut record = self.load_capability(group_id, name)?;

        record.enabled = false;
        self.save_capability(&record)?;
        info!(group_id, capability = %name, "capability disabled");

        let mut group = group;
        group.enabled_capabilities.retain(|c| c != name);
        handler
            .reconcile_state(&capability_state(&record, group, false))
            .await
    }

    // ── Internals ──────────────────────────────────────────────────

    fn load_record(&self, group_id: GroupId) -> FleetResult<GroupRecord> {
        self.store
            .get_group(group_id)
            .map_err(|e| FleetError::state(format!("loading group {group_id}"), e))?
            .ok_or(FleetError::GroupNotFound(group_id))
    }

    fn load_capability(&self, group_id: GroupId, name: &str) -> FleetResult<CapabilityRecord> {
        self.store
            .get_capability(group_id, name)
            .map_err(|e| FleetError::state(format!("loading capability {name} of group {group_id}"), e))?
            .ok_or_else(|| FleetError::CapabilityNotFound {
                group_id,
                name: name.to_string(),
            })
    }

    fn save_capability(&self, record: &CapabilityRecord) -> FleetResult<()> {
        self.store.put_capability(record).map_err(|e| {
            FleetError::state(
                format!("saving capability {} of group {}", record.name, record.group_id),
                e,
            )
        })
    }

    async fn resolve_member(
        &self,
        organization_id: OrganizationId,
        member_id: MemberId,
    ) -> FleetResult<ClusterHandle> {
        match self
            .clusters
            .resolve_by_org_and_id(organization_id, member_id)
            .await
        {
            Ok(Some(cluster)) => Ok(cluster),
            Ok(None) => Err(FleetError::MemberNotFound(member_id)),
            Err(e) => {
                debug!(member_id, organization_id, error = %e, "member resolution failed");
                Err(FleetError::MemberNotFound(member_id))
            }
        }
    }

    /// Fails if the member belongs to a group other than `current`.
    fn ensure_not_grouped_elsewhere(
        &self,
        member_id: MemberId,
        current: Option<GroupId>,
    ) -> FleetResult<()> {
        let membership = self
            .store
            .find_member(member_id)
            .map_err(|e| FleetError::state(format!("checking membership of {member_id}"), e))?;
        match membership {
            Some(m) if Some(m.group_id) != current => Err(FleetError::MemberAlreadyGrouped {
                member_id,
                group_id: m.group_id,
            }),
            _ => Ok(()),
        }
    }

    fn enabled_handlers(
        &self,
        group_id: GroupId,
    ) -> FleetResult<Vec<(CapabilityRecord, Arc<dyn CapabilityHandler>)>> {
        let records = self
            .store
            .list_capabilities(group_id)
            .map_err(|e| FleetError::state(format!("listing capabilities of group {group_id}"), e))?;
        let mut handlers = Vec::new();
        for record in records.into_iter().filter(|r| r.enabled) {
            let handler = self.registry.get(&record.name)?;
            handlers.push((record, handler));
        }
        Ok(handlers)
    }

    async fn reconcile_enabled(&self, group: &Group, enabled: bool) -> FleetResult<()> {
        for (capability, handler) in self.enabled_handlers(group.id)? {
            debug!(group_id = group.id, capability = %capability.name, enabled, "reconciling capability");
            handler
                .reconcile_state(&capability_state(&capability, group.clone(), enabled))
                .await?;
        }
        Ok(())
    }

    /// Assemble the projection of a persisted group, resolving every member.
    async fn build_group(&self, record: &GroupRecord, with_status: bool) -> FleetResult<Group> {
        let mut enabled_capabilities: Vec<String> = self
            .store
            .list_capabilities(record.id)
            .map_err(|e| FleetError::state(format!("listing capabilities of group {}", record.id), e))?
            .into_iter()
            .filter(|c| c.enabled)
            .map(|c| c.name)
            .collect();
        enabled_capabilities.sort();

        let mut members = Vec::with_capacity(record.members.len());
        let mut clusters = BTreeMap::new();
        for member_id in &record.members {
            let cluster = match self.clusters.resolve_by_id(*member_id).await {
                Ok(Some(cluster)) => cluster,
                Ok(None) | Err(_) => {
                    members.push(Member {
                        id: *member_id,
                        status: CLUSTER_NOT_FOUND_STATUS.to_string(),
                        ..Default::default()
                    });
                    continue;
                }
            };
            let mut member = member_snapshot(&cluster);
            if with_status {
                member.status = match cluster.status().await {
                    Ok(status) => status,
                    Err(e) => e.to_string(),
                };
            }
            members.push(member);
            clusters.insert(*member_id, cluster);
        }

        Ok(Group {
            id: record.id,
            uid: record.uid.clone(),
            name: record.name.clone(),
            organization_id: record.organization_id,
            members,
            enabled_capabilities,
            clusters,
        })
    }
}

fn member_snapshot(cluster: &ClusterHandle) -> Member {
    Member {
        id: cluster.id(),
        cloud: cluster.cloud().to_string(),
        distribution: cluster.distribution().to_string(),
        name: cluster.name().to_string(),
        status: String::new(),
    }
}

fn capability_state(record: &CapabilityRecord, group: Group, enabled: bool) -> CapabilityState {
    CapabilityState {
        name: record.name.clone(),
        group,
        enabled,
        properties: record.properties.clone(),
    }
}

fn dedup(ids: &[MemberId]) -> Vec<MemberId> {
    let mut seen = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.contains(id) {
            seen.push(*id);
        }
    }
    seen
}

fn push_unique(names: &mut Vec<String>, name: &str) {
    if !names.iter().any(|n| n == name) {
        names.push(name.to_string());
        names.sort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleetgrid_core::{Cluster, ConnectionDescriptor};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeCluster {
        id: MemberId,
        name: String,
        ready: bool,
    }

    #[async_trait]
    impl Cluster for FakeCluster {
        fn id(&self) -> MemberId {
            self.id
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn cloud(&self) -> &str {
            "amazon"
        }
        fn distribution(&self) -> &str {
            "eks"
        }
        async fn is_ready(&self) -> anyhow::Result<bool> {
            Ok(self.ready)
        }
        async fn connection(&self) -> anyhow::Result<ConnectionDescriptor> {
            Ok(ConnectionDescriptor(self.name.as_bytes().to_vec()))
        }
        async fn status(&self) -> anyhow::Result<String> {
            if self.ready {
                Ok("RUNNING".to_string())
            } else {
                anyhow::bail!("api server unreachable")
            }
        }
    }

    #[derive(Default)]
    struct FakeClusters {
        nodes: Mutex<HashMap<MemberId, ClusterHandle>>,
    }

    impl FakeClusters {
        fn with(nodes: &[(MemberId, bool)]) -> Arc<Self> {
            let fake = Self::default();
            for (id, ready) in nodes {
                fake.add(*id, *ready);
            }
            Arc::new(fake)
        }

        fn add(&self, id: MemberId, ready: bool) {
            let node: ClusterHandle = Arc::new(FakeCluster {
                id,
                name: format!("node-{id}"),
                ready,
            });
            self.nodes.lock().unwrap().insert(id, node);
        }

        fn remove(&self, id: MemberId) {
            self.nodes.lock().unwrap().remove(&id);
        }
    }

    #[async_trait]
    impl ClusterGetter for FakeClusters {
        async fn resolve_by_org_and_id(
            &self,
            _organization_id: OrganizationId,
            member_id: MemberId,
        ) -> anyhow::Result<Option<ClusterHandle>> {
            Ok(self.nodes.lock().unwrap().get(&member_id).cloned())
        }

        async fn resolve_by_id(&self, member_id: MemberId) -> anyhow::Result<Option<ClusterHandle>> {
            Ok(self.nodes.lock().unwrap().get(&member_id).cloned())
        }
    }

    /// Records reconcile calls and vetoes groups larger than `max_members`.
    struct RecordingHandler {
        max_members: usize,
        reconciled: Mutex<Vec<(Vec<MemberId>, bool)>>,
    }

    impl RecordingHandler {
        fn new(max_members: usize) -> Arc<Self> {
            Arc::new(Self {
                max_members,
                reconciled: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CapabilityHandler for RecordingHandler {
        async fn reconcile_state(&self, state: &CapabilityState) -> FleetResult<()> {
            self.reconciled
                .lock()
                .unwrap()
                .push((state.group.member_ids(), state.enabled));
            Ok(())
        }

        async fn validate_state(&self, state: &CapabilityState) -> FleetResult<()> {
            if state.group.members.len() > self.max_members {
                return Err(FleetError::InvalidRequest("group too large".to_string()));
            }
            Ok(())
        }

        fn validate_properties(&self, _group: &Group, properties: &Value) -> FleetResult<()> {
            if properties.is_string() {
                return Err(FleetError::InvalidRequest("properties must be an object".to_string()));
            }
            Ok(())
        }

        async fn members_status(
            &self,
            state: &CapabilityState,
        ) -> FleetResult<BTreeMap<MemberId, String>> {
            Ok(state
                .group
                .member_ids()
                .into_iter()
                .map(|id| (id, "up to date".to_string()))
                .collect())
        }
    }

    fn manager(
        clusters: Arc<FakeClusters>,
        handler: Arc<RecordingHandler>,
    ) -> (GroupManager, StateStore) {
        let store = StateStore::open_in_memory().unwrap();
        let registry = CapabilityRegistry::new().with_handler(DEPLOYMENT_CAPABILITY, handler);
        let manager = GroupManager::new(store.clone(), clusters, Arc::new(registry));
        (manager, store)
    }

    fn create_request(name: &str, members: &[MemberId]) -> CreateGroupRequest {
        CreateGroupRequest {
            name: name.to_string(),
            members: members.to_vec(),
        }
    }

    fn update_request(name: &str, members: &[MemberId]) -> UpdateGroupRequest {
        UpdateGroupRequest {
            name: name.to_string(),
            members: members.to_vec(),
        }
    }

    // ── Create ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_admits_only_ready_members() {
        let clusters = FakeClusters::with(&[(10, true), (11, false), (12, true)]);
        let (manager, store) = manager(clusters, RecordingHandler::new(10));

        let created = manager
            .create_group(7, &create_request("g1", &[10, 11, 12]))
            .await
            .unwrap();
        assert_eq!(created.name, "g1");

        let group = manager.get_group(created.id, false).await.unwrap();
        assert_eq!(group.member_ids(), vec![10, 12]);
        assert_eq!(group.enabled_capabilities, vec![DEPLOYMENT_CAPABILITY.to_string()]);
        assert!(store.find_member(11).unwrap().is_none());
    }

    #[tokio::test]
    async fn create_without_ready_members_fails() {
        let clusters = FakeClusters::with(&[(10, false), (11, false)]);
        let (manager, store) = manager(clusters, RecordingHandler::new(10));

        let err = manager
            .create_group(7, &create_request("g1", &[10, 11]))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::NoReadyMembers));
        assert!(store.list_groups(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_unknown_member() {
        let clusters = FakeClusters::with(&[(10, true)]);
        let (manager, _) = manager(clusters, RecordingHandler::new(10));

        let err = manager
            .create_group(7, &create_request("g1", &[10, 99]))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::MemberNotFound(99)));
    }

    #[tokio::test]
    async fn create_rejects_duplicate_name_and_grouped_member() {
        let clusters = FakeClusters::with(&[(10, true), (11, true)]);
        let (manager, _) = manager(clusters, RecordingHandler::new(10));
        let first = manager
            .create_group(7, &create_request("g1", &[10]))
            .await
            .unwrap();

        let dup = manager
            .create_group(7, &create_request("g1", &[11]))
            .await
            .unwrap_err();
        assert!(matches!(dup, FleetError::GroupAlreadyExists { .. }));

        let taken = manager
            .create_group(7, &create_request("g2", &[11, 10]))
            .await
            .unwrap_err();
        match taken {
            FleetError::MemberAlreadyGrouped {
                member_id,
                group_id,
            } => {
                assert_eq!(member_id, 10);
                assert_eq!(group_id, first.id);
            }
            other => panic!("expected MemberAlreadyGrouped, got {other:?}"),
        }
    }

    // ── Update ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn update_validates_then_reconciles() {
        let clusters = FakeClusters::with(&[(10, true), (11, true)]);
        let handler = RecordingHandler::new(10);
        let (manager, _) = manager(clusters, handler.clone());
        let created = manager
            .create_group(7, &create_request("g1", &[10, 11]))
            .await
            .unwrap();

        manager
            .update_group(7, created.id, &update_request("g1-renamed", &[10]))
            .await
            .unwrap();

        let group = manager.get_group(created.id, false).await.unwrap();
        assert_eq!(group.name, "g1-renamed");
        assert_eq!(group.member_ids(), vec![10]);
        let reconciled = handler.reconciled.lock().unwrap().clone();
        assert_eq!(reconciled, vec![(vec![10], true)]);
    }

    #[tokio::test]
    async fn rejected_update_leaves_membership_unchanged() {
        let clusters = FakeClusters::with(&[(10, true), (11, true), (12, true)]);
        let handler = RecordingHandler::new(2);
        let (manager, store) = manager(clusters, handler.clone());
        let created = manager
            .create_group(7, &create_request("g1", &[10, 11]))
            .await
            .unwrap();

        let err = manager
            .update_group(7, created.id, &update_request("g1", &[10, 11, 12]))
            .await
            .unwrap_err();
        match err {
            FleetError::UpdateRejected { capability, .. } => {
                assert_eq!(capability, DEPLOYMENT_CAPABILITY)
            }
            other => panic!("expected UpdateRejected, got {other:?}"),
        }
        assert_eq!(store.get_group(created.id).unwrap().unwrap().members, vec![10, 11]);
        assert!(store.find_member(12).unwrap().is_none());
        assert!(handler.reconciled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_requires_every_member_ready() {
        let clusters = FakeClusters::with(&[(10, true), (11, false)]);
        let (manager, _) = manager(clusters, RecordingHandler::new(10));
        let created = manager
            .create_group(7, &create_request("g1", &[10]))
            .await
            .unwrap();

        let err = manager
            .update_group(7, created.id, &update_request("g1", &[10, 11]))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::MemberNotReady(11)));
    }

    #[tokio::test]
    async fn update_in_wrong_organization_is_not_found() {
        let clusters = FakeClusters::with(&[(10, true)]);
        let (manager, _) = manager(clusters, RecordingHandler::new(10));
        let created = manager
            .create_group(7, &create_request("g1", &[10]))
            .await
            .unwrap();

        let err = manager
            .update_group(8, created.id, &update_request("g1", &[10]))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::GroupNotFound(_)));
    }

    // ── Read / delete ──────────────────────────────────────────────

    #[tokio::test]
    async fn unresolved_member_reported_as_not_found() {
        let clusters = FakeClusters::with(&[(10, true), (11, true)]);
        let (manager, _) = manager(clusters.clone(), RecordingHandler::new(10));
        let created = manager
            .create_group(7, &create_request("g1", &[10, 11]))
            .await
            .unwrap();
        clusters.remove(11);

        let group = manager.get_group(created.id, true).await.unwrap();
        assert_eq!(group.members.len(), 2);
        assert_eq!(group.members[0].status, "RUNNING");
        assert_eq!(group.members[1].status, CLUSTER_NOT_FOUND_STATUS);
        assert!(group.clusters.contains_key(&10));
        assert!(!group.clusters.contains_key(&11));
    }

    #[tokio::test]
    async fn delete_tears_down_capabilities() {
        let clusters = FakeClusters::with(&[(10, true), (20, true)]);
        let handler = RecordingHandler::new(10);
        let (manager, store) = manager(clusters, handler.clone());
        let created = manager
            .create_group(7, &create_request("g1", &[10]))
            .await
            .unwrap();
        manager
            .create_group(7, &create_request("g2", &[20]))
            .await
            .unwrap();

        manager.delete_group(created.id).await.unwrap();

        assert_eq!(handler.reconciled.lock().unwrap().clone(), vec![(vec![10], false)]);
        assert!(store.find_member(10).unwrap().is_none());
        assert_eq!(manager.list_groups(7).await.unwrap().len(), 1);
        assert!(matches!(
            manager.get_group(created.id, false).await,
            Err(FleetError::GroupNotFound(_))
        ));
    }

    // ── Capabilities ───────────────────────────────────────────────

    #[tokio::test]
    async fn capability_disable_and_enable() {
        let clusters = FakeClusters::with(&[(10, true)]);
        let handler = RecordingHandler::new(10);
        let (manager, _) = manager(clusters, handler.clone());
        let created = manager
            .create_group(7, &create_request("g1", &[10]))
            .await
            .unwrap();

        let info = manager
            .capability(created.id, DEPLOYMENT_CAPABILITY)
            .await
            .unwrap();
        assert!(info.enabled);
        assert_eq!(info.members_status[&10], "up to date");

        manager
            .disable_capability(created.id, DEPLOYMENT_CAPABILITY)
            .await
            .unwrap();
        let group = manager.get_group(created.id, false).await.unwrap();
        assert!(group.enabled_capabilities.is_empty());

        let bad = manager
            .enable_capability(created.id, DEPLOYMENT_CAPABILITY, Value::String("x".into()))
            .await;
        assert!(matches!(bad, Err(FleetError::InvalidRequest(_))));

        manager
            .enable_capability(
                created.id,
                DEPLOYMENT_CAPABILITY,
                serde_json::json!({"mode": "auto"}),
            )
            .await
            .unwrap();
        let all = manager.capabilities(created.id).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].enabled);
        assert_eq!(all[0].properties, serde_json::json!({"mode": "auto"}));
        assert_eq!(
            handler.reconciled.lock().unwrap().clone(),
            vec![(vec![10], false), (vec![10], true)]
        );
    }

    #[tokio::test]
    async fn unknown_capability_names_are_rejected() {
        let clusters = FakeClusters::with(&[(10, true)]);
        let (manager, _) = manager(clusters, RecordingHandler::new(10));
        let created = manager
            .create_group(7, &create_request("g1", &[10]))
            .await
            .unwrap();

        let err = manager
            .enable_capability(created.id, "backup", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::UnknownCapability(_)));
    }
}
