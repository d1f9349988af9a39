//! In-memory node resolver and installer engine shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fleetgrid_core::config::{DeploymentConfig, LoggingConfig};
use fleetgrid_core::telemetry::init_tracing;
use fleetgrid_core::{
    CapabilityRegistry, Cluster, ClusterGetter, ClusterHandle, ConnectionDescriptor,
    CreateGroupRequest, DEPLOYMENT_CAPABILITY, Group,
};
use fleetgrid_deployment::{
    DeploymentManager, InstalledRelease, PackageInstaller, PackageManifest, PackageRef,
};
use fleetgrid_group::GroupManager;
use fleetgrid_state::{GroupId, MemberId, OrganizationId, StateStore};

pub const ORG: OrganizationId = 7;
pub const ORG_NAME: &str = "acme";
pub const LATEST_VERSION: &str = "1.2.3";

// ── Nodes ──────────────────────────────────────────────────────────

pub struct FakeCluster {
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
        "google"
    }
    fn distribution(&self) -> &str {
        "gke"
    }
    async fn is_ready(&self) -> anyhow::Result<bool> {
        Ok(self.ready)
    }
    async fn connection(&self) -> anyhow::Result<ConnectionDescriptor> {
        Ok(ConnectionDescriptor(self.name.as_bytes().to_vec()))
    }
    async fn status(&self) -> anyhow::Result<String> {
        Ok("RUNNING".to_string())
    }
}

#[derive(Default)]
pub struct FakeClusters {
    nodes: Mutex<HashMap<MemberId, ClusterHandle>>,
}

impl FakeClusters {
    pub fn add(&self, id: MemberId, ready: bool) {
        let node: ClusterHandle = Arc::new(FakeCluster {
            id,
            name: node_name(id),
            ready,
        });
        self.nodes.lock().unwrap().insert(id, node);
    }

    pub fn remove(&self, id: MemberId) {
        self.nodes.lock().unwrap().remove(&id);
    }
}

#[async_trait]
impl ClusterGetter for FakeClusters {
    async fn resolve_by_org_and_id(
        &self,
        organization_id: OrganizationId,
        member_id: MemberId,
    ) -> anyhow::Result<Option<ClusterHandle>> {
        if organization_id != ORG {
            return Ok(None);
        }
        Ok(self.nodes.lock().unwrap().get(&member_id).cloned())
    }

    async fn resolve_by_id(&self, member_id: MemberId) -> anyhow::Result<Option<ClusterHandle>> {
        Ok(self.nodes.lock().unwrap().get(&member_id).cloned())
    }
}

pub fn node_name(id: MemberId) -> String {
    format!("node-{id}")
}

// ── Installer engine ───────────────────────────────────────────────

/// Keeps installed releases per (node name, release name).
#[derive(Default)]
pub struct FakeInstaller {
    releases: Mutex<HashMap<(String, String), InstalledRelease>>,
    calls: Mutex<Vec<String>>,
    failing_nodes: Mutex<HashSet<String>>,
    unreachable_nodes: Mutex<HashSet<String>>,
}

impl FakeInstaller {
    /// Make install, upgrade and delete fail on the node.
    pub fn fail_on(&self, id: MemberId) {
        self.failing_nodes.lock().unwrap().insert(node_name(id));
    }

    /// Make release listing fail on the node.
    pub fn fail_list_on(&self, id: MemberId) {
        self.unreachable_nodes.lock().unwrap().insert(node_name(id));
    }

    /// Calls that reached the node.
    pub fn calls_on(&self, id: MemberId) -> Vec<String> {
        let marker = format!(":{}:", node_name(id));
        self.calls()
            .into_iter()
            .filter(|c| c.contains(&marker))
            .collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, action: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(&format!("{action}:")))
            .count()
    }

    pub fn installed(&self, id: MemberId, release: &str) -> Option<InstalledRelease> {
        self.releases
            .lock()
            .unwrap()
            .get(&(node_name(id), release.to_string()))
            .cloned()
    }

    /// Change the applied values behind the orchestrator's back.
    pub fn tamper_values(&self, id: MemberId, release: &str, values: &[u8]) {
        if let Some(r) = self
            .releases
            .lock()
            .unwrap()
            .get_mut(&(node_name(id), release.to_string()))
        {
            r.values = values.to_vec();
        }
    }

    /// Remove a release behind the orchestrator's back.
    pub fn uninstall(&self, id: MemberId, release: &str) {
        self.releases
            .lock()
            .unwrap()
            .remove(&(node_name(id), release.to_string()));
    }

    fn node(connection: &ConnectionDescriptor) -> String {
        String::from_utf8_lossy(&connection.0).into_owned()
    }

    fn record(&self, action: &str, node: &str, release: &str) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{action}:{node}:{release}"));
        if self.failing_nodes.lock().unwrap().contains(node) {
            anyhow::bail!("{node} rejected {action}");
        }
        Ok(())
    }

    fn store(
        &self,
        node: String,
        manifest: &PackageManifest,
        release_name: &str,
        values: &[u8],
    ) {
        self.releases.lock().unwrap().insert(
            (node, release_name.to_string()),
            InstalledRelease {
                name: release_name.to_string(),
                package_name: manifest.name.clone(),
                package_version: manifest.version.clone(),
                status: "DEPLOYED".to_string(),
                values: values.to_vec(),
            },
        );
    }
}

#[async_trait]
impl PackageInstaller for FakeInstaller {
    async fn resolve(
        &self,
        package: &PackageRef,
        _organization_name: &str,
    ) -> anyhow::Result<PackageManifest> {
        // Chart lookup is a network call in practice.
        tokio::task::yield_now().await;
        let name = package.name.rsplit('/').next().unwrap_or(&package.name);
        if name == "missing" {
            anyhow::bail!("chart {} not found in {}", package.name, package.source);
        }
        let version = if package.version.is_empty() {
            LATEST_VERSION.to_string()
        } else {
            package.version.clone()
        };
        Ok(PackageManifest {
            name: name.to_string(),
            version,
            description: format!("{name} package"),
        })
    }

    async fn install(
        &self,
        connection: &ConnectionDescriptor,
        manifest: &PackageManifest,
        _namespace: &str,
        release_name: &str,
        values: &[u8],
        dry_run: bool,
    ) -> anyhow::Result<()> {
        let node = Self::node(connection);
        self.record("install", &node, release_name)?;
        if !dry_run {
            self.store(node, manifest, release_name, values);
        }
        Ok(())
    }

    async fn upgrade(
        &self,
        connection: &ConnectionDescriptor,
        manifest: &PackageManifest,
        release_name: &str,
        values: &[u8],
        dry_run: bool,
    ) -> anyhow::Result<()> {
        let node = Self::node(connection);
        self.record("upgrade", &node, release_name)?;
        if !dry_run {
            self.store(node, manifest, release_name, values);
        }
        Ok(())
    }

    async fn list_by_name(
        &self,
        connection: &ConnectionDescriptor,
        release_name: &str,
    ) -> anyhow::Result<Vec<InstalledRelease>> {
        let node = Self::node(connection);
        if self.unreachable_nodes.lock().unwrap().contains(&node) {
            anyhow::bail!("{node} unreachable");
        }
        Ok(self
            .releases
            .lock()
            .unwrap()
            .get(&(node, release_name.to_string()))
            .cloned()
            .into_iter()
            .collect())
    }

    async fn delete(
        &self,
        connection: &ConnectionDescriptor,
        release_name: &str,
    ) -> anyhow::Result<()> {
        let node = Self::node(connection);
        self.record("delete", &node, release_name)?;
        match self
            .releases
            .lock()
            .unwrap()
            .remove(&(node, release_name.to_string()))
        {
            Some(_) => Ok(()),
            None => anyhow::bail!("release {release_name} not found"),
        }
    }
}

// ── Harness ────────────────────────────────────────────────────────

pub struct Fleet {
    pub store: StateStore,
    pub clusters: Arc<FakeClusters>,
    pub installer: Arc<FakeInstaller>,
    pub deployments: DeploymentManager,
    pub groups: GroupManager,
}

impl Fleet {
    pub fn new(nodes: &[(MemberId, bool)]) -> Self {
        Self::with_registry(nodes, CapabilityRegistry::new())
    }

    /// Build a fleet whose registry holds `extra` handlers plus the
    /// deployment handler.
    pub fn with_registry(nodes: &[(MemberId, bool)], extra: CapabilityRegistry) -> Self {
        init_tracing(&LoggingConfig {
            filter: "debug".to_string(),
            json: false,
        });
        let store = StateStore::open_in_memory().unwrap();
        let clusters = Arc::new(FakeClusters::default());
        for (id, ready) in nodes {
            clusters.add(*id, *ready);
        }
        let installer = Arc::new(FakeInstaller::default());
        let deployments = DeploymentManager::new(store.clone(), clusters.clone(), installer.clone())
            .with_config(DeploymentConfig {
                default_namespace: "default".to_string(),
                member_timeout_secs: 5,
            });
        let registry = extra.with_handler(DEPLOYMENT_CAPABILITY, Arc::new(deployments.clone()));
        let groups = GroupManager::new(store.clone(), clusters.clone(), Arc::new(registry));
        Self {
            store,
            clusters,
            installer,
            deployments,
            groups,
        }
    }

    pub async fn create_group(&self, name: &str, members: &[MemberId]) -> GroupId {
        self.groups
            .create_group(
                ORG,
                &CreateGroupRequest {
                    name: name.to_string(),
                    members: members.to_vec(),
                },
            )
            .await
            .unwrap()
            .id
    }

    pub async fn group(&self, id: GroupId) -> Group {
        self.groups.get_group(id, false).await.unwrap()
    }
}
