//! Node resolution contract.
//!
//! A member node is known to the system only by id. The resolver turns
//! that id into a live handle the services can query and connect to. Both
//! traits are implemented outside FleetGrid; their failures are opaque and
//! travel as `anyhow::Error`.

use std::sync::Arc;

use async_trait::async_trait;
use fleetgrid_state::{MemberId, OrganizationId};

/// Opaque connection material handed to the package installer engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionDescriptor(pub Vec<u8>);

/// A live, connectable member node.
#[async_trait]
pub trait Cluster: Send + Sync {
    fn id(&self) -> MemberId;
    fn name(&self) -> &str;
    fn cloud(&self) -> &str;
    fn distribution(&self) -> &str;

    /// Whether the node currently accepts workloads.
    async fn is_ready(&self) -> anyhow::Result<bool>;

    async fn connection(&self) -> anyhow::Result<ConnectionDescriptor>;

    /// Human-readable live status of the node.
    async fn status(&self) -> anyhow::Result<String>;
}

pub type ClusterHandle = Arc<dyn Cluster>;

/// Resolves member ids to live node handles.
///
/// `Ok(None)` means the node does not exist (any more); `Err` means the
/// lookup itself failed.
#[async_trait]
pub trait ClusterGetter: Send + Sync {
    async fn resolve_by_org_and_id(
        &self,
        organization_id: OrganizationId,
        member_id: MemberId,
    ) -> anyhow::Result<Option<ClusterHandle>>;

    /// Lookup without organization scope, used to reach departed members.
    async fn resolve_by_id(&self, member_id: MemberId) -> anyhow::Result<Option<ClusterHandle>>;
}
