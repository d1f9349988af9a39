//! Group projection and the group request/response shapes.

use std::collections::BTreeMap;
use std::fmt;

use fleetgrid_state::{GroupId, MemberId, OrganizationId};
use serde::{Deserialize, Serialize};

use crate::cluster::ClusterHandle;
use crate::error::{FleetError, FleetResult};

/// Status reported for a persisted member that no longer resolves.
pub const CLUSTER_NOT_FOUND_STATUS: &str = "cluster not found";

/// A group as seen by callers and capability handlers.
///
/// `clusters` holds the live handles of the members that resolved when the
/// projection was built; it is rebuilt on every read and never persisted.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub uid: String,
    pub name: String,
    pub organization_id: OrganizationId,
    pub members: Vec<Member>,
    pub enabled_capabilities: Vec<String>,
    #[serde(skip)]
    pub clusters: BTreeMap<MemberId, ClusterHandle>,
}

impl Group {
    pub fn member_ids(&self) -> Vec<MemberId> {
        self.members.iter().map(|m| m.id).collect()
    }

    pub fn is_member(&self, member_id: MemberId) -> bool {
        self.members.iter().any(|m| m.id == member_id)
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("organization_id", &self.organization_id)
            .field("members", &self.members)
            .field("enabled_capabilities", &self.enabled_capabilities)
            .field("clusters", &self.clusters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Snapshot of one member node. `status` is informational only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    #[serde(default)]
    pub cloud: String,
    #[serde(default)]
    pub distribution: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub members: Vec<MemberId>,
}

impl CreateGroupRequest {
    pub fn validate(&self) -> FleetResult<()> {
        validate_group_fields(&self.name, &self.members)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateGroupResponse {
    pub name: String,
    pub id: GroupId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateGroupRequest {
    pub name: String,
    pub members: Vec<MemberId>,
}

impl UpdateGroupRequest {
    pub fn validate(&self) -> FleetResult<()> {
        validate_group_fields(&self.name, &self.members)
    }
}

fn validate_group_fields(name: &str, members: &[MemberId]) -> FleetResult<()> {
    if name.trim().is_empty() {
        return Err(FleetError::InvalidRequest("group name is required".to_string()));
    }
    if members.is_empty() {
        return Err(FleetError::InvalidRequest(
            "at least one member is required".to_string(),
        ));
    }
    Ok(())
}
