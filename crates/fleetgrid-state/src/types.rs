//! Domain types for the FleetGrid state store.
//!
//! These are the persisted shapes of groups, memberships, capabilities and
//! desired deployments. Runtime views (live member handles, per-member
//! status) are assembled by the services on top and never stored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Numeric identifier of a group.
pub type GroupId = u64;

/// Numeric identifier of a member node.
pub type MemberId = u64;

/// Numeric identifier of an organization.
pub type OrganizationId = u64;

// ── Group ──────────────────────────────────────────────────────────

/// A persisted group of member nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupRecord {
    pub id: GroupId,
    /// Externally visible unique id.
    pub uid: String,
    pub name: String,
    pub organization_id: OrganizationId,
    /// Member ids in admission order.
    pub members: Vec<MemberId>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Membership row: which group a member node belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberRecord {
    pub member_id: MemberId,
    pub group_id: GroupId,
    pub joined_at: u64,
}

// ── Capability ─────────────────────────────────────────────────────

/// Per-group capability switch and its opaque properties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapabilityRecord {
    pub group_id: GroupId,
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub properties: Value,
}

impl CapabilityRecord {
    /// Composite table key: `{group_id}/{name}`.
    pub fn table_key(&self) -> String {
        capability_key(self.group_id, &self.name)
    }
}

pub(crate) fn capability_key(group_id: GroupId, name: &str) -> String {
    format!("{group_id}/{name}")
}

// ── Deployment ─────────────────────────────────────────────────────

/// Desired state of one release across a group's members.
///
/// There is one record per `(group_id, release_name)`. `targets` records
/// every member the release was ever rolled out to, together with that
/// member's value overrides, so the release can still be removed from
/// members that have since left the group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentRecord {
    pub group_id: GroupId,
    pub organization_name: String,
    pub release_name: String,
    /// Package reference as requested (e.g. `stable/nginx`).
    pub package_name: String,
    /// Package name reported by the resolved manifest.
    pub chart_name: String,
    pub package_version: String,
    pub package_source: String,
    pub namespace: String,
    pub description: String,
    /// Base parameter document shared by every member.
    #[serde(default)]
    pub values: Value,
    /// Recorded targets keyed by member id.
    #[serde(default)]
    pub targets: BTreeMap<MemberId, TargetRecord>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl DeploymentRecord {
    /// Composite table key: `{group_id}/{release_name}`.
    pub fn table_key(&self) -> String {
        deployment_key(self.group_id, &self.release_name)
    }

    /// Per-member override documents, for members that have one.
    pub fn overrides(&self) -> BTreeMap<MemberId, Value> {
        self.targets
            .iter()
            .filter_map(|(id, t)| t.values.clone().map(|v| (*id, v)))
            .collect()
    }
}

pub(crate) fn deployment_key(group_id: GroupId, release_name: &str) -> String {
    format!("{group_id}/{release_name}")
}

/// A member a deployment has been targeted at.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TargetRecord {
    pub member_name: String,
    /// Override document merged over the base values for this member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
    /// Set once the release has been removed from a member that left the group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<u64>,
}

impl TargetRecord {
    pub fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }
}
