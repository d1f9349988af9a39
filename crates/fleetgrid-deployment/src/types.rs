//! Deployment request and response shapes.

use std::collections::BTreeMap;

use fleetgrid_core::{FleetError, FleetResult};
use fleetgrid_state::{DeploymentRecord, MemberId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEPLOYED_STATUS: &str = "deployed";
pub const FAILED_STATUS: &str = "failed";
pub const DELETED_STATUS: &str = "deleted";
pub const NOT_INSTALLED_STATUS: &str = "not installed";
pub const STALE_STATUS: &str = "stale";
pub const UP_TO_DATE_STATUS: &str = "up to date";

/// Longest release name the installer engine accepts.
pub const RELEASE_NAME_MAX_LEN: usize = 53;

/// Create or update request for a group deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequest {
    /// Generated on create when empty.
    #[serde(default)]
    pub release_name: String,
    pub package_name: String,
    /// Latest resolvable version when empty.
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub values: Value,
    #[serde(default, rename = "valueOverridesByMember")]
    pub value_overrides: BTreeMap<MemberId, Value>,
    #[serde(default)]
    pub dry_run: bool,
    /// On update: keep the stored values and overrides.
    #[serde(default)]
    pub reuse_values: bool,
}

impl DeploymentRequest {
    pub fn validate(&self) -> FleetResult<()> {
        if self.package_name.trim().is_empty() {
            return Err(FleetError::InvalidRequest(
                "package name is required".to_string(),
            ));
        }
        if !self.values.is_null() && !self.values.is_object() {
            return Err(FleetError::InvalidRequest(
                "values must be an object".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome or live state of a release on one member.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStatus {
    pub member_id: MemberId,
    pub member_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cloud: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub distribution: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default)]
    pub stale: bool,
    #[serde(rename = "statusText")]
    pub status: String,
}

impl TargetStatus {
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn is_failure(&self) -> bool {
        self.status.starts_with(FAILED_STATUS)
    }
}

/// Desired state of a release plus the live status of every target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInfo {
    pub release_name: String,
    pub package_name: String,
    pub chart_name: String,
    pub description: String,
    pub version: String,
    pub namespace: String,
    pub values: Value,
    pub value_overrides: BTreeMap<MemberId, Value>,
    pub created_at: u64,
    pub updated_at: u64,
    pub targets: Vec<TargetStatus>,
}

impl DeploymentInfo {
    pub(crate) fn from_record(record: &DeploymentRecord, targets: Vec<TargetStatus>) -> Self {
        Self {
            release_name: record.release_name.clone(),
            package_name: record.package_name.clone(),
            chart_name: record.chart_name.clone(),
            description: record.description.clone(),
            version: record.package_version.clone(),
            namespace: record.namespace.clone(),
            values: record.values.clone(),
            value_overrides: record.overrides(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            targets,
        }
    }
}

/// List entry for a group's deployments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSummary {
    pub release_name: String,
    pub package_name: String,
    pub chart_name: String,
    pub version: String,
    pub namespace: String,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<&DeploymentRecord> for DeploymentSummary {
    fn from(record: &DeploymentRecord) -> Self {
        Self {
            release_name: record.release_name.clone(),
            package_name: record.package_name.clone(),
            chart_name: record.chart_name.clone(),
            version: record.package_version.clone(),
            namespace: record.namespace.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
