//! FleetGrid error taxonomy.

use fleetgrid_state::{GroupId, MemberId, OrganizationId, StateError};
use thiserror::Error;

/// Result type alias for FleetGrid operations.
pub type FleetResult<T> = Result<T, FleetError>;

/// Coarse classification an outer layer maps to its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Rejected,
    BadRequest,
    Internal,
}

/// Errors surfaced by group, capability and deployment operations.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("deployment {release_name} not found in group {group_id}")]
    DeploymentNotFound {
        group_id: GroupId,
        release_name: String,
    },

    #[error("member cluster not found: {0}")]
    MemberNotFound(MemberId),

    #[error("capability {name} not found for group {group_id}")]
    CapabilityNotFound { group_id: GroupId, name: String },

    #[error("group {name} already exists in organization {organization_id}")]
    GroupAlreadyExists {
        name: String,
        organization_id: OrganizationId,
    },

    #[error("deployment {release_name} already exists in group {group_id}")]
    DeploymentAlreadyExists {
        group_id: GroupId,
        release_name: String,
    },

    #[error("member {member_id} already belongs to group {group_id}")]
    MemberAlreadyGrouped { member_id: MemberId, group_id: GroupId },

    #[error("member {0} is not ready")]
    MemberNotReady(MemberId),

    #[error("no ready members")]
    NoReadyMembers,

    /// A capability handler vetoed a membership change.
    #[error("group update rejected by capability {capability}: {source}")]
    UpdateRejected {
        capability: String,
        #[source]
        source: Box<FleetError>,
    },

    #[error("failed to resolve package {package}: {source}")]
    PackageResolutionFailed {
        package: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid release name: {0}")]
    InvalidReleaseName(String),

    #[error("{context}: {source}")]
    State {
        context: String,
        #[source]
        source: StateError,
    },

    /// Failure of an external collaborator (node resolver, installer engine).
    #[error("{context}: {source}")]
    Collaborator {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

impl FleetError {
    /// Wrap a state store error with the operation it happened in.
    pub fn state(context: impl Into<String>, source: StateError) -> Self {
        match source {
            StateError::MemberConflict {
                member_id,
                group_id,
            } => FleetError::MemberAlreadyGrouped {
                member_id,
                group_id,
            },
            source => FleetError::State {
                context: context.into(),
                source,
            },
        }
    }

    /// Wrap a collaborator error with the operation it happened in.
    pub fn collaborator(context: impl Into<String>, source: anyhow::Error) -> Self {
        FleetError::Collaborator {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FleetError::GroupNotFound(_)
            | FleetError::DeploymentNotFound { .. }
            | FleetError::MemberNotFound(_)
            | FleetError::CapabilityNotFound { .. }
            | FleetError::UnknownCapability(_) => ErrorKind::NotFound,
            FleetError::GroupAlreadyExists { .. }
            | FleetError::DeploymentAlreadyExists { .. }
            | FleetError::MemberAlreadyGrouped { .. } => ErrorKind::Conflict,
            FleetError::MemberNotReady(_)
            | FleetError::NoReadyMembers
            | FleetError::UpdateRejected { .. } => ErrorKind::Rejected,
            FleetError::InvalidRequest(_)
            | FleetError::InvalidReleaseName(_)
            | FleetError::PackageResolutionFailed { .. } => ErrorKind::BadRequest,
            FleetError::State { source, .. } if source.is_not_found() => ErrorKind::NotFound,
            FleetError::State { .. } | FleetError::Collaborator { .. } => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<StateError> for FleetError {
    fn from(source: StateError) -> Self {
        FleetError::state("state store", source)
    }
}
