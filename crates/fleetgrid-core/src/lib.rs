//! fleetgrid-core: shared vocabulary of FleetGrid.
//!
//! Holds the error taxonomy, the group projection and request types, the
//! contracts of the external collaborators (node resolution) and of the
//! pluggable capability handlers, plus configuration and tracing bootstrap.

pub mod capability;
pub mod cluster;
pub mod config;
pub mod error;
pub mod group;
pub mod telemetry;

pub use capability::{CapabilityHandler, CapabilityRegistry, CapabilityState, DEPLOYMENT_CAPABILITY};
pub use cluster::{Cluster, ClusterGetter, ClusterHandle, ConnectionDescriptor};
pub use config::FleetConfig;
pub use error::{ErrorKind, FleetError, FleetResult};
pub use group::{CreateGroupRequest, CreateGroupResponse, Group, Member, UpdateGroupRequest};
