//! fleetgrid-group: group membership service.
//!
//! Owns the group lifecycle, keeps every node in at most one group and
//! runs the validate/reconcile handshake with the enabled capability
//! handlers around each membership change.

pub mod manager;

pub use manager::{CapabilityInfo, GroupManager};
