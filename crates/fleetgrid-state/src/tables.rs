//! redb table definitions for the FleetGrid state store.
//!
//! Values are JSON-serialized domain types. Composite keys follow the
//! pattern `{group_id}/{name}`.

use redb::TableDefinition;

/// Group records keyed by group id.
pub const GROUPS: TableDefinition<u64, &[u8]> = TableDefinition::new("groups");

/// Membership rows keyed by member id. One row per member, so a member
/// can never be recorded in two groups at once.
pub const MEMBERS: TableDefinition<u64, &[u8]> = TableDefinition::new("members");

/// Capability records keyed by `{group_id}/{capability}`.
pub const CAPABILITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("capabilities");

/// Desired deployments keyed by `{group_id}/{release_name}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Id sequences keyed by sequence name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Sequence name for group ids.
pub const GROUP_SEQUENCE: &str = "groups";
