//! fleetgrid-state: embedded state store for FleetGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for groups, their memberships, per-group capability records and
//! desired-state deployment records.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Groups and memberships are keyed by numeric id; capabilities and
//! deployments use composite `{group_id}/{name}` keys so the records of one
//! group can be found with a prefix scan.
//!
//! The membership table is keyed by member id, which makes "a node belongs
//! to at most one group" a storage-level constraint: group creation and
//! member updates check and write it inside a single write transaction.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
