//! fleetgrid-deployment: group deployment orchestrator.
//!
//! Keeps one desired-state record per (group, release), detects drift per
//! member and installs, upgrades or deletes the release on every member
//! concurrently, reporting one status per member.
//!
//! # Architecture
//!
//! - [`installer`]: contract of the external package installer engine.
//! - [`values`]: rendering of per-member parameter documents.
//! - [`drift`]: staleness check between installed and desired state.
//! - [`fanout`]: one task per member, joined in dispatch order.
//! - [`manager`]: the orchestrator, also registered as the `deployment`
//!   capability handler of every group.

pub mod drift;
pub mod fanout;
pub mod installer;
pub mod manager;
pub mod naming;
pub mod types;
pub mod values;

pub use drift::{ValuesComparator, bytes_equal, is_stale, json_equal};
pub use installer::{InstalledRelease, PackageInstaller, PackageManifest, PackageRef};
pub use manager::DeploymentManager;
pub use types::*;
