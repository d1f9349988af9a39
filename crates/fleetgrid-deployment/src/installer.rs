//! Package installer engine contract.
//!
//! The engine renders and applies a release package onto one member. It
//! lives outside FleetGrid, so its errors are opaque `anyhow::Error`s that
//! the orchestrator turns into per-member status text.

use async_trait::async_trait;
use fleetgrid_core::ConnectionDescriptor;

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRef {
    pub release_hint: String,
    pub name: String,
    /// Empty means latest.
    pub version: String,
    pub source: String,
}

/// A resolved, installable package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// Summary of a release installed on a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledRelease {
    pub name: String,
    pub package_name: String,
    pub package_version: String,
    pub status: String,
    /// Parameter document the release was last applied with, as sent.
    pub values: Vec<u8>,
}

#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Resolve a package reference against the organization's repositories.
    async fn resolve(
        &self,
        package: &PackageRef,
        organization_name: &str,
    ) -> anyhow::Result<PackageManifest>;

    async fn install(
        &self,
        connection: &ConnectionDescriptor,
        manifest: &PackageManifest,
        namespace: &str,
        release_name: &str,
        values: &[u8],
        dry_run: bool,
    ) -> anyhow::Result<()>;

    async fn upgrade(
        &self,
        connection: &ConnectionDescriptor,
        manifest: &PackageManifest,
        release_name: &str,
        values: &[u8],
        dry_run: bool,
    ) -> anyhow::Result<()>;

    /// Releases on the member matching `release_name`.
    async fn list_by_name(
        &self,
        connection: &ConnectionDescriptor,
        release_name: &str,
    ) -> anyhow::Result<Vec<InstalledRelease>>;

    async fn delete(&self, connection: &ConnectionDescriptor, release_name: &str)
    -> anyhow::Result<()>;
}
