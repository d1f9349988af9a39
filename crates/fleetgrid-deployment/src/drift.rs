//! Drift detection between an installed release and its desired state.
//!
//! Parameter documents are compared as serialized bytes. Documents that
//! are equal as data but serialized differently count as drift; callers
//! that want semantic equality can swap in [`json_equal`].

use crate::installer::InstalledRelease;

/// Decides whether the applied and the desired parameter bytes match.
pub type ValuesComparator = fn(applied: &[u8], desired: &[u8]) -> bool;

/// Exact byte comparison.
pub fn bytes_equal(applied: &[u8], desired: &[u8]) -> bool {
    applied == desired
}

/// Compare as JSON data, falling back to bytes if either side does not parse.
pub fn json_equal(applied: &[u8], desired: &[u8]) -> bool {
    match (
        serde_json::from_slice::<serde_json::Value>(applied),
        serde_json::from_slice::<serde_json::Value>(desired),
    ) {
        (Ok(a), Ok(d)) => a == d,
        _ => bytes_equal(applied, desired),
    }
}

/// A release is stale if its package name, version or applied values
/// differ from the desired ones.
pub fn is_stale(
    installed: &InstalledRelease,
    package_name: &str,
    package_version: &str,
    desired_values: &[u8],
    same_values: ValuesComparator,
) -> bool {
    installed.package_name != package_name
        || installed.package_version != package_version
        || !same_values(&installed.values, desired_values)
}
