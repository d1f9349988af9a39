//! StateStore: redb-backed state persistence for FleetGrid.
//!
//! Provides typed CRUD operations over groups, memberships, capabilities
//! and desired deployments. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(GROUPS).map_err(map_err!(Table))?;
        txn.open_table(MEMBERS).map_err(map_err!(Table))?;
        txn.open_table(CAPABILITIES).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Groups ─────────────────────────────────────────────────────

    /// Create a group with its initial members.
    ///
    /// The name must be unique within the organization and none of the
    /// members may belong to another group. Both checks and the writes
    /// happen in one write transaction.
    pub fn create_group(
        &self,
        name: &str,
        organization_id: OrganizationId,
        members: &[MemberId],
    ) -> StateResult<GroupRecord> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record;
        {
            let mut groups = txn.open_table(GROUPS).map_err(map_err!(Table))?;
            let mut memberships = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
            let mut sequences = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;

            for entry in groups.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let existing: GroupRecord = decode(value.value())?;
                if existing.organization_id == organization_id && existing.name == name {
                    return Err(StateError::AlreadyExists(format!(
                        "group {name} in organization {organization_id}"
                    )));
                }
            }

            for member_id in members {
                let current = memberships
                    .get(*member_id)
                    .map_err(map_err!(Read))?
                    .map(|guard| decode::<MemberRecord>(guard.value()))
                    .transpose()?;
                if let Some(current) = current {
                    return Err(StateError::MemberConflict {
                        member_id: *member_id,
                        group_id: current.group_id,
                    });
                }
            }

            let last = sequences
                .get(GROUP_SEQUENCE)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            let id = last + 1;
            sequences
                .insert(GROUP_SEQUENCE, id)
                .map_err(map_err!(Write))?;

            record = GroupRecord {
                id,
                uid: generate_uid(),
                name: name.to_string(),
                organization_id,
                members: members.to_vec(),
                created_at: now,
                updated_at: now,
            };
            let value = encode(&record)?;
            groups
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;

            for member_id in members {
                let row = encode(&MemberRecord {
                    member_id: *member_id,
                    group_id: id,
                    joined_at: now,
                })?;
                memberships
                    .insert(*member_id, row.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(group_id = record.id, %name, members = members.len(), "group created");
        Ok(record)
    }

    /// Get a group by id.
    pub fn get_group(&self, group_id: GroupId) -> StateResult<Option<GroupRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(GROUPS).map_err(map_err!(Table))?;
        match table.get(group_id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Find a group by name within an organization.
    pub fn find_group_by_name(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> StateResult<Option<GroupRecord>> {
        Ok(self
            .list_groups(Some(organization_id))?
            .into_iter()
            .find(|g| g.name == name))
    }

    /// List groups, optionally restricted to one organization.
    pub fn list_groups(
        &self,
        organization_id: Option<OrganizationId>,
    ) -> StateResult<Vec<GroupRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(GROUPS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let group: GroupRecord = decode(value.value())?;
            if organization_id.is_none_or(|org| org == group.organization_id) {
                results.push(group);
            }
        }
        Ok(results)
    }

    /// Rename a group and replace its member set.
    ///
    /// Members that left lose their membership row, new members gain one.
    /// Fails with `MemberConflict` if a new member belongs to another group
    /// and with `AlreadyExists` if the new name is taken in the organization.
    pub fn update_group(
        &self,
        group_id: GroupId,
        name: &str,
        members: &[MemberId],
    ) -> StateResult<GroupRecord> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut record: GroupRecord;
        {
            let mut groups = txn.open_table(GROUPS).map_err(map_err!(Table))?;
            let mut memberships = txn.open_table(MEMBERS).map_err(map_err!(Table))?;

            record = groups
                .get(group_id)
                .map_err(map_err!(Read))?
                .map(|guard| decode::<GroupRecord>(guard.value()))
                .transpose()?
                .ok_or_else(|| StateError::NotFound(format!("group {group_id}")))?;

            if record.name != name {
                for entry in groups.iter().map_err(map_err!(Read))? {
                    let (_, value) = entry.map_err(map_err!(Read))?;
                    let other: GroupRecord = decode(value.value())?;
                    if other.id != group_id
                        && other.organization_id == record.organization_id
                        && other.name == name
                    {
                        return Err(StateError::AlreadyExists(format!(
                            "group {name} in organization {}",
                            record.organization_id
                        )));
                    }
                }
            }

            for member_id in members {
                let current = memberships
                    .get(*member_id)
                    .map_err(map_err!(Read))?
                    .map(|guard| decode::<MemberRecord>(guard.value()))
                    .transpose()?;
                match current {
                    Some(current) if current.group_id != group_id => {
                        return Err(StateError::MemberConflict {
                            member_id: *member_id,
                            group_id: current.group_id,
                        });
                    }
                    Some(_) => {}
                    None => {
                        let row = encode(&MemberRecord {
                            member_id: *member_id,
                            group_id,
                            joined_at: now,
                        })?;
                        memberships
                            .insert(*member_id, row.as_slice())
                            .map_err(map_err!(Write))?;
                    }
                }
            }

            for departed in record.members.iter().filter(|m| !members.contains(m)) {
                memberships.remove(*departed).map_err(map_err!(Write))?;
            }

            record.name = name.to_string();
            record.members = members.to_vec();
            record.updated_at = now;
            let value = encode(&record)?;
            groups
                .insert(group_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(group_id, %name, members = members.len(), "group updated");
        Ok(record)
    }

    /// Delete a group together with its memberships, capabilities and any
    /// remaining deployment records. Returns true if it existed.
    pub fn delete_group(&self, group_id: GroupId) -> StateResult<bool> {
        let prefix = format!("{group_id}/");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut groups = txn.open_table(GROUPS).map_err(map_err!(Table))?;
            let mut memberships = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
            let mut capabilities = txn.open_table(CAPABILITIES).map_err(map_err!(Table))?;
            let mut deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;

            let record = groups
                .remove(group_id)
                .map_err(map_err!(Write))?
                .map(|guard| decode::<GroupRecord>(guard.value()))
                .transpose()?;
            existed = record.is_some();

            if let Some(record) = record {
                for member_id in &record.members {
                    memberships.remove(*member_id).map_err(map_err!(Write))?;
                }
            }

            let capability_keys = keys_with_prefix(&capabilities, &prefix)?;
            for key in &capability_keys {
                capabilities.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            let deployment_keys = keys_with_prefix(&deployments, &prefix)?;
            for key in &deployment_keys {
                deployments.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(group_id, existed, "group deleted");
        Ok(existed)
    }

    // ── Memberships ────────────────────────────────────────────────

    /// Look up which group, if any, a member belongs to.
    pub fn find_member(&self, member_id: MemberId) -> StateResult<Option<MemberRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
        match table.get(member_id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    // ── Capabilities ───────────────────────────────────────────────

    /// Insert or update a capability record.
    pub fn put_capability(&self, capability: &CapabilityRecord) -> StateResult<()> {
        let key = capability.table_key();
        let value = encode(capability)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CAPABILITIES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, enabled = capability.enabled, "capability stored");
        Ok(())
    }

    /// Get a capability record of a group by name.
    pub fn get_capability(
        &self,
        group_id: GroupId,
        name: &str,
    ) -> StateResult<Option<CapabilityRecord>> {
        let key = capability_key(group_id, name);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CAPABILITIES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all capability records of a group.
    pub fn list_capabilities(&self, group_id: GroupId) -> StateResult<Vec<CapabilityRecord>> {
        let prefix = format!("{group_id}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CAPABILITIES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                results.push(decode(value.value())?);
            }
        }
        Ok(results)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert a new deployment record. Fails with `AlreadyExists` if the
    /// group already has a release with that name.
    pub fn insert_deployment(&self, deployment: &DeploymentRecord) -> StateResult<()> {
        let key = deployment.table_key();
        let value = encode(deployment)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(format!("deployment {key}")));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "deployment inserted");
        Ok(())
    }

    /// Insert or update a deployment record.
    pub fn put_deployment(&self, deployment: &DeploymentRecord) -> StateResult<()> {
        let key = deployment.table_key();
        let value = encode(deployment)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "deployment stored");
        Ok(())
    }

    /// Get a deployment of a group by release name.
    pub fn get_deployment(
        &self,
        group_id: GroupId,
        release_name: &str,
    ) -> StateResult<Option<DeploymentRecord>> {
        let key = deployment_key(group_id, release_name);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all deployments of a group.
    pub fn list_deployments(&self, group_id: GroupId) -> StateResult<Vec<DeploymentRecord>> {
        let prefix = format!("{group_id}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                results.push(decode(value.value())?);
            }
        }
        Ok(results)
    }

    /// Delete a deployment by group and release name. Returns true if it existed.
    pub fn delete_deployment(&self, group_id: GroupId, release_name: &str) -> StateResult<bool> {
        let key = deployment_key(group_id, release_name);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "deployment deleted");
        Ok(existed)
    }
}

/// Collect the keys of a string-keyed table that start with `prefix`.
fn keys_with_prefix<T>(table: &T, prefix: &str) -> StateResult<Vec<String>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut keys = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, _) = entry.map_err(map_err!(Read))?;
        let key = key.value().to_string();
        if key.starts_with(prefix) {
            keys.push(key);
        }
    }
    Ok(keys)
}

/// Random RFC 4122-shaped identifier.
fn generate_uid() -> String {
    let bits: u128 = rand::random();
    let hex = format!("{bits:032x}");
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
