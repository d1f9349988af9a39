//! Capability handlers and their registry.
//!
//! A capability is a group-scoped feature (deployments being the built-in
//! one) that wants a say in membership changes. The membership service
//! consults every enabled handler before mutating a group and lets it
//! reconcile afterwards. Handlers are dispatched by name only.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use fleetgrid_state::MemberId;
use serde_json::Value;
use tracing::debug;

use crate::error::{FleetError, FleetResult};
use crate::group::Group;

/// Name under which the deployment orchestrator is registered.
pub const DEPLOYMENT_CAPABILITY: &str = "deployment";

/// What a handler sees of a group: the projection plus its own switch and
/// properties.
#[derive(Debug, Clone)]
pub struct CapabilityState {
    pub name: String,
    pub group: Group,
    pub enabled: bool,
    pub properties: Value,
}

#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Converge owned resources with the group state. Called after every
    /// committed membership change and with `enabled = false` when the
    /// capability is switched off or the group is deleted.
    async fn reconcile_state(&self, state: &CapabilityState) -> FleetResult<()>;

    /// Approve or veto a prospective group state.
    async fn validate_state(&self, state: &CapabilityState) -> FleetResult<()>;

    fn validate_properties(&self, group: &Group, properties: &Value) -> FleetResult<()>;

    /// Per-member status text for this capability.
    async fn members_status(
        &self,
        state: &CapabilityState,
    ) -> FleetResult<BTreeMap<MemberId, String>>;
}

/// Named set of capability handlers, populated once at startup.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    handlers: HashMap<String, Arc<dyn CapabilityHandler>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with_handler(mut self, name: &str, handler: Arc<dyn CapabilityHandler>) -> Self {
        self.register(name, handler);
        self
    }

    pub fn register(&mut self, name: &str, handler: Arc<dyn CapabilityHandler>) {
        debug!(capability = %name, "capability handler registered");
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn get(&self, name: &str) -> FleetResult<Arc<dyn CapabilityHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| FleetError::UnknownCapability(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}
