//! Endpoint directory: logical module targets to physical base URLs
//!
//! The directory is populated by the version handshake, which lives outside
//! this crate. A missing entry is a normal outcome, not an error.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use tracing::debug;

use crate::types::{InterfaceRole, ModuleId, ModuleTarget, ProtocolVersion};

/// Resolves a module target to the base URL of the remote module endpoint
pub trait EndpointDirectory: Send + Sync {
    fn resolve(&self, target: &ModuleTarget) -> Option<String>;
}

/// In-memory directory keyed by module and role, one URL per protocol version
#[derive(Debug, Default)]
pub struct StaticDirectory {
    endpoints: RwLock<HashMap<(ModuleId, InterfaceRole), BTreeMap<ProtocolVersion, String>>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the endpoint of a module/role at a version
    pub fn register(
        &self,
        module: ModuleId,
        role: InterfaceRole,
        version: ProtocolVersion,
        url: impl Into<String>,
    ) {
        let url = url.into();
        debug!("Directory: {}/{}@{} -> {}", module, role, version, url);
        self.endpoints
            .write()
            .entry((module, role))
            .or_default()
            .insert(version, url.trim_end_matches('/').to_string());
    }

    /// Builder-style registration
    pub fn with_endpoint(
        self,
        module: ModuleId,
        role: InterfaceRole,
        version: ProtocolVersion,
        url: impl Into<String>,
    ) -> Self {
        self.register(module, role, version, url);
        self
    }

    /// Remove every version of a module/role; returns whether anything was removed
    pub fn remove(&self, module: ModuleId, role: InterfaceRole) -> bool {
        self.endpoints.write().remove(&(module, role)).is_some()
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EndpointDirectory for StaticDirectory {
    /// Exact version match when the target pins one, otherwise the newest
    /// registered version
    fn resolve(&self, target: &ModuleTarget) -> Option<String> {
        let endpoints = self.endpoints.read();
        let versions = endpoints.get(&(target.module, target.role))?;

        match target.version {
            Some(version) => versions.get(&version).cloned(),
            None => versions.values().next_back().cloned(),
        }
    }
}
