use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;

use synapse_sandbox_platform::get_platform_adapter;
use synapse_sandbox_policy::Policy;

use crate::backend::{Backend, LocalBackend};
use crate::error::Result;
use crate::id::BackendId;

/// Inputs to [`Provider::create`]: the effective policy for this backend
/// (already path-expanded by the caller), the working directory the backend
/// should start in, and the opaque `providerOptions` map from `Config`.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub cwd: String,
    pub policy: Policy,
    pub provider_options: BTreeMap<String, Value>,
}

/// Status entry for [`Provider::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStatus {
    pub id: BackendId,
    pub status: String,
}

/// A factory + lifecycle manager for backends of one kind. Providers track
/// the backends they create; `destroy` of an id they never created (or
/// already destroyed) is a silent no-op, never an error.
#[async_trait]
pub trait Provider: Send {
    fn provider_type(&self) -> &str;
    async fn create(&mut self, options: CreateOptions) -> Result<(BackendId, Box<dyn Backend>)>;
    async fn destroy(&mut self, id: &BackendId);
    fn list(&self) -> Vec<BackendStatus>;
}

/// The sole builtin provider. Resolves the host's platform adapter, starts
/// a [`LocalBackend`] under it, and tracks active ids for `list`/`destroy`.
pub struct LocalProvider {
    active: HashSet<BackendId>,
}

impl LocalProvider {
    pub fn new() -> Self {
        Self {
            active: HashSet::new(),
        }
    }
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn provider_type(&self) -> &str {
        "local"
    }

    async fn create(&mut self, options: CreateOptions) -> Result<(BackendId, Box<dyn Backend>)> {
        let adapter = get_platform_adapter(synapse_sandbox_platform::current_platform())?;
        let home = std::env::var("HOME").unwrap_or_default();
        let mut backend = LocalBackend::new(options.policy, home, adapter);
        backend.start().await?;

        let id = BackendId::new(self.provider_type());
        self.active.insert(id.clone());
        tracing::info!(backend_id = %id, cwd = %options.cwd, "local backend created");
        Ok((id, Box::new(backend)))
    }

    async fn destroy(&mut self, id: &BackendId) {
        if self.active.remove(id) {
            tracing::info!(backend_id = %id, "local backend destroyed");
        }
    }

    fn list(&self) -> Vec<BackendStatus> {
        self.active
            .iter()
            .map(|id| BackendStatus {
                id: id.clone(),
                status: "running".to_string(),
            })
            .collect()
    }
}
