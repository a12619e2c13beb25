use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexSet;

use synapse_sandbox_policy::{build_policy, Config, ExpandContext, Policy};

use crate::backend::{Backend, UnsandboxedBackend};
use crate::error::Result;
use crate::id::BackendId;
use crate::provider::{CreateOptions, Provider};
use crate::registry::ProviderRegistry;

/// Overridable construction points for [`SandboxManager`], mirroring spec
/// §6's `new SandboxManager(config, options)` with options
/// `{getProvider?, createUnsandboxedBackend?}`. Production callers use
/// [`ManagerOptions::default`]; tests inject a fake registry/factory to
/// avoid spawning real child processes.
pub struct ManagerOptions {
    pub registry: ProviderRegistry,
    pub backend_factory: Arc<dyn BackendFactory>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            registry: ProviderRegistry::with_builtins(),
            backend_factory: Arc::new(DefaultBackendFactory),
        }
    }
}

/// The `createUnsandboxedBackend?` override point: how to build the backend
/// used when `Config::enabled` is `false`.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn create_unsandboxed(&self) -> Result<Box<dyn Backend>>;
}

pub struct DefaultBackendFactory;

#[async_trait]
impl BackendFactory for DefaultBackendFactory {
    async fn create_unsandboxed(&self) -> Result<Box<dyn Backend>> {
        Ok(Box::new(UnsandboxedBackend::new().await?))
    }
}

/// Lifecycle owner for sandboxed command execution: lazily resolves a
/// [`Provider`] for `config.provider`, creates at most one active backend
/// through it, and rebuilds (destroy + recreate, never preserving shell
/// state) on `addRuntimeWhitelist` or on a session failure during
/// `execute`. See spec §4.7 for the full state machine.
pub struct SandboxManager {
    config: Config,
    registry: ProviderRegistry,
    backend_factory: Arc<dyn BackendFactory>,
    provider: Option<Box<dyn Provider>>,
    active: Option<(BackendId, Box<dyn Backend>)>,
    runtime_whitelist: IndexSet<String>,
}

impl SandboxManager {
    pub fn new(config: Config, options: ManagerOptions) -> Self {
        Self {
            config,
            registry: options.registry,
            backend_factory: options.backend_factory,
            provider: None,
            active: None,
            runtime_whitelist: IndexSet::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Compose the effective policy for a `create` call: whitelist =
    /// dedup([cwd, ...config whitelist, ...runtime whitelist, TMPDIR or
    /// "/tmp"]); blacklist = dedup(config blacklist); then path-expanded
    /// against the current process env and `HOME`.
    pub fn effective_policy(&self, cwd: &str) -> Policy {
        let mut whitelist = IndexSet::new();
        whitelist.insert(cwd.to_string());
        for entry in &self.config.policy.filesystem.whitelist {
            whitelist.insert(entry.clone());
        }
        for entry in &self.runtime_whitelist {
            whitelist.insert(entry.clone());
        }
        let tmpdir = std::env::var("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
        whitelist.insert(tmpdir);

        let blacklist: IndexSet<String> = self.config.policy.filesystem.blacklist.iter().cloned().collect();

        let raw = Policy::new(whitelist, blacklist);
        let env: HashMap<String, String> = std::env::vars().collect();
        let home = std::env::var("HOME").unwrap_or_default();
        build_policy(&raw, &ExpandContext { env: &env, home_dir: &home })
    }

    fn resolve_provider(&mut self) -> Result<()> {
        if self.provider.is_none() {
            self.provider = Some(self.registry.get(&self.config.provider)?);
        }
        Ok(())
    }

    /// Uninitialized -> Active. Idempotent once Active.
    pub async fn get_sandbox(&mut self, cwd: &str) -> Result<()> {
        if self.active.is_some() {
            return Ok(());
        }

        if !self.config.enabled {
            let backend = self.backend_factory.create_unsandboxed().await?;
            self.active = Some((BackendId::new("unsandboxed"), backend));
            return Ok(());
        }

        self.resolve_provider()?;
        let policy = self.effective_policy(cwd);
        let provider = self.provider.as_mut().expect("resolved above");
        let (id, backend) = provider
            .create(CreateOptions {
                cwd: cwd.to_string(),
                policy,
                provider_options: self.config.provider_options.clone(),
            })
            .await?;
        self.active = Some((id, backend));
        Ok(())
    }

    /// Destroy the current backend (if any) through the provider and drop
    /// it from `active`. Safe to call when already `Uninitialized`.
    async fn destroy_active(&mut self) {
        if let Some((id, mut backend)) = self.active.take() {
            backend.dispose().await;
            if self.config.enabled {
                if let Some(provider) = self.provider.as_mut() {
                    provider.destroy(&id).await;
                }
            }
        }
    }

    /// Destroy then recreate under the same (possibly just-expanded)
    /// policy. Deliberately does not preserve shell cwd/env state — that is
    /// spec'd behavior, not an oversight.
    async fn rebuild(&mut self, cwd: &str) -> Result<()> {
        self.destroy_active().await;
        self.get_sandbox(cwd).await
    }

    /// Add `path` to the per-Manager runtime whitelist (never persisted,
    /// never shared across Managers). If enabled and already Active,
    /// forces a rebuild so the new path takes effect immediately; the
    /// rebuild is awaited before this returns. No-op rebuild when disabled
    /// — the path is still recorded for the next time sandboxing turns on.
    pub async fn add_runtime_whitelist(&mut self, path: &str, cwd: &str) -> Result<()> {
        self.runtime_whitelist.insert(path.to_string());
        if self.config.enabled && self.active.is_some() {
            self.rebuild(cwd).await?;
        }
        Ok(())
    }

    pub fn runtime_whitelist(&self) -> &IndexSet<String> {
        &self.runtime_whitelist
    }

    /// Ensure Active, then execute. On a session failure (not a policy
    /// `blocked` result — those are data, not errors) while enabled,
    /// rebuild once and retry; any further failure propagates.
    pub async fn execute(
        &mut self,
        command: &str,
        cwd: &str,
    ) -> Result<crate::result::ExecuteResult> {
        self.get_sandbox(cwd).await?;

        let first = {
            let (_, backend) = self.active.as_mut().expect("get_sandbox ensured Active");
            backend.execute(command).await
        };

        match first {
            Ok(result) => Ok(result),
            Err(err) if self.config.enabled => {
                tracing::warn!(error = %err, "backend execute failed; rebuilding and retrying once");
                self.rebuild(cwd).await?;
                let (_, backend) = self.active.as_mut().expect("rebuild ensured Active");
                backend.execute(command).await
            }
            Err(err) => Err(err),
        }
    }

    /// Active -> Uninitialized. Idempotent: a second call with no active
    /// backend is a no-op.
    pub async fn shutdown(&mut self) {
        self.destroy_active().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SandboxError;
    use crate::provider::BackendStatus;
    use crate::result::ExecuteResult;
    use indexmap::IndexSet;
    use synapse_sandbox_policy::Policy;
    use synapse_sandbox_session::SessionError;

    struct FlakyBackend {
        fail_next: bool,
        disposed: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl Backend for FlakyBackend {
        async fn execute(&mut self, _command: &str) -> Result<ExecuteResult> {
            if self.fail_next {
                self.fail_next = false;
                return Err(SandboxError::SessionFailure(SessionError::ChildExited));
            }
            Ok(ExecuteResult::default())
        }

        async fn dispose(&mut self) {
            self.disposed.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    struct RecordingProvider {
        created: usize,
        recorded: Arc<std::sync::Mutex<Vec<CreateOptions>>>,
        always_fail: bool,
    }

    #[async_trait]
    impl Provider for RecordingProvider {
        fn provider_type(&self) -> &str {
            "recording"
        }

        async fn create(&mut self, options: CreateOptions) -> Result<(BackendId, Box<dyn Backend>)> {
            self.created += 1;
            self.recorded.lock().unwrap().push(options);
            let id = BackendId::new("recording");
            let backend = FlakyBackend {
                fail_next: self.always_fail || self.created == 1,
                disposed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            };
            Ok((id, Box::new(backend)))
        }

        async fn destroy(&mut self, _id: &BackendId) {}

        fn list(&self) -> Vec<BackendStatus> {
            vec![]
        }
    }

    fn options_with(factory: impl Fn() -> Box<dyn Provider> + Send + Sync + 'static) -> ManagerOptions {
        let mut registry = ProviderRegistry::new();
        registry.register("recording", factory).unwrap();
        ManagerOptions {
            registry,
            backend_factory: Arc::new(DefaultBackendFactory),
        }
    }

    fn recording_options(
        always_fail: bool,
    ) -> (ManagerOptions, Arc<std::sync::Mutex<Vec<CreateOptions>>>) {
        let recorded = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded_clone = recorded.clone();
        let options = options_with(move || {
            Box::new(RecordingProvider {
                created: 0,
                recorded: recorded_clone.clone(),
                always_fail,
            })
        });
        (options, recorded)
    }

    fn enabled_config() -> Config {
        Config {
            enabled: true,
            provider: "recording".to_string(),
            policy: Policy::new(IndexSet::new(), IndexSet::new()),
            provider_options: Default::default(),
        }
    }

    #[tokio::test]
    async fn rebuild_on_failure_retries_once_then_succeeds() {
        let (options, _recorded) = recording_options(false);
        let mut manager = SandboxManager::new(enabled_config(), options);
        let result = manager.execute("echo hi", "/tmp").await.unwrap();
        assert!(!result.blocked);
    }

    #[tokio::test]
    async fn second_failure_after_rebuild_propagates() {
        let (options, _recorded) = recording_options(true);
        let mut manager = SandboxManager::new(enabled_config(), options);
        let err = manager.execute("echo hi", "/tmp").await.unwrap_err();
        assert!(matches!(err, SandboxError::SessionFailure(_)));
    }

    #[tokio::test]
    async fn add_runtime_whitelist_rebuilds_while_active() {
        let (options, recorded) = recording_options(false);
        let mut manager = SandboxManager::new(enabled_config(), options);
        manager.get_sandbox("/tmp").await.unwrap();
        manager.add_runtime_whitelist("/extra", "/tmp").await.unwrap();
        assert!(manager.runtime_whitelist().contains("/extra"));

        // Two `create` calls: the initial `get_sandbox` and the rebuild
        // triggered by `add_runtime_whitelist`. Only the second's policy
        // carries the new path — that's the proof the rebuild actually
        // happened rather than mutating the live backend in place.
        let calls = recorded.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].policy.filesystem.whitelist.contains("/extra"));
        assert!(calls[1].policy.filesystem.whitelist.contains("/extra"));
    }

    #[tokio::test]
    async fn add_runtime_whitelist_is_recorded_even_when_disabled() {
        let mut config = enabled_config();
        config.enabled = false;
        let (options, recorded) = recording_options(false);
        let mut manager = SandboxManager::new(config, options);
        manager.add_runtime_whitelist("/extra", "/tmp").await.unwrap();
        assert!(manager.runtime_whitelist().contains("/extra"));
        assert!(!manager.is_active());
        assert!(recorded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (options, _recorded) = recording_options(false);
        let mut manager = SandboxManager::new(enabled_config(), options);
        manager.get_sandbox("/tmp").await.unwrap();
        manager.shutdown().await;
        manager.shutdown().await;
        assert!(!manager.is_active());
    }

    #[tokio::test]
    async fn effective_policy_includes_cwd_and_tmpdir() {
        let options = ManagerOptions::default();
        let manager = SandboxManager::new(enabled_config(), options);
        let policy = manager.effective_policy("/workspace");
        assert!(policy.filesystem.whitelist.contains("/workspace"));
    }
}
