use std::collections::BTreeMap;
use std::sync::{Mutex, OnceLock};

use crate::error::{Result, SandboxError};
use crate::provider::{LocalProvider, Provider};

/// `name -> factory()`. Per spec §4.6/§9, this is modeled as an explicit,
/// instantiable struct rather than only a process-wide singleton: a
/// `SandboxManager` owns its own `ProviderRegistry` by default (see
/// [`ProviderRegistry::new`]), and [`ProviderRegistry::global`] exists only
/// for parity with the documented API surface for callers that want the
/// shared, process-wide instance spec §4.6 describes.
pub struct ProviderRegistry {
    factories: BTreeMap<String, Box<dyn Fn() -> Box<dyn Provider> + Send + Sync>>,
}

impl ProviderRegistry {
    /// An empty registry with no builtins installed. Call [`Self::init`] to
    /// populate it with `local`, or [`Self::register`] your own.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// `new()` plus the builtin `local -> LocalProvider` registration.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.init();
        registry
    }

    /// Installs builtins: currently just `local`. Safe to call more than
    /// once; re-registering `local` is a last-write-wins overwrite, not an
    /// error.
    pub fn init(&mut self) {
        self.register("local", || Box::new(LocalProvider::new()))
            .expect("\"local\" is a non-empty name");
    }

    /// Reject empty/whitespace-only names; otherwise last-write-wins.
    pub fn register(
        &mut self,
        name: &str,
        factory: impl Fn() -> Box<dyn Provider> + Send + Sync + 'static,
    ) -> Result<()> {
        if name.trim().is_empty() {
            return Err(SandboxError::InvalidRegistration);
        }
        self.factories.insert(name.to_string(), Box::new(factory));
        Ok(())
    }

    /// Construct a fresh provider instance for `name`, invoking its factory
    /// exactly once. Each call gets its own instance — callers do not share
    /// provider state across `get` calls.
    pub fn get(&self, name: &str) -> Result<Box<dyn Provider>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| SandboxError::UnknownProvider {
                name: name.to_string(),
                known: self.list_types(),
            })
    }

    pub fn list_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Test-only hook: clears the map without reinstalling builtins.
    /// Explicit re-`init()` is required afterward to use `local` again.
    pub fn reset_for_test(&mut self) {
        self.factories.clear();
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

static GLOBAL: OnceLock<Mutex<ProviderRegistry>> = OnceLock::new();

impl ProviderRegistry {
    /// The process-wide instance, lazily initialized with builtins on first
    /// access. Exists for API parity with spec §6's
    /// `SandboxProviderRegistry.{register, get, listTypes, init, resetForTest}`;
    /// prefer an explicit [`ProviderRegistry::new`] owned by your own
    /// context where you control the lifetime.
    pub fn global() -> &'static Mutex<ProviderRegistry> {
        GLOBAL.get_or_init(|| Mutex::new(ProviderRegistry::with_builtins()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn register_rejects_empty_name() {
        let mut registry = ProviderRegistry::new();
        let err = registry.register("   ", || Box::new(LocalProvider::new()));
        assert!(err.is_err());
    }

    #[test]
    fn get_invokes_factory_exactly_once_per_call() {
        let mut registry = ProviderRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        registry
            .register("counting", move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Box::new(LocalProvider::new())
            })
            .unwrap();

        registry.get("counting").unwrap();
        registry.get("counting").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn get_unknown_provider_lists_known_names() {
        let registry = ProviderRegistry::with_builtins();
        let err = registry.get("daytona").unwrap_err();
        match err {
            SandboxError::UnknownProvider { name, known } => {
                assert_eq!(name, "daytona");
                assert!(known.contains(&"local".to_string()));
            }
            other => panic!("expected UnknownProvider, got {other:?}"),
        }
    }

    #[test]
    fn reset_for_test_clears_without_reinstalling() {
        let mut registry = ProviderRegistry::with_builtins();
        registry.reset_for_test();
        assert!(registry.list_types().is_empty());
        assert!(registry.get("local").is_err());
    }

    #[test]
    fn overwrite_registration_is_last_write_wins() {
        let mut registry = ProviderRegistry::new();
        registry.register("local", || Box::new(LocalProvider::new())).unwrap();
        registry.register("local", || Box::new(LocalProvider::new())).unwrap();
        assert_eq!(registry.list_types(), vec!["local".to_string()]);
    }
}
