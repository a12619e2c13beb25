//! Local/unsandboxed backends, the provider registry, and the sandbox
//! manager lifecycle (spec §4.4–§4.7). Built on `synapse-sandbox-policy`
//! (config/policy), `synapse-sandbox-platform` (OS adapters), and
//! `synapse-sandbox-session` (the persistent shell session) — this crate
//! wires those three together into the `Manager.execute(cmd, cwd)` surface
//! the rest of Synapse calls.

mod backend;
mod error;
mod id;
mod manager;
mod provider;
mod registry;
mod result;

pub use backend::{Backend, LocalBackend, UnsandboxedBackend};
pub use error::{Result, SandboxError};
pub use id::BackendId;
pub use manager::{BackendFactory, DefaultBackendFactory, ManagerOptions, SandboxManager};
pub use provider::{BackendStatus, CreateOptions, LocalProvider, Provider};
pub use registry::ProviderRegistry;
pub use result::ExecuteResult;
