use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::network::AllowNetwork;

/// Filesystem rules: unordered-in-principle but stored order-preserving so
/// merges stay deterministic and `build_policy` can de-duplicate first-seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FilesystemPolicy {
    pub whitelist: IndexSet<String>,
    pub blacklist: IndexSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NetworkPolicy {
    #[serde(rename = "allowNetwork")]
    pub allow_network: AllowNetwork,
}

/// Immutable once built. Construct via [`Policy::new`] or
/// [`crate::build_policy`] (which additionally expands `~`/`$VAR` tokens).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Policy {
    pub filesystem: FilesystemPolicy,
    pub network: NetworkPolicy,
}

impl Policy {
    pub fn new(whitelist: IndexSet<String>, blacklist: IndexSet<String>) -> Self {
        Self {
            filesystem: FilesystemPolicy { whitelist, blacklist },
            network: NetworkPolicy::default(),
        }
    }

    pub fn allow_network(&self) -> bool {
        self.network.allow_network.as_bool()
    }
}

/// Entries that must always be present after [`crate::load_sandbox_config`]
/// returns defaults. User layers may only ever *add* to this — there is no
/// API to remove a default blacklist entry.
pub fn default_blacklist() -> IndexSet<String> {
    [
        "~/.ssh",
        "~/.aws",
        "~/.gnupg",
        "~/.config/gcloud",
        "~/.azure",
        "/etc/passwd",
        "/etc/shadow",
        "**/.env",
        "**/.envrc",
        "**/.env.local",
        "**/credentials.json",
        "**/secrets.json",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
