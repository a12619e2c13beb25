use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PolicyError, Result};
use crate::policy::{default_blacklist, NetworkPolicy, Policy};

/// Materialized once at manager startup, via [`load_sandbox_config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub enabled: bool,
    pub provider: String,
    pub policy: Policy,
    #[serde(rename = "providerOptions")]
    pub provider_options: BTreeMap<String, Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Open question in spec: the two parallel copies of the source
            // disagreed on the default. We pick `false` — fail closed is the
            // running theme of this subsystem (unsupported platforms fail
            // closed, proxy-less network policy fails closed) so an
            // unconfigured sandbox should not silently execute unsandboxed.
            enabled: false,
            provider: "local".to_string(),
            policy: Policy::new(IndexSet::new(), default_blacklist()),
            provider_options: BTreeMap::new(),
        }
    }
}

/// Inputs to [`load_sandbox_config`]. `configPath` defaults to
/// `$SYNAPSE_HOME/sandbox.json`; `user_config`/`runtime_config` are
/// caller-supplied layers of unknown shape, tolerantly parsed.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub user_config: Option<Value>,
    pub runtime_config: Option<Value>,
}

/// A single config layer with every field optional, so a partially-specified
/// layer only overwrites the fields it actually sets.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PartialConfig {
    enabled: Option<bool>,
    provider: Option<String>,
    policy: Option<PartialPolicy>,
    #[serde(rename = "providerOptions")]
    provider_options: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PartialPolicy {
    filesystem: Option<PartialFilesystem>,
    // network is intentionally not modeled beyond presence — any value is
    // accepted and ignored, because allow_network is always forced false.
    network: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PartialFilesystem {
    whitelist: Option<Vec<String>>,
    blacklist: Option<Vec<String>>,
}

/// Parse a layer tolerantly: a structurally invalid value becomes `None`
/// plus a logged warning, never a propagated error.
fn parse_layer(label: &str, value: Option<Value>) -> Option<PartialConfig> {
    let value = value?;
    match serde_json::from_value::<PartialConfig>(value) {
        Ok(layer) => Some(layer),
        Err(err) => {
            tracing::warn!(layer = label, error = %err, "ignoring structurally invalid config layer");
            None
        }
    }
}

fn merge_one(base: &mut Config, layer: PartialConfig) {
    if let Some(enabled) = layer.enabled {
        base.enabled = enabled;
    }
    if let Some(provider) = layer.provider {
        base.provider = provider;
    }
    if let Some(policy) = layer.policy {
        if let Some(fs) = policy.filesystem {
            if let Some(whitelist) = fs.whitelist {
                for entry in whitelist {
                    base.policy.filesystem.whitelist.insert(entry);
                }
            }
            if let Some(blacklist) = fs.blacklist {
                for entry in blacklist {
                    base.policy.filesystem.blacklist.insert(entry);
                }
            }
        }
        // network is always forced false regardless of what any layer says.
        base.policy.network = NetworkPolicy::default();
    }
    if let Some(provider_options) = layer.provider_options {
        for (k, v) in provider_options {
            base.provider_options.insert(k, v);
        }
    }
}

/// Four-layer merge: defaults -> file -> user -> runtime.
/// Scalars overwrite; whitelist/blacklist append-unique preserving order;
/// providerOptions shallow-merges; network is always forced false.
fn merge_layers(
    file: Option<PartialConfig>,
    user: Option<PartialConfig>,
    runtime: Option<PartialConfig>,
) -> Config {
    let mut merged = Config::default();
    for layer in [file, user, runtime].into_iter().flatten() {
        merge_one(&mut merged, layer);
    }
    merged
}

fn default_config_path() -> PathBuf {
    let home = std::env::var("SYNAPSE_HOME").unwrap_or_else(|_| {
        std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
    });
    PathBuf::from(home).join("sandbox.json")
}

fn read_file_layer(path: &Path) -> Option<PartialConfig> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "unable to read sandbox config file");
            return None;
        }
    };
    match serde_json::from_str::<Value>(&contents) {
        Ok(value) => parse_layer("file", Some(value)),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "sandbox config file is not valid JSON");
            None
        }
    }
}

/// Load, validate, merge, and path-expand are split across this function and
/// [`crate::build_policy`]; this function performs the four-layer merge and
/// strict post-merge validation, falling back to [`Config::default`] (with a
/// warning) if the merged result doesn't validate. Never returns `Err` —
/// every recoverable failure is absorbed here, per spec §7.
pub fn load_sandbox_config(options: LoadOptions) -> Config {
    let path = options
        .config_path
        .unwrap_or_else(default_config_path);

    let file_layer = read_file_layer(&path);
    let user_layer = parse_layer("user", options.user_config);
    let runtime_layer = parse_layer("runtime", options.runtime_config);

    let merged = merge_layers(file_layer, user_layer, runtime_layer);

    match validate_sandbox_config(&serde_json::to_value(&merged).expect("Config serializes")) {
        Ok(validated) => validated,
        Err(err) => {
            tracing::warn!(error = %err, "merged sandbox config failed validation; using defaults");
            Config::default()
        }
    }
}

/// Strictly validate a (possibly merged) config value. Checks: `provider` is
/// non-empty, the filesystem shape deserializes, and `allowNetwork` is the
/// literal `false` (always true after going through [`Config`]'s type, but
/// this function is also exposed for validating config the caller hasn't
/// round-tripped through our types yet).
pub fn validate_sandbox_config(value: &Value) -> Result<Config> {
    let config: Config = serde_json::from_value(value.clone())
        .map_err(|err| PolicyError::Validation(err.to_string()))?;

    if config.provider.trim().is_empty() {
        return Err(PolicyError::Validation(
            "provider must be a non-empty string".to_string(),
        ));
    }
    if config.policy.allow_network() {
        // Unreachable in practice (AllowNetwork cannot hold true) but kept
        // as an explicit, documented invariant check rather than relying
        // solely on the type system.
        return Err(PolicyError::Validation(
            "network.allowNetwork must be false".to_string(),
        ));
    }

    Ok(config)
}

/// Append `path` to the on-disk config's whitelist (no-op if already
/// present), creating parent directories as needed, and write back
/// pretty-printed JSON. The write is atomic from the caller's perspective:
/// we render the full document, write it to a sibling temp file, then
/// rename over the target.
pub fn add_permanent_whitelist(path: &str, options: &LoadOptions) -> Result<()> {
    let config_path = options
        .config_path
        .clone()
        .unwrap_or_else(default_config_path);

    let mut current = read_file_layer(&config_path)
        .map(|layer| {
            let mut cfg = Config::default();
            merge_one(&mut cfg, layer);
            cfg
        })
        .unwrap_or_default();

    if current.policy.filesystem.whitelist.insert(path.to_string()) {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|source| PolicyError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let rendered = serde_json::to_string_pretty(&current)
            .expect("Config serializes to JSON");

        let tmp_path = config_path.with_extension("json.tmp");
        fs::write(&tmp_path, &rendered).map_err(|source| PolicyError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &config_path).map_err(|source| PolicyError::Io {
            path: config_path.clone(),
            source,
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_default_blacklist() {
        let config = Config::default();
        assert!(config.policy.filesystem.blacklist.contains("~/.ssh"));
        assert!(config.policy.filesystem.blacklist.contains("**/.env"));
    }

    #[test]
    fn network_is_always_false() {
        let config = Config::default();
        assert!(!config.policy.allow_network());
    }

    #[test]
    fn invalid_file_layer_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.json");
        fs::write(&path, "{ not valid json").unwrap();

        let config = load_sandbox_config(LoadOptions {
            config_path: Some(path),
            ..Default::default()
        });
        assert_eq!(config.provider, "local");
    }

    #[test]
    fn empty_provider_fails_validation() {
        let mut value = serde_json::to_value(Config::default()).unwrap();
        value["provider"] = Value::String(String::new());
        assert!(validate_sandbox_config(&value).is_err());
    }

    #[test]
    fn four_layer_merge_appends_whitelist_and_overwrites_scalars() {
        let file = parse_layer(
            "file",
            Some(serde_json::json!({
                "provider": "local",
                "policy": { "filesystem": { "whitelist": ["/a"] } }
            })),
        );
        let user = parse_layer(
            "user",
            Some(serde_json::json!({
                "policy": { "filesystem": { "whitelist": ["/b"] } }
            })),
        );
        let runtime = parse_layer(
            "runtime",
            Some(serde_json::json!({
                "provider": "daytona",
                "policy": { "filesystem": { "whitelist": ["/a"] } }
            })),
        );

        let merged = merge_layers(file, user, runtime);
        assert_eq!(merged.provider, "daytona");
        assert_eq!(
            merged
                .policy
                .filesystem
                .whitelist
                .iter()
                .collect::<Vec<_>>(),
            vec!["/a", "/b"]
        );
    }

    #[test]
    fn add_permanent_whitelist_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sandbox.json");
        let options = LoadOptions {
            config_path: Some(path.clone()),
            ..Default::default()
        };

        add_permanent_whitelist("/extra/path", &options).unwrap();
        let config = load_sandbox_config(options);
        assert!(config.policy.filesystem.whitelist.contains("/extra/path"));
    }
}
