//! Engine configuration and per-command options.

use crate::CoreError;
use jumppad_store::JumppadLayout;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Settings shared by every command, read from `<home>/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub home: PathBuf,
    /// Defaults to `<home>/state/state.json`.
    pub state_path: Option<PathBuf>,
    /// Worker threads; defaults to the number of CPUs.
    pub parallelism: Option<usize>,
    pub destroy_orphans: bool,
    /// Upper bound for provider waits that declare no timeout of their own.
    pub default_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            state_path: None,
            parallelism: None,
            destroy_orphans: true,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// `$JUMPPAD_HOME`, else `$HOME/.jumppad`, else `./.jumppad`.
pub fn default_home() -> PathBuf {
    if let Some(home) = std::env::var_os("JUMPPAD_HOME") {
        return PathBuf::from(home);
    }
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
        .join(".jumppad")
}

impl EngineConfig {
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            ..Self::default()
        }
    }

    /// Read `<home>/config.toml` when present. The `home` field always
    /// reflects the directory the file was read from.
    pub fn load(home: &Path) -> Result<Self, CoreError> {
        let path = JumppadLayout::new(home).config_file();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str::<Self>(&content).map_err(|e| CoreError::Config(
                crate::ConfigError::Blueprint(format!("{}: {e}", path.display())),
            ))?
        } else {
            Self::default()
        };
        config.home = home.to_path_buf();
        Ok(config)
    }

    pub fn layout(&self) -> JumppadLayout {
        JumppadLayout::new(&self.home)
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(|| self.layout().state_path())
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
            .filter(|n| *n > 0)
            .unwrap_or_else(default_parallelism)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

pub fn default_parallelism() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOptions {
    /// Explicit variables; they win over the variables file and defaults.
    pub variables: BTreeMap<String, Value>,
    pub variables_file: Option<PathBuf>,
    pub parallelism: Option<usize>,
    /// Re-pull images and re-create resources even when unchanged.
    pub force: bool,
    /// Destroy resources in state that are no longer declared. `None` uses
    /// the engine configuration.
    pub destroy_orphans: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestroyOptions {
    /// Log and swallow provider errors.
    pub force: bool,
    /// Stop dispatching after the first failure.
    pub strict: bool,
    pub parallelism: Option<usize>,
}

/// Parse a TOML variables file of `key = value` pairs.
pub fn read_variables_file(path: &Path) -> Result<BTreeMap<String, Value>, CoreError> {
    let content = std::fs::read_to_string(path)?;
    let table: toml::Table = toml::from_str(&content).map_err(|e| {
        CoreError::Config(crate::ConfigError::Blueprint(format!(
            "variables file {}: {e}",
            path.display()
        )))
    })?;
    let mut vars = BTreeMap::new();
    for (k, v) in table {
        vars.insert(k, serde_json::to_value(v)?);
    }
    Ok(vars)
}

/// Parse a `key=value` pair given on the command line. Values that parse as
/// JSON scalars keep their type; everything else is a string.
pub fn parse_variable(pair: &str) -> Result<(String, Value), CoreError> {
    let (key, raw) = pair.split_once('=').ok_or_else(|| {
        CoreError::Config(crate::ConfigError::Blueprint(format!(
            "variable '{pair}' must be key=value"
        )))
    })?;
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
        _ => Value::String(raw.to_owned()),
    };
    Ok((key.trim().to_owned(), value))
}
