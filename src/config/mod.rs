//! Project configuration stored in `.envops/config.yaml`.
//!
//! Settings are scoped to the project and read by the lock generator and
//! the planner; the core never writes them. Missing fields take defaults.
//! The CLI addresses fields by dotted key (`solver.timeout_secs`).

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::OpsError;
use crate::ports::SolverSettings;

/// Solver backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    /// The classic solver.
    Classic,
    /// The libmamba solver.
    Libmamba,
}

impl SolverKind {
    /// Name as passed to the solver.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SolverKind::Classic => "classic",
            SolverKind::Libmamba => "libmamba",
        }
    }
}

/// How strictly higher-priority channels win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelPriority {
    /// Packages from lower-priority channels are never used when a
    /// higher-priority channel has the name.
    Strict,
    /// Priority breaks ties only.
    Flexible,
    /// Channel order is ignored.
    Disabled,
}

impl ChannelPriority {
    /// Name as passed to the solver.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelPriority::Strict => "strict",
            ChannelPriority::Flexible => "flexible",
            ChannelPriority::Disabled => "disabled",
        }
    }
}

/// Solver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    /// Solver backend.
    pub name: SolverKind,
    /// Channel priority mode.
    pub channel_priority: ChannelPriority,
    /// Seconds before a solve is abandoned.
    pub timeout_secs: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            name: SolverKind::Libmamba,
            channel_priority: ChannelPriority::Strict,
            timeout_secs: 600,
        }
    }
}

/// Runtime-manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Executable used for solving, querying, and installing.
    pub conda_exe: String,
    /// Seconds before a runtime query or mutation is abandoned.
    pub timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { conda_exe: "conda".to_string(), timeout_secs: 30 * 60 }
    }
}

/// Pip settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipConfig {
    /// Look up artifact hashes on the index for pip lock entries.
    pub fetch_hashes: bool,
    /// JSON API root of the package index.
    pub index_url: String,
}

impl Default for PipConfig {
    fn default() -> Self {
        Self { fetch_hashes: true, index_url: "https://pypi.org/pypi".to_string() }
    }
}

/// Reconciliation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Never rewrite the lock; a stale lock is an error.
    pub frozen: bool,
    /// Classify-plan-apply rounds before `sync` gives up.
    pub max_rounds: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { frozen: false, max_rounds: 3 }
    }
}

/// All project settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    /// Name of the managed environment.
    pub env_name: String,
    /// Solver settings.
    pub solver: SolverConfig,
    /// Runtime-manager settings.
    pub runtime: RuntimeConfig,
    /// Pip settings.
    pub pip: PipConfig,
    /// Reconciliation settings.
    pub sync: SyncConfig,
}

impl ProjectConfig {
    /// Defaults with the given environment name.
    #[must_use]
    pub fn for_env(env_name: &str) -> Self {
        Self { env_name: env_name.to_string(), ..Self::default() }
    }

    /// Parses YAML, validating values.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::Config`] for unknown keys, wrong types, or
    /// invalid values.
    pub fn from_yaml(raw: &str) -> Result<Self, OpsError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Self = serde_yaml::from_str(raw).map_err(|e| OpsError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serializes to YAML.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::Config`] if serialization fails.
    pub fn to_yaml(&self) -> Result<String, OpsError> {
        serde_yaml::to_string(self).map_err(|e| OpsError::Config(e.to_string()))
    }

    /// Checks value ranges serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::Config`] naming the first invalid key.
    pub fn validate(&self) -> Result<(), OpsError> {
        if self.solver.timeout_secs == 0 {
            return Err(OpsError::Config("solver.timeout_secs must be > 0".into()));
        }
        if self.runtime.timeout_secs == 0 {
            return Err(OpsError::Config("runtime.timeout_secs must be > 0".into()));
        }
        if self.runtime.conda_exe.trim().is_empty() {
            return Err(OpsError::Config("runtime.conda_exe must not be empty".into()));
        }
        if self.sync.max_rounds == 0 {
            return Err(OpsError::Config("sync.max_rounds must be > 0".into()));
        }
        Ok(())
    }

    /// Solver-facing view of the settings.
    #[must_use]
    pub fn solver_settings(&self) -> SolverSettings {
        SolverSettings {
            solver: self.solver.name.as_str().to_string(),
            channel_priority: self.solver.channel_priority.as_str().to_string(),
        }
    }

    /// Reads one setting by dotted key.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::Config`] for unknown keys.
    pub fn get(&self, key: &str) -> Result<String, OpsError> {
        let root = self.as_value()?;
        let mut node = &root;
        for part in key.split('.') {
            node = node
                .as_mapping()
                .and_then(|m| m.get(part))
                .ok_or_else(|| OpsError::Config(format!("unknown key `{key}`")))?;
        }
        Ok(render_scalar(node))
    }

    /// Updates one setting by dotted key. `value` is read as a YAML scalar.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::Config`] for unknown keys, section keys, or
    /// values that do not fit the setting.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), OpsError> {
        let mut root = self.as_value()?;
        let parts: Vec<&str> = key.split('.').collect();
        let unknown = || OpsError::Config(format!("unknown key `{key}`"));

        let (leaf, parents) = parts.split_last().ok_or_else(unknown)?;
        let mut node: &mut Mapping = root.as_mapping_mut().ok_or_else(unknown)?;
        for part in parents {
            node = node.get_mut(*part).and_then(Value::as_mapping_mut).ok_or_else(unknown)?;
        }
        let current = node.get(*leaf).ok_or_else(unknown)?;
        if current.is_mapping() {
            return Err(OpsError::Config(format!("`{key}` is a section; set one of its keys")));
        }
        let parsed: Value = serde_yaml::from_str(value).unwrap_or(Value::String(value.into()));
        let new_value = if current.is_string() && !parsed.is_string() {
            Value::String(value.to_string())
        } else {
            parsed
        };
        node.insert(Value::String((*leaf).to_string()), new_value);

        let updated: Self = serde_yaml::from_value(root)
            .map_err(|e| OpsError::Config(format!("invalid value for `{key}`: {e}")))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Every setting as `(dotted key, value)`, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::Config`] if serialization fails.
    pub fn list(&self) -> Result<Vec<(String, String)>, OpsError> {
        fn walk(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
            match value.as_mapping() {
                Some(map) => {
                    for (k, v) in map {
                        let name = k.as_str().unwrap_or_default();
                        let key = if prefix.is_empty() {
                            name.to_string()
                        } else {
                            format!("{prefix}.{name}")
                        };
                        walk(&key, v, out);
                    }
                }
                None => out.push((prefix.to_string(), render_scalar(value))),
            }
        }
        let mut out = Vec::new();
        walk("", &self.as_value()?, &mut out);
        Ok(out)
    }

    fn as_value(&self) -> Result<Value, OpsError> {
        serde_yaml::to_value(self).map_err(|e| OpsError::Config(e.to_string()))
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim_end().to_string(),
    }
}
