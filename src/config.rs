// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout and binding resolution.
//!
//! Specify the layout of the `envsync.toml` configuration file, and resolve it
//! into a list of [`EnvironmentBinding`]s that the synchronizer consumes.
//!
//! # Single and Multi-Config Modes
//!
//! In single-config mode the `[settings]` table alone describes one binding:
//! which secret store project and config to talk to, which local env file to
//! reconcile against it, and which keys are local overrides.
//!
//! In multi-config mode (`multi_config = true`) the `configs` list names an
//! ordered set of bindings. Each name may carry a `[config.<name>]` table whose
//! fields override `[settings]`. Any field that a name does not override falls
//! back to the base setting of the same key.
//!
//! # Coordinate Validation
//!
//! A binding is only produced when its project, config, and env file path all
//! resolve to something plausible. Partially written configuration (empty
//! strings, captured prompt noise, unfilled `<placeholder>` text) is rejected
//! instead of guessed at.

use crate::{envfile::is_valid_key, path::default_backup_dir};

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, instrument};

/// Configuration file layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Base settings shared by every binding.
    pub settings: SyncSettings,

    /// Per-name overrides for multi-config mode.
    #[serde(rename = "config", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, BindingOverride>,
}

impl SyncConfig {
    /// Read and parse configuration file at target path.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file is not valid TOML layout.
    /// - Return [`ConfigError::ShellExpansion`] if path expansion fails.
    #[instrument(skip(path), level = "debug")]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        debug!("load configuration: {:?}", path.as_ref().display());
        let data = read_to_string(path.as_ref()).map_err(|err| ConfigError::Read {
            source: err,
            path: path.as_ref().to_path_buf(),
        })?;

        data.parse()
    }

    /// Resolve every binding described by the configuration.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::EmptyConfigList`] if multi-config mode is on
    ///   but no config names are listed.
    /// - Return [`ConfigError::MissingCoordinate`] or
    ///   [`ConfigError::GarbledCoordinate`] for unusable coordinates.
    /// - Return [`ConfigError::InvalidOverrideKey`] for bad override keys.
    pub fn bindings(&self) -> Result<Vec<EnvironmentBinding>> {
        if !self.settings.multi_config {
            return Ok(vec![self.resolve(None)?]);
        }

        if self.settings.configs.is_empty() {
            return Err(ConfigError::EmptyConfigList);
        }

        self.settings
            .configs
            .iter()
            .map(|name| self.resolve(Some(name)))
            .collect()
    }

    /// Resolve bindings, keeping only those whose names appear in `only`.
    ///
    /// An empty filter keeps every binding.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::UnknownBinding`] if a filter name does not
    ///   match any binding.
    /// - Any error from [`SyncConfig::bindings`].
    pub fn select_bindings(&self, only: &[String]) -> Result<Vec<EnvironmentBinding>> {
        let bindings = self.bindings()?;
        if only.is_empty() {
            return Ok(bindings);
        }

        if let Some(unknown) = only
            .iter()
            .find(|name| !bindings.iter().any(|binding| &binding.name == *name))
        {
            return Err(ConfigError::UnknownBinding(unknown.clone()));
        }

        Ok(bindings
            .into_iter()
            .filter(|binding| only.contains(&binding.name))
            .collect())
    }

    fn resolve(&self, name: Option<&str>) -> Result<EnvironmentBinding> {
        let base = &self.settings;
        let over = name.and_then(|name| self.overrides.get(name));
        let binding_name = match name {
            Some(name) => name.to_string(),
            None => base.config.trim().to_string(),
        };

        // INVARIANT: Per-name values win, base values fill the gaps.
        let project = over
            .and_then(|o| o.project.as_deref())
            .unwrap_or(&base.project);
        let config = over
            .and_then(|o| o.config.as_deref())
            .unwrap_or(&base.config);
        let env_file = over
            .and_then(|o| o.env_file.as_deref())
            .unwrap_or(&base.env_file);
        let backup_dir = over
            .and_then(|o| o.backup_dir.as_deref())
            .or(base.backup_dir.as_deref());
        let local_overrides = over
            .and_then(|o| o.local_overrides.as_ref())
            .unwrap_or(&base.local_overrides);

        let store_namespace = validate_coordinate(&binding_name, "project", project, true)?;
        let store_environment = validate_coordinate(&binding_name, "config", config, true)?;
        let env_file = validate_coordinate(&binding_name, "env_file", env_file, false)?;

        let mut local_override_keys = BTreeSet::new();
        for key in local_overrides {
            let key = key.trim();
            if !is_valid_key(key) {
                return Err(ConfigError::InvalidOverrideKey {
                    binding: binding_name,
                    key: key.to_string(),
                });
            }
            local_override_keys.insert(key.to_string());
        }

        let backup_dir = match backup_dir {
            Some(dir) => {
                let dir = validate_coordinate(&binding_name, "backup_dir", dir, false)?;
                PathBuf::from(dir)
            }
            None => default_backup_dir(),
        };

        Ok(EnvironmentBinding {
            name: binding_name,
            store_namespace,
            store_environment,
            local_file: PathBuf::from(env_file),
            backup_dir,
            local_override_keys,
        })
    }
}

impl FromStr for SyncConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: SyncConfig =
            toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        config.settings.env_file = expand(&config.settings.env_file)?;
        if let Some(dir) = config.settings.backup_dir.as_mut() {
            *dir = expand(dir)?;
        }
        for over in config.overrides.values_mut() {
            if let Some(file) = over.env_file.as_mut() {
                *file = expand(file)?;
            }
            if let Some(dir) = over.backup_dir.as_mut() {
                *dir = expand(dir)?;
            }
        }

        Ok(config)
    }
}

impl Display for SyncConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Base configuration settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SyncSettings {
    /// Secret store project, i.e., the store namespace.
    pub project: String,

    /// Secret store config, i.e., the store environment.
    pub config: String,

    /// Local env file to reconcile against the store.
    #[serde(default = "default_env_file")]
    pub env_file: String,

    /// Directory that backups are written to before destructive rewrites.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<String>,

    /// Keys whose values are machine-specific and never synchronized.
    #[serde(default)]
    pub local_overrides: Vec<String>,

    /// Enable fan-out over the `configs` list.
    #[serde(default)]
    pub multi_config: bool,

    /// Ordered binding names for multi-config mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configs: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            project: "<put project name here>".into(),
            config: "<put config name here>".into(),
            env_file: default_env_file(),
            backup_dir: None,
            local_overrides: Vec::new(),
            multi_config: false,
            configs: Vec::new(),
        }
    }
}

fn default_env_file() -> String {
    ".env".into()
}

/// Per-name settings override for multi-config mode.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct BindingOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<String>,

    /// Replaces the base override list for this name when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_overrides: Option<Vec<String>>,
}

/// One resolved pairing of local env file and remote store coordinates.
///
/// Immutable for the duration of a run.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EnvironmentBinding {
    /// Binding name, used in reports and for `--only` filtering.
    pub name: String,

    /// Secret store project.
    pub store_namespace: String,

    /// Secret store config.
    pub store_environment: String,

    /// Path to local env file.
    pub local_file: PathBuf,

    /// Directory backups of the local env file are written to.
    pub backup_dir: PathBuf,

    /// Keys exempt from normal bidirectional flow.
    pub local_override_keys: BTreeSet<String>,
}

impl EnvironmentBinding {
    /// Human readable `project/config` label of the remote side.
    pub fn remote_label(&self) -> String {
        format!("{}/{}", self.store_namespace, self.store_environment)
    }
}

fn expand(value: &str) -> Result<String> {
    Ok(shellexpand::full(value)
        .map_err(ConfigError::ShellExpansion)?
        .into_owned())
}

/// Check a required coordinate for emptiness and obvious garbage.
///
/// Store coordinates (`strict`) must additionally stick to the character set
/// the store accepts for project and config names.
fn validate_coordinate(
    binding: &str,
    field: &'static str,
    value: &str,
    strict: bool,
) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::MissingCoordinate {
            binding: binding.to_string(),
            field,
        });
    }

    let garbled = || ConfigError::GarbledCoordinate {
        binding: binding.to_string(),
        field,
        value: value.escape_debug().to_string(),
    };

    if trimmed.chars().any(char::is_control) {
        return Err(garbled());
    }

    // INVARIANT: Paths may contain inner spaces, store names may not.
    if strict && trimmed.chars().any(char::is_whitespace) {
        return Err(garbled());
    }

    if trimmed.starts_with('<') || trimmed.ends_with('>') {
        return Err(garbled());
    }

    if strict
        && !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(garbled());
    }

    Ok(trimmed.to_string())
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Required coordinate resolved to nothing.
    #[error("binding {binding:?} is missing required setting {field:?}")]
    MissingCoordinate { binding: String, field: &'static str },

    /// Required coordinate looks truncated or garbled.
    #[error("binding {binding:?} has unusable value for {field:?}: {value:?}")]
    GarbledCoordinate {
        binding: String,
        field: &'static str,
        value: String,
    },

    /// Local override list names something that cannot be an env key.
    #[error("binding {binding:?} lists invalid local override key {key:?}")]
    InvalidOverrideKey { binding: String, key: String },

    /// Binding filter names a binding that does not exist.
    #[error("no binding named {0:?} in configuration")]
    UnknownBinding(String),

    /// Multi-config mode without any config names.
    #[error("multi_config is enabled but the configs list is empty")]
    EmptyConfigList,
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
