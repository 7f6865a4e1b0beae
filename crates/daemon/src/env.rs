// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration: TOML file overlaid with environment variables.
//!
//! Environment variables use double-underscore nesting under the `IML__`
//! prefix: `IML__TRIGGERS__ENABLED=false`, `IML__SECURITY__PROFILE=readonly`,
//! `IML__RESOURCE_LIMITS__FILESYSTEM=8`.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const ENV_PREFIX: &str = "IML__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    BadEnvValue { key: String, value: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    pub max_concurrent_plans: usize,
    pub strict_memory: bool,
    /// Plan submissions per identity per hour; 0 disables limiting.
    pub submit_rate_per_hour: u32,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self { max_concurrent_plans: 4, strict_memory: false, submit_rate_per_hour: 0 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IntentSection {
    /// "anthropic", "openai", or "ollama".
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    pub strict: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    /// Permission profile: readonly, local_worker, power_user, unrestricted.
    pub profile: String,
    /// Ordered scanner names: "heuristic", "ml", "intent".
    pub scanners: Vec<String>,
    pub sandbox_paths: Vec<PathBuf>,
    /// Endpoint for the "ml" scanner tier.
    pub ml_endpoint: Option<String>,
    pub ml_timeout_secs: u64,
    pub intent: Option<IntentSection>,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            profile: "local_worker".to_string(),
            scanners: vec!["heuristic".to_string()],
            sandbox_paths: Vec::new(),
            ml_endpoint: None,
            ml_timeout_secs: 5,
            intent: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TriggersSection {
    pub enabled: bool,
    pub db_path: Option<PathBuf>,
    pub max_concurrent_plans: usize,
    pub max_chain_depth: u32,
}

impl Default for TriggersSection {
    fn default() -> Self {
        Self { enabled: true, db_path: None, max_concurrent_plans: 4, max_chain_depth: 5 }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub state_dir: Option<PathBuf>,
    pub executor: ExecutorSection,
    pub security: SecuritySection,
    pub triggers: TriggersSection,
    /// Per-module ceilings on concurrently running actions.
    pub resource_limits: HashMap<String, usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: None,
            executor: ExecutorSection::default(),
            security: SecuritySection::default(),
            triggers: TriggersSection::default(),
            resource_limits: HashMap::new(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then overlay process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
                toml::from_str(&text)?
            }
            None => Config::default(),
        };
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    /// Overlay `IML__SECTION__KEY` variables onto the config.
    pub fn apply_env(
        &mut self,
        vars: impl Iterator<Item = (String, String)>,
    ) -> Result<(), ConfigError> {
        for (key, value) in vars {
            let Some(rest) = key.strip_prefix(ENV_PREFIX) else { continue };
            let path: Vec<String> =
                rest.split("__").map(|s| s.to_ascii_lowercase()).collect();
            let parts: Vec<&str> = path.iter().map(String::as_str).collect();
            match parts.as_slice() {
                ["state_dir"] => self.state_dir = Some(PathBuf::from(&value)),
                ["executor", "max_concurrent_plans"] => {
                    self.executor.max_concurrent_plans = parse(&key, &value)?;
                }
                ["executor", "strict_memory"] => {
                    self.executor.strict_memory = parse_bool(&key, &value)?;
                }
                ["executor", "submit_rate_per_hour"] => {
                    self.executor.submit_rate_per_hour = parse(&key, &value)?;
                }
                ["security", "profile"] => self.security.profile = value,
                ["security", "scanners"] => {
                    self.security.scanners =
                        value.split(',').map(|s| s.trim().to_string()).collect();
                }
                ["security", "ml_endpoint"] => self.security.ml_endpoint = Some(value),
                ["triggers", "enabled"] => {
                    self.triggers.enabled = parse_bool(&key, &value)?;
                }
                ["triggers", "db_path"] => self.triggers.db_path = Some(PathBuf::from(&value)),
                ["triggers", "max_concurrent_plans"] => {
                    self.triggers.max_concurrent_plans = parse(&key, &value)?;
                }
                ["triggers", "max_chain_depth"] => {
                    self.triggers.max_chain_depth = parse(&key, &value)?;
                }
                ["resource_limits", module] => {
                    self.resource_limits.insert(module.to_string(), parse(&key, &value)?);
                }
                _ => tracing::warn!(%key, "unrecognised config variable ignored"),
            }
        }
        Ok(())
    }

    /// Root state directory (`$XDG_STATE_HOME/imld` by default).
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::state_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("imld")
        })
    }

    pub fn socket_path(&self) -> PathBuf {
        self.state_dir().join("imld.sock")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join("imld.pid")
    }

    pub fn log_path(&self) -> PathBuf {
        self.state_dir().join("imld.log")
    }

    pub fn db_path(&self) -> PathBuf {
        self.state_dir().join("state.db")
    }

    pub fn trigger_db_path(&self) -> PathBuf {
        self.triggers
            .db_path
            .clone()
            .unwrap_or_else(|| self.state_dir().join("triggers.db"))
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::BadEnvValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::BadEnvValue { key: key.to_string(), value: value.to_string() }),
    }
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
