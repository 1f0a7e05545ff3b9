//! Settings types. Every section has compiled defaults, so a settings file
//! only needs the keys it changes.

use std::collections::BTreeMap;

use conclave_core::agent::Agent;
use conclave_core::provider::ProviderConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConclaveSettings {
    pub runtime: RuntimeSettings,
    pub logging: LoggingSettings,
    pub agents: Vec<Agent>,
    pub providers: Vec<ProviderSettings>,
}

/// Limits and timeouts for the runtime loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Model calls allowed per agent invocation.
    pub max_iterations: u32,
    /// Deepest allowed delegation chain (the entry agent is depth 0).
    pub max_delegation_depth: u32,
    /// Per model call. `None` waits indefinitely.
    pub provider_timeout_ms: Option<u64>,
    pub tool_timeout_ms: u64,
    /// Run the tool calls of one turn concurrently.
    pub parallel_tool_calls: bool,
    /// Capacity of the streaming event channel.
    pub stream_buffer: usize,
    /// Tool output beyond this many bytes is truncated.
    pub max_tool_output_bytes: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_delegation_depth: 8,
            provider_timeout_ms: None,
            tool_timeout_ms: 120_000,
            parallel_tool_calls: true,
            stream_buffer: 256,
            max_tool_output_bytes: 100_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level: trace, debug, info, warn or error.
    pub level: String,
    /// Per-module overrides, e.g. `{"conclave_engine": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            module_levels: BTreeMap::new(),
            json: true,
        }
    }
}

/// One provider entry. The key is given literally or by environment variable name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ProviderSettings {
    /// Build a [`ProviderConfig`], reading the key through `lookup` when it
    /// is given by variable name.
    pub fn resolve_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<ProviderConfig> {
        let key = match (&self.api_key, &self.api_key_env) {
            (Some(key), _) => key.clone(),
            (None, Some(var)) => lookup(var).filter(|v| !v.is_empty()).ok_or_else(|| {
                SettingsError::MissingApiKey {
                    provider: self.name.clone(),
                    var: var.clone(),
                }
            })?,
            (None, None) => {
                return Err(SettingsError::InvalidValue(format!(
                    "provider '{}' needs api_key or api_key_env",
                    self.name
                )))
            }
        };
        let mut config = ProviderConfig::new(&self.name, &self.kind, key);
        config.base_url = self.base_url.clone();
        Ok(config)
    }

    pub fn resolve(&self) -> Result<ProviderConfig> {
        self.resolve_with(|var| std::env::var(var).ok())
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub(crate) fn is_log_level(level: &str) -> bool {
    LOG_LEVELS.contains(&level.to_lowercase().as_str())
}

impl ConclaveSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.runtime.max_iterations == 0 {
            return Err(SettingsError::InvalidValue(
                "runtime.max_iterations must be at least 1".into(),
            ));
        }
        if self.runtime.stream_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "runtime.stream_buffer must be at least 1".into(),
            ));
        }
        if !is_log_level(&self.logging.level) {
            return Err(SettingsError::InvalidValue(format!(
                "logging.level '{}' is not one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }
        for (module, level) in &self.logging.module_levels {
            if !is_log_level(level) {
                return Err(SettingsError::InvalidValue(format!(
                    "logging.module_levels.{module} '{level}' is not a log level"
                )));
            }
        }
        Ok(())
    }

    /// Resolve every provider entry.
    pub fn provider_configs(&self) -> Result<Vec<ProviderConfig>> {
        self.providers.iter().map(ProviderSettings::resolve).collect()
    }
}
