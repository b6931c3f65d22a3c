//! Runtime configuration for the graph cache and the functionalization pass.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::env;
use crate::tensor::DeviceKind;

/// Sizing for the compiled-graph cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphCacheConfig {
    /// Maximum number of cached graphs; `None` keeps every graph until cleared.
    pub capacity: Option<usize>,
}

/// Policy knobs for the functionalization pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionalizeConfig {
    /// Replay recorded views as aliasing views instead of copies.
    pub reapply_views: bool,
    /// Devices whose `_to_copy` results stay wrapped even outside the functional include set.
    pub opted_in_devices: Vec<DeviceKind>,
}

impl Default for FunctionalizeConfig {
    fn default() -> Self {
        FunctionalizeConfig {
            reapply_views: false,
            opted_in_devices: vec![DeviceKind::Lazy],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub graph_cache: GraphCacheConfig,
    pub functionalize: FunctionalizeConfig,
}

impl DispatchConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("failed to parse dispatch config")
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize dispatch config")
    }

    /// Defaults overridden by `DISPATCH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = DispatchConfig::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Applies any `DISPATCH_*` environment overrides on top of the current values.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(capacity) = env::usize_var(env::GRAPH_CACHE_CAPACITY)? {
            self.graph_cache.capacity = Some(capacity);
        }
        if let Some(reapply) = env::bool_var(env::REAPPLY_VIEWS) {
            self.functionalize.reapply_views = reapply;
        }
        if let Some(devices) = env::device_list_var(env::FUNCTIONAL_DEVICES)? {
            self.functionalize.opted_in_devices = devices;
        }
        Ok(())
    }
}
