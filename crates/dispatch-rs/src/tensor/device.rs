//! Device identifiers carried as tensor metadata.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Category of device a tensor lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Host memory.
    Cpu,
    /// Buffers owned by a compiled-graph backend.
    Graph,
    /// Deferred execution backends that trace instead of running eagerly.
    Lazy,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Graph => "graph",
            DeviceKind::Lazy => "lazy",
        }
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(DeviceKind::Cpu),
            "graph" => Ok(DeviceKind::Graph),
            "lazy" => Ok(DeviceKind::Lazy),
            other => Err(format!("unknown device kind '{other}'")),
        }
    }
}

/// Device kind plus ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    pub kind: DeviceKind,
    pub index: u16,
}

impl Device {
    pub const fn new(kind: DeviceKind, index: u16) -> Self {
        Device { kind, index }
    }

    pub const fn cpu() -> Self {
        Device::new(DeviceKind::Cpu, 0)
    }

    pub const fn graph(index: u16) -> Self {
        Device::new(DeviceKind::Graph, index)
    }

    pub const fn lazy() -> Self {
        Device::new(DeviceKind::Lazy, 0)
    }
}

impl Default for Device {
    fn default() -> Self {
        Device::cpu()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.index)
    }
}
