//! Processor configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use vpp_core::error::{Result, VppError};

/// Default pool capacity: distinct consumers served concurrently.
pub const DEFAULT_MAX_CONSUMERS: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Capacity of the stream pool and, when dumping, the dump-file pool.
    pub max_consumers: usize,
    /// Write every converted frame to `Processed_<slot>.yuv`.
    pub enable_dumps: bool,
    /// Directory receiving the dump files.
    pub dump_dir: PathBuf,
    /// Device ordinal for backends that have one.
    pub device_ordinal: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_consumers: DEFAULT_MAX_CONSUMERS,
            enable_dumps: false,
            dump_dir: PathBuf::from("."),
            device_ordinal: 0,
        }
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_consumers == 0 {
            return Err(VppError::Config("max_consumers must be at least 1".into()));
        }
        Ok(())
    }

    /// Parse and validate a JSON document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| VppError::Config(format!("invalid processor config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            VppError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }
}
