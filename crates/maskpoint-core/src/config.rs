//! Engine configuration. Passed explicitly into the engine constructor;
//! persistence is a narrow load/save pair keyed on an explicit path, not an
//! ambient settings singleton.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub multimask: bool,
    pub dim_factor: f32,
    pub marker_radius: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SERVER_URL.to_string(),
            timeout_ms: maskpoint_remote_client::DEFAULT_TIMEOUT_MS,
            multimask: false,
            dim_factor: 0.35,
            marker_radius: 6.0,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path).map_err(|error| EngineError::ConfigIo {
            message: error.to_string(),
        })?;
        toml::from_str(&raw).map_err(|error| EngineError::ConfigParse {
            message: error.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let raw = toml::to_string_pretty(self).map_err(|error| EngineError::ConfigParse {
            message: error.to_string(),
        })?;
        std::fs::write(path, raw).map_err(|error| EngineError::ConfigIo {
            message: error.to_string(),
        })
    }
}
