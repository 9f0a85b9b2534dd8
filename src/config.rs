//! Engine configuration
//!
//! ```json
//! { "des_layout": "piped", "short_id_len": 6, "default_author": "COML Smith" }
//! ```
//!
//! Every key is optional.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::des::DEFAULT_SHORT_ID_LEN;
use crate::codec::{DesLayout, DesOptions};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Layout used when encoding ICS-DES and delta payloads
    pub des_layout: DesLayout,
    /// Hex digits of the form id carried in ICS-DES headers (4..=12)
    pub short_id_len: usize,
    /// Attribution for versions created without an explicit author
    pub default_author: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            des_layout: DesLayout::Lines,
            short_id_len: DEFAULT_SHORT_ID_LEN,
            default_author: "unknown".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config: Self =
            serde_json::from_slice(&data).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.check()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if !(4..=12).contains(&self.short_id_len) {
            return Err(ConfigError::Invalid(format!(
                "short_id_len must be between 4 and 12, got {}",
                self.short_id_len
            )));
        }
        if self.default_author.trim().is_empty() {
            return Err(ConfigError::Invalid("default_author is blank".into()));
        }
        Ok(())
    }

    pub fn des_options(&self) -> DesOptions {
        DesOptions {
            layout: self.des_layout,
            short_id_len: self.short_id_len,
        }
    }
}
