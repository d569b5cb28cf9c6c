//! Runner configuration: where durable output goes and how it is shaped.

use std::path::{Path, PathBuf};

use cascade_types::{CascadeError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Fallback ledger file, used when no ledger is injected.
    pub ledger_path: PathBuf,
    /// Directory for rendered reasoning trails. `None` disables saving.
    pub trail_dir: Option<PathBuf>,
    /// Maximum characters of step output shown in a trail preview.
    pub preview_chars: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from(".cascade/fallback_log.json"),
            trail_dir: Some(PathBuf::from(".cascade/trails")),
            preview_chars: 200,
        }
    }
}

impl RunnerConfig {
    /// Read a JSON config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.preview_chars == 0 {
            return Err(CascadeError::InvalidConfig(
                "preview_chars must be at least 1".into(),
            ));
        }
        if self.ledger_path.as_os_str().is_empty() {
            return Err(CascadeError::InvalidConfig("ledger_path is empty".into()));
        }
        Ok(())
    }
}
