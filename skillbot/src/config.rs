use crate::errors::SkillError;
use crate::recovery::RecoveryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_scroll_resolution() -> i64 {
    1
}

fn default_extern_program() -> String {
    "python3".to_string()
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("skillbot")
}

/// Settings for one mission. Every field has a default, so `{}` is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// Seed for back-off and jitter; entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Abort the mission after this many dispatched steps.
    #[serde(default)]
    pub max_steps: Option<u64>,
    #[serde(default = "default_scroll_resolution")]
    pub scroll_resolution: i64,
    /// Interpreter used for Call Extern `file` steps.
    #[serde(default = "default_extern_program")]
    pub extern_program: String,
    /// Where screenshots and saved pages go.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            recovery: RecoveryConfig::default(),
            seed: None,
            max_steps: None,
            scroll_resolution: default_scroll_resolution(),
            extern_program: default_extern_program(),
            work_dir: default_work_dir(),
        }
    }
}

impl RunConfig {
    /// Load from a `.yaml`/`.yml` or JSON file.
    pub fn from_file(path: &Path) -> Result<Self, SkillError> {
        let content = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let config = if is_yaml {
            serde_yaml::from_str(&content)
                .map_err(|e| SkillError::InvalidConfig(format!("{}: {e}", path.display())))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| SkillError::InvalidConfig(format!("{}: {e}", path.display())))?
        };
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
