use std::path::{Path, PathBuf};

use anyhow::Context;
use attend_engine::{EngineConfig, PoolConfig};
use serde::{Deserialize, Serialize};

/// File consulted when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "attend.toml";

/// Overrides `database_path` from the environment.
pub const DATABASE_ENV: &str = "ATTEND_DATABASE";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub pool: PoolConfig,
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("attend.db"),
            pool: PoolConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// An explicit path must exist. Without one, `attend.toml` in the
    /// working directory is used when present.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        if let Ok(path) = std::env::var(DATABASE_ENV) {
            if !path.trim().is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }
        config
            .engine
            .validate()
            .context("invalid engine configuration")?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
