// config.rs
// Run configuration: defaults, optional YAML file, CLI overrides.

use crate::db::descriptor::ConnectionDescriptor;
use crate::error::{BackupError, Result};
use crate::export::serializer::DEFAULT_PAGE_SIZE;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// What the orchestrator does when one table fails to export.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TableErrorPolicy {
    /// Stop the whole run.
    #[default]
    Abort,
    /// Record the failed table and continue with the next one.
    Skip,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub backup_dir: PathBuf,
    pub log_dir: PathBuf,
    pub page_size: u64,
    pub namespace: Option<String>,
    pub max_connections: u32,
    pub connect_retries: u32,
    pub retry_backoff_ms: u64,
    pub on_table_error: TableErrorPolicy,
    pub stable_order: bool,
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backup_dir: home().join("backups"),
            log_dir: home().join(".sauv").join("logs"),
            page_size: DEFAULT_PAGE_SIZE,
            namespace: None,
            max_connections: 4,
            connect_retries: 0,
            retry_backoff_ms: 1000,
            on_table_error: TableErrorPolicy::Abort,
            stable_order: false,
        }
    }
}

impl Config {
    /// `~/.sauv/config.yaml`
    pub fn default_path() -> PathBuf {
        home().join(".sauv").join("config.yaml")
    }

    /// Load `path` if given (it must exist), else the default file if present,
    /// else built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    Config::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BackupError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
            .map_err(|e| BackupError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(BackupError::Config("page_size must be greater than 0".into()));
        }
        if self.max_connections == 0 {
            return Err(BackupError::Config("max_connections must be greater than 0".into()));
        }
        Ok(())
    }

    /// `<backup_dir>/<database>_<YYYYmmdd_HHMMSS>.sql`
    pub fn default_destination(&self, descriptor: &ConnectionDescriptor, now: DateTime<Local>) -> PathBuf {
        self.backup_dir.join(format!(
            "{}_{}.sql",
            descriptor.database_name(),
            now.format("%Y%m%d_%H%M%S")
        ))
    }
}
