//! Treeflow configuration
//!
//! Stored in `~/.config/treeflow/config.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. CLI flags
//! 2. Environment variables (`TREEFLOW_WORKERS`, `TREEFLOW_MODE`,
//!    `TREEFLOW_LOCATION`, `TREEFLOW_REMOTE_ROOT`)
//! 3. Config file
//! 4. Defaults
//!
//! ```toml
//! [engine]
//! workers = 8
//! mode = "processes"
//! schema_policy = "abort"
//!
//! [sources]
//! location = "disk"
//! remote_root = "/pnfs/mu2e"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{CommandCatalog, CATALOG_TIMEOUT, DEFAULT_CATALOG_COMMAND};
use crate::engine::{default_workers, EngineConfig, ExecutionMode};
use crate::error::{Result, TreeflowError};
use crate::merge::SchemaPolicy;
use crate::reader::{ReaderConfig, DEFAULT_TREE_PATH};
use crate::source::Location;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TreeflowConfig {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub sources: SourcesSection,

    #[serde(default)]
    pub reader: ReaderSection,

    #[serde(default)]
    pub catalog: CatalogSection,

    #[serde(default)]
    pub selftest: SelfTestSection,
}

/// `[engine]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineSection {
    /// Pool size (default: hardware parallelism)
    pub workers: Option<usize>,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub worker_verbosity: u8,
    #[serde(default)]
    pub schema_policy: SchemaPolicy,
}

/// `[sources]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourcesSection {
    #[serde(default)]
    pub location: Location,
    /// Where remote tiers are mounted
    pub remote_root: Option<PathBuf>,
}

/// `[reader]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReaderSection {
    #[serde(default = "default_tree_path")]
    pub tree_path: String,
}

impl Default for ReaderSection {
    fn default() -> Self {
        Self {
            tree_path: default_tree_path(),
        }
    }
}

fn default_tree_path() -> String {
    DEFAULT_TREE_PATH.to_string()
}

/// `[catalog]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogSection {
    #[serde(default = "default_catalog_command")]
    pub command: String,
    #[serde(default = "default_catalog_timeout")]
    pub timeout_secs: u64,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            command: default_catalog_command(),
            timeout_secs: default_catalog_timeout(),
        }
    }
}

fn default_catalog_command() -> String {
    DEFAULT_CATALOG_COMMAND.to_string()
}

fn default_catalog_timeout() -> u64 {
    CATALOG_TIMEOUT.as_secs()
}

/// `[selftest]`: inputs used by `treeflow test`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SelfTestSection {
    pub local_file: Option<String>,
    pub remote_file: Option<String>,
    pub file_list: Option<PathBuf>,
    pub remote_file_list: Option<PathBuf>,
    pub bad_file_list: Option<PathBuf>,
    pub defname: Option<String>,
}

impl TreeflowConfig {
    /// Returns `~/.config/treeflow/` on Unix, `%APPDATA%/treeflow/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("treeflow")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load from the default path; a missing file yields defaults
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load from an explicit path; the file must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let file_error = |reason: String| TreeflowError::ConfigFile {
            path: path.to_path_buf(),
            reason,
        };
        let content = fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        toml::from_str(&content).map_err(|e| file_error(e.to_string()))
    }

    /// Merge environment variables; empty values are ignored
    pub fn with_env(mut self) -> Result<Self> {
        if let Some(workers) = env_var("TREEFLOW_WORKERS") {
            let workers = workers.parse().map_err(|_| {
                TreeflowError::config(format!("TREEFLOW_WORKERS must be a number, got '{workers}'"))
            })?;
            self.engine.workers = Some(workers);
        }
        if let Some(mode) = env_var("TREEFLOW_MODE") {
            self.engine.mode = mode.parse()?;
        }
        if let Some(location) = env_var("TREEFLOW_LOCATION") {
            self.sources.location = location.parse()?;
        }
        if let Some(root) = env_var("TREEFLOW_REMOTE_ROOT") {
            self.sources.remote_root = Some(PathBuf::from(root));
        }
        Ok(self)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            mode: self.engine.mode,
            workers: self.engine.workers.unwrap_or_else(default_workers),
            worker_program: None,
            worker_verbosity: self.engine.worker_verbosity,
        }
    }

    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            remote_root: self.sources.remote_root.clone(),
        }
    }

    pub fn catalog(&self) -> Result<CommandCatalog> {
        Ok(CommandCatalog::new(&self.catalog.command)?
            .with_timeout(Duration::from_secs(self.catalog.timeout_secs)))
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
