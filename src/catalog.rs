//! Catalog lookup: definition name → ordered file names
//!
//! The catalog service itself is external. [`CommandCatalog`] shells out to a
//! lookup command (by default `samweb list-definition-files <defname>`) and
//! reads one file name per stdout line. [`StaticCatalog`] serves fixed
//! definitions and is what tests use.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::{Result, TreeflowError};

/// Default catalog lookup command; the definition name is appended
pub const DEFAULT_CATALOG_COMMAND: &str = "samweb list-definition-files";

/// Default timeout for a catalog lookup
pub const CATALOG_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolves a catalog definition name to source identifiers
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn lookup(&self, defname: &str) -> Result<Vec<String>>;
}

/// Runs an external lookup command
#[derive(Debug, Clone)]
pub struct CommandCatalog {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCatalog {
    /// Build from a whitespace-separated command line
    pub fn new(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| TreeflowError::config("catalog command is empty"))?;
        Ok(Self {
            program,
            args: parts.collect(),
            timeout: CATALOG_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for CommandCatalog {
    /// `samweb list-definition-files`
    fn default() -> Self {
        Self {
            program: "samweb".to_string(),
            args: vec!["list-definition-files".to_string()],
            timeout: CATALOG_TIMEOUT,
        }
    }
}

#[async_trait]
impl Catalog for CommandCatalog {
    #[instrument(skip(self), fields(program = %self.program))]
    async fn lookup(&self, defname: &str) -> Result<Vec<String>> {
        let failed = |reason: String| TreeflowError::CatalogLookupFailed {
            defname: defname.to_string(),
            reason,
        };

        let output = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new(&self.program)
                .args(&self.args)
                .arg(defname)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| failed(format!("timed out after {}s", self.timeout.as_secs())))?
        .map_err(|e| failed(format!("failed to run '{}': {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!("command failed: {}", stderr.trim())));
        }

        let files: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        debug!(count = files.len(), "Catalog returned files");
        Ok(files)
    }
}

/// In-memory catalog of fixed definitions
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    definitions: HashMap<String, Vec<String>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definition<I, S>(mut self, defname: impl Into<String>, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.definitions
            .insert(defname.into(), files.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn lookup(&self, defname: &str) -> Result<Vec<String>> {
        self.definitions
            .get(defname)
            .cloned()
            .ok_or_else(|| TreeflowError::CatalogLookupFailed {
                defname: defname.to_string(),
                reason: "unknown definition".to_string(),
            })
    }
}
