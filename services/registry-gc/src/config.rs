//! Configuration file for the pruning tool
//!
//! ```toml
//! bucket = "registry"
//! root = "docker/registry/v2"
//!
//! [storage.local]
//! path = "/var/lib"
//!
//! [scan]
//! concurrency = 8
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use storage::{StorageConfig, StorageError};

use crate::layout::{Layout, DEFAULT_ROOT};
use crate::prune::{PruneOptions, Pruner};

/// Environment variable naming the configuration file.
pub const CONFIGURATION_PATH_ENV: &str = "REGISTRY_CONFIGURATION_PATH";

const DEFAULT_BUCKET: &str = "registry";
const DEFAULT_CONCURRENCY: usize = 4;

/// Errors loading the configuration or connecting to storage.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading configuration {path}")]
    Read {
        /// The configuration file
        path: Utf8PathBuf,
        /// The read failure
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration.
    #[error("parsing configuration {path}")]
    Parse {
        /// The configuration file
        path: Utf8PathBuf,
        /// The parse failure
        #[source]
        source: toml_edit::de::Error,
    },

    /// The configured storage could not be opened.
    #[error("opening storage")]
    Storage(#[source] StorageError),

    /// No configuration file was given.
    #[error("no configuration file given, pass one or set {CONFIGURATION_PATH_ENV}")]
    Missing,
}

/// Repository scanning settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// Repositories scanned at once.
    pub concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Registry storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Storage backend holding the registry.
    pub storage: StorageConfig,

    /// Bucket within the storage backend.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Registry root within the bucket.
    #[serde(default = "default_root")]
    pub root: Utf8PathBuf,

    /// Scan settings.
    #[serde(default)]
    pub scan: ScanConfig,
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_owned()
}

fn default_root() -> Utf8PathBuf {
    DEFAULT_ROOT.into()
}

impl RegistryConfig {
    /// Read and parse a configuration file.
    #[tracing::instrument]
    pub async fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?;

        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Parse configuration text.
    pub fn from_toml(text: &str) -> Result<Self, toml_edit::de::Error> {
        toml_edit::de::from_str(text)
    }

    /// The storage layout described by this configuration.
    pub fn layout(&self) -> Layout {
        Layout::new(self.root.clone())
    }

    /// Open the configured storage and build a pruner over it.
    pub async fn pruner(&self, options: PruneOptions) -> Result<Pruner, ConfigError> {
        let storage = self
            .storage
            .clone()
            .build()
            .await
            .map_err(ConfigError::Storage)?;

        tracing::debug!(driver = storage.name(), bucket = %self.bucket, root = %self.root, "opened storage");
        Ok(
            Pruner::new(storage.bucket(self.bucket.as_str()), self.layout(), options)
                .with_concurrency(self.scan.concurrency),
        )
    }
}
