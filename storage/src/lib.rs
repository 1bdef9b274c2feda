//! # Storage backends
//!
//! Configuration and unification for the storage backends.

use std::sync::Arc;

use camino::Utf8Path;
#[cfg(feature = "local")]
use camino::Utf8PathBuf;
use serde::Deserialize;

#[cfg(feature = "local")]
pub(crate) mod local;

pub(crate) mod memory;

#[cfg(feature = "local")]
#[doc(inline)]
pub use local::LocalDriver;

#[doc(inline)]
pub use memory::MemoryStorage;

#[doc(inline)]
pub use storage_driver::{Driver, Metadata, StorageError, StorageErrorKind};

/// Which storage backend to use, as written in configuration files.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageConfig {
    /// In-process storage, empty at startup.
    Memory {
        /// Bucket to create
        bucket: String,
    },

    /// A directory on the local file system. Buckets are its subdirectories.
    #[cfg(feature = "local")]
    Local {
        /// Root directory, which must already exist
        path: Utf8PathBuf,
    },
}

impl StorageConfig {
    /// Open the configured backend.
    #[tracing::instrument]
    pub async fn build(self) -> Result<Storage, StorageError> {
        let client: Storage = match self {
            StorageConfig::Memory { bucket } => MemoryStorage::with_buckets(&[&bucket]).into(),
            #[cfg(feature = "local")]
            StorageConfig::Local { path } => {
                let metadata = tokio::fs::metadata(&path).await.map_err(|err| {
                    StorageError::from_io("local", err)
                        .path(path.as_str())
                        .context("storage root")
                        .build()
                })?;
                if !metadata.is_dir() {
                    return Err(StorageError::builder(
                        "local",
                        StorageErrorKind::InvalidRequest,
                        format!("storage root {path} is not a directory"),
                    )
                    .path(path.as_str())
                    .build());
                }
                LocalDriver::new(path).into()
            }
        };
        Ok(client)
    }
}

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// A shared handle to a storage driver.
#[derive(Debug, Clone)]
pub struct Storage {
    driver: ArcDriver,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// Wrap a driver which is already shared, e.g. to keep a handle for inspection.
    pub fn from_arc(driver: ArcDriver) -> Self {
        Self { driver }
    }

    pub fn name(&self) -> &str {
        self.driver.name()
    }

    pub fn bucket<S: Into<String>>(&self, bucket: S) -> StorageBucket {
        StorageBucket {
            driver: self.driver.clone(),
            bucket: bucket.into(),
        }
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn metadata(&self, bucket: &str, path: &Utf8Path) -> Result<Metadata, StorageError> {
        self.driver.metadata(bucket, path).await
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn get_content(&self, bucket: &str, path: &Utf8Path) -> Result<Vec<u8>, StorageError> {
        tracing::trace!(%path, "Reading from: {bucket}/{path}");
        self.driver.get_content(bucket, path).await
    }

    #[tracing::instrument(skip(self, content), fields(driver=self.driver.name(), size=content.len()))]
    pub async fn put_content(
        &self,
        bucket: &str,
        path: &Utf8Path,
        content: &[u8],
    ) -> Result<(), StorageError> {
        tracing::trace!(%path, "Writing to: {bucket}/{path}");
        self.driver.put_content(bucket, path, content).await
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn list(&self, bucket: &str, path: &Utf8Path) -> Result<Vec<String>, StorageError> {
        self.driver.list(bucket, path).await
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn move_object(
        &self,
        bucket: &str,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.driver.move_object(bucket, source, destination).await
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn delete(&self, bucket: &str, path: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(bucket, path).await
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn exists(&self, bucket: &str, path: &Utf8Path) -> Result<bool, StorageError> {
        self.driver.exists(bucket, path).await
    }
}

/// A storage driver bound to a single bucket.
#[derive(Debug, Clone)]
pub struct StorageBucket {
    /// The bucket name
    pub bucket: String,
    driver: ArcDriver,
}

impl StorageBucket {
    /// Name of the underlying driver.
    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn metadata(&self, path: &Utf8Path) -> Result<Metadata, StorageError> {
        self.driver.metadata(&self.bucket, path).await
    }

    #[tracing::instrument(level = "trace", skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn get_content(&self, path: &Utf8Path) -> Result<Vec<u8>, StorageError> {
        self.driver.get_content(&self.bucket, path).await
    }

    #[tracing::instrument(skip(self, content), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn put_content(&self, path: &Utf8Path, content: &[u8]) -> Result<(), StorageError> {
        tracing::trace!(%path, "Writing to: {}/{path}", self.bucket);
        self.driver.put_content(&self.bucket, path, content).await
    }

    #[tracing::instrument(level = "trace", skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn list(&self, path: &Utf8Path) -> Result<Vec<String>, StorageError> {
        self.driver.list(&self.bucket, path).await
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn move_object(
        &self,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.driver
            .move_object(&self.bucket, source, destination)
            .await
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn delete(&self, path: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(&self.bucket, path).await
    }

    #[tracing::instrument(level = "trace", skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn exists(&self, path: &Utf8Path) -> Result<bool, StorageError> {
        self.driver.exists(&self.bucket, path).await
    }
}
