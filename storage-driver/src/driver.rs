use std::{fmt, ops::Deref, sync::Arc};

use camino::Utf8Path;
use chrono::{DateTime, Utc};

use crate::error::StorageError;

/// File object metadata, which will be generically provided by the driver.
///
/// This struct only provides common metadata fields, and drivers may provide more specific
/// metadata fields directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    /// The size of the file in bytes.
    pub size: u64,

    /// The creation timestamp of the file.
    pub created: DateTime<Utc>,
}

/// A storage driver, which provides the ability to interact with a hierarchical
/// storage backend.
///
/// Paths are `/`-separated and relative to the bucket. Directories are implicit:
/// a directory exists as long as some file exists beneath it.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// The name of the driver.
    fn name(&self) -> &'static str;

    /// The Uri scheme of the driver.
    fn scheme(&self) -> &str;

    /// Read the full contents of a file.
    async fn get_content(&self, bucket: &str, path: &Utf8Path) -> Result<Vec<u8>, StorageError>;

    /// Write the full contents of a file, replacing it if it exists.
    async fn put_content(
        &self,
        bucket: &str,
        path: &Utf8Path,
        content: &[u8],
    ) -> Result<(), StorageError>;

    /// Get the metadata for a file, by path.
    async fn metadata(&self, bucket: &str, path: &Utf8Path) -> Result<Metadata, StorageError>;

    /// List the immediate children of a directory, as full paths within the bucket.
    ///
    /// Entries are sorted. Listing a directory which does not exist is a
    /// [`StorageErrorKind::NotFound`](crate::StorageErrorKind::NotFound) error.
    async fn list(&self, bucket: &str, path: &Utf8Path) -> Result<Vec<String>, StorageError>;

    /// Move a file from `source` to `destination`, replacing the destination.
    async fn move_object(
        &self,
        bucket: &str,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError>;

    /// Delete a file, or a directory and everything beneath it.
    async fn delete(&self, bucket: &str, path: &Utf8Path) -> Result<(), StorageError>;

    /// Check whether a file exists.
    ///
    /// Only a not-found error means "no": any other failure is returned to the caller.
    async fn exists(&self, bucket: &str, path: &Utf8Path) -> Result<bool, StorageError> {
        match self.metadata(bucket, path).await {
            Ok(_) => Ok(true),
            Err(error) if error.is_not_found() => {
                tracing::trace!(%path, "does not exist");
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }
}

#[async_trait::async_trait]
impl<D> Driver for Arc<D>
where
    D: ?Sized + Driver + Sync + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    fn scheme(&self) -> &str {
        self.deref().scheme()
    }

    async fn get_content(&self, bucket: &str, path: &Utf8Path) -> Result<Vec<u8>, StorageError> {
        self.deref().get_content(bucket, path).await
    }

    async fn put_content(
        &self,
        bucket: &str,
        path: &Utf8Path,
        content: &[u8],
    ) -> Result<(), StorageError> {
        self.deref().put_content(bucket, path, content).await
    }

    async fn metadata(&self, bucket: &str, path: &Utf8Path) -> Result<Metadata, StorageError> {
        self.deref().metadata(bucket, path).await
    }

    async fn list(&self, bucket: &str, path: &Utf8Path) -> Result<Vec<String>, StorageError> {
        self.deref().list(bucket, path).await
    }

    async fn move_object(
        &self,
        bucket: &str,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.deref().move_object(bucket, source, destination).await
    }

    async fn delete(&self, bucket: &str, path: &Utf8Path) -> Result<(), StorageError> {
        self.deref().delete(bucket, path).await
    }
}

#[async_trait::async_trait]
impl<D> Driver for &D
where
    D: ?Sized + Driver + Sync + Send + 'static,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn scheme(&self) -> &str {
        (**self).scheme()
    }

    async fn get_content(&self, bucket: &str, path: &Utf8Path) -> Result<Vec<u8>, StorageError> {
        (**self).get_content(bucket, path).await
    }

    async fn put_content(
        &self,
        bucket: &str,
        path: &Utf8Path,
        content: &[u8],
    ) -> Result<(), StorageError> {
        (**self).put_content(bucket, path, content).await
    }

    async fn metadata(&self, bucket: &str, path: &Utf8Path) -> Result<Metadata, StorageError> {
        (**self).metadata(bucket, path).await
    }

    async fn list(&self, bucket: &str, path: &Utf8Path) -> Result<Vec<String>, StorageError> {
        (**self).list(bucket, path).await
    }

    async fn move_object(
        &self,
        bucket: &str,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError> {
        (**self).move_object(bucket, source, destination).await
    }

    async fn delete(&self, bucket: &str, path: &Utf8Path) -> Result<(), StorageError> {
        (**self).delete(bucket, path).await
    }
}
