use std::collections::{BTreeMap, BTreeSet, HashMap};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use storage_driver::{Driver, Metadata, StorageError, StorageErrorKind};

type Bucket = BTreeMap<Utf8PathBuf, MemoryFileItem>;

#[derive(Debug)]
struct MemoryFileItem {
    created: DateTime<Utc>,
    data: Vec<u8>,
}

impl From<Vec<u8>> for MemoryFileItem {
    fn from(data: Vec<u8>) -> Self {
        Self {
            created: Utc::now(),
            data,
        }
    }
}

impl From<&MemoryFileItem> for Metadata {
    fn from(value: &MemoryFileItem) -> Self {
        Self {
            created: value.created,
            size: value.data.len() as u64,
        }
    }
}

/// Storage driver that stores files in memory.
///
/// Files are kept in a sorted map per bucket, and directories are derived
/// from the file paths.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryStorage {
    /// Create a new `MemoryStorage` instance, with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `MemoryStorage` instance, with the given buckets.
    pub fn with_buckets(buckets: &[&str]) -> Self {
        let mut map = HashMap::new();
        for bucket in buckets {
            map.insert(bucket.to_string(), Bucket::new());
        }

        Self {
            buckets: RwLock::new(map),
        }
    }

    /// Create a new bucket in the storage.
    pub async fn create_bucket(&self, bucket: String) {
        let mut buckets = self.buckets.write().await;
        buckets.insert(bucket, Bucket::new());
    }

    /// All file paths currently stored in a bucket, in sorted order.
    pub async fn files(&self, bucket: &str) -> Vec<Utf8PathBuf> {
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn missing_bucket(&self, bucket: &str) -> StorageError {
        StorageError::builder(
            self.name(),
            StorageErrorKind::NotFound,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Bucket not found: {bucket}"),
            ),
        )
        .bucket(bucket)
        .context("bucket not found")
        .build()
    }

    fn invalid_path(&self, bucket: &str, path: &Utf8Path, reason: &str) -> StorageError {
        StorageError::builder(
            self.name(),
            StorageErrorKind::InvalidRequest,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, reason.to_owned()),
        )
        .bucket(bucket)
        .path(path.as_str())
        .build()
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn scheme(&self) -> &str {
        "memory"
    }

    async fn get_content(&self, bucket: &str, path: &Utf8Path) -> Result<Vec<u8>, StorageError> {
        let buckets = self.buckets.read().await;
        let files = buckets
            .get(bucket)
            .ok_or_else(|| self.missing_bucket(bucket))?;
        files
            .get(path)
            .map(|item| item.data.clone())
            .ok_or_else(|| StorageError::not_found(self.name(), bucket, path.as_str()))
    }

    async fn put_content(
        &self,
        bucket: &str,
        path: &Utf8Path,
        content: &[u8],
    ) -> Result<(), StorageError> {
        if path.as_str().is_empty() {
            return Err(self.invalid_path(bucket, path, "cannot write to the bucket root"));
        }

        let mut buckets = self.buckets.write().await;
        let files = buckets.entry(bucket.to_string()).or_default();
        files.insert(path.to_owned(), content.to_vec().into());
        Ok(())
    }

    async fn metadata(&self, bucket: &str, path: &Utf8Path) -> Result<Metadata, StorageError> {
        let buckets = self.buckets.read().await;
        let files = buckets
            .get(bucket)
            .ok_or_else(|| self.missing_bucket(bucket))?;
        files
            .get(path)
            .map(Metadata::from)
            .ok_or_else(|| StorageError::not_found(self.name(), bucket, path.as_str()))
    }

    async fn list(&self, bucket: &str, path: &Utf8Path) -> Result<Vec<String>, StorageError> {
        tracing::trace!(%bucket, %path, "list memory bucket");

        let buckets = self.buckets.read().await;
        let files = buckets
            .get(bucket)
            .ok_or_else(|| self.missing_bucket(bucket))?;

        let mut children = BTreeSet::new();
        for file in files.keys() {
            let Ok(rest) = file.strip_prefix(path) else {
                continue;
            };
            if let Some(first) = rest.components().next() {
                children.insert(path.join(first.as_str()).into_string());
            }
        }

        if children.is_empty() {
            return Err(StorageError::not_found(self.name(), bucket, path.as_str()));
        }

        Ok(children.into_iter().collect())
    }

    async fn move_object(
        &self,
        bucket: &str,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        let files = buckets
            .get_mut(bucket)
            .ok_or_else(|| self.missing_bucket(bucket))?;

        let item = files
            .remove(source)
            .ok_or_else(|| StorageError::not_found(self.name(), bucket, source.as_str()))?;
        files.insert(destination.to_owned(), item);
        Ok(())
    }

    async fn delete(&self, bucket: &str, path: &Utf8Path) -> Result<(), StorageError> {
        if path.as_str().is_empty() {
            return Err(self.invalid_path(bucket, path, "refusing to delete the bucket root"));
        }

        let mut buckets = self.buckets.write().await;
        let files = buckets
            .get_mut(bucket)
            .ok_or_else(|| self.missing_bucket(bucket))?;

        let before = files.len();
        files.retain(|file, _| !file.starts_with(path));
        if files.len() == before {
            return Err(StorageError::not_found(self.name(), bucket, path.as_str()));
        }

        tracing::trace!(%bucket, %path, removed = before - files.len(), "deleted");
        Ok(())
    }
}
