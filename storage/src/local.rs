use camino::{Utf8Path, Utf8PathBuf};

use storage_driver::{Driver, Metadata, StorageError, StorageErrorKind};

/// Storage driver backed by a directory on the local file system.
///
/// Each bucket is a directory below the root, and paths map directly onto
/// the file system below the bucket.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Result<Utf8PathBuf, StorageError> {
        if remote
            .components()
            .any(|c| !matches!(c, camino::Utf8Component::Normal(_)))
        {
            return Err(StorageError::builder(
                self.name(),
                StorageErrorKind::InvalidRequest,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "path must be relative and normalized",
                ),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build());
        }

        let mut path = self.root.join(bucket);
        path.push(remote);
        Ok(path)
    }

    fn io_error(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        context: &str,
    ) -> impl FnOnce(std::io::Error) -> StorageError {
        let engine = self.name();
        let bucket = bucket.to_owned();
        let remote = remote.to_string();
        let context = context.to_owned();
        move |err| {
            StorageError::from_io(engine, err)
                .bucket(bucket)
                .path(remote)
                .context(context)
                .build()
        }
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    fn scheme(&self) -> &str {
        "local"
    }

    async fn get_content(&self, bucket: &str, remote: &Utf8Path) -> Result<Vec<u8>, StorageError> {
        let path = self.path(bucket, remote)?;
        tokio::fs::read(&path)
            .await
            .map_err(self.io_error(bucket, remote, "read"))
    }

    async fn put_content(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        content: &[u8],
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(self.io_error(bucket, remote, "create_dir_all"))?;
        }

        tokio::fs::write(&path, content)
            .await
            .map_err(self.io_error(bucket, remote, "write"))
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let path = self.path(bucket, remote)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(self.io_error(bucket, remote, "metadata"))?;

        if metadata.is_dir() {
            return Err(StorageError::not_found(self.name(), bucket, remote.as_str()));
        }

        Ok(Metadata {
            size: metadata.len(),
            created: metadata
                .created()
                .or_else(|_| metadata.modified())
                .map_err(self.io_error(bucket, remote, "created timestamp"))?
                .into(),
        })
    }

    async fn list(&self, bucket: &str, remote: &Utf8Path) -> Result<Vec<String>, StorageError> {
        let path = self.path(bucket, remote)?;

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(self.io_error(bucket, remote, "metadata"))?;
        if !metadata.is_dir() {
            return Err(StorageError::not_found(self.name(), bucket, remote.as_str()));
        }

        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(self.io_error(bucket, remote, "read_dir"))?;

        let mut children = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(self.io_error(bucket, remote, "read_dir entry"))?
        {
            match entry.file_name().into_string() {
                Ok(name) => children.push(remote.join(name).into_string()),
                Err(name) => {
                    tracing::warn!(%path, ?name, "skipping non-UTF-8 directory entry");
                }
            }
        }

        children.sort();
        tracing::trace!(%path, entries = children.len(), "listed directory");
        Ok(children)
    }

    async fn move_object(
        &self,
        bucket: &str,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError> {
        let from = self.path(bucket, source)?;
        let to = self.path(bucket, destination)?;

        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(self.io_error(bucket, destination, "create_dir_all"))?;
        }

        tokio::fs::rename(&from, &to)
            .await
            .map_err(self.io_error(bucket, source, "rename"))
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        if remote.as_str().is_empty() {
            return Err(StorageError::builder(
                self.name(),
                StorageErrorKind::InvalidRequest,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "refusing to delete the bucket root",
                ),
            )
            .bucket(bucket)
            .build());
        }

        let path = self.path(bucket, remote)?;
        let metadata = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(self.io_error(bucket, remote, "metadata"))?;

        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path)
                .await
                .map_err(self.io_error(bucket, remote, "remove_dir_all"))
        } else {
            tokio::fs::remove_file(&path)
                .await
                .map_err(self.io_error(bucket, remote, "remove_file"))
        }
    }
}
