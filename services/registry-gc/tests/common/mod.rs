#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use registry_gc::{Digest, Layout, PruneOptions, Pruner, RegistryGraph};
use tokio_util::sync::CancellationToken;
use storage::{
    Driver, LocalDriver, MemoryStorage, Metadata, Storage, StorageBucket, StorageError,
    StorageErrorKind,
};

pub const BUCKET: &str = "registry";

/// A mutating call seen by [`RecordingDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Put(String),
    Move(String, String),
    Delete(String),
}

/// Wraps a driver, recording every mutating call and optionally failing deletes.
#[derive(Debug)]
pub struct RecordingDriver {
    inner: Arc<dyn Driver + Send + Sync>,
    mutations: Mutex<Vec<Mutation>>,
    failing: Mutex<Vec<Utf8PathBuf>>,
    cancel_on_delete: Mutex<Option<CancellationToken>>,
}

impl RecordingDriver {
    pub fn new(inner: Arc<dyn Driver + Send + Sync>) -> Self {
        Self {
            inner,
            mutations: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
            cancel_on_delete: Mutex::new(None),
        }
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.mutations.lock().unwrap().clone()
    }

    pub fn deletions(&self) -> Vec<String> {
        self.mutations()
            .into_iter()
            .filter_map(|m| match m {
                Mutation::Delete(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    /// Make every delete at or below `path` fail with a permission error.
    pub fn fail_deletes_under(&self, path: impl Into<Utf8PathBuf>) {
        self.failing.lock().unwrap().push(path.into());
    }

    /// Cancel `token` once the next delete has gone through.
    pub fn cancel_after_delete(&self, token: CancellationToken) {
        *self.cancel_on_delete.lock().unwrap() = Some(token);
    }

    fn record(&self, mutation: Mutation) {
        self.mutations.lock().unwrap().push(mutation);
    }
}

#[async_trait::async_trait]
impl Driver for RecordingDriver {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn scheme(&self) -> &str {
        "recording"
    }

    async fn get_content(&self, bucket: &str, path: &Utf8Path) -> Result<Vec<u8>, StorageError> {
        self.inner.get_content(bucket, path).await
    }

    async fn put_content(
        &self,
        bucket: &str,
        path: &Utf8Path,
        content: &[u8],
    ) -> Result<(), StorageError> {
        self.record(Mutation::Put(path.to_string()));
        self.inner.put_content(bucket, path, content).await
    }

    async fn metadata(&self, bucket: &str, path: &Utf8Path) -> Result<Metadata, StorageError> {
        self.inner.metadata(bucket, path).await
    }

    async fn list(&self, bucket: &str, path: &Utf8Path) -> Result<Vec<String>, StorageError> {
        self.inner.list(bucket, path).await
    }

    async fn move_object(
        &self,
        bucket: &str,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.record(Mutation::Move(source.to_string(), destination.to_string()));
        self.inner.move_object(bucket, source, destination).await
    }

    async fn delete(&self, bucket: &str, path: &Utf8Path) -> Result<(), StorageError> {
        self.record(Mutation::Delete(path.to_string()));

        let failing = self
            .failing
            .lock()
            .unwrap()
            .iter()
            .any(|prefix| path.starts_with(prefix));
        if failing {
            return Err(StorageError::builder(
                self.name(),
                StorageErrorKind::PermissionDenied,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only object"),
            )
            .bucket(bucket)
            .path(path.as_str())
            .build());
        }

        let result = self.inner.delete(bucket, path).await;
        if let Some(token) = self.cancel_on_delete.lock().unwrap().take() {
            token.cancel();
        }
        result
    }
}

/// A registry in storage, built up object by object.
///
/// Setup writes go straight to the underlying driver. Everything the code
/// under test does goes through the [`RecordingDriver`].
#[derive(Debug)]
pub struct Fixture {
    pub driver: Arc<RecordingDriver>,
    pub layout: Layout,
    setup: StorageBucket,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_driver(Arc::new(MemoryStorage::with_buckets(&[BUCKET])))
    }

    pub fn local(root: &Utf8Path) -> Self {
        Self::with_driver(Arc::new(LocalDriver::new(root.to_owned())))
    }

    fn with_driver(inner: Arc<dyn Driver + Send + Sync>) -> Self {
        let setup = Storage::from_arc(inner.clone()).bucket(BUCKET);
        Self {
            driver: Arc::new(RecordingDriver::new(inner)),
            layout: Layout::default(),
            setup,
        }
    }

    /// The storage the code under test sees.
    pub fn storage(&self) -> StorageBucket {
        Storage::new(self.driver.clone()).bucket(BUCKET)
    }

    pub fn pruner(&self, options: PruneOptions) -> Pruner {
        Pruner::new(self.storage(), self.layout.clone(), options).with_concurrency(3)
    }

    pub async fn graph(&self) -> RegistryGraph {
        self.pruner(PruneOptions::default())
            .load_registry_graph()
            .await
            .unwrap()
    }

    pub async fn put(&self, path: impl AsRef<Utf8Path>, content: &[u8]) {
        self.setup.put_content(path.as_ref(), content).await.unwrap();
    }

    pub async fn remove(&self, path: impl AsRef<Utf8Path>) {
        self.setup.delete(path.as_ref()).await.unwrap();
    }

    pub async fn exists(&self, path: impl AsRef<Utf8Path>) -> bool {
        self.setup.exists(path.as_ref()).await.unwrap()
    }

    /// Whether the link file in a layer, revision or tag index directory exists.
    pub async fn link_exists(&self, dir: impl AsRef<Utf8Path>) -> bool {
        self.exists(dir.as_ref().join("link")).await
    }

    pub async fn blob_exists(&self, digest: &Digest) -> bool {
        self.exists(self.layout.blob_data(digest)).await
    }

    /// Store content in the blob store.
    pub async fn blob(&self, content: &[u8]) -> Digest {
        let digest = Digest::sha256(content);
        self.put(self.layout.blob_data(&digest), content).await;
        digest
    }

    async fn link(&self, dir: Utf8PathBuf, digest: &Digest) {
        self.put(dir.join("link"), digest.as_str().as_bytes()).await;
    }

    pub async fn layer_link(&self, repository: &str, digest: &Digest) {
        self.link(self.layout.layer_dir(repository, digest), digest)
            .await;
    }

    pub async fn revision_link(&self, repository: &str, digest: &Digest) {
        self.link(self.layout.revision_dir(repository, digest), digest)
            .await;
    }

    pub async fn signature(&self, repository: &str, revision: &Digest, signature: &Digest) {
        self.link(
            self.layout.signature_dir(repository, revision, signature),
            signature,
        )
        .await;
    }

    /// Point a tag at a revision, recording it in the tag's history too.
    pub async fn tag(&self, repository: &str, tag: &str, digest: &Digest) {
        self.put(
            self.layout.tag_current_link(repository, tag),
            digest.as_str().as_bytes(),
        )
        .await;
        self.link(self.layout.tag_index_dir(repository, tag, digest), digest)
            .await;
    }

    /// Store an image manifest blob referencing `layers`, without linking it anywhere.
    pub async fn manifest_blob(&self, layers: &[&Digest]) -> Digest {
        let content = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "layers": layers
                .iter()
                .map(|digest| serde_json::json!({
                    "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                    "digest": digest.to_string(),
                    "size": 1,
                }))
                .collect::<Vec<_>>(),
        });
        self.blob(content.to_string().as_bytes()).await
    }

    /// Push an image the way a registry does: layer blobs and links, the
    /// manifest blob and revision link, then the tag.
    pub async fn push(&self, repository: &str, tag: Option<&str>, layers: &[&[u8]]) -> Image {
        let mut digests = Vec::new();
        for content in layers {
            let digest = self.blob(content).await;
            self.layer_link(repository, &digest).await;
            digests.push(digest);
        }

        let manifest = self
            .manifest_blob(&digests.iter().collect::<Vec<_>>())
            .await;
        self.revision_link(repository, &manifest).await;
        if let Some(tag) = tag {
            self.tag(repository, tag, &manifest).await;
        }

        Image {
            manifest,
            layers: digests,
        }
    }

    /// Push an index manifest over already pushed manifests.
    pub async fn push_index(&self, repository: &str, tag: &str, manifests: &[&Digest]) -> Digest {
        let content = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.index.v1+json",
            "manifests": manifests
                .iter()
                .map(|digest| serde_json::json!({
                    "mediaType": "application/vnd.oci.image.manifest.v1+json",
                    "digest": digest.to_string(),
                    "size": 1,
                }))
                .collect::<Vec<_>>(),
        });
        let index = self.blob(content.to_string().as_bytes()).await;
        self.revision_link(repository, &index).await;
        self.tag(repository, tag, &index).await;
        index
    }
}

/// What [`Fixture::push`] stored.
#[derive(Debug, Clone)]
pub struct Image {
    pub manifest: Digest,
    pub layers: Vec<Digest>,
}

/// Run the report into a string.
pub fn report(pruner: &Pruner, graph: &RegistryGraph) -> (bool, String) {
    let mut out: Vec<u8> = Vec::new();
    let dirty = pruner.report_orphans(graph, &mut out).unwrap();
    (dirty, String::from_utf8(out).unwrap())
}

pub fn verbose() -> PruneOptions {
    PruneOptions {
        verbose: true,
        ..PruneOptions::default()
    }
}

pub fn unattended(remove_empty: bool) -> PruneOptions {
    PruneOptions {
        remove_empty,
        confirm: false,
        ..PruneOptions::default()
    }
}
