//! The registry reference graph
//!
//! A [`RegistryGraph`] is a point-in-time snapshot of every repository and
//! blob in the store. It is built by [`GraphBuilder`] from a full, read-only
//! scan and goes stale as soon as anything writes to the registry.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use futures::{StreamExt as _, TryStreamExt as _};
use storage::{StorageBucket, StorageError};
use tokio_util::sync::CancellationToken;

use crate::digest::{Algorithm, Digest};
use crate::error::{PruneError, PruneResult};
use crate::layout::{self, Layout};
use crate::refcount::BlobRefCounter;
use crate::scanner::RepositoryScanner;

/// One manifest revision of a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestInfo {
    /// The revision's digest.
    pub digest: Digest,

    /// The tag pointing at this revision, when it is reached through a tag.
    pub tag: Option<String>,

    /// Signatures linked to the revision, in digest order.
    pub signatures: Vec<Digest>,

    /// Signatures whose blob is missing, a subset of `signatures`.
    pub dangling_signatures: Vec<Digest>,

    /// Digests referenced by the manifest content, or `None` when the content
    /// is missing or could not be parsed.
    pub references: Option<Vec<Digest>>,
}

impl ManifestInfo {
    pub(crate) fn new(digest: Digest) -> Self {
        Self {
            digest,
            tag: None,
            signatures: Vec::new(),
            dangling_signatures: Vec::new(),
            references: None,
        }
    }

    /// Signatures whose blob exists.
    pub fn present_signatures(&self) -> impl Iterator<Item = &Digest> {
        self.signatures
            .iter()
            .filter(|signature| !self.dangling_signatures.contains(signature))
    }
}

/// Scan result for a single repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryGraphInfo {
    /// Repository name, e.g. `lib/app`.
    pub name: String,

    /// Layer links with an existing blob, counted by the manifest revisions
    /// (tagged or not) which reference them.
    pub layers: BlobRefCounter,

    /// Live revisions by the tag which points at them.
    pub manifests: BTreeMap<String, ManifestInfo>,

    /// Live revisions which no tag points at, reached through an index manifest.
    pub referenced_manifests: BTreeMap<Digest, ManifestInfo>,

    /// Layer links whose blob is missing.
    pub dangling_layers: BTreeSet<Digest>,

    /// Layer links which no live revision references.
    pub unlinked_layers: BTreeSet<Digest>,

    /// Revisions whose link or blob is missing.
    pub dangling_manifests: BTreeMap<Digest, ManifestInfo>,

    /// Revisions which exist but are not reachable from any tag.
    pub unlinked_manifests: BTreeMap<Digest, ManifestInfo>,

    /// Tags pointing at a revision which is missing or dangling, with the
    /// target digest when the tag link could be read.
    pub dangling_tags: BTreeMap<String, Option<Digest>>,

    /// Tags with a malformed name or link, sorted.
    pub invalid_tags: Vec<String>,

    /// Revision, layer or signature link directories whose names are not a
    /// digest, sorted. Reported, never deleted.
    pub invalid_links: Vec<String>,

    /// Blobs this repository keeps alive, i.e. its contribution to the
    /// registry-wide reference counts.
    pub retained: BTreeSet<Digest>,

    pub(crate) revision_count: usize,
}

impl RepositoryGraphInfo {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            layers: BlobRefCounter::new(),
            manifests: BTreeMap::new(),
            referenced_manifests: BTreeMap::new(),
            dangling_layers: BTreeSet::new(),
            unlinked_layers: BTreeSet::new(),
            dangling_manifests: BTreeMap::new(),
            unlinked_manifests: BTreeMap::new(),
            dangling_tags: BTreeMap::new(),
            invalid_tags: Vec::new(),
            invalid_links: Vec::new(),
            retained: BTreeSet::new(),
            revision_count: 0,
        }
    }

    /// Number of manifest revisions stored, whatever their state.
    pub fn revision_count(&self) -> usize {
        self.revision_count
    }

    /// A repository without any manifest revision.
    pub fn is_empty(&self) -> bool {
        self.revision_count == 0
    }

    /// Live revisions: tagged ones, then the ones reached through an index.
    pub fn live_manifests(&self) -> impl Iterator<Item = &ManifestInfo> {
        self.manifests
            .values()
            .chain(self.referenced_manifests.values())
    }

    /// Live revisions with at least one dangling signature.
    pub fn manifests_with_dangling_signatures(&self) -> impl Iterator<Item = &ManifestInfo> {
        let mut seen = BTreeSet::new();
        self.live_manifests()
            .filter(|m| !m.dangling_signatures.is_empty())
            .filter(move |m| seen.insert(m.digest.clone()))
    }

    /// Whether anything in the repository is dangling, unlinked or invalid.
    pub fn is_dirty(&self) -> bool {
        !self.dangling_layers.is_empty()
            || !self.unlinked_layers.is_empty()
            || !self.dangling_manifests.is_empty()
            || !self.unlinked_manifests.is_empty()
            || !self.dangling_tags.is_empty()
            || !self.invalid_tags.is_empty()
            || !self.invalid_links.is_empty()
            || self.manifests_with_dangling_signatures().next().is_some()
    }
}

/// Registry-wide aggregation of every repository scan.
#[derive(Debug, Clone, Default)]
pub struct RegistryGraph {
    /// Every repository seen, clean or not.
    pub total_repositories: usize,

    /// Repositories with anything dangling, unlinked or invalid.
    pub dirty_repositories: BTreeMap<String, Arc<RepositoryGraphInfo>>,

    /// Repositories without any manifest revision.
    pub empty_repositories: BTreeMap<String, Arc<RepositoryGraphInfo>>,

    /// Every valid blob in the store, counted by the repositories which retain it.
    pub blobs: BlobRefCounter,

    /// Blob store directories which are not a well-formed blob.
    pub void_blobs: BTreeSet<Utf8PathBuf>,
}

impl RegistryGraph {
    /// Fold one repository's scan into the graph.
    ///
    /// This is the only place registry-wide counts are incremented.
    pub(crate) fn add_repository(&mut self, info: RepositoryGraphInfo) {
        self.total_repositories += 1;

        for digest in &info.retained {
            self.blobs.increment(digest);
        }

        if !info.is_empty() && !info.is_dirty() {
            tracing::trace!(repository = %info.name, "clean");
            return;
        }

        let info = Arc::new(info);
        if info.is_empty() {
            self.empty_repositories
                .insert(info.name.clone(), info.clone());
        }
        if info.is_dirty() {
            self.dirty_repositories.insert(info.name.clone(), info);
        }
    }
}

/// Builds a [`RegistryGraph`] from storage.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    storage: StorageBucket,
    layout: Layout,
    concurrency: usize,
    cancel: CancellationToken,
}

impl GraphBuilder {
    /// Create a builder reading the registry at `layout` in `storage`.
    pub fn new(storage: StorageBucket, layout: Layout) -> Self {
        Self {
            storage,
            layout,
            concurrency: 1,
            cancel: CancellationToken::new(),
        }
    }

    /// Scan up to `concurrency` repositories at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Stop scanning when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Scan the whole registry.
    #[tracing::instrument(skip(self), fields(bucket = %self.storage.bucket, root = %self.layout.root()))]
    pub async fn build(&self) -> PruneResult<RegistryGraph> {
        let mut graph = RegistryGraph::default();
        self.scan_blobs(&mut graph).await?;
        tracing::debug!(
            blobs = graph.blobs.len(),
            void = graph.void_blobs.len(),
            "scanned blob store"
        );

        let repositories = self.repositories().await?;
        tracing::debug!(repositories = repositories.len(), "found repositories");

        let scanner = RepositoryScanner::new(&self.storage, &self.layout);
        let blobs = &graph.blobs;
        let cancel = &self.cancel;
        let scanner = &scanner;

        let results: Vec<RepositoryGraphInfo> = futures::stream::iter(repositories)
            .map(|name| async move {
                if cancel.is_cancelled() {
                    return Err(PruneError::Cancelled);
                }
                scanner.scan(&name, blobs).await
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        for info in results {
            graph.add_repository(info);
        }

        tracing::info!(
            repositories = graph.total_repositories,
            dirty = graph.dirty_repositories.len(),
            empty = graph.empty_repositories.len(),
            blobs = graph.blobs.len(),
            "registry graph built"
        );
        Ok(graph)
    }

    /// Register every well-formed blob at a count of zero, and record the rest as void.
    async fn scan_blobs(&self, graph: &mut RegistryGraph) -> PruneResult<()> {
        let storage = &self.storage;
        let root = self.layout.blobs();

        for algorithm_dir in list_or_empty(storage, &root)
            .await
            .map_err(PruneError::BlobStore)?
        {
            if algorithm_dir_is_void(&algorithm_dir) {
                tracing::warn!(path = %algorithm_dir, "void blob directory: unknown algorithm");
                graph.void_blobs.insert(algorithm_dir.into());
                continue;
            }
            let algorithm = layout::file_name(&algorithm_dir).to_owned();

            for prefix_dir in list_or_empty(storage, Utf8Path::new(&algorithm_dir))
                .await
                .map_err(PruneError::BlobStore)?
            {
                let prefix = layout::file_name(&prefix_dir).to_owned();
                for blob_dir in list_or_empty(storage, Utf8Path::new(&prefix_dir))
                    .await
                    .map_err(PruneError::BlobStore)?
                {
                    let hex = layout::file_name(&blob_dir);
                    let digest = match Digest::from_parts(&algorithm, hex) {
                        Ok(digest) if prefix.len() == 2 && hex.starts_with(prefix.as_str()) => {
                            digest
                        }
                        _ => {
                            tracing::warn!(path = %blob_dir, "void blob directory: not a digest");
                            graph.void_blobs.insert(blob_dir.into());
                            continue;
                        }
                    };

                    let data = self.layout.blob_data(&digest);
                    if storage.exists(&data).await.map_err(PruneError::BlobStore)? {
                        graph.blobs.register(digest);
                    } else {
                        tracing::warn!(path = %blob_dir, "void blob directory: no data");
                        graph.void_blobs.insert(blob_dir.into());
                    }
                }
            }
        }

        Ok(())
    }

    /// Every repository name, sorted.
    ///
    /// A directory is a repository when it holds one of the `_`-prefixed
    /// metadata directories. Other children are searched for nested repositories.
    pub async fn repositories(&self) -> PruneResult<Vec<String>> {
        let mut repositories = Vec::new();
        let mut pending = vec![self.layout.repositories()];

        while let Some(dir) = pending.pop() {
            if self.cancel.is_cancelled() {
                return Err(PruneError::Cancelled);
            }

            let children = list_or_empty(&self.storage, &dir)
                .await
                .map_err(PruneError::Repositories)?;

            let mut is_repository = false;
            for child in children {
                let name = layout::file_name(&child);
                if name.starts_with('_') {
                    is_repository = true;
                } else {
                    pending.push(child.into());
                }
            }

            if is_repository {
                if let Some(name) = self.layout.repository_name(&dir) {
                    repositories.push(name);
                }
            }
        }

        repositories.sort();
        Ok(repositories)
    }
}

fn algorithm_dir_is_void(path: &str) -> bool {
    layout::file_name(path).parse::<Algorithm>().is_err()
}

/// List a directory, treating a missing directory as empty.
pub(crate) async fn list_or_empty(
    storage: &StorageBucket,
    path: &Utf8Path,
) -> Result<Vec<String>, StorageError> {
    match storage.list(path).await {
        Ok(children) => Ok(children),
        Err(error) if error.is_not_found() => Ok(Vec::new()),
        Err(error) => Err(error),
    }
}
