//! Deleting orphaned registry objects
//!
//! [`Vacuum`] is the only part of this crate which removes anything from
//! storage. Every other component reads.

use std::fmt;

use camino::Utf8Path;
use storage::{StorageBucket, StorageError};
use tokio_util::sync::CancellationToken;

use crate::digest::Digest;
use crate::error::{PruneError, PruneResult};
use crate::graph::{list_or_empty, RegistryGraph};
use crate::layout::{self, Layout, REPOSITORY_DIRS};
use crate::prune::PrunePlan;

/// Number of objects deleted, by category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VacuumReport {
    /// Blobs removed from the blob store
    pub blobs: usize,
    /// Manifest revisions removed, with their signatures
    pub manifests: usize,
    /// Dangling signature links removed from live manifests
    pub signatures: usize,
    /// Layer links removed
    pub layers: usize,
    /// Dangling or invalid tags removed
    pub tags: usize,
    /// Empty repositories removed
    pub repositories: usize,
}

impl VacuumReport {
    /// Total number of deletions.
    pub fn total(&self) -> usize {
        self.blobs + self.manifests + self.signatures + self.layers + self.tags + self.repositories
    }
}

impl fmt::Display for VacuumReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deleted {} blobs, {} manifest revisions, {} signatures, {} layer links, {} tags and {} repositories",
            self.blobs, self.manifests, self.signatures, self.layers, self.tags, self.repositories
        )
    }
}

/// A single deletion which failed.
#[derive(Debug, thiserror::Error)]
#[error("deleting {object}")]
pub struct VacuumFailure {
    /// What was being deleted, e.g. `lib/app@sha256:...` or `tag lib/app:latest`.
    pub object: String,

    /// Why it failed.
    #[source]
    pub source: StorageError,
}

/// Deletes registry objects from storage.
#[derive(Debug, Clone)]
pub struct Vacuum {
    storage: StorageBucket,
    layout: Layout,
    cancel: CancellationToken,
}

impl Vacuum {
    /// Create a vacuum for the registry at `layout` in `storage`.
    pub fn new(storage: StorageBucket, layout: Layout) -> Self {
        Self {
            storage,
            layout,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between deletions when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Delete a blob and its directory.
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn delete_blob(&self, digest: &Digest) -> Result<(), StorageError> {
        self.remove(&self.layout.blob_dir(digest)).await
    }

    /// Delete a repository's link to a layer.
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn delete_layer_link(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> Result<(), StorageError> {
        self.remove(&self.layout.layer_dir(repository, digest)).await
    }

    /// Delete a manifest revision together with its signatures, then drop the
    /// revision from every tag's history.
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn delete_manifest_revision(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> Result<(), StorageError> {
        self.remove(&self.layout.revision_dir(repository, digest))
            .await?;

        for tag_dir in list_or_empty(&self.storage, &self.layout.tags(repository)).await? {
            let tag = layout::file_name(&tag_dir);
            self.remove(&self.layout.tag_index_dir(repository, tag, digest))
                .await?;
        }
        Ok(())
    }

    /// Delete one signature link of a manifest revision.
    #[tracing::instrument(skip(self), fields(%revision, %signature))]
    pub async fn delete_signature(
        &self,
        repository: &str,
        revision: &Digest,
        signature: &Digest,
    ) -> Result<(), StorageError> {
        self.remove(&self.layout.signature_dir(repository, revision, signature))
            .await
    }

    /// Delete a tag, its current link and its history.
    #[tracing::instrument(skip(self))]
    pub async fn delete_tag(&self, repository: &str, tag: &str) -> Result<(), StorageError> {
        self.remove(&self.layout.tag_dir(repository, tag)).await
    }

    /// Delete every tag given, continuing past failures.
    pub async fn clear_invalid_tags(
        &self,
        repository: &str,
        tags: &[String],
    ) -> Vec<VacuumFailure> {
        let mut failures = Vec::new();
        for tag in tags {
            if let Err(source) = self.delete_tag(repository, tag).await {
                failures.push(VacuumFailure {
                    object: format!("tag {repository}:{tag}"),
                    source,
                });
            }
        }
        failures
    }

    /// Delete a repository's manifests, layer links and uploads.
    ///
    /// Repositories nested below this one are left in place.
    #[tracing::instrument(skip(self))]
    pub async fn remove_repository(&self, repository: &str) -> Result<(), StorageError> {
        let base = self.layout.repository(repository);
        for dir in REPOSITORY_DIRS {
            self.remove(&base.join(dir)).await?;
        }
        Ok(())
    }

    /// Carry out a pruning plan.
    ///
    /// Structural deletions in dirty repositories come first, then whole empty
    /// repositories, then blobs. Blobs are only deleted when every structural
    /// deletion succeeded, since the plan assumed those links were gone.
    /// Cancellation keeps what was already deleted and reports it.
    #[tracing::instrument(skip_all)]
    pub async fn prune(&self, plan: &PrunePlan, graph: &RegistryGraph) -> PruneResult<VacuumReport> {
        let mut report = VacuumReport::default();
        let mut failures = Vec::new();

        let swept = self.sweep(plan, graph, &mut report, &mut failures).await;
        tracing::info!(%report, failed = failures.len(), "vacuum finished");

        match swept {
            Err(PruneError::Cancelled) => Err(PruneError::VacuumCancelled { report, failures }),
            Err(error) => Err(error),
            Ok(()) if failures.is_empty() => Ok(report),
            Ok(()) => Err(PruneError::Vacuum { report, failures }),
        }
    }

    async fn sweep(
        &self,
        plan: &PrunePlan,
        graph: &RegistryGraph,
        report: &mut VacuumReport,
        failures: &mut Vec<VacuumFailure>,
    ) -> PruneResult<()> {
        for name in &plan.dirty_repositories {
            let Some(info) = graph.dirty_repositories.get(name) else {
                continue;
            };

            for tag in info.dangling_tags.keys() {
                self.checkpoint()?;
                record(
                    self.delete_tag(name, tag).await,
                    || format!("tag {name}:{tag}"),
                    &mut report.tags,
                    failures,
                );
            }

            if !info.invalid_tags.is_empty() {
                self.checkpoint()?;
                let failed = self.clear_invalid_tags(name, &info.invalid_tags).await;
                report.tags += info.invalid_tags.len() - failed.len();
                failures.extend(failed);
            }

            let revisions = info
                .dangling_manifests
                .keys()
                .chain(info.unlinked_manifests.keys());
            for digest in revisions {
                self.checkpoint()?;
                record(
                    self.delete_manifest_revision(name, digest).await,
                    || format!("manifest {name}@{digest}"),
                    &mut report.manifests,
                    failures,
                );
            }

            for manifest in info.manifests_with_dangling_signatures() {
                for signature in &manifest.dangling_signatures {
                    self.checkpoint()?;
                    record(
                        self.delete_signature(name, &manifest.digest, signature)
                            .await,
                        || format!("signature {signature} of {name}@{}", manifest.digest),
                        &mut report.signatures,
                        failures,
                    );
                }
            }

            let layers = info.dangling_layers.iter().chain(
                info.unlinked_layers
                    .iter()
                    .filter(|digest| !info.dangling_layers.contains(*digest)),
            );
            for digest in layers {
                self.checkpoint()?;
                record(
                    self.delete_layer_link(name, digest).await,
                    || format!("layer link {name}@{digest}"),
                    &mut report.layers,
                    failures,
                );
            }
        }

        for name in &plan.empty_repositories {
            self.checkpoint()?;
            record(
                self.remove_repository(name).await,
                || format!("repository {name}"),
                &mut report.repositories,
                failures,
            );
        }

        if failures.is_empty() {
            for digest in &plan.unreferenced_blobs {
                self.checkpoint()?;
                record(
                    self.delete_blob(digest).await,
                    || format!("blob {digest}"),
                    &mut report.blobs,
                    failures,
                );
            }
        } else {
            tracing::warn!(
                failed = failures.len(),
                blobs = plan.unreferenced_blobs.len(),
                "skipping blob deletion after failed link deletions"
            );
        }

        Ok(())
    }

    fn checkpoint(&self) -> PruneResult<()> {
        if self.cancel.is_cancelled() {
            tracing::warn!("vacuum cancelled");
            return Err(PruneError::Cancelled);
        }
        Ok(())
    }

    /// Delete `path`, treating an already missing path as deleted.
    async fn remove(&self, path: &Utf8Path) -> Result<(), StorageError> {
        match self.storage.delete(path).await {
            Ok(()) => {
                tracing::debug!(%path, "deleted");
                Ok(())
            }
            Err(error) if error.is_not_found() => {
                tracing::trace!(%path, "already gone");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}

fn record<F>(
    result: Result<(), StorageError>,
    object: F,
    count: &mut usize,
    failures: &mut Vec<VacuumFailure>,
) where
    F: FnOnce() -> String,
{
    match result {
        Ok(()) => *count += 1,
        Err(source) => {
            let object = object();
            tracing::warn!(%object, error = %source, "deletion failed");
            failures.push(VacuumFailure { object, source });
        }
    }
}
