//! Scanning a single repository

use std::collections::{BTreeMap, BTreeSet};

use camino::Utf8Path;
use storage::{StorageBucket, StorageError};

use crate::digest::Digest;
use crate::error::{PruneError, PruneResult};
use crate::graph::{list_or_empty, ManifestInfo, RepositoryGraphInfo};
use crate::layout::{self, Layout, LINK_FILE};
use crate::manifest::ManifestReferences;
use crate::refcount::BlobRefCounter;

const MAX_TAG_LENGTH: usize = 128;

/// Whether `tag` is a well-formed tag name.
pub fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    tag.len() <= MAX_TAG_LENGTH
        && (first.is_ascii_alphanumeric() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// A link directory, named either by a digest or by something else.
#[derive(Debug)]
enum LinkEntry {
    Valid(Digest),
    Invalid(String),
}

#[derive(Debug)]
struct Revision {
    info: ManifestInfo,
    present: bool,
}

/// Reads one repository's links and classifies everything in it.
#[derive(Debug)]
pub struct RepositoryScanner<'s> {
    storage: &'s StorageBucket,
    layout: &'s Layout,
}

impl<'s> RepositoryScanner<'s> {
    /// Create a scanner reading from `storage`.
    pub fn new(storage: &'s StorageBucket, layout: &'s Layout) -> Self {
        Self { storage, layout }
    }

    /// Scan `repository`, using `blobs` to tell which blobs exist.
    ///
    /// Reads only. Nothing in `blobs` is modified; the repository's
    /// contribution to registry-wide counts is returned in
    /// [`RepositoryGraphInfo::retained`].
    #[tracing::instrument(skip(self, blobs))]
    pub async fn scan(
        &self,
        repository: &str,
        blobs: &BlobRefCounter,
    ) -> PruneResult<RepositoryGraphInfo> {
        let info = self
            .scan_repository(repository, blobs)
            .await
            .map_err(PruneError::scan(repository))?;

        if info.is_dirty() {
            tracing::debug!(
                dangling_layers = info.dangling_layers.len(),
                unlinked_layers = info.unlinked_layers.len(),
                dangling_manifests = info.dangling_manifests.len(),
                unlinked_manifests = info.unlinked_manifests.len(),
                dangling_tags = info.dangling_tags.len(),
                invalid_tags = info.invalid_tags.len(),
                "repository is dirty"
            );
        }
        Ok(info)
    }

    async fn scan_repository(
        &self,
        repository: &str,
        blobs: &BlobRefCounter,
    ) -> Result<RepositoryGraphInfo, StorageError> {
        let mut info = RepositoryGraphInfo::new(repository);

        let revisions = self.revisions(repository, blobs, &mut info).await?;
        info.revision_count = revisions.len();

        let tags = self.tags(repository, &revisions, &mut info).await?;
        let live = reachable(&tags, &revisions);

        for (digest, revision) in &revisions {
            if !revision.present {
                info.dangling_manifests
                    .insert(digest.clone(), revision.info.clone());
            } else if !live.contains(digest) {
                info.unlinked_manifests
                    .insert(digest.clone(), revision.info.clone());
            } else {
                let mut tagged = false;
                for (tag, _) in tags.iter().filter(|(_, target)| *target == digest) {
                    let mut manifest = revision.info.clone();
                    manifest.tag = Some(tag.clone());
                    info.manifests.insert(tag.clone(), manifest);
                    tagged = true;
                }
                if !tagged {
                    info.referenced_manifests
                        .insert(digest.clone(), revision.info.clone());
                }
            }
        }

        self.layers(repository, blobs, &mut info).await?;

        // Every layer reference from a readable revision counts, live or not.
        let mut live_references = BTreeSet::new();
        let mut unreadable_live_manifest = false;
        for (digest, revision) in revisions.iter().filter(|(_, r)| r.present) {
            match &revision.info.references {
                Some(references) => {
                    for reference in references {
                        if info.layers.contains(reference) {
                            info.layers.increment(reference);
                        }
                        if live.contains(digest) {
                            live_references.insert(reference.clone());
                        }
                    }
                }
                None if live.contains(digest) => unreadable_live_manifest = true,
                None => {}
            }
        }

        if unreadable_live_manifest {
            tracing::warn!(
                repository,
                "a live manifest could not be read, keeping every layer link"
            );
        }

        if !info.is_empty() && !unreadable_live_manifest {
            info.unlinked_layers = info
                .layers
                .digests()
                .filter(|digest| !live_references.contains(*digest))
                .cloned()
                .collect();
        }

        // Without revisions a push may still be in flight, so its layers stay.
        if info.is_empty() || unreadable_live_manifest {
            info.retained.extend(info.layers.digests().cloned());
        }

        for digest in &live {
            info.retained.insert(digest.clone());
            if let Some(revision) = revisions.get(digest) {
                info.retained
                    .extend(revision.info.present_signatures().cloned());
            }
        }
        info.retained.extend(
            live_references
                .into_iter()
                .filter(|digest| blobs.contains(digest)),
        );

        info.invalid_tags.sort();
        info.invalid_links.sort();
        Ok(info)
    }

    async fn revisions(
        &self,
        repository: &str,
        blobs: &BlobRefCounter,
        info: &mut RepositoryGraphInfo,
    ) -> Result<BTreeMap<Digest, Revision>, StorageError> {
        let mut revisions = BTreeMap::new();

        for entry in self.links(&self.layout.revisions(repository)).await? {
            let digest = match entry {
                LinkEntry::Valid(digest) => digest,
                LinkEntry::Invalid(path) => {
                    tracing::warn!(%path, "revision link is not named by a digest");
                    info.invalid_links.push(path);
                    continue;
                }
            };

            let mut manifest = ManifestInfo::new(digest.clone());
            for entry in self
                .links(&self.layout.signatures(repository, &digest))
                .await?
            {
                match entry {
                    LinkEntry::Valid(signature) => {
                        if !blobs.contains(&signature) {
                            manifest.dangling_signatures.push(signature.clone());
                        }
                        manifest.signatures.push(signature);
                    }
                    LinkEntry::Invalid(path) => {
                        tracing::warn!(%path, "signature link is not named by a digest");
                        info.invalid_links.push(path);
                    }
                }
            }

            let linked = self
                .link_matches(&self.layout.revision_dir(repository, &digest), &digest)
                .await?;

            let content = if linked && blobs.contains(&digest) {
                read_optional(self.storage, &self.layout.blob_data(&digest)).await?
            } else {
                None
            };

            let present = content.is_some();
            match content {
                Some(content) if !digest.verifies(&content) => {
                    tracing::warn!(%digest, "manifest content does not match its digest")
                }
                Some(content) => match ManifestReferences::parse(&content) {
                    Ok(references) => manifest.references = Some(references.digests),
                    Err(error) => {
                        tracing::warn!(%digest, %error, "manifest content could not be parsed")
                    }
                },
                None => {}
            }

            revisions.insert(
                digest,
                Revision {
                    info: manifest,
                    present,
                },
            );
        }

        Ok(revisions)
    }

    /// Read every tag, returning the ones which point at a present revision.
    async fn tags(
        &self,
        repository: &str,
        revisions: &BTreeMap<Digest, Revision>,
        info: &mut RepositoryGraphInfo,
    ) -> Result<BTreeMap<String, Digest>, StorageError> {
        let mut live = BTreeMap::new();

        for tag_dir in list_or_empty(self.storage, &self.layout.tags(repository)).await? {
            let tag = layout::file_name(&tag_dir).to_owned();

            if !is_valid_tag(&tag) {
                tracing::warn!(%tag, "invalid tag name");
                info.invalid_tags.push(tag);
                continue;
            }

            let link = self.layout.tag_current_link(repository, &tag);
            let Some(target) = read_link(self.storage, &link).await? else {
                info.dangling_tags.insert(tag, None);
                continue;
            };

            match target.parse::<Digest>() {
                Ok(digest) if revisions.get(&digest).is_some_and(|r| r.present) => {
                    live.insert(tag, digest);
                }
                Ok(digest) => {
                    info.dangling_tags.insert(tag, Some(digest));
                }
                Err(error) => {
                    tracing::warn!(%tag, %error, "tag link does not hold a digest");
                    info.invalid_tags.push(tag);
                }
            }
        }

        Ok(live)
    }

    async fn layers(
        &self,
        repository: &str,
        blobs: &BlobRefCounter,
        info: &mut RepositoryGraphInfo,
    ) -> Result<(), StorageError> {
        for entry in self.links(&self.layout.layers(repository)).await? {
            match entry {
                LinkEntry::Valid(digest) => {
                    let dir = self.layout.layer_dir(repository, &digest);
                    if blobs.contains(&digest) && self.link_matches(&dir, &digest).await? {
                        info.layers.register(digest);
                    } else {
                        info.dangling_layers.insert(digest);
                    }
                }
                LinkEntry::Invalid(path) => {
                    tracing::warn!(%path, "layer link is not named by a digest");
                    info.invalid_links.push(path);
                }
            }
        }
        Ok(())
    }

    /// Every `<alg>/<hex>` directory below `base`.
    async fn links(&self, base: &Utf8Path) -> Result<Vec<LinkEntry>, StorageError> {
        let mut entries = Vec::new();
        for algorithm_dir in list_or_empty(self.storage, base).await? {
            let algorithm = layout::file_name(&algorithm_dir).to_owned();
            for dir in list_or_empty(self.storage, Utf8Path::new(&algorithm_dir)).await? {
                match Digest::from_parts(&algorithm, layout::file_name(&dir)) {
                    Ok(digest) => entries.push(LinkEntry::Valid(digest)),
                    Err(_) => entries.push(LinkEntry::Invalid(dir)),
                }
            }
        }
        Ok(entries)
    }

    /// Whether the link file in `dir` exists and names `digest`.
    async fn link_matches(&self, dir: &Utf8Path, digest: &Digest) -> Result<bool, StorageError> {
        let Some(target) = read_link(self.storage, &dir.join(LINK_FILE)).await? else {
            return Ok(false);
        };

        if target == digest.as_str() {
            Ok(true)
        } else {
            tracing::warn!(%dir, %target, "link does not name its own digest");
            Ok(false)
        }
    }
}

/// Revisions reachable from tags, following index manifests.
fn reachable(
    tags: &BTreeMap<String, Digest>,
    revisions: &BTreeMap<Digest, Revision>,
) -> BTreeSet<Digest> {
    let mut live = BTreeSet::new();
    let mut pending: Vec<&Digest> = tags.values().collect();

    while let Some(digest) = pending.pop() {
        if !live.insert(digest.clone()) {
            continue;
        }

        let references = revisions
            .get(digest)
            .and_then(|revision| revision.info.references.as_ref());
        for reference in references.into_iter().flatten() {
            if revisions.get(reference).is_some_and(|r| r.present) && !live.contains(reference) {
                pending.push(reference);
            }
        }
    }

    live
}

async fn read_optional(
    storage: &StorageBucket,
    path: &Utf8Path,
) -> Result<Option<Vec<u8>>, StorageError> {
    match storage.get_content(path).await {
        Ok(content) => Ok(Some(content)),
        Err(error) if error.is_not_found() => Ok(None),
        Err(error) => Err(error),
    }
}

/// The trimmed text of a link file, if it exists.
async fn read_link(storage: &StorageBucket, path: &Utf8Path) -> Result<Option<String>, StorageError> {
    Ok(read_optional(storage, path)
        .await?
        .map(|content| String::from_utf8_lossy(&content).trim().to_owned()))
}
