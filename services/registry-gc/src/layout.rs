//! Paths of registry objects within the storage bucket
//!
//! ```text
//! <root>/blobs/<alg>/<hex[..2]>/<hex>/data
//! <root>/repositories/<name>/_layers/<alg>/<hex>/link
//! <root>/repositories/<name>/_manifests/revisions/<alg>/<hex>/link
//! <root>/repositories/<name>/_manifests/revisions/<alg>/<hex>/signatures/<alg>/<hex>/link
//! <root>/repositories/<name>/_manifests/tags/<tag>/current/link
//! <root>/repositories/<name>/_manifests/tags/<tag>/index/<alg>/<hex>/link
//! <root>/repositories/<name>/_uploads/...
//! ```

use camino::{Utf8Path, Utf8PathBuf};

use crate::digest::Digest;

/// Default registry root within the bucket.
pub const DEFAULT_ROOT: &str = "docker/registry/v2";

/// Name of the file holding a blob's content.
pub const DATA_FILE: &str = "data";

/// Name of the file holding a link's target digest.
pub const LINK_FILE: &str = "link";

/// Repository subdirectories which hold registry metadata rather than nested repositories.
pub const REPOSITORY_DIRS: [&str; 3] = ["_manifests", "_layers", "_uploads"];

/// Path builder for the registry storage layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: Utf8PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

impl Layout {
    /// Create a layout rooted at `root` within the bucket.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The registry root.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory holding every blob.
    pub fn blobs(&self) -> Utf8PathBuf {
        self.root.join("blobs")
    }

    /// Directory of a single blob.
    pub fn blob_dir(&self, digest: &Digest) -> Utf8PathBuf {
        let hex = digest.hex();
        let mut path = self.blobs();
        path.push(digest.algorithm().as_str());
        path.push(&hex[..2]);
        path.push(hex);
        path
    }

    /// File holding a blob's content.
    pub fn blob_data(&self, digest: &Digest) -> Utf8PathBuf {
        self.blob_dir(digest).join(DATA_FILE)
    }

    /// Directory holding every repository.
    pub fn repositories(&self) -> Utf8PathBuf {
        self.root.join("repositories")
    }

    /// Directory of a repository.
    pub fn repository(&self, name: &str) -> Utf8PathBuf {
        self.repositories().join(name)
    }

    /// Directory of a repository's layer links.
    pub fn layers(&self, repository: &str) -> Utf8PathBuf {
        self.repository(repository).join("_layers")
    }

    /// Directory of a single layer link.
    pub fn layer_dir(&self, repository: &str, digest: &Digest) -> Utf8PathBuf {
        digest_dir(self.layers(repository), digest)
    }

    /// Directory of a repository's manifest revisions and tags.
    pub fn manifests(&self, repository: &str) -> Utf8PathBuf {
        self.repository(repository).join("_manifests")
    }

    /// Directory of a repository's manifest revisions.
    pub fn revisions(&self, repository: &str) -> Utf8PathBuf {
        self.manifests(repository).join("revisions")
    }

    /// Directory of a single manifest revision, including its signatures.
    pub fn revision_dir(&self, repository: &str, digest: &Digest) -> Utf8PathBuf {
        digest_dir(self.revisions(repository), digest)
    }

    /// Directory of a revision's signature links.
    pub fn signatures(&self, repository: &str, revision: &Digest) -> Utf8PathBuf {
        self.revision_dir(repository, revision).join("signatures")
    }

    /// Directory of a single signature link.
    pub fn signature_dir(
        &self,
        repository: &str,
        revision: &Digest,
        signature: &Digest,
    ) -> Utf8PathBuf {
        digest_dir(self.signatures(repository, revision), signature)
    }

    /// Directory of a repository's tags.
    pub fn tags(&self, repository: &str) -> Utf8PathBuf {
        self.manifests(repository).join("tags")
    }

    /// Directory of a single tag.
    pub fn tag_dir(&self, repository: &str, tag: &str) -> Utf8PathBuf {
        self.tags(repository).join(tag)
    }

    /// Link to the revision a tag currently points at.
    pub fn tag_current_link(&self, repository: &str, tag: &str) -> Utf8PathBuf {
        let mut path = self.tag_dir(repository, tag);
        path.push("current");
        path.push(LINK_FILE);
        path
    }

    /// A tag's history entry for a revision.
    pub fn tag_index_dir(&self, repository: &str, tag: &str, digest: &Digest) -> Utf8PathBuf {
        digest_dir(self.tag_dir(repository, tag).join("index"), digest)
    }

    /// Repository name for a directory below [`Layout::repositories`].
    pub fn repository_name(&self, dir: &Utf8Path) -> Option<String> {
        dir.strip_prefix(self.repositories())
            .ok()
            .filter(|name| !name.as_str().is_empty())
            .map(|name| name.to_string())
    }
}

fn digest_dir(mut base: Utf8PathBuf, digest: &Digest) -> Utf8PathBuf {
    base.push(digest.algorithm().as_str());
    base.push(digest.hex());
    base
}

/// Last component of a listed path.
pub(crate) fn file_name(path: &str) -> &str {
    Utf8Path::new(path).file_name().unwrap_or(path)
}
