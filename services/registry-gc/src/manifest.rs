//! Reading blob references out of manifest content

use serde::Deserialize;

use crate::digest::{Digest, InvalidDigest};

/// The kind of manifest, as far as reference extraction is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// Docker schema 1, referencing layers through `fsLayers`.
    Schema1,
    /// Docker schema 2 or an OCI image manifest: a config and layers.
    Image,
    /// A manifest list or OCI index, referencing other manifests.
    Index,
}

/// Manifest content could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Not JSON, or not shaped like any known manifest.
    #[error("manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A descriptor carried a malformed digest.
    #[error("manifest references a malformed digest")]
    Digest(#[from] InvalidDigest),

    /// Valid JSON, but no recognizable manifest structure.
    #[error("unrecognized manifest (schemaVersion {schema_version:?}, mediaType {media_type:?})")]
    Unrecognized {
        /// The declared schema version
        schema_version: Option<u64>,
        /// The declared media type
        media_type: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    schema_version: Option<u64>,
    media_type: Option<String>,
    config: Option<Descriptor>,
    layers: Option<Vec<Descriptor>>,
    manifests: Option<Vec<Descriptor>>,
    fs_layers: Option<Vec<FsLayer>>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
}

#[derive(Debug, Deserialize)]
struct FsLayer {
    #[serde(rename = "blobSum")]
    blob_sum: String,
}

/// The blobs (and, for indexes, manifests) a manifest references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestReferences {
    /// What kind of manifest this was.
    pub kind: ManifestKind,

    /// Referenced digests, sorted and deduplicated.
    pub digests: Vec<Digest>,
}

impl ManifestReferences {
    /// Parse manifest content.
    pub fn parse(content: &[u8]) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_slice(content)?;

        let (kind, descriptors): (ManifestKind, Vec<&str>) = if let Some(fs_layers) = &raw.fs_layers
        {
            (
                ManifestKind::Schema1,
                fs_layers.iter().map(|l| l.blob_sum.as_str()).collect(),
            )
        } else if let Some(manifests) = &raw.manifests {
            (
                ManifestKind::Index,
                manifests.iter().map(|m| m.digest.as_str()).collect(),
            )
        } else if raw.config.is_some() || raw.layers.is_some() {
            let config = raw.config.iter().map(|c| c.digest.as_str());
            let layers = raw.layers.iter().flatten().map(|l| l.digest.as_str());
            (ManifestKind::Image, config.chain(layers).collect())
        } else {
            return Err(ManifestError::Unrecognized {
                schema_version: raw.schema_version,
                media_type: raw.media_type,
            });
        };

        let mut digests = descriptors
            .into_iter()
            .map(str::parse)
            .collect::<Result<Vec<Digest>, _>>()?;
        digests.sort();
        digests.dedup();

        Ok(Self { kind, digests })
    }
}
