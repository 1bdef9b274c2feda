//! Blob reference counting

use std::collections::BTreeMap;

use crate::digest::Digest;

/// A reference count was used in a way the graph can never produce.
///
/// These errors mean the graph was built or simulated incorrectly, and are
/// never caused by the contents of the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefCountError {
    /// The count was already zero.
    #[error("reference count for {digest} would drop below zero")]
    Underflow {
        /// The blob whose count was exhausted
        digest: Digest,
    },

    /// The digest was never registered with the counter.
    #[error("no reference count registered for {digest}")]
    Unknown {
        /// The unregistered blob
        digest: Digest,
    },
}

/// Number of references held on each blob.
///
/// Every registered digest has a count, possibly zero. Iteration and
/// [`BlobRefCounter::get_unreferenced`] follow digest order, so reports built
/// from a counter are reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobRefCounter {
    counts: BTreeMap<Digest, u64>,
}

impl BlobRefCounter {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a digest without adding a reference to it.
    pub fn register(&mut self, digest: Digest) {
        self.counts.entry(digest).or_insert(0);
    }

    /// Add a reference, registering the digest if needed. Returns the new count.
    pub fn increment(&mut self, digest: &Digest) -> u64 {
        let count = self.counts.entry(digest.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Drop a reference. Returns the new count.
    pub fn decrement(&mut self, digest: &Digest) -> Result<u64, RefCountError> {
        let count = self
            .counts
            .get_mut(digest)
            .ok_or_else(|| RefCountError::Unknown {
                digest: digest.clone(),
            })?;

        if *count == 0 {
            return Err(RefCountError::Underflow {
                digest: digest.clone(),
            });
        }

        *count -= 1;
        Ok(*count)
    }

    /// A copy of this counter with one reference dropped for each digest given.
    ///
    /// The receiver is left untouched, which is what simulating a deletion needs.
    pub fn released<'d, I>(&self, digests: I) -> Result<Self, RefCountError>
    where
        I: IntoIterator<Item = &'d Digest>,
    {
        let mut copy = self.clone();
        for digest in digests {
            copy.decrement(digest)?;
        }
        Ok(copy)
    }

    /// The current count, if the digest is registered.
    pub fn count(&self, digest: &Digest) -> Option<u64> {
        self.counts.get(digest).copied()
    }

    /// Whether the digest is registered.
    pub fn contains(&self, digest: &Digest) -> bool {
        self.counts.contains_key(digest)
    }

    /// Every registered digest with a count of zero, in digest order.
    pub fn get_unreferenced(&self) -> Vec<Digest> {
        self.counts
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(digest, _)| digest.clone())
            .collect()
    }

    /// Registered digests, in order.
    pub fn digests(&self) -> impl Iterator<Item = &Digest> {
        self.counts.keys()
    }

    /// Registered digests with their counts, in order.
    pub fn iter(&self) -> impl Iterator<Item = (&Digest, u64)> {
        self.counts.iter().map(|(digest, count)| (digest, *count))
    }

    /// Number of registered digests.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether no digests are registered.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
