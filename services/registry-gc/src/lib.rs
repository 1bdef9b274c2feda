//! # Registry garbage collection
//!
//! Finds and removes orphaned objects in a container registry's storage:
//! blobs no manifest references, manifest revisions no tag reaches, dangling
//! or malformed tags and links, and (optionally) repositories without any
//! manifests.
//!
//! A run has three phases:
//!
//! 1. [`GraphBuilder`] scans storage, read-only, into a [`RegistryGraph`].
//! 2. [`PrunePlan`] derives everything that would be deleted, including blobs
//!    which only become unreferenced once empty repositories are removed.
//! 3. [`Vacuum`] deletes the planned objects, links before blobs.
//!
//! [`Pruner`] drives all three, with dry-run and confirmation gates.
//!
//! The registry must not be written to while a run is in progress. The graph
//! is a snapshot and concurrent pushes are not detected.
//!
//! ## Example
//!
//! ```no_run
//! use registry_gc::{Layout, PruneOptions, Pruner};
//! use storage::{MemoryStorage, Storage};
//!
//! # async fn example() -> Result<(), registry_gc::PruneError> {
//! let storage = Storage::new(MemoryStorage::with_buckets(&["registry"]));
//! let options = PruneOptions { dry_run: true, ..Default::default() };
//! let pruner = Pruner::new(storage.bucket("registry"), Layout::default(), options);
//!
//! let graph = pruner.load_registry_graph().await?;
//! let dirty = pruner.report_orphans(&graph, &mut std::io::stdout())?;
//! # let _ = dirty;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod digest;
mod error;
mod graph;
mod layout;
mod manifest;
mod prune;
mod refcount;
mod scanner;
mod vacuum;

pub use config::{ConfigError, RegistryConfig, ScanConfig};
pub use digest::{Algorithm, Digest, InvalidDigest};
pub use error::{PruneError, PruneResult};
pub use graph::{GraphBuilder, ManifestInfo, RegistryGraph, RepositoryGraphInfo};
pub use layout::{Layout, DEFAULT_ROOT};
pub use manifest::{ManifestError, ManifestKind, ManifestReferences};
pub use prune::{confirm, PruneOptions, PruneOutcome, PrunePlan, Pruner};
pub use refcount::{BlobRefCounter, RefCountError};
pub use scanner::{is_valid_tag, RepositoryScanner};
pub use vacuum::{Vacuum, VacuumFailure, VacuumReport};
