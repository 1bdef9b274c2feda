//! Error types for scanning and pruning

use storage::StorageError;

use crate::refcount::RefCountError;
use crate::vacuum::{VacuumFailure, VacuumReport};

/// Result type for pruning operations
pub type PruneResult<T> = Result<T, PruneError>;

/// Errors which stop a pruning run.
#[derive(Debug, thiserror::Error)]
pub enum PruneError {
    /// Reading the blob store failed.
    #[error("scanning the blob store")]
    BlobStore(#[source] StorageError),

    /// Walking the repository namespace failed.
    #[error("listing repositories")]
    Repositories(#[source] StorageError),

    /// Reading a repository failed.
    #[error("scanning repository {repository}")]
    Scan {
        /// The repository being scanned
        repository: String,
        /// The storage failure
        #[source]
        source: StorageError,
    },

    /// Reference counts disagree with the graph they were built from.
    #[error("internal reference count inconsistency")]
    Consistency(#[from] RefCountError),

    /// The run was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Input closed while waiting for the operator to confirm.
    #[error("no answer to the confirmation prompt: input closed")]
    ConfirmationAborted,

    /// Writing the report or prompt failed.
    #[error("writing output")]
    Io(#[from] std::io::Error),

    /// Some deletions failed. Independent deletions were still attempted.
    #[error("{} deletions failed ({} succeeded)", failures.len(), report.total())]
    Vacuum {
        /// What was deleted successfully
        report: VacuumReport,
        /// Each failed deletion
        failures: Vec<VacuumFailure>,
    },

    /// Deleting was cancelled part way through.
    #[error("pruning cancelled after {} deletions ({} failed)", report.total(), failures.len())]
    VacuumCancelled {
        /// What was deleted before cancellation
        report: VacuumReport,
        /// Deletions which failed before cancellation
        failures: Vec<VacuumFailure>,
    },
}

impl PruneError {
    pub(crate) fn scan(repository: &str) -> impl FnOnce(StorageError) -> PruneError + '_ {
        move |source| PruneError::Scan {
            repository: repository.to_owned(),
            source,
        }
    }
}
