//! # Storage driver contract
//!
//! The [`Driver`] trait abstracts a hierarchical, path-addressed store, and
//! [`StorageError`] distinguishes "not found" from every other failure.

mod driver;
mod error;

pub use driver::Driver;
pub use driver::Metadata;
pub use error::{StorageError, StorageErrorBuilder, StorageErrorKind};
