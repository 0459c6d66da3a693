//! Error taxonomy shared by the Store and every Backend.

use std::io;
use thiserror::Error;

/// Canonical error kinds raised at the Store/Backend boundary.
///
/// Backends raise these directly; the Store does not translate or wrap
/// them (aside from the permission overlay, which raises `PermissionDenied`
/// itself before a call ever reaches the backend).
#[derive(Error, Debug)]
pub enum Error {
    /// `load`/`info`/`delete`/`move` target is missing (neither live nor `.del`).
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// `store` without overwrite permission, or `move` into an existing name.
    #[error("object already exists: {0}")]
    ObjectAlreadyExists(String),

    /// `create` on a non-empty root.
    #[error("backend already exists: {0}")]
    BackendAlreadyExists(String),

    /// `open` on an uninitialized or missing root.
    #[error("backend does not exist: {0}")]
    BackendDoesNotExist(String),

    /// Permission overlay rejected an operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// URL dispatcher could not parse or resolve the scheme.
    #[error("invalid URL: {0}")]
    InvalidURL(String),

    /// Key violates the ASCII/forbidden-char or non-hex-with-nesting rules.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Catch-all for transport failures (network, EIO); retryable at caller discretion.
    #[error("backend error: {0}")]
    BackendError(String),

    /// I/O error not otherwise classified by the call site.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Object store error (S3/B2 backend).
    #[cfg(feature = "s3")]
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for `ObjectNotFound`, or an I/O `NotFound` that wasn't reclassified.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ObjectNotFound(_))
            || matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }

    /// Maps a filesystem I/O error observed while resolving `name` into the
    /// canonical taxonomy: `NotFound` -> `ObjectNotFound`, everything else
    /// passes through as `Io`.
    pub(crate) fn from_io(e: io::Error, name: &str) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => Error::ObjectNotFound(name.to_string()),
            io::ErrorKind::AlreadyExists => Error::ObjectAlreadyExists(name.to_string()),
            _ => Error::Io(e),
        }
    }
}
