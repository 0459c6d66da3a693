//! The Backend contract: minimal flat-name object operations every storage
//! driver must implement.
//!
//! Backend names passed here are already nested and possibly `.del`-suffixed
//! by the Store — a Backend never sees a logical `namespace/key`, only the
//! transformed flat name.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Cheap metadata probe result for `Backend::info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemInfo {
    /// Whether anything exists at this name.
    pub exists: bool,
    /// Size in bytes (0 if it doesn't exist or is a directory).
    pub size: u64,
    /// Whether the name denotes a directory/container rather than an object.
    pub directory: bool,
}

impl ItemInfo {
    /// Convenience constructor for "nothing here".
    pub fn missing() -> Self {
        Self {
            exists: false,
            size: 0,
            directory: false,
        }
    }
}

/// One entry from a non-recursive `Backend::list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Leaf name, relative to the listed container.
    pub name: String,
    /// Whether this entry is itself a container.
    pub directory: bool,
    /// Size in bytes (0 for directories).
    pub size: u64,
}

/// A storage driver's minimal flat-name object operations.
///
/// Implementations must be `Send + Sync`: the Store holds one instance per
/// process and may be used from multiple async tasks (though it provides no
/// locking of its own).
#[async_trait]
pub trait Backend: Send + Sync {
    /// Initialize storage. Fails with `BackendAlreadyExists` if the target
    /// exists and is non-empty; an empty existing location is acceptable.
    async fn create(&self) -> Result<()>;

    /// Remove the storage root recursively.
    async fn destroy(&self) -> Result<()>;

    /// Acquire connections/sessions/subprocesses. Safe to call more than once.
    async fn open(&self) -> Result<()>;

    /// Release connections/sessions/subprocesses. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Ensure an intermediate container exists.
    async fn mkdir(&self, name: &str) -> Result<()>;

    /// Remove an intermediate container. Succeeds only if it is empty.
    async fn rmdir(&self, name: &str) -> Result<()>;

    /// Cheap metadata probe.
    async fn info(&self, name: &str) -> Result<ItemInfo>;

    /// Full or partial read. A `size` that extends past EOF truncates
    /// without error. `Err(ObjectNotFound)` if `name` doesn't exist.
    async fn load(&self, name: &str, offset: u64, size: Option<u64>) -> Result<Bytes>;

    /// Atomic write, overwriting any existing object at `name`.
    async fn store(&self, name: &str, value: Bytes) -> Result<()>;

    /// Hard-remove a single object. `Err(ObjectNotFound)` if absent.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Atomic rename within the backend. `Err(ObjectNotFound)` if `src` is
    /// missing, `Err(ObjectAlreadyExists)` if `dst` exists.
    async fn move_object(&self, src: &str, dst: &str) -> Result<()>;

    /// Non-recursive listing of the direct children of `name`. Order is
    /// unspecified.
    async fn list(&self, name: &str) -> Result<Vec<DirEntry>>;

    /// Human-readable identifier for this backend (used in logging/Debug).
    fn backend_name(&self) -> &'static str;
}
