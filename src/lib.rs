//! Namespaced key/value object store with pluggable backends, built as the
//! storage primitive underneath a deduplicating backup tool.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │  Store<B>                                        │
//! │  namespace/key API, nesting + soft-delete         │
//! └───────────────────────┬──────────────────────────┘
//!                         │
//!             ┌───────────┴────────────┐
//!             ▼                        ▼
//!     StatsBackend<B>          PermissionBackend<B>   ← optional wrappers
//!             │                        │
//!             └───────────┬────────────┘
//!                         ▼
//!                 ┌───────────────┐
//!                 │   Backend     │  ← flat-name trait
//!                 └───────┬───────┘
//!                         │
//!        ┌────────────────┼────────────────┬───────────────┐
//!        ▼                ▼                ▼               ▼
//!  PosixFsBackend     S3Backend       SftpBackend     RcloneBackend
//! ```
//!
//! `Backend` implementations speak flat, already-nested names; `Store`
//! hides the hash-sharded directory layout and `.del` soft-delete suffix
//! behind a `(namespace, key)` API. `StatsBackend` and `PermissionBackend`
//! are generic wrappers that compose around any `Backend` to add
//! operation counters/throttling and prefix-scoped access control,
//! respectively, without the inner backend knowing either exists.
//!
//! # Quick start
//!
//! ```no_run
//! use borgstore::{Store, Levels, NamespaceLevels};
//! use borgstore::backends::posixfs::PosixFsBackend;
//! use bytes::Bytes;
//!
//! # async fn example() -> borgstore::Result<()> {
//! let levels = Levels::new().with_namespace("data", NamespaceLevels::depth(2));
//! let store = Store::new(PosixFsBackend::new("./repo"), levels);
//! store.create().await?;
//!
//! store.store("data", "0123456789abcdef", Bytes::from("chunk bytes")).await?;
//! let chunk = store.load("data", "0123456789abcdef", 0, None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Resolving a store from a URL
//!
//! ```no_run
//! use borgstore::{open_url, Levels};
//!
//! # async fn example() -> borgstore::Result<()> {
//! let levels = Levels::new();
//! let store = open_url("file:///var/backups/repo", levels)?;
//! store.create().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # S3/B2 storage (requires the `s3` feature)
//!
//! ```ignore
//! use borgstore::backends::s3::{S3Backend, S3Config};
//!
//! let config = S3Config::aws("my-bucket", "us-east-1").with_prefix("repo");
//! let backend = S3Backend::new(config)?;
//! ```
//!
//! # Stats & throttling
//!
//! ```ignore
//! use borgstore::stats::StatsBackend;
//! use borgstore::backends::posixfs::PosixFsBackend;
//!
//! let backend = StatsBackend::new(PosixFsBackend::new("./repo"));
//! // ... use `backend` as any other Backend; inspect with `backend.stats()`.
//! ```
//!
//! # Permission overlay
//!
//! ```ignore
//! use borgstore::permissions::{PermissionBackend, Permissions};
//! use borgstore::backends::posixfs::PosixFsBackend;
//!
//! let permissions = Permissions::new().grant("data", "lr")?;
//! let backend = PermissionBackend::new(PosixFsBackend::new("./repo"), permissions);
//! # Ok::<(), borgstore::Error>(())
//! ```
//!
//! # Features
//!
//! - `s3` — S3/B2-compatible backend via `object_store`
//! - `sftp` — SFTP backend via `ssh2`
//! - `rclone` — rclone-remote backend via a local `rcd` control daemon
//! - `full` — all of the above

pub mod backend;
pub mod backends;
pub mod error;
pub mod nesting;
pub mod permissions;
pub mod stats;
pub mod store;
pub mod url;

pub use backend::{Backend, DirEntry, ItemInfo};
pub use error::{Error, Result};
pub use nesting::{Levels, NamespaceLevels};
pub use permissions::{Permission, PermissionBackend, PermissionSet, Permissions};
pub use stats::{OpStats, Stats, StatsBackend};
pub use store::{ListEntry, MoveOp, Store, StoreInfo};
pub use url::{parse_url, BackendConfig};

// Re-export bytes for convenience, matching how callers already pass values
// into `Store::store`.
pub use bytes::Bytes;

// `BORGSTORE_TEST_POSIXFS_URL`/`BORGSTORE_TEST_S3_URL`/etc. are test-harness
// overrides an external test runner can use to point the same test suite at
// a real remote; this crate itself never reads them.

/// Opens a `Store` backed by whatever `url` resolves to, using
/// `PosixFsBackend` directly wired to `Store` without any wrapper. Callers
/// who need stats or permission enforcement construct the matching backend
/// from [`parse_url`] themselves and wrap it before building a `Store`.
pub fn open_url(
    raw: &str,
    levels: Levels,
) -> Result<Store<backends::posixfs::PosixFsBackend>> {
    match parse_url(raw)? {
        BackendConfig::PosixFs { path } => {
            Ok(Store::new(backends::posixfs::PosixFsBackend::new(path), levels))
        }
        #[allow(unreachable_patterns)]
        _ => Err(Error::InvalidURL(format!(
            "{raw} does not resolve to a posixfs backend; construct the backend \
             from `parse_url` directly for non-filesystem schemes"
        ))),
    }
}
