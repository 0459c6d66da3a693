//! The high-level `Store`: namespaced `(namespace, key)` operations layered
//! over a flat-name `Backend` via the name transform.
//!
//! A thin struct holding one backend and translating a richer
//! namespace/key-facing API down to the trait's flat operations, with
//! configurable nesting depths and soft-delete instead of a fixed path
//! shape.
//!
//! There is deliberately no type composing several `Store`s into one
//! (no historical multi-backend façade survives here). `Backend` is
//! object-safe, so a caller who needs to fan a write out to several
//! `Store`s can write that composition themselves, outside this crate,
//! against the same trait boundary every backend here already implements.

use async_stream::try_stream;
use bytes::Bytes;
use futures::stream::Stream;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::nesting::{self, Levels};

/// Result of `Store::info`: existence/size plus soft-delete state
/// (`{exists, size, deleted}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreInfo {
    pub exists: bool,
    pub size: u64,
    /// True iff only the `.del` variant exists.
    pub deleted: bool,
}

impl StoreInfo {
    fn missing() -> Self {
        Self {
            exists: false,
            size: 0,
            deleted: false,
        }
    }
}

/// One entry from `Store::list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Logical key (sharding prefix and `.del` suffix already stripped).
    pub key: String,
    /// Whether this entry is currently soft-deleted.
    pub deleted: bool,
    /// Size in bytes.
    pub size: u64,
}

/// What kind of move `Store::move_key` should perform.
#[derive(Debug, Clone)]
pub enum MoveOp {
    /// Rename to an arbitrary destination key within the same namespace.
    To { key: String },
    /// Soft-delete: rename the live object to its `.del` form.
    Delete,
    /// Undo a soft-delete: rename the `.del` form back to live.
    Undelete,
    /// Rewrite at a different nesting depth (e.g. after a `Levels` change),
    /// keeping the same logical key.
    ChangeLevel { depth: u32 },
}

/// Namespaced key/value store over a single `Backend`.
pub struct Store<B: Backend> {
    backend: B,
    levels: Levels,
}

impl<B: Backend> Store<B> {
    /// Wraps `backend` with the given per-namespace nesting configuration.
    /// `levels` must cover every namespace this store will touch.
    pub fn new(backend: B, levels: Levels) -> Self {
        Self { backend, levels }
    }

    /// Access to the underlying backend, e.g. to wrap it further or to
    /// inspect `backend_name()`.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Initializes storage, pre-creating sharding directories for any
    /// namespace configured with `precreate_dirs`.
    pub async fn create(&self) -> Result<()> {
        self.backend.create().await?;
        for namespace in self.levels.namespaces() {
            let config = self.levels.get(namespace).expect("namespace listed by iterator");
            if !config.precreate_dirs {
                continue;
            }
            precreate_shards(&self.backend, namespace, config.active_depth()).await?;
        }
        Ok(())
    }

    pub async fn destroy(&self) -> Result<()> {
        self.backend.destroy().await
    }

    pub async fn open(&self) -> Result<()> {
        self.backend.open().await
    }

    pub async fn close(&self) -> Result<()> {
        self.backend.close().await
    }

    /// Writes `value` under `(namespace, key)`, at the namespace's active
    /// nesting depth. Overwrites any existing live object.
    pub async fn store(&self, namespace: &str, key: &str, value: Bytes) -> Result<()> {
        let name = nesting::transform(namespace, key, &self.levels, false)?;
        self.backend.store(&name, value).await
    }

    /// Reads `(namespace, key)`, trying the active nesting depth first and
    /// falling back across historical depths and soft-delete state.
    pub async fn load(
        &self,
        namespace: &str,
        key: &str,
        offset: u64,
        size: Option<u64>,
    ) -> Result<Bytes> {
        let name = self.resolve_live(namespace, key).await?;
        self.backend.load(&name, offset, size).await
    }

    /// Cheap existence/size probe. Resolves live and soft-deleted forms
    /// alike (unlike `load`'s live-first fallback, there is no live variant
    /// to prefer here): `deleted` is true iff only the `.del` variant
    /// exists.
    pub async fn info(&self, namespace: &str, key: &str) -> Result<StoreInfo> {
        match self.resolve_any(namespace, key).await {
            Ok(name) => {
                let info = self.backend.info(&name).await?;
                Ok(StoreInfo {
                    exists: info.exists,
                    size: info.size,
                    deleted: name.ends_with(".del"),
                })
            }
            Err(e) if e.is_not_found() => Ok(StoreInfo::missing()),
            Err(e) => Err(e),
        }
    }

    /// Hard-deletes `(namespace, key)` regardless of soft-delete state.
    pub async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let name = self.resolve_any(namespace, key).await?;
        self.backend.delete(&name).await
    }

    /// Moves/transforms `(namespace, key)` per `op`.
    pub async fn move_key(&self, namespace: &str, key: &str, op: MoveOp) -> Result<()> {
        match op {
            MoveOp::To { key: dst_key } => {
                let src = self.resolve_live(namespace, key).await?;
                let dst = nesting::transform(namespace, &dst_key, &self.levels, false)?;
                self.backend.move_object(&src, &dst).await
            }
            MoveOp::Delete => {
                let src = nesting::transform(namespace, key, &self.levels, false)?;
                let dst = nesting::transform(namespace, key, &self.levels, true)?;
                self.backend.move_object(&src, &dst).await
            }
            MoveOp::Undelete => {
                let src = nesting::transform(namespace, key, &self.levels, true)?;
                let dst = nesting::transform(namespace, key, &self.levels, false)?;
                self.backend.move_object(&src, &dst).await
            }
            MoveOp::ChangeLevel { depth } => {
                let src = self.resolve_live(namespace, key).await?;
                let dst = nesting::transform_at_depth(namespace, key, depth, false)?;
                if src == dst {
                    return Ok(());
                }
                self.backend.move_object(&src, &dst).await
            }
        }
    }

    /// Non-recursive listing of every key directly present at the
    /// namespace's active nesting depth, optionally including soft-deleted
    /// entries. Streams results rather than buffering the whole namespace
    ///.
    pub fn list<'a>(
        &'a self,
        namespace: &'a str,
        include_deleted: bool,
    ) -> impl Stream<Item = Result<ListEntry>> + 'a {
        try_stream! {
            let depth = self
                .levels
                .get(namespace)
                .map(|l| l.active_depth())
                .unwrap_or(0);

            for entry in list_at_depth(&self.backend, namespace, depth).await? {
                let (key, deleted) = nesting::leaf_to_key(&entry.name);
                if deleted && !include_deleted {
                    continue;
                }
                yield ListEntry {
                    key: key.to_string(),
                    deleted,
                    size: entry.size,
                };
            }
        }
    }

    /// Resolves `(namespace, key)` to the backend name of its live (not
    /// soft-deleted) object, across every historically-known nesting depth.
    async fn resolve_live(&self, namespace: &str, key: &str) -> Result<String> {
        for name in nesting::candidate_names(namespace, key, &self.levels)? {
            if name.ends_with(".del") {
                continue;
            }
            if self.backend.info(&name).await?.exists {
                return Ok(name);
            }
        }
        Err(Error::ObjectNotFound(format!("{namespace}/{key}")))
    }

    /// Resolves `(namespace, key)` to whichever backend name currently
    /// exists, live or soft-deleted.
    async fn resolve_any(&self, namespace: &str, key: &str) -> Result<String> {
        for name in nesting::candidate_names(namespace, key, &self.levels)? {
            if self.backend.info(&name).await?.exists {
                return Ok(name);
            }
        }
        Err(Error::ObjectNotFound(format!("{namespace}/{key}")))
    }
}

async fn list_at_depth(
    backend: &impl Backend,
    namespace: &str,
    depth: u32,
) -> Result<Vec<crate::backend::DirEntry>> {
    if depth == 0 {
        return backend.list(namespace).await;
    }

    // Walk the sharding tree breadth-first down to `depth`, then list the
    // leaf directories. Non-recursive Backend::list means depth levels of
    // nesting need depth levels of directory listing.
    let mut containers = vec![namespace.to_string()];
    for _ in 0..depth {
        let mut next = Vec::new();
        for container in &containers {
            for entry in backend.list(container).await? {
                if entry.directory {
                    next.push(format!("{container}/{}", entry.name));
                }
            }
        }
        containers = next;
    }

    let mut entries = Vec::new();
    for container in &containers {
        entries.extend(backend.list(container).await?);
    }
    Ok(entries)
}

async fn precreate_shards(backend: &impl Backend, namespace: &str, depth: u32) -> Result<()> {
    if depth == 0 {
        return Ok(());
    }
    precreate_shards_at(backend, namespace, depth, 1).await
}

#[async_recursion::async_recursion]
async fn precreate_shards_at(
    backend: &(impl Backend + Sync),
    prefix: &str,
    depth: u32,
    level: u32,
) -> Result<()> {
    for byte in 0u16..256 {
        let shard = format!("{byte:02x}");
        let path = format!("{prefix}/{shard}");
        backend.mkdir(&path).await?;
        if level < depth {
            precreate_shards_at(backend, &path, depth, level + 1).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::posixfs::PosixFsBackend;
    use crate::nesting::NamespaceLevels;
    use futures::StreamExt;
    use tempfile::TempDir;

    fn levels() -> Levels {
        Levels::new().with_namespace("data", NamespaceLevels::depth(1))
    }

    #[tokio::test]
    async fn test_store_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(PosixFsBackend::new(dir.path()), levels());
        store.create().await.unwrap();

        store
            .store("data", "0123456789abcdef", Bytes::from("hello"))
            .await
            .unwrap();
        let loaded = store.load("data", "0123456789abcdef", 0, None).await.unwrap();
        assert_eq!(loaded, Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_load_missing_key_errors() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(PosixFsBackend::new(dir.path()), levels());
        store.create().await.unwrap();

        let result = store.load("data", "0123456789abcdef", 0, None).await;
        assert!(matches!(result, Err(Error::ObjectNotFound(_))));
    }

    #[tokio::test]
    async fn test_info_missing_key_returns_missing_info() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(PosixFsBackend::new(dir.path()), levels());
        store.create().await.unwrap();

        let info = store.info("data", "0123456789abcdef").await.unwrap();
        assert!(!info.exists);
    }

    #[tokio::test]
    async fn test_info_reports_deleted_for_soft_deleted_object() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(PosixFsBackend::new(dir.path()), levels());
        store.create().await.unwrap();
        store
            .store("data", "0123456789abcdef", Bytes::from("xyz"))
            .await
            .unwrap();
        store
            .move_key("data", "0123456789abcdef", MoveOp::Delete)
            .await
            .unwrap();

        let info = store.info("data", "0123456789abcdef").await.unwrap();
        assert!(info.exists);
        assert!(info.deleted);
        assert_eq!(info.size, 3);

        let loaded = store.load("data", "0123456789abcdef", 0, None).await.unwrap();
        assert_eq!(loaded, Bytes::from("xyz"));
    }

    #[tokio::test]
    async fn test_move_delete_then_undelete() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(PosixFsBackend::new(dir.path()), levels());
        store.create().await.unwrap();
        store
            .store("data", "0123456789abcdef", Bytes::from("x"))
            .await
            .unwrap();

        store
            .move_key("data", "0123456789abcdef", MoveOp::Delete)
            .await
            .unwrap();
        assert!(store
            .load("data", "0123456789abcdef", 0, None)
            .await
            .is_err());

        store
            .move_key("data", "0123456789abcdef", MoveOp::Undelete)
            .await
            .unwrap();
        let loaded = store.load("data", "0123456789abcdef", 0, None).await.unwrap();
        assert_eq!(loaded, Bytes::from("x"));
    }

    #[tokio::test]
    async fn test_move_to_renames_key() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(PosixFsBackend::new(dir.path()), levels());
        store.create().await.unwrap();
        store
            .store("data", "0123456789abcdef", Bytes::from("x"))
            .await
            .unwrap();

        store
            .move_key(
                "data",
                "0123456789abcdef",
                MoveOp::To {
                    key: "fedcba9876543210".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(store
            .load("data", "0123456789abcdef", 0, None)
            .await
            .is_err());
        let loaded = store.load("data", "fedcba9876543210", 0, None).await.unwrap();
        assert_eq!(loaded, Bytes::from("x"));
    }

    #[tokio::test]
    async fn test_list_excludes_deleted_by_default() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(PosixFsBackend::new(dir.path()), levels());
        store.create().await.unwrap();
        store
            .store("data", "0123456789abcdef", Bytes::from("x"))
            .await
            .unwrap();
        store
            .store("data", "fedcba9876543210", Bytes::from("y"))
            .await
            .unwrap();
        store
            .move_key("data", "fedcba9876543210", MoveOp::Delete)
            .await
            .unwrap();

        let entries: Vec<ListEntry> = store
            .list("data", false)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "0123456789abcdef");

        let all: Vec<ListEntry> = store
            .list("data", true)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_load_falls_back_to_historical_depth() {
        let dir = TempDir::new().unwrap();
        let legacy_levels =
            Levels::new().with_namespace("data", NamespaceLevels { depths: vec![0], precreate_dirs: false });
        let legacy_store = Store::new(PosixFsBackend::new(dir.path()), legacy_levels);
        legacy_store.create().await.unwrap();
        legacy_store
            .store("data", "abc123", Bytes::from("legacy"))
            .await
            .unwrap();

        let current_levels = Levels::new().with_namespace(
            "data",
            NamespaceLevels {
                depths: vec![1, 0],
                precreate_dirs: false,
            },
        );
        let store = Store::new(PosixFsBackend::new(dir.path()), current_levels);
        let loaded = store.load("data", "abc123", 0, None).await.unwrap();
        assert_eq!(loaded, Bytes::from("legacy"));
    }
}
