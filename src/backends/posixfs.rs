//! Local POSIX filesystem backend.
//!
//! Speaks flat backend names directly against `tokio::fs`: create-parent-
//! dirs-on-write, `NotFound` translation at the I/O boundary, and the
//! `mkdir`/`rmdir`/`create`/`destroy` lifecycle operations the Backend
//! contract requires.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, instrument};

use crate::backend::{Backend, DirEntry, ItemInfo};
use crate::error::{Error, Result};

/// Local filesystem backend rooted at a single directory.
#[derive(Debug, Clone)]
pub struct PosixFsBackend {
    root: PathBuf,
}

impl PosixFsBackend {
    /// Create a backend rooted at `root`. `root` is not created until
    /// `create()` or a write touches it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    async fn ensure_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for PosixFsBackend {
    #[instrument(skip(self))]
    async fn create(&self) -> Result<()> {
        if self.root.exists() {
            let mut entries = fs::read_dir(&self.root).await?;
            if entries.next_entry().await?.is_some() {
                return Err(Error::BackendAlreadyExists(
                    self.root.display().to_string(),
                ));
            }
        }
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn destroy(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn open(&self) -> Result<()> {
        if !self.root.exists() {
            return Err(Error::BackendDoesNotExist(self.root.display().to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mkdir(&self, name: &str) -> Result<()> {
        fs::create_dir_all(self.full_path(name)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn rmdir(&self, name: &str) -> Result<()> {
        fs::remove_dir(self.full_path(name))
            .await
            .map_err(|e| Error::from_io(e, name))
    }

    #[instrument(skip(self))]
    async fn info(&self, name: &str) -> Result<ItemInfo> {
        let path = self.full_path(name);
        match fs::metadata(&path).await {
            Ok(meta) => Ok(ItemInfo {
                exists: true,
                size: if meta.is_dir() { 0 } else { meta.len() },
                directory: meta.is_dir(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ItemInfo::missing()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(name = %name, offset, size))]
    async fn load(&self, name: &str, offset: u64, size: Option<u64>) -> Result<Bytes> {
        let path = self.full_path(name);
        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| Error::from_io(e, name))?;

        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }

        let data = match size {
            Some(size) => {
                let mut buf = vec![0u8; size as usize];
                let mut total = 0;
                loop {
                    let n = file.read(&mut buf[total..]).await?;
                    if n == 0 {
                        break;
                    }
                    total += n;
                    if total == buf.len() {
                        break;
                    }
                }
                buf.truncate(total);
                buf
            }
            None => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).await?;
                buf
            }
        };

        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, value), fields(name = %name, size = value.len()))]
    async fn store(&self, name: &str, value: Bytes) -> Result<()> {
        let path = self.full_path(name);
        self.ensure_parent(&path).await?;
        debug!("writing {} bytes to {:?}", value.len(), path);
        fs::write(&path, &value).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<()> {
        fs::remove_file(self.full_path(name))
            .await
            .map_err(|e| Error::from_io(e, name))
    }

    #[instrument(skip(self), fields(src = %src, dst = %dst))]
    async fn move_object(&self, src: &str, dst: &str) -> Result<()> {
        let src_path = self.full_path(src);
        let dst_path = self.full_path(dst);

        if !src_path.exists() {
            return Err(Error::ObjectNotFound(src.to_string()));
        }
        if dst_path.exists() {
            return Err(Error::ObjectAlreadyExists(dst.to_string()));
        }

        self.ensure_parent(&dst_path).await?;
        fs::rename(&src_path, &dst_path).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, name: &str) -> Result<Vec<DirEntry>> {
        let path = self.full_path(name);
        let mut entries = match fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut results = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            results.push(DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                directory: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }
        Ok(results)
    }

    fn backend_name(&self) -> &'static str {
        "posixfs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend() -> (PosixFsBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        (PosixFsBackend::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn test_create_then_open() {
        let (b, _dir) = backend();
        b.create().await.unwrap();
        b.open().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_fails_on_nonempty_root() {
        let (b, dir) = backend();
        b.create().await.unwrap();
        std::fs::write(dir.path().join("x"), b"y").unwrap();
        let result = PosixFsBackend::new(dir.path()).create().await;
        assert!(matches!(result, Err(Error::BackendAlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_open_fails_when_missing() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let b = PosixFsBackend::new(&missing);
        let result = b.open().await;
        assert!(matches!(result, Err(Error::BackendDoesNotExist(_))));
    }

    #[tokio::test]
    async fn test_store_and_load_roundtrip() {
        let (b, _dir) = backend();
        b.create().await.unwrap();
        b.store("data/abc", Bytes::from("hello")).await.unwrap();
        let data = b.load("data/abc", 0, None).await.unwrap();
        assert_eq!(data, Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_partial_load() {
        let (b, _dir) = backend();
        b.create().await.unwrap();
        let value: Vec<u8> = (0u8..10).collect();
        b.store("m/k", Bytes::from(value.clone())).await.unwrap();

        let partial = b.load("m/k", 3, Some(4)).await.unwrap();
        assert_eq!(partial.as_ref(), &value[3..7]);

        let truncated = b.load("m/k", 8, Some(100)).await.unwrap();
        assert_eq!(truncated.as_ref(), &value[8..]);
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let (b, _dir) = backend();
        b.create().await.unwrap();
        let result = b.load("data/missing", 0, None).await;
        assert!(matches!(result, Err(Error::ObjectNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let (b, _dir) = backend();
        b.create().await.unwrap();
        let result = b.delete("data/missing").await;
        assert!(matches!(result, Err(Error::ObjectNotFound(_))));
    }

    #[tokio::test]
    async fn test_info_exists_and_missing() {
        let (b, _dir) = backend();
        b.create().await.unwrap();
        b.store("data/abc", Bytes::from("hi")).await.unwrap();

        let info = b.info("data/abc").await.unwrap();
        assert!(info.exists);
        assert_eq!(info.size, 2);

        let missing = b.info("data/nope").await.unwrap();
        assert!(!missing.exists);
    }

    #[tokio::test]
    async fn test_move_rejects_existing_dst() {
        let (b, _dir) = backend();
        b.create().await.unwrap();
        b.store("data/a", Bytes::from("1")).await.unwrap();
        b.store("data/b", Bytes::from("2")).await.unwrap();

        let result = b.move_object("data/a", "data/b").await;
        assert!(matches!(result, Err(Error::ObjectAlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_move_missing_src() {
        let (b, _dir) = backend();
        b.create().await.unwrap();
        let result = b.move_object("data/missing", "data/dst").await;
        assert!(matches!(result, Err(Error::ObjectNotFound(_))));
    }

    #[tokio::test]
    async fn test_move_rename_then_load() {
        let (b, _dir) = backend();
        b.create().await.unwrap();
        b.store("data/a", Bytes::from("v")).await.unwrap();
        b.move_object("data/a", "data/a.del").await.unwrap();

        assert!(matches!(
            b.load("data/a", 0, None).await,
            Err(Error::ObjectNotFound(_))
        ));
        assert_eq!(b.load("data/a.del", 0, None).await.unwrap(), Bytes::from("v"));
    }

    #[tokio::test]
    async fn test_list_non_recursive() {
        let (b, _dir) = backend();
        b.create().await.unwrap();
        b.store("data/aa/bb/leaf1", Bytes::from("x")).await.unwrap();
        b.store("data/aa/leaf2", Bytes::from("y")).await.unwrap();

        let entries = b.list("data/aa").await.unwrap();
        let mut names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["bb".to_string(), "leaf2".to_string()]);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let (b, _dir) = backend();
        b.create().await.unwrap();
        let entries = b.list("nope").await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_mkdir_rmdir() {
        let (b, _dir) = backend();
        b.create().await.unwrap();
        b.mkdir("data/aa").await.unwrap();
        b.rmdir("data/aa").await.unwrap();

        let entries = b.list("data").await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_rmdir_nonempty_fails() {
        let (b, _dir) = backend();
        b.create().await.unwrap();
        b.store("data/aa/leaf", Bytes::from("x")).await.unwrap();
        let result = b.rmdir("data/aa").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_destroy_removes_root() {
        let (b, dir) = backend();
        b.create().await.unwrap();
        b.store("data/a", Bytes::from("x")).await.unwrap();
        b.destroy().await.unwrap();
        assert!(!dir.path().join("data").exists());
    }

    #[tokio::test]
    async fn test_overwrite_store() {
        let (b, _dir) = backend();
        b.create().await.unwrap();
        b.store("data/a", Bytes::from("v1")).await.unwrap();
        b.store("data/a", Bytes::from("v2")).await.unwrap();
        assert_eq!(b.load("data/a", 0, None).await.unwrap(), Bytes::from("v2"));
    }
}
