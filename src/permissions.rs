//! Permission overlay: a generic `Backend` wrapper enforcing prefix-scoped
//! access control.
//!
//! Wraps a generic `B: Backend`, holding extra state behind a
//! `parking_lot::Mutex` only where it must be mutable, and delegating every
//! trait method to the inner backend after a local check. The check is
//! name-prefix matching against backend names, so it composes with any
//! `Backend`, not just a filesystem one.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;

use crate::backend::{Backend, DirEntry, ItemInfo};
use crate::error::{Error, Result};

/// A single permission letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    /// `l` — list contents.
    List,
    /// `r` — read (load/info).
    Read,
    /// `w` — write new objects.
    Write,
    /// `W` — overwrite/move over existing objects.
    Overwrite,
    /// `D` — hard delete (delete/destroy/rmdir).
    Delete,
}

impl Permission {
    fn from_char(c: char) -> Result<Self> {
        match c {
            'l' => Ok(Permission::List),
            'r' => Ok(Permission::Read),
            'w' => Ok(Permission::Write),
            'W' => Ok(Permission::Overwrite),
            'D' => Ok(Permission::Delete),
            other => Err(Error::InvalidURL(format!(
                "unknown permission letter: {other}"
            ))),
        }
    }
}

/// A set of permission letters granted for some name prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    granted: std::collections::BTreeSet<Permission>,
}

impl PermissionSet {
    /// Parses a permission-letter string, e.g. `"lrw"`.
    pub fn parse(letters: &str) -> Result<Self> {
        let mut granted = std::collections::BTreeSet::new();
        for c in letters.chars() {
            granted.insert(Permission::from_char(c)?);
        }
        Ok(Self { granted })
    }

    /// Grants every permission.
    pub fn all() -> Self {
        Self {
            granted: [
                Permission::List,
                Permission::Read,
                Permission::Write,
                Permission::Overwrite,
                Permission::Delete,
            ]
            .into_iter()
            .collect(),
        }
    }

    /// Grants nothing.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.granted.contains(&permission)
    }
}

/// Maps backend-name prefixes to the permissions granted under them.
///
/// Lookup walks from the most specific (longest) matching prefix to the
/// least specific; a name with no matching prefix is denied everything.
#[derive(Debug, Clone, Default)]
pub struct Permissions {
    by_prefix: BTreeMap<String, PermissionSet>,
}

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `letters` for every name with the given prefix.
    pub fn grant(mut self, prefix: impl Into<String>, letters: &str) -> Result<Self> {
        self.by_prefix.insert(prefix.into(), PermissionSet::parse(letters)?);
        Ok(self)
    }

    /// Resolves the permission set in effect for `name`, by longest matching
    /// prefix. Returns `None` if nothing matches.
    pub fn resolve(&self, name: &str) -> Option<&PermissionSet> {
        self.by_prefix
            .iter()
            .filter(|(prefix, _)| name.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, set)| set)
    }

    /// No prefix matching `name` at all — not even a root (`""`) entry —
    /// means "allow all"; a matching entry that doesn't grant `permission`
    /// is a denial.
    fn check(&self, name: &str, permission: Permission) -> Result<()> {
        self.check_any(name, &[permission])
    }

    /// Like `check`, but satisfied by any one of `permissions` — several of
    /// the table's operations accept either of two letters (`w|W`, `w|D`,
    /// `l|r`).
    fn check_any(&self, name: &str, permissions: &[Permission]) -> Result<()> {
        match self.resolve(name) {
            None => Ok(()),
            Some(set) if permissions.iter().any(|p| set.allows(*p)) => Ok(()),
            Some(_) => Err(Error::PermissionDenied(format!(
                "{name} requires one of {permissions:?}"
            ))),
        }
    }
}

/// Wraps a `Backend`, enforcing `Permissions` before every call reaches it.
pub struct PermissionBackend<B: Backend> {
    inner: B,
    permissions: Permissions,
}

impl<B: Backend> PermissionBackend<B> {
    pub fn new(inner: B, permissions: Permissions) -> Self {
        Self { inner, permissions }
    }
}

#[async_trait]
impl<B: Backend> Backend for PermissionBackend<B> {
    async fn create(&self) -> Result<()> {
        self.permissions
            .check_any("", &[Permission::Write, Permission::Overwrite])?;
        self.inner.create().await
    }

    async fn destroy(&self) -> Result<()> {
        self.permissions.check("", Permission::Delete)?;
        self.inner.destroy().await
    }

    async fn open(&self) -> Result<()> {
        self.inner.open().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    async fn mkdir(&self, name: &str) -> Result<()> {
        self.permissions
            .check_any(name, &[Permission::Write, Permission::Overwrite])?;
        self.inner.mkdir(name).await
    }

    async fn rmdir(&self, name: &str) -> Result<()> {
        self.permissions
            .check_any(name, &[Permission::Write, Permission::Delete])?;
        self.inner.rmdir(name).await
    }

    async fn info(&self, name: &str) -> Result<ItemInfo> {
        self.permissions
            .check_any(name, &[Permission::List, Permission::Read])?;
        self.inner.info(name).await
    }

    async fn load(&self, name: &str, offset: u64, size: Option<u64>) -> Result<Bytes> {
        self.permissions.check(name, Permission::Read)?;
        self.inner.load(name, offset, size).await
    }

    async fn store(&self, name: &str, value: Bytes) -> Result<()> {
        let already_exists = self.inner.info(name).await.map(|i| i.exists).unwrap_or(false);
        let needed = if already_exists {
            Permission::Overwrite
        } else {
            Permission::Write
        };
        self.permissions.check(name, needed)?;
        self.inner.store(name, value).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.permissions.check(name, Permission::Delete)?;
        self.inner.delete(name).await
    }

    async fn move_object(&self, src: &str, dst: &str) -> Result<()> {
        self.permissions.check(src, Permission::Delete)?;
        self.permissions
            .check_any(dst, &[Permission::Write, Permission::Overwrite])?;
        self.inner.move_object(src, dst).await
    }

    async fn list(&self, name: &str) -> Result<Vec<DirEntry>> {
        self.permissions.check(name, Permission::List)?;
        self.inner.list(name).await
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::posixfs::PosixFsBackend;
    use tempfile::TempDir;

    #[test]
    fn test_permission_set_parse() {
        let set = PermissionSet::parse("lrw").unwrap();
        assert!(set.allows(Permission::List));
        assert!(set.allows(Permission::Read));
        assert!(set.allows(Permission::Write));
        assert!(!set.allows(Permission::Overwrite));
        assert!(!set.allows(Permission::Delete));
    }

    #[test]
    fn test_permission_set_parse_rejects_unknown_letter() {
        assert!(PermissionSet::parse("lrx").is_err());
    }

    #[test]
    fn test_permissions_longest_prefix_wins() {
        let permissions = Permissions::new()
            .grant("data", "lr")
            .unwrap()
            .grant("data/secret", "")
            .unwrap();
        assert!(permissions.resolve("data/public/key").unwrap().allows(Permission::Read));
        assert!(!permissions
            .resolve("data/secret/key")
            .unwrap()
            .allows(Permission::Read));
    }

    #[test]
    fn test_permissions_no_match_denies() {
        let permissions = Permissions::new().grant("data", "lr").unwrap();
        assert!(permissions.resolve("other/key").is_none());
    }

    #[tokio::test]
    async fn test_permission_backend_allows_all_outside_any_configured_prefix() {
        // Absence of any matching mapping means "allow all", not deny-all —
        // only a matching-but-insufficient entry denies.
        let dir = TempDir::new().unwrap();
        let inner = PosixFsBackend::new(dir.path());
        inner.create().await.unwrap();
        let permissions = Permissions::new().grant("data", "lr").unwrap();
        let backend = PermissionBackend::new(inner, permissions);

        backend.store("other/key", Bytes::from("x")).await.unwrap();
        let info = backend.info("other/key").await.unwrap();
        assert!(info.exists);
    }

    #[tokio::test]
    async fn test_permission_backend_rejects_unauthorized_store() {
        let dir = TempDir::new().unwrap();
        let inner = PosixFsBackend::new(dir.path());
        inner.create().await.unwrap();
        let permissions = Permissions::new().grant("data", "lr").unwrap();
        let backend = PermissionBackend::new(inner, permissions);

        let result = backend.store("data/key", Bytes::from("x")).await;
        assert!(matches!(result, Err(Error::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_permission_backend_allows_granted_read() {
        let dir = TempDir::new().unwrap();
        let inner = PosixFsBackend::new(dir.path());
        inner.create().await.unwrap();
        inner.store("data/key", Bytes::from("x")).await.unwrap();

        let permissions = Permissions::new().grant("data", "lr").unwrap();
        let backend = PermissionBackend::new(inner, permissions);

        let info = backend.info("data/key").await.unwrap();
        assert!(info.exists);
    }

    #[tokio::test]
    async fn test_permission_backend_requires_overwrite_for_existing() {
        let dir = TempDir::new().unwrap();
        let inner = PosixFsBackend::new(dir.path());
        inner.create().await.unwrap();
        inner.store("data/key", Bytes::from("x")).await.unwrap();

        let permissions = Permissions::new().grant("data", "lrw").unwrap();
        let backend = PermissionBackend::new(inner, permissions);

        let result = backend.store("data/key", Bytes::from("y")).await;
        assert!(matches!(result, Err(Error::PermissionDenied(_))));
    }
}
