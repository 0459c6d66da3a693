//! S3-compatible object storage backend (feature `s3`).
//!
//! Built on `object_store`'s `AmazonS3Builder` for construction and
//! credential/endpoint wiring, implementing the flat-name `Backend`
//! contract and using `list_with_delimiter` for its non-recursive listing
//! semantics.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::backend::{Backend, DirEntry, ItemInfo};
use crate::error::{Error, Result};

/// Configuration for an S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Bucket name.
    pub bucket: String,
    /// Region (ignored by most non-AWS S3-compatible services).
    pub region: String,
    /// Prefix under which all objects for this store root live.
    pub prefix: String,
    /// Custom endpoint, for MinIO/B2/other S3-compatible services.
    pub endpoint: Option<String>,
    /// Use path-style addressing (required by most non-AWS services).
    pub force_path_style: bool,
    /// Explicit access key, overriding profile/environment/IAM resolution.
    pub access_key_id: Option<String>,
    /// Explicit secret key.
    pub secret_access_key: Option<String>,
    /// Allow plain HTTP (for local MinIO instances without TLS).
    pub allow_http: bool,
    /// B2-quirk-compatible code path: B2's S3-compatible endpoint diverges
    /// from AWS in its handling of virtual-hosted-style requests, so `b2:`
    /// URLs always force path-style regardless of `force_path_style`.
    pub b2_compat: bool,
}

impl S3Config {
    /// AWS S3 configuration with standard credential resolution
    /// (explicit -> profile -> environment/IAM).
    pub fn aws(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            prefix: String::new(),
            endpoint: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
            allow_http: false,
            b2_compat: false,
        }
    }

    /// Configuration for a Backblaze B2 bucket reached over its
    /// S3-compatible endpoint.
    pub fn b2(bucket: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: "us-west-004".to_string(),
            prefix: String::new(),
            endpoint: Some(endpoint.into()),
            force_path_style: true,
            access_key_id: None,
            secret_access_key: None,
            allow_http: false,
            b2_compat: true,
        }
    }

    /// Set the store-root prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set explicit credentials.
    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }
}

/// S3-compatible object storage backend.
pub struct S3Backend {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl S3Backend {
    /// Construct from a configuration.
    pub fn new(config: S3Config) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_allow_http(config.allow_http);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if config.force_path_style || config.b2_compat {
            builder = builder.with_virtual_hosted_style_request(false);
        }
        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder
                .with_access_key_id(key_id)
                .with_secret_access_key(secret);
        }

        let store = builder
            .build()
            .map_err(|e| Error::BackendError(e.to_string()))?;

        Ok(Self {
            store: Arc::new(store),
            prefix: config.prefix,
        })
    }

    /// Construct from an already-built `ObjectStore` (tests, or callers who
    /// want a backend the `object_store` crate doesn't directly build, e.g.
    /// `object_store::memory::InMemory`).
    pub fn from_store(store: Arc<dyn ObjectStore>, prefix: String) -> Self {
        Self { store, prefix }
    }

    fn object_path(&self, name: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(name)
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix.trim_end_matches('/'), name))
        }
    }
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[async_trait]
impl Backend for S3Backend {
    async fn create(&self) -> Result<()> {
        // Buckets are provisioned out of band; creating the store root means
        // asserting the prefix is empty, mirroring posixfs's "empty existing
        // location is acceptable" rule.
        use futures::TryStreamExt;
        let obj_prefix = self.object_path("");
        let mut stream = self.store.list(Some(&obj_prefix));
        if stream.try_next().await.map_err(Error::from)?.is_some() {
            return Err(Error::BackendAlreadyExists(self.prefix.clone()));
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        use futures::TryStreamExt;
        let obj_prefix = self.object_path("");
        let mut stream = self.store.list(Some(&obj_prefix));
        while let Some(meta) = stream.try_next().await.map_err(Error::from)? {
            self.store.delete(&meta.location).await.ok();
        }
        Ok(())
    }

    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn mkdir(&self, _name: &str) -> Result<()> {
        // S3 has no directories; prefixes exist only as a consequence of
        // object keys.
        Ok(())
    }

    async fn rmdir(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    #[instrument(skip(self))]
    async fn info(&self, name: &str) -> Result<ItemInfo> {
        let obj_path = self.object_path(name);
        match self.store.head(&obj_path).await {
            Ok(meta) => Ok(ItemInfo {
                exists: true,
                size: meta.size as u64,
                directory: false,
            }),
            Err(object_store::Error::NotFound { .. }) => Ok(ItemInfo::missing()),
            Err(e) => Err(Error::from(e)),
        }
    }

    #[instrument(skip(self), fields(name = %name, offset, size))]
    async fn load(&self, name: &str, offset: u64, size: Option<u64>) -> Result<Bytes> {
        let obj_path = self.object_path(name);
        debug!("loading s3://{:?}", obj_path);

        let full = match self.store.get(&obj_path).await {
            Ok(result) => result.bytes().await.map_err(Error::from)?,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(Error::ObjectNotFound(name.to_string()))
            }
            Err(e) => return Err(Error::from(e)),
        };

        let start = offset.min(full.len() as u64) as usize;
        let end = match size {
            Some(size) => (start as u64 + size).min(full.len() as u64) as usize,
            None => full.len(),
        };
        Ok(full.slice(start..end))
    }

    #[instrument(skip(self, value), fields(name = %name, size = value.len()))]
    async fn store(&self, name: &str, value: Bytes) -> Result<()> {
        let obj_path = self.object_path(name);
        self.store
            .put(&obj_path, value.into())
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<()> {
        let obj_path = self.object_path(name);
        match self.store.delete(&obj_path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => {
                Err(Error::ObjectNotFound(name.to_string()))
            }
            Err(e) => Err(Error::from(e)),
        }
    }

    #[instrument(skip(self), fields(src = %src, dst = %dst))]
    async fn move_object(&self, src: &str, dst: &str) -> Result<()> {
        let src_path = self.object_path(src);
        let dst_path = self.object_path(dst);

        if self.store.head(&dst_path).await.is_ok() {
            return Err(Error::ObjectAlreadyExists(dst.to_string()));
        }

        match self.store.copy(&src_path, &dst_path).await {
            Ok(()) => {}
            Err(object_store::Error::NotFound { .. }) => {
                return Err(Error::ObjectNotFound(src.to_string()))
            }
            Err(e) => return Err(Error::from(e)),
        }
        self.store.delete(&src_path).await.ok();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, name: &str) -> Result<Vec<DirEntry>> {
        let obj_prefix = self.object_path(name);
        let listing = self
            .store
            .list_with_delimiter(Some(&obj_prefix))
            .await
            .map_err(Error::from)?;

        let mut results = Vec::new();
        for common_prefix in listing.common_prefixes {
            if let Some(leaf) = common_prefix.filename() {
                results.push(DirEntry {
                    name: leaf.to_string(),
                    directory: true,
                    size: 0,
                });
            }
        }
        for object in listing.objects {
            if let Some(leaf) = object.location.filename() {
                results.push(DirEntry {
                    name: leaf.to_string(),
                    directory: false,
                    size: object.size as u64,
                });
            }
        }
        Ok(results)
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn backend_with_prefix(prefix: &str) -> S3Backend {
        S3Backend::from_store(Arc::new(InMemory::new()), prefix.to_string())
    }

    #[test]
    fn test_s3_config_aws_defaults() {
        let config = S3Config::aws("bucket", "us-west-2");
        assert!(!config.force_path_style);
        assert!(config.endpoint.is_none());
    }

    #[test]
    fn test_s3_config_b2_forces_path_style() {
        let config = S3Config::b2("bucket", "https://s3.us-west-004.backblazeb2.com");
        assert!(config.b2_compat);
        assert!(config.force_path_style);
    }

    #[test]
    fn test_object_path_with_prefix() {
        let backend = backend_with_prefix("root");
        let path = backend.object_path("data/ab/cd/abcdef");
        assert_eq!(path.as_ref(), "root/data/ab/cd/abcdef");
    }

    #[tokio::test]
    async fn test_store_load_roundtrip() {
        let backend = backend_with_prefix("root");
        backend.store("data/k", Bytes::from("v")).await.unwrap();
        let data = backend.load("data/k", 0, None).await.unwrap();
        assert_eq!(data, Bytes::from("v"));
    }

    #[tokio::test]
    async fn test_partial_load() {
        let backend = backend_with_prefix("root");
        let value: Vec<u8> = (0u8..10).collect();
        backend.store("m/k", Bytes::from(value.clone())).await.unwrap();

        let partial = backend.load("m/k", 3, Some(4)).await.unwrap();
        assert_eq!(partial.as_ref(), &value[3..7]);

        let truncated = backend.load("m/k", 8, Some(100)).await.unwrap();
        assert_eq!(truncated.as_ref(), &value[8..]);
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let backend = backend_with_prefix("root");
        let result = backend.load("data/missing", 0, None).await;
        assert!(matches!(result, Err(Error::ObjectNotFound(_))));
    }

    #[tokio::test]
    async fn test_move_rejects_existing_dst() {
        let backend = backend_with_prefix("root");
        backend.store("data/a", Bytes::from("1")).await.unwrap();
        backend.store("data/b", Bytes::from("2")).await.unwrap();
        let result = backend.move_object("data/a", "data/b").await;
        assert!(matches!(result, Err(Error::ObjectAlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_list_non_recursive() {
        let backend = backend_with_prefix("root");
        backend.store("data/aa/leaf1", Bytes::from("x")).await.unwrap();
        backend.store("data/leaf2", Bytes::from("y")).await.unwrap();

        let entries = backend.list("data").await.unwrap();
        let mut names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["aa".to_string(), "leaf2".to_string()]);
    }
}
