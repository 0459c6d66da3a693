//! rclone-remote backend (feature `rclone`).
//!
//! Wraps a third-party client behind the `Backend` trait and keeps its own
//! connection state, same as the other backends in this module — except
//! the "client" here is a local `rclone rcd` daemon reached over HTTP
//! instead of a library. `open()` launches `${RCLONE_BINARY:-rclone} rcd`
//! bound to an ephemeral localhost port with its JSON-RPC control API
//! enabled; every operation after that is a `reqwest` POST against that API.
//! Bulk data transfer (`load`/`store`) instead shells out to `rclone
//! cat`/`rclone rcat`, since the rc API has no raw byte-stream call.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, instrument};

use crate::backend::{Backend, DirEntry, ItemInfo};
use crate::error::{Error, Result};

const MAX_RETRIES: u32 = 3;

/// Configuration for an rclone-remote-backed store root.
#[derive(Debug, Clone)]
pub struct RcloneConfig {
    /// Name of the configured rclone remote (the part before `:` in
    /// `rclone:REMOTE:path`).
    pub remote: String,
    /// Path within the remote.
    pub path: String,
    /// Override for the rclone binary; defaults to `$RCLONE_BINARY` or
    /// `rclone` on `$PATH`.
    pub binary: Option<String>,
}

impl RcloneConfig {
    pub fn new(remote: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            path: path.into(),
            binary: None,
        }
    }

    fn binary_path(&self) -> String {
        self.binary
            .clone()
            .or_else(|| std::env::var("RCLONE_BINARY").ok())
            .unwrap_or_else(|| "rclone".to_string())
    }
}

struct Daemon {
    child: Child,
    base_url: String,
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Backend driving a remote configured in the user's rclone config through a
/// locally-spawned `rcd` control daemon.
pub struct RcloneBackend {
    config: RcloneConfig,
    client: reqwest::Client,
    daemon: parking_lot::Mutex<Option<Arc<Daemon>>>,
}

impl RcloneBackend {
    pub fn new(config: RcloneConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            daemon: parking_lot::Mutex::new(None),
        }
    }

    fn daemon(&self) -> Result<Arc<Daemon>> {
        self.daemon
            .lock()
            .clone()
            .ok_or_else(|| Error::BackendDoesNotExist(self.config.remote.clone()))
    }

    fn remote_path(&self, name: &str) -> String {
        format!(
            "{}:{}/{}",
            self.config.remote,
            self.config.path.trim_end_matches('/'),
            name
        )
    }

    /// POSTs `body` to `rc_path` on the daemon's control API, retrying
    /// transport-level failures up to `MAX_RETRIES` times (spec's stats &
    /// throttle wrapper only counts application-level ops; connection
    /// flakiness against a local daemon is retried transparently here).
    async fn rc_call(&self, rc_path: &str, body: Value) -> Result<Value> {
        let daemon = self.daemon()?;
        let url = format!("{}/{rc_path}", daemon.base_url);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.post(&url).json(&body).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let value: Value = resp
                        .json()
                        .await
                        .map_err(|e| Error::BackendError(format!("invalid rc response: {e}")))?;
                    if !status.is_success() {
                        let message = value
                            .get("error")
                            .and_then(|v| v.as_str())
                            .unwrap_or("unknown rc error");
                        return Err(classify_rc_error(message));
                    }
                    return Ok(value);
                }
                Err(e) if attempt < MAX_RETRIES => {
                    debug!(attempt, error = %e, "rclone rc call failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                }
                Err(e) => {
                    return Err(Error::BackendError(format!(
                        "rc call to {rc_path} failed after {attempt} attempts: {e}"
                    )))
                }
            }
        }
    }

    async fn run_rclone(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new(self.config.binary_path())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::BackendError(format!("spawning rclone failed: {e}")))
    }

    /// Runs `rclone rcat <path>` with `value` piped to its stdin. Split out
    /// from `store` so the retry loop there can re-spawn the whole pipeline
    /// on a transport failure.
    async fn run_rcat(&self, path: &str, value: &Bytes) -> Result<()> {
        let mut child = Command::new(self.config.binary_path())
            .arg("rcat")
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::BackendError(format!("spawning rclone rcat failed: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(value)
                .await
                .map_err(|e| Error::BackendError(format!("writing to rcat stdin: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::BackendError(format!("rcat failed: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::BackendError(format!("rcat failed: {stderr}")));
        }
        Ok(())
    }
}

fn classify_rc_error(message: &str) -> Error {
    let lowered = message.to_lowercase();
    if lowered.contains("not found") || lowered.contains("directory not found") {
        Error::ObjectNotFound(message.to_string())
    } else {
        Error::BackendError(message.to_string())
    }
}

#[async_trait]
impl Backend for RcloneBackend {
    #[instrument(skip(self))]
    async fn create(&self) -> Result<()> {
        let existing = self.list("").await;
        if matches!(&existing, Ok(entries) if !entries.is_empty()) {
            return Err(Error::BackendAlreadyExists(self.config.remote.clone()));
        }
        self.mkdir("").await
    }

    async fn destroy(&self) -> Result<()> {
        self.rc_call(
            "operations/purge",
            json!({ "fs": format!("{}:", self.config.remote), "remote": self.config.path }),
        )
        .await?;
        Ok(())
    }

    async fn open(&self) -> Result<()> {
        let port = 20000 + (rand::random::<u16>() % 10000);
        let addr = format!("127.0.0.1:{port}");

        let child = Command::new(self.config.binary_path())
            .arg("rcd")
            .arg(format!("--rc-addr={addr}"))
            .arg("--rc-no-auth")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::BackendError(format!("spawning rclone rcd failed: {e}")))?;

        // rcd needs a moment to bind before it accepts rc calls.
        tokio::time::sleep(Duration::from_millis(300)).await;

        *self.daemon.lock() = Some(Arc::new(Daemon {
            child,
            base_url: format!("http://{addr}"),
        }));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.daemon.lock() = None;
        Ok(())
    }

    async fn mkdir(&self, name: &str) -> Result<()> {
        let remote = if name.is_empty() {
            self.config.path.clone()
        } else {
            format!("{}/{}", self.config.path.trim_end_matches('/'), name)
        };
        self.rc_call(
            "operations/mkdir",
            json!({ "fs": format!("{}:", self.config.remote), "remote": remote }),
        )
        .await?;
        Ok(())
    }

    async fn rmdir(&self, name: &str) -> Result<()> {
        let remote = format!("{}/{}", self.config.path.trim_end_matches('/'), name);
        self.rc_call(
            "operations/rmdir",
            json!({ "fs": format!("{}:", self.config.remote), "remote": remote }),
        )
        .await?;
        Ok(())
    }

    async fn info(&self, name: &str) -> Result<ItemInfo> {
        let remote = format!("{}/{}", self.config.path.trim_end_matches('/'), name);
        let result = self
            .rc_call(
                "operations/stat",
                json!({ "fs": format!("{}:", self.config.remote), "remote": remote }),
            )
            .await;

        match result {
            Ok(value) => match value.get("item") {
                Some(Value::Null) | None => Ok(ItemInfo::missing()),
                Some(item) => Ok(ItemInfo {
                    exists: true,
                    size: item.get("Size").and_then(Value::as_u64).unwrap_or(0),
                    directory: item
                        .get("IsDir")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                }),
            },
            Err(Error::ObjectNotFound(_)) => Ok(ItemInfo::missing()),
            Err(e) => Err(e),
        }
    }

    async fn load(&self, name: &str, offset: u64, size: Option<u64>) -> Result<Bytes> {
        let path = self.remote_path(name);
        let mut attempt = 0;
        let output = loop {
            attempt += 1;
            match self.run_rclone(&["cat", &path]).await {
                Ok(output) => break output,
                Err(e) if attempt < MAX_RETRIES => {
                    debug!(attempt, error = %e, "rclone cat failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_rc_error(&stderr));
        }
        let mut data = output.stdout;
        if offset as usize >= data.len() {
            return Ok(Bytes::new());
        }
        data.drain(0..offset as usize);
        if let Some(size) = size {
            data.truncate(size as usize);
        }
        Ok(Bytes::from(data))
    }

    async fn store(&self, name: &str, value: Bytes) -> Result<()> {
        let path = self.remote_path(name);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run_rcat(&path, &value).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < MAX_RETRIES => {
                    debug!(attempt, error = %e, "rclone rcat failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let remote = format!("{}/{}", self.config.path.trim_end_matches('/'), name);
        self.rc_call(
            "operations/deletefile",
            json!({ "fs": format!("{}:", self.config.remote), "remote": remote }),
        )
        .await?;
        Ok(())
    }

    async fn move_object(&self, src: &str, dst: &str) -> Result<()> {
        let dst_info = self.info(dst).await?;
        if dst_info.exists {
            return Err(Error::ObjectAlreadyExists(dst.to_string()));
        }

        let src_remote = format!("{}/{}", self.config.path.trim_end_matches('/'), src);
        let dst_remote = format!("{}/{}", self.config.path.trim_end_matches('/'), dst);
        self.rc_call(
            "operations/movefile",
            json!({
                "srcFs": format!("{}:", self.config.remote),
                "srcRemote": src_remote,
                "dstFs": format!("{}:", self.config.remote),
                "dstRemote": dst_remote,
            }),
        )
        .await?;
        Ok(())
    }

    async fn list(&self, name: &str) -> Result<Vec<DirEntry>> {
        let remote = if name.is_empty() {
            self.config.path.clone()
        } else {
            format!("{}/{}", self.config.path.trim_end_matches('/'), name)
        };

        let result = self
            .rc_call(
                "operations/list",
                json!({
                    "fs": format!("{}:", self.config.remote),
                    "remote": remote,
                    "opt": { "recurse": false },
                }),
            )
            .await;

        let value = match result {
            Ok(value) => value,
            Err(Error::ObjectNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let entries = value
            .get("list")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(entries
            .into_iter()
            .filter_map(|item| {
                let name = item.get("Name")?.as_str()?.to_string();
                let directory = item.get("IsDir").and_then(Value::as_bool).unwrap_or(false);
                let size = item.get("Size").and_then(Value::as_u64).unwrap_or(0);
                Some(DirEntry {
                    name,
                    directory,
                    size,
                })
            })
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "rclone"
    }
}
