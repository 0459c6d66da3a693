//! SFTP backend (feature `sftp`).
//!
//! `ssh2` is a synchronous libssh2 binding, so every operation runs on a
//! blocking thread via `tokio::task::spawn_blocking`, the usual bridge for
//! wrapping a blocking C binding behind an async trait.

use async_trait::async_trait;
use bytes::Bytes;
use ssh2::Session;
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

use crate::backend::{Backend, DirEntry, ItemInfo};
use crate::error::{Error, Result};

/// Connection parameters for an SFTP-backed store root.
#[derive(Debug, Clone)]
pub struct SftpConfig {
    /// Remote host.
    pub host: String,
    /// Remote port (default 22).
    pub port: u16,
    /// Username; if omitted, the current OS user is used (mirroring
    /// ssh-style user config resolution).
    pub username: Option<String>,
    /// Root path on the server. Server-relative (recommended, no leading
    /// slash) or server-absolute (one leading slash).
    pub root: String,
    /// Private key file for public-key authentication. If omitted, an
    /// ssh-agent is tried.
    pub private_key: Option<PathBuf>,
}

impl SftpConfig {
    /// Minimal configuration; defaults to port 22 and agent authentication.
    pub fn new(host: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: None,
            root: root.into(),
            private_key: None,
        }
    }
}

struct Connection {
    session: Session,
}

/// SFTP-backed object store.
pub struct SftpBackend {
    config: SftpConfig,
    conn: parking_lot::Mutex<Option<Arc<Connection>>>,
}

impl SftpBackend {
    /// Construct an (unopened) SFTP backend. Call `open()` (or
    /// `Store::open`) before any other operation.
    pub fn new(config: SftpConfig) -> Self {
        Self {
            config,
            conn: parking_lot::Mutex::new(None),
        }
    }

    fn connection(&self) -> Result<Arc<Connection>> {
        self.conn
            .lock()
            .clone()
            .ok_or_else(|| Error::BackendDoesNotExist(self.config.host.clone()))
    }

    fn full_path(&self, name: &str) -> String {
        format!("{}/{}", self.config.root.trim_end_matches('/'), name)
    }

    fn connect(config: &SftpConfig) -> Result<Session> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port))
            .map_err(|e| Error::BackendError(format!("tcp connect failed: {e}")))?;

        let mut session =
            Session::new().map_err(|e| Error::BackendError(format!("session init: {e}")))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| Error::BackendError(format!("handshake failed: {e}")))?;

        // Trusts known_hosts only — no auto-accept of unrecognized host keys.
        {
            let mut known_hosts = session
                .known_hosts()
                .map_err(|e| Error::BackendError(format!("known_hosts: {e}")))?;
            let home = dirs_home();
            if let Some(path) = home.map(|h| h.join(".ssh/known_hosts")) {
                known_hosts
                    .read_file(&path, ssh2::KnownHostFileKind::OpenSSH)
                    .map_err(|e| Error::BackendError(format!("reading known_hosts: {e}")))?;
            }
            let (key, _key_type) = session
                .host_key()
                .ok_or_else(|| Error::BackendError("no host key presented".to_string()))?;
            match known_hosts.check(&config.host, key) {
                ssh2::CheckResult::Match => {}
                other => {
                    return Err(Error::BackendError(format!(
                        "host key for {} failed known_hosts check: {other:?}",
                        config.host
                    )));
                }
            }
        }

        let username = config
            .username
            .clone()
            .unwrap_or_else(|| whoami_fallback());

        if let Some(key_path) = &config.private_key {
            session
                .userauth_pubkey_file(&username, None, key_path, None)
                .map_err(|e| Error::BackendError(format!("pubkey auth failed: {e}")))?;
        } else {
            session
                .userauth_agent(&username)
                .map_err(|e| Error::BackendError(format!("agent auth failed: {e}")))?;
        }

        if !session.authenticated() {
            return Err(Error::BackendError("authentication failed".to_string()));
        }

        Ok(session)
    }
}

/// True for the SFTP protocol's "no such file" status (code 2), the only
/// `stat`/`readdir` failure that should be read as "doesn't exist" rather
/// than propagated.
fn is_sftp_not_found(e: &ssh2::Error) -> bool {
    e.code() == ssh2::ErrorCode::SFTP(2)
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn whoami_fallback() -> String {
    std::env::var("USER").unwrap_or_else(|_| "root".to_string())
}

macro_rules! blocking_sftp {
    ($self:expr, |$sftp:ident| $body:expr) => {{
        let conn = $self.connection()?;
        tokio::task::spawn_blocking(move || {
            let $sftp = conn
                .session
                .sftp()
                .map_err(|e| Error::BackendError(format!("sftp channel: {e}")))?;
            $body
        })
        .await
        .map_err(|e| Error::BackendError(format!("blocking task panicked: {e}")))?
    }};
}

#[async_trait]
impl Backend for SftpBackend {
    #[instrument(skip(self))]
    async fn create(&self) -> Result<()> {
        let root = self.config.root.clone();
        blocking_sftp!(self, |sftp| {
            match sftp.readdir(Path::new(&root)) {
                Ok(entries) if !entries.is_empty() => {
                    Err(Error::BackendAlreadyExists(root.clone()))
                }
                Ok(_) => Ok(()),
                Err(_) => sftp
                    .mkdir(Path::new(&root), 0o755)
                    .map_err(|e| Error::BackendError(format!("mkdir root: {e}"))),
            }
        })
    }

    async fn destroy(&self) -> Result<()> {
        // Recursive removal isn't a single libssh2 call; callers that need
        // `destroy()` over SFTP are expected to also hold shell access, but
        // we still walk and remove everything we can see.
        let root = self.config.root.clone();
        blocking_sftp!(self, |sftp| {
            remove_recursive(&sftp, Path::new(&root))
        })
    }

    async fn open(&self) -> Result<()> {
        let session = Self::connect(&self.config)?;
        *self.conn.lock() = Some(Arc::new(Connection { session }));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.conn.lock() = None;
        Ok(())
    }

    async fn mkdir(&self, name: &str) -> Result<()> {
        let path = self.full_path(name);
        blocking_sftp!(self, |sftp| {
            match sftp.mkdir(Path::new(&path), 0o755) {
                Ok(()) => Ok(()),
                Err(e) if e.code() == ssh2::ErrorCode::SFTP(4) => Ok(()), // already exists
                Err(e) => Err(Error::BackendError(format!("mkdir {path}: {e}"))),
            }
        })
    }

    async fn rmdir(&self, name: &str) -> Result<()> {
        let path = self.full_path(name);
        blocking_sftp!(self, |sftp| {
            sftp.rmdir(Path::new(&path))
                .map_err(|e| Error::from_io(std::io::Error::from(e), &path))
        })
    }

    async fn info(&self, name: &str) -> Result<ItemInfo> {
        let path = self.full_path(name);
        blocking_sftp!(self, |sftp| {
            match sftp.stat(Path::new(&path)) {
                Ok(stat) => Ok(ItemInfo {
                    exists: true,
                    size: stat.size.unwrap_or(0),
                    directory: stat.is_dir(),
                }),
                Err(e) if is_sftp_not_found(&e) => Ok(ItemInfo::missing()),
                Err(e) => Err(Error::BackendError(format!("stat {path}: {e}"))),
            }
        })
    }

    async fn load(&self, name: &str, offset: u64, size: Option<u64>) -> Result<Bytes> {
        let path = self.full_path(name);
        blocking_sftp!(self, |sftp| {
            let mut file = sftp
                .open(Path::new(&path))
                .map_err(|e| Error::from_io(std::io::Error::from(e), &path))?;
            if offset > 0 {
                file.seek(SeekFrom::Start(offset))
                    .map_err(|e| Error::BackendError(e.to_string()))?;
            }
            let data = match size {
                Some(size) => {
                    let mut buf = vec![0u8; size as usize];
                    let mut total = 0;
                    loop {
                        let n = file
                            .read(&mut buf[total..])
                            .map_err(|e| Error::BackendError(e.to_string()))?;
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
                    file.read_to_end(&mut buf)
                        .map_err(|e| Error::BackendError(e.to_string()))?;
                    buf
                }
            };
            Ok(Bytes::from(data))
        })
    }

    async fn store(&self, name: &str, value: Bytes) -> Result<()> {
        let path = self.full_path(name);
        blocking_sftp!(self, |sftp| {
            if let Some(parent) = Path::new(&path).parent() {
                let _ = sftp.mkdir(parent, 0o755);
            }
            let mut file = sftp
                .create(Path::new(&path))
                .map_err(|e| Error::BackendError(format!("create {path}: {e}")))?;
            file.write_all(&value)
                .map_err(|e| Error::BackendError(e.to_string()))?;
            Ok(())
        })
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.full_path(name);
        blocking_sftp!(self, |sftp| {
            sftp.unlink(Path::new(&path))
                .map_err(|e| Error::from_io(std::io::Error::from(e), &path))
        })
    }

    async fn move_object(&self, src: &str, dst: &str) -> Result<()> {
        let src_path = self.full_path(src);
        let dst_path = self.full_path(dst);
        blocking_sftp!(self, |sftp| {
            if sftp.stat(Path::new(&dst_path)).is_ok() {
                return Err(Error::ObjectAlreadyExists(dst_path.clone()));
            }
            sftp.rename(Path::new(&src_path), Path::new(&dst_path), None)
                .map_err(|e| Error::from_io(std::io::Error::from(e), &src_path))
        })
    }

    async fn list(&self, name: &str) -> Result<Vec<DirEntry>> {
        let path = self.full_path(name);
        blocking_sftp!(self, |sftp| {
            let entries = match sftp.readdir(Path::new(&path)) {
                Ok(entries) => entries,
                Err(e) if is_sftp_not_found(&e) => return Ok(Vec::new()),
                Err(e) => return Err(Error::BackendError(format!("readdir {path}: {e}"))),
            };
            Ok(entries
                .into_iter()
                .filter_map(|(p, stat)| {
                    let leaf = p.file_name()?.to_string_lossy().to_string();
                    Some(DirEntry {
                        name: leaf,
                        directory: stat.is_dir(),
                        size: stat.size.unwrap_or(0),
                    })
                })
                .collect())
        })
    }

    fn backend_name(&self) -> &'static str {
        "sftp"
    }
}

fn remove_recursive(sftp: &ssh2::Sftp, path: &Path) -> Result<()> {
    let entries = sftp
        .readdir(path)
        .map_err(|e| Error::BackendError(format!("readdir {}: {e}", path.display())))?;
    for (child, stat) in entries {
        if stat.is_dir() {
            remove_recursive(sftp, &child)?;
            sftp.rmdir(&child).ok();
        } else {
            sftp.unlink(&child).ok();
        }
    }
    sftp.rmdir(path).ok();
    Ok(())
}
