//! URL dispatcher: maps a repository URL to a concrete backend
//! configuration.
//!
//! `file://` and `sftp://` are standard enough for the `url` crate;
//! `rclone:REMOTE:path` is not a valid URL by that crate's own admission
//! (a bare `REMOTE:` segment isn't a registered scheme), so it's parsed by
//! hand instead.

use std::path::PathBuf;

use crate::error::{Error, Result};

#[cfg(feature = "s3")]
use crate::backends::s3::S3Config;
#[cfg(feature = "sftp")]
use crate::backends::sftp::SftpConfig;
#[cfg(feature = "rclone")]
use crate::backends::rclone::RcloneConfig;

/// A backend configuration resolved from a URL, ready to construct the
/// matching `Backend` implementation.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    PosixFs { path: PathBuf },
    #[cfg(feature = "s3")]
    S3(S3Config),
    #[cfg(feature = "sftp")]
    Sftp(SftpConfig),
    #[cfg(feature = "rclone")]
    Rclone(RcloneConfig),
}

/// Parses a repository URL: `file://`, `sftp://`,
/// `rclone:REMOTE:path`, and `s3:`/`b2:`.
pub fn parse_url(raw: &str) -> Result<BackendConfig> {
    if let Some(rest) = raw.strip_prefix("rclone:") {
        return parse_rclone(rest);
    }

    let parsed =
        url::Url::parse(raw).map_err(|e| Error::InvalidURL(format!("{raw}: {e}")))?;

    match parsed.scheme() {
        "file" => parse_file(&parsed),
        "sftp" => parse_sftp(&parsed),
        "s3" => parse_s3(&parsed, false),
        "b2" => parse_s3(&parsed, true),
        other => Err(Error::InvalidURL(format!("unsupported scheme: {other}"))),
    }
}

fn parse_file(parsed: &url::Url) -> Result<BackendConfig> {
    let path = parsed
        .to_file_path()
        .map_err(|_| Error::InvalidURL(format!("invalid file URL: {parsed}")))?;
    Ok(BackendConfig::PosixFs { path })
}

fn parse_rclone(rest: &str) -> Result<BackendConfig> {
    #[cfg(feature = "rclone")]
    {
        let mut parts = rest.splitn(2, ':');
        let remote = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidURL("rclone: URL missing remote name".to_string()))?;
        let path = parts.next().unwrap_or("");
        Ok(BackendConfig::Rclone(RcloneConfig::new(remote, path)))
    }
    #[cfg(not(feature = "rclone"))]
    {
        let _ = rest;
        Err(Error::InvalidURL(
            "rclone: URLs require the `rclone` feature".to_string(),
        ))
    }
}

fn parse_sftp(parsed: &url::Url) -> Result<BackendConfig> {
    #[cfg(feature = "sftp")]
    {
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::InvalidURL(format!("sftp URL missing host: {parsed}")))?
            .to_string();
        let port = parsed.port().unwrap_or(22);
        let username = if parsed.username().is_empty() {
            None
        } else {
            Some(parsed.username().to_string())
        };
        // `sftp://host/rel` (path `/rel`) is server-relative; `sftp://host//abs`
        // (path `//abs`) is server-absolute and keeps one leading slash.
        let path = parsed.path();
        let root = if let Some(abs) = path.strip_prefix("//") {
            format!("/{abs}")
        } else {
            path.trim_start_matches('/').to_string()
        };

        Ok(BackendConfig::Sftp(SftpConfig {
            host,
            port,
            username,
            root,
            private_key: None,
        }))
    }
    #[cfg(not(feature = "sftp"))]
    {
        let _ = parsed;
        Err(Error::InvalidURL(
            "sftp:// URLs require the `sftp` feature".to_string(),
        ))
    }
}

fn parse_s3(parsed: &url::Url, b2: bool) -> Result<BackendConfig> {
    #[cfg(feature = "s3")]
    {
        let bucket = parsed
            .host_str()
            .ok_or_else(|| Error::InvalidURL(format!("{parsed} missing bucket")))?
            .to_string();
        let prefix = parsed.path().trim_start_matches('/').to_string();
        let query: std::collections::HashMap<String, String> =
            parsed.query_pairs().into_owned().collect();

        let mut config = if b2 {
            let endpoint = query.get("endpoint").cloned().ok_or_else(|| {
                Error::InvalidURL("b2: URL requires an endpoint= query parameter".to_string())
            })?;
            S3Config::b2(bucket, endpoint)
        } else {
            let region = query
                .get("region")
                .cloned()
                .unwrap_or_else(|| "us-east-1".to_string());
            S3Config::aws(bucket, region)
        };

        if !prefix.is_empty() {
            config = config.with_prefix(prefix);
        }
        if let (Some(key), Some(secret)) =
            (query.get("access_key_id"), query.get("secret_access_key"))
        {
            config = config.with_credentials(key.clone(), secret.clone());
        }
        if let Some(endpoint) = query.get("endpoint") {
            if !b2 {
                config.endpoint = Some(endpoint.clone());
            }
        }
        if query.get("path_style").map(|v| v == "true").unwrap_or(false) {
            config.force_path_style = true;
        }

        Ok(BackendConfig::S3(config))
    }
    #[cfg(not(feature = "s3"))]
    {
        let _ = (parsed, b2);
        Err(Error::InvalidURL(
            "s3:/b2: URLs require the `s3` feature".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_url() {
        let config = parse_url("file:///tmp/repo").unwrap();
        match config {
            BackendConfig::PosixFs { path } => assert_eq!(path, PathBuf::from("/tmp/repo")),
            #[allow(unreachable_patterns)]
            _ => panic!("expected PosixFs"),
        }
    }

    #[test]
    fn test_parse_unsupported_scheme() {
        let result = parse_url("ftp://example.com/repo");
        assert!(matches!(result, Err(Error::InvalidURL(_))));
    }

    #[test]
    fn test_parse_malformed_url() {
        let result = parse_url("not a url at all");
        assert!(matches!(result, Err(Error::InvalidURL(_))));
    }

    #[cfg(feature = "rclone")]
    #[test]
    fn test_parse_rclone_url() {
        let config = parse_url("rclone:myremote:backups/repo").unwrap();
        match config {
            BackendConfig::Rclone(config) => {
                assert_eq!(config.remote, "myremote");
                assert_eq!(config.path, "backups/repo");
            }
            #[allow(unreachable_patterns)]
            _ => panic!("expected Rclone"),
        }
    }

    #[cfg(feature = "rclone")]
    #[test]
    fn test_parse_rclone_url_missing_remote() {
        let result = parse_url("rclone::path");
        assert!(result.is_err());
    }

    #[cfg(feature = "sftp")]
    #[test]
    fn test_parse_sftp_url() {
        let config = parse_url("sftp://user@example.com:2222/backups/repo").unwrap();
        match config {
            BackendConfig::Sftp(config) => {
                assert_eq!(config.host, "example.com");
                assert_eq!(config.port, 2222);
                assert_eq!(config.username.as_deref(), Some("user"));
                assert_eq!(config.root, "backups/repo");
            }
            #[allow(unreachable_patterns)]
            _ => panic!("expected Sftp"),
        }
    }

    #[cfg(feature = "sftp")]
    #[test]
    fn test_parse_sftp_url_server_absolute_root() {
        let config = parse_url("sftp://example.com//backups/repo").unwrap();
        match config {
            BackendConfig::Sftp(config) => {
                assert_eq!(config.root, "/backups/repo");
            }
            #[allow(unreachable_patterns)]
            _ => panic!("expected Sftp"),
        }
    }

    #[cfg(feature = "s3")]
    #[test]
    fn test_parse_s3_url() {
        let config = parse_url("s3://my-bucket/prefix?region=eu-west-1").unwrap();
        match config {
            BackendConfig::S3(config) => {
                assert_eq!(config.bucket, "my-bucket");
                assert_eq!(config.region, "eu-west-1");
                assert_eq!(config.prefix, "prefix");
            }
            #[allow(unreachable_patterns)]
            _ => panic!("expected S3"),
        }
    }

    #[cfg(feature = "s3")]
    #[test]
    fn test_parse_b2_url_requires_endpoint() {
        let result = parse_url("b2://my-bucket/prefix");
        assert!(result.is_err());
    }

    #[cfg(feature = "s3")]
    #[test]
    fn test_parse_b2_url() {
        let config =
            parse_url("b2://my-bucket/prefix?endpoint=https://s3.us-west-004.backblazeb2.com")
                .unwrap();
        match config {
            BackendConfig::S3(config) => {
                assert_eq!(config.bucket, "my-bucket");
                assert!(config.b2_compat);
            }
            #[allow(unreachable_patterns)]
            _ => panic!("expected S3"),
        }
    }
}
