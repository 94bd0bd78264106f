//! Connection-string parsing.
//!
//! Accepted forms:
//!
//! | Form | Mode |
//! |------|------|
//! | `:memory:` | native, shared in-memory |
//! | `path/to/app.db`, `file:app.db?mode=ro` | native, exclusive file |
//! | `libsql://host[:port]?authToken=TOKEN` (also `http(s)://`, `ws(s)://`) | HTTP |
//! | `url=https://host;authToken=TOKEN` | HTTP |
//! | `Data Source=app.db` | native |
//! | `url=libsql://host;replica path=local.db` | native remote replica |
//!
//! Key names are case-insensitive, and spaces and underscores in them are ignored, so
//! `Auth Token`, `auth_token`, and `authToken` are the same key.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use reqwest::Url;
use secrecy::SecretString;

use crate::http::normalize_url;
use crate::native::{NativeTarget, is_remote_url};
use crate::{Error, Result};

/// Which transport a connection string selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportMode {
    /// Embedded engine.
    Native,
    /// HTTP pipeline.
    Http,
}

impl TransportMode {
    /// Lowercase name, as used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed connection string. Immutable once parsed.
///
/// `Debug` output never contains the auth token.
#[derive(Debug)]
pub struct ConnectionDescriptor {
    mode: TransportMode,
    target: String,
    auth_token: Option<SecretString>,
    replica_path: Option<PathBuf>,
}

impl ConnectionDescriptor {
    /// Parses a connection string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when the string is empty, uses an unknown key, names
    /// no target, or selects the HTTP transport without an `authToken`.
    pub fn parse(connection_string: &str) -> Result<Self> {
        let trimmed = connection_string.trim();
        if trimmed.is_empty() {
            return Err(Error::Connection("connection string is empty".to_string()));
        }
        if is_remote_url(trimmed) {
            return Self::from_url(trimmed);
        }
        if trimmed.eq_ignore_ascii_case(":memory:") || trimmed.starts_with("file:") {
            return Ok(Self::native(trimmed));
        }
        if trimmed.contains('=') {
            return Self::from_pairs(trimmed);
        }
        Ok(Self::native(trimmed))
    }

    fn native(target: &str) -> Self {
        Self {
            mode: TransportMode::Native,
            target: target.to_string(),
            auth_token: None,
            replica_path: None,
        }
    }

    fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| Error::Connection(format!("invalid database URL '{url}': {e}")))?;
        let token = parsed
            .query_pairs()
            .find(|(key, _)| normalize_key(key) == "authtoken")
            .map(|(_, value)| value.into_owned());
        let base = url.split(['?', '#']).next().unwrap_or(url);
        Self::http(base, token)
    }

    fn http(url: &str, token: Option<String>) -> Result<Self> {
        let token = token.filter(|t| !t.trim().is_empty()).ok_or_else(|| {
            Error::Connection(format!(
                "connection string for '{url}' selects the HTTP transport but has no authToken"
            ))
        })?;
        normalize_url(url)?;
        Ok(Self {
            mode: TransportMode::Http,
            target: url.to_string(),
            auth_token: Some(SecretString::from(token)),
            replica_path: None,
        })
    }

    fn from_pairs(connection_string: &str) -> Result<Self> {
        let mut target = None;
        let mut token = None;
        let mut replica_path = None;

        for pair in connection_string.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                Error::Connection(format!("expected key=value in connection string, found '{pair}'"))
            })?;
            let value = value.trim().to_string();
            match normalize_key(key).as_str() {
                "url" | "datasource" => target = Some(value),
                "authtoken" => token = Some(value),
                "replicapath" => replica_path = Some(PathBuf::from(value)),
                _ => {
                    return Err(Error::Connection(format!(
                        "unknown connection string key '{}'",
                        key.trim()
                    )));
                },
            }
        }

        let target = target.filter(|t| !t.is_empty()).ok_or_else(|| {
            Error::Connection("connection string has no url or data source".to_string())
        })?;

        if is_remote_url(&target) {
            if let Some(replica_path) = replica_path {
                return Ok(Self {
                    mode: TransportMode::Native,
                    target,
                    auth_token: token.map(SecretString::from),
                    replica_path: Some(replica_path),
                });
            }
            return Self::http(&target, token);
        }
        Ok(Self::native(&target))
    }

    /// Selected transport.
    #[must_use]
    pub const fn mode(&self) -> TransportMode {
        self.mode
    }

    /// File path, `:memory:`, `file:` URI, or URL, as given.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Bearer token for the HTTP transport.
    #[must_use]
    pub const fn auth_token(&self) -> Option<&SecretString> {
        self.auth_token.as_ref()
    }

    /// Local replica path, for native remote replicas.
    #[must_use]
    pub fn replica_path(&self) -> Option<&Path> {
        self.replica_path.as_deref()
    }

    /// Native open target. Only meaningful in native mode.
    #[must_use]
    pub fn native_target(&self) -> NativeTarget {
        match &self.replica_path {
            Some(replica_path) => NativeTarget::RemoteReplica {
                replica_path: replica_path.clone(),
                url: self.target.clone(),
            },
            None => NativeTarget::classify(&self.target),
        }
    }

    /// Returns true for native `:memory:`, which is shared through the registry.
    #[must_use]
    pub fn is_shared_memory(&self) -> bool {
        self.mode == TransportMode::Native && self.native_target().is_memory()
    }

    /// Database name: the file name, `:memory:`, or the URL host.
    #[must_use]
    pub fn database_name(&self) -> String {
        if self.mode == TransportMode::Http {
            return normalize_url(&self.target)
                .ok()
                .and_then(|url| Url::parse(&url).ok())
                .and_then(|url| url.host_str().map(str::to_string))
                .unwrap_or_else(|| self.target.clone());
        }
        match self.native_target() {
            NativeTarget::Memory => ":memory:".to_string(),
            NativeTarget::File(path) | NativeTarget::RemoteReplica { replica_path: path, .. } => {
                path.file_name()
                    .map_or_else(|| self.target.clone(), |name| name.to_string_lossy().into_owned())
            },
            NativeTarget::FileUri(uri) => {
                let path = uri.trim_start_matches("file:");
                let path = path.split(['?', '#']).next().unwrap_or(path);
                Path::new(path)
                    .file_name()
                    .map_or_else(|| uri.clone(), |name| name.to_string_lossy().into_owned())
            },
            NativeTarget::Remote(url) => url,
        }
    }
}

impl FromStr for ConnectionDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use test_case::test_case;

    #[test_case(":memory:", TransportMode::Native, ":memory:"; "memory")]
    #[test_case("app.db", TransportMode::Native, "app.db"; "bare path")]
    #[test_case("file:app.db?mode=ro", TransportMode::Native, "file:app.db?mode=ro"; "file uri")]
    #[test_case("Data Source=/tmp/app.db", TransportMode::Native, "/tmp/app.db"; "data source key")]
    #[test_case("libsql://db.example.io?authToken=abc", TransportMode::Http, "libsql://db.example.io"; "libsql url")]
    #[test_case("url=https://db.example.io;authToken=abc", TransportMode::Http, "https://db.example.io"; "key value url")]
    #[test_case("URL=https://db.example.io; Auth Token=abc;", TransportMode::Http, "https://db.example.io"; "key aliases")]
    fn test_parse_mode_and_target(input: &str, mode: TransportMode, target: &str) {
        let descriptor = ConnectionDescriptor::parse(input).unwrap();
        assert_eq!(descriptor.mode(), mode);
        assert_eq!(descriptor.target(), target);
    }

    #[test_case("libsql://db.example.io"; "url without token")]
    #[test_case("https://db.example.io?authToken="; "empty token")]
    #[test_case("url=https://db.example.io"; "key value without token")]
    #[test_case(""; "empty")]
    #[test_case("authToken=abc"; "no target")]
    #[test_case("url=:memory:;pooling=true"; "unknown key")]
    fn test_parse_rejects(input: &str) {
        assert!(matches!(
            ConnectionDescriptor::parse(input),
            Err(Error::Connection(_))
        ));
    }

    #[test]
    fn test_token_is_kept_and_redacted() {
        let descriptor =
            ConnectionDescriptor::parse("libsql://db.example.io?authToken=s3cret").unwrap();
        assert_eq!(
            descriptor.auth_token().map(|t| t.expose_secret().to_string()),
            Some("s3cret".to_string())
        );
        assert!(!format!("{descriptor:?}").contains("s3cret"));
    }

    #[test]
    fn test_replica_path_selects_native_replica() {
        let descriptor =
            ConnectionDescriptor::parse("url=libsql://db.example.io;replica_path=local.db")
                .unwrap();
        assert_eq!(descriptor.mode(), TransportMode::Native);
        assert!(matches!(
            descriptor.native_target(),
            NativeTarget::RemoteReplica { .. }
        ));
        assert_eq!(descriptor.database_name(), "local.db");
    }

    #[test_case(":memory:" => ":memory:"; "memory")]
    #[test_case("/var/data/app.db" => "app.db"; "file")]
    #[test_case("file:/var/data/app.db?mode=ro" => "app.db"; "file uri")]
    #[test_case("libsql://db.example.io?authToken=x" => "db.example.io"; "http host")]
    fn test_database_name(input: &str) -> String {
        ConnectionDescriptor::parse(input).unwrap().database_name()
    }

    #[test]
    fn test_shared_memory_flag() {
        assert!(ConnectionDescriptor::parse(":memory:").unwrap().is_shared_memory());
        assert!(!ConnectionDescriptor::parse("a.db").unwrap().is_shared_memory());
    }

    #[test]
    fn test_from_str() {
        let descriptor: ConnectionDescriptor = "a.db".parse().unwrap();
        assert_eq!(descriptor.mode(), TransportMode::Native);
    }
}
