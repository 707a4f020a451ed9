//! Configuration and durable session storage

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::auth::SessionStore;
use crate::error::StorageError;

/// Backend used when neither the environment nor the config file says
/// otherwise (a local Relay deployment).
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// Application configuration, hand-edited in `config.toml`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the Relay backend
    pub api_base_url: Option<String>,
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "relay-cli", "relay-cli")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.toml");

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Effective base URL: `RELAY_API_URL`, then the config file, then the
    /// local default.
    pub fn api_base_url(&self) -> String {
        resolve_base_url(std::env::var("RELAY_API_URL").ok(), self)
    }
}

fn resolve_base_url(env_override: Option<String>, config: &Config) -> String {
    env_override
        .filter(|url| !url.is_empty())
        .or_else(|| config.api_base_url.clone())
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
}

/// Durable session record as written to `session.toml`. Either key
/// missing means "no session".
#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    token: Option<String>,
    /// RFC 3339 timestamp
    expires_at: Option<String>,
}

/// Session store backed by a TOML file under the platform config
/// directory.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn open_default() -> Result<Self> {
        Ok(Self {
            path: Config::config_dir()?.join("session.toml"),
        })
    }

    pub fn at_path(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SessionStore for FileSessionStore {
    fn load(&mut self) -> Option<(String, DateTime<Utc>)> {
        let content = fs::read_to_string(&self.path).ok()?;

        let parsed: SessionFile = match toml::from_str(&content) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Discarding unreadable session file: {}", e);
                self.clear();
                return None;
            }
        };

        match (parsed.token, parsed.expires_at) {
            (Some(token), Some(raw)) => match DateTime::parse_from_rfc3339(&raw) {
                Ok(expires_at) => Some((token, expires_at.with_timezone(&Utc))),
                Err(e) => {
                    tracing::warn!("Discarding session with unreadable expiry: {}", e);
                    self.clear();
                    None
                }
            },
            _ => {
                // Partial record, same as no session.
                self.clear();
                None
            }
        }
    }

    fn save(&mut self, token: &str, expires_at: DateTime<Utc>) -> Result<(), StorageError> {
        let dir = self.path.parent().ok_or(StorageError::NoConfigDir)?;
        fs::create_dir_all(dir)?;

        let record = SessionFile {
            token: Some(token.to_string()),
            expires_at: Some(expires_at.to_rfc3339()),
        };
        let content = toml::to_string_pretty(&record)?;
        fs::write(&self.path, content)?;

        // Restrictive permissions on the session file (contains the credential)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.path, perms)?;
        }

        Ok(())
    }

    fn clear(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove session file: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> FileSessionStore {
        FileSessionStore::at_path(dir.path().join("session.toml"))
    }

    fn expiry() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);

        store.save("abc123", expiry()).unwrap();
        assert_eq!(store.load(), Some(("abc123".to_string(), expiry())));
    }

    #[test]
    fn test_missing_file_is_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_corrupt_file_cleared_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        fs::write(&path, "not = [valid").unwrap();

        let mut store = FileSessionStore::at_path(path.clone());
        assert_eq!(store.load(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_unparseable_expiry_cleared_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        fs::write(&path, "token = \"abc\"\nexpires_at = \"tomorrow\"\n").unwrap();

        let mut store = FileSessionStore::at_path(path.clone());
        assert_eq!(store.load(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_partial_record_is_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        fs::write(&path, "token = \"abc\"\n").unwrap();

        let mut store = FileSessionStore::at_path(path);
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.save("abc123", expiry()).unwrap();

        store.clear();
        assert_eq!(store.load(), None);
        store.clear();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_base_url_resolution_order() {
        let config = Config {
            api_base_url: Some("https://relay.internal".to_string()),
        };
        assert_eq!(
            resolve_base_url(Some("https://staging.relay".to_string()), &config),
            "https://staging.relay"
        );
        assert_eq!(
            resolve_base_url(None, &config),
            "https://relay.internal"
        );
        assert_eq!(
            resolve_base_url(None, &Config::default()),
            DEFAULT_API_BASE_URL
        );
        assert_eq!(
            resolve_base_url(Some(String::new()), &Config::default()),
            DEFAULT_API_BASE_URL
        );
    }
}
