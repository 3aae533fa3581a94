//! Lifecycle of persisted credentials.
//!
//! One versioned JSON file maps peer names to token records. The file is
//! created with owner-only permissions (0600, directory 0700) and every
//! operation is a read-modify-write under the store's own lock, separate
//! from the registry's.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const TOKEN_FILE_VERSION: u32 = 1;

/// Lead time subtracted from the expiry when deciding whether a token is
/// still usable, covering clock drift and network latency.
pub const EXPIRY_SKEW_SECS: i64 = 5 * 60;

#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("failed to read token file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write token file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("token file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

/// One peer's persisted credential.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Peer name, the map key repeated for convenience.
    pub server_name: String,
    pub server_url: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token_type: String,
    /// Absolute expiry as unix seconds; zero means the token never
    /// expires.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
}

impl TokenRecord {
    /// A token is expired when it has an expiry and `now` plus the skew
    /// buffer passes it.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at != 0 && now + EXPIRY_SKEW_SECS > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }
}

/// Versioned on-disk container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenFile {
    pub version: u32,
    #[serde(default)]
    pub servers: HashMap<String, TokenRecord>,
}

impl Default for TokenFile {
    fn default() -> Self {
        Self {
            version: TOKEN_FILE_VERSION,
            servers: HashMap::new(),
        }
    }
}

pub struct TokenStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// `<user-config>/manifold/auth.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("manifold")
            .join("auth.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Result<Option<TokenRecord>, TokenStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_file()?.servers.get(name).cloned())
    }

    pub fn set(&self, record: TokenRecord) -> Result<(), TokenStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = self.read_file()?;
        file.servers.insert(record.server_name.clone(), record);
        self.write_file(&file)
    }

    /// Remove a record, reporting whether it existed. Two concurrent
    /// deletes of different names race on the read-modify-write and one
    /// may win over the other; callers that care must retry, the file
    /// itself stays well-formed either way.
    pub fn delete(&self, name: &str) -> Result<bool, TokenStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = self.read_file()?;
        let existed = file.servers.remove(name).is_some();
        if existed {
            self.write_file(&file)?;
        }
        Ok(existed)
    }

    pub fn list(&self) -> Result<Vec<TokenRecord>, TokenStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<TokenRecord> = self.read_file()?.servers.into_values().collect();
        records.sort_by(|a, b| a.server_name.cmp(&b.server_name));
        Ok(records)
    }

    /// Missing or empty file reads as an empty store; invalid JSON is an
    /// error rather than silent data loss.
    fn read_file(&self) -> Result<TokenFile, TokenStoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(TokenFile::default())
            }
            Err(e) => {
                return Err(TokenStoreError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(TokenFile::default());
        }
        serde_json::from_str(&content).map_err(|e| TokenStoreError::Parse {
            path: self.path.clone(),
            source: e,
        })
    }

    fn write_file(&self, file: &TokenFile) -> Result<(), TokenStoreError> {
        let write_err = |source| TokenStoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
                    .map_err(write_err)?;
            }
        }

        let json = serde_json::to_string_pretty(file).map_err(|e| TokenStoreError::Parse {
            path: self.path.clone(),
            source: e,
        })?;
        std::fs::write(&self.path, json).map_err(write_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .map_err(write_err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> TokenStore {
        let path = std::env::temp_dir()
            .join(format!("manifold-tokens-{}-{}", tag, std::process::id()))
            .join("auth.json");
        let _ = std::fs::remove_file(&path);
        TokenStore::new(path)
    }

    fn record(name: &str) -> TokenRecord {
        TokenRecord {
            server_name: name.into(),
            server_url: "https://example.com/mcp".into(),
            client_id: "client-1".into(),
            access_token: "tok".into(),
            ..Default::default()
        }
    }

    #[test]
    fn expiry_with_skew() {
        let now = 1_700_000_000;
        let mut r = record("a");
        // Zero expiry never expires.
        r.expires_at = 0;
        assert!(!r.is_expired_at(now));
        // Inside the skew window counts as expired.
        r.expires_at = now + EXPIRY_SKEW_SECS - 1;
        assert!(r.is_expired_at(now));
        // Beyond the window is fine.
        r.expires_at = now + EXPIRY_SKEW_SECS + 1;
        assert!(!r.is_expired_at(now));
    }

    #[test]
    fn missing_file_is_empty_store() {
        let store = temp_store("missing");
        assert!(store.get("nobody").unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn set_get_delete_roundtrip() {
        let store = temp_store("roundtrip");
        store.set(record("alpha")).unwrap();
        store.set(record("beta")).unwrap();

        let got = store.get("alpha").unwrap().unwrap();
        assert_eq!(got.client_id, "client-1");
        assert_eq!(store.list().unwrap().len(), 2);

        assert!(store.delete("alpha").unwrap());
        assert!(!store.delete("alpha").unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn zero_fields_are_omitted_from_disk() {
        let store = temp_store("omit");
        store.set(record("bare")).unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("expires_at"));
        assert!(!raw.contains("refresh_token"));
        assert!(!raw.contains("client_secret"));
        assert!(raw.contains("\"version\": 1"));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let store = temp_store("corrupt");
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{oops").unwrap();
        assert!(matches!(
            store.get("x"),
            Err(TokenStoreError::Parse { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn file_permissions_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let store = temp_store("perms");
        store.set(record("p")).unwrap();
        let file_mode = std::fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
        let dir_mode = std::fs::metadata(store.path().parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(file_mode, 0o600);
        assert_eq!(dir_mode, 0o700);
    }
}
