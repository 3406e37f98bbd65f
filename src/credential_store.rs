//! Credential storage for the portal session
//!
//! The store is the only owner of the access/refresh token pair. It is
//! injected into the client as a trait object so tests can substitute the
//! in-memory variant and assert its contents directly.

use std::fs;
use std::path::PathBuf;

use papaya::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Logical key for the access token.
pub const ACCESS_TOKEN_KEY: &str = "authToken";
/// Logical key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Process-wide storage of the current access/refresh token pair.
///
/// No operation can fail and every write is immediately visible to all
/// readers; multiple in-flight request pipelines read and write the store
/// concurrently.
pub trait CredentialStore: Send + Sync + 'static {
    /// Current access token, if any.
    fn access_token(&self) -> Option<String>;

    /// Current refresh token, if any.
    fn refresh_token(&self) -> Option<String>;

    /// Store a new access token, optionally replacing the refresh token too.
    ///
    /// A refresh response only carries a new access token, so `refresh` is
    /// `None` on that path and the stored refresh token is kept.
    fn set_tokens(&self, access: &str, refresh: Option<&str>);

    /// Remove both tokens. Idempotent.
    fn clear(&self);
}

/// In-memory credential store backed by a Papaya map.
pub struct MemoryCredentialStore {
    entries: HashMap<String, String>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries.pin().get(key).cloned()
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn access_token(&self) -> Option<String> {
        self.get(ACCESS_TOKEN_KEY)
    }

    fn refresh_token(&self) -> Option<String> {
        self.get(REFRESH_TOKEN_KEY)
    }

    fn set_tokens(&self, access: &str, refresh: Option<&str>) {
        let entries = self.entries.pin();
        entries.insert(ACCESS_TOKEN_KEY.to_string(), access.to_string());
        if let Some(refresh) = refresh {
            entries.insert(REFRESH_TOKEN_KEY.to_string(), refresh.to_string());
        }
    }

    fn clear(&self) {
        self.entries.pin().clear();
    }
}

/// On-disk image of the credential pair, keyed by the logical names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(rename = "authToken", skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(rename = "refreshToken", skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

/// File-backed credential store that survives process restarts.
///
/// Writes go through an in-memory cache and are flushed to disk while the
/// cache lock is held, so readers never observe a half-written pair.
/// Persistence failures are logged and otherwise ignored; the store contract
/// has no error conditions.
pub struct FileCredentialStore {
    path: PathBuf,
    cache: Mutex<StoredCredentials>,
}

impl FileCredentialStore {
    /// Open the store at `path`, loading any previously persisted pair.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cache = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|error| {
                warn!(path = %path.display(), %error, "Stored credentials are malformed, starting empty");
                StoredCredentials::default()
            }),
            Err(_) => StoredCredentials::default(),
        };

        Self {
            path,
            cache: Mutex::new(cache),
        }
    }

    fn persist(&self, credentials: &StoredCredentials) {
        let bytes = match serde_json::to_vec_pretty(credentials) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(%error, "Failed to serialize credentials");
                return;
            }
        };

        // Write to a sibling file and rename it into place; a crash
        // mid-write must never leave a torn credential file.
        let tmp = self.path.with_extension("tmp");
        if let Err(error) = fs::write(&tmp, &bytes).and_then(|_| fs::rename(&tmp, &self.path)) {
            warn!(path = %self.path.display(), %error, "Failed to persist credentials");
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn access_token(&self) -> Option<String> {
        self.cache.lock().access_token.clone()
    }

    fn refresh_token(&self) -> Option<String> {
        self.cache.lock().refresh_token.clone()
    }

    fn set_tokens(&self, access: &str, refresh: Option<&str>) {
        let mut cache = self.cache.lock();
        cache.access_token = Some(access.to_string());
        if let Some(refresh) = refresh {
            cache.refresh_token = Some(refresh.to_string());
        }
        self.persist(&cache);
    }

    fn clear(&self) {
        let mut cache = self.cache.lock();
        *cache = StoredCredentials::default();
        self.persist(&cache);
    }
}
