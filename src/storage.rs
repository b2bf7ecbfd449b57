//! Durable client-side token storage.
//!
//! The bearer token is the only thing the portal keeps across restarts. It
//! lives under a fixed key, and the presence of that key is what makes a
//! boot a "returning session".

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;

/// Key the bearer token is stored under.
pub const AUTH_TOKEN_KEY: &str = "helios_auth_token";

/// Opaque bearer credential. Never printed.
pub struct AuthToken(SecretString);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().trim().is_empty()
    }
}

impl Clone for AuthToken {
    fn clone(&self) -> Self {
        Self::new(self.expose().to_owned())
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken([REDACTED])")
    }
}

impl PartialEq for AuthToken {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

/// Backend-agnostic token storage.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<AuthToken>, StorageError>;

    async fn save(&self, token: &AuthToken) -> Result<(), StorageError>;

    async fn clear(&self) -> Result<(), StorageError>;
}

/// JSON file holding a small key/value map, one key of which is the token.
pub struct FileTokenStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file.
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(map)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<AuthToken>, StorageError> {
        let _guard = self.lock.lock().await;
        let map = self.read_map().await?;
        Ok(map
            .get(AUTH_TOKEN_KEY)
            .filter(|t| !t.trim().is_empty())
            .map(|t| AuthToken::new(t.clone())))
    }

    async fn save(&self, token: &AuthToken) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_map().await?;
        map.insert(AUTH_TOKEN_KEY.to_string(), token.expose().to_string());
        self.write_map(&map).await?;
        debug!(path = %self.path.display(), "Persisted auth token");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_map().await?;
        if map.remove(AUTH_TOKEN_KEY).is_some() {
            self.write_map(&map).await?;
            debug!(path = %self.path.display(), "Cleared auth token");
        }
        Ok(())
    }
}

/// In-process token store, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<AuthToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(AuthToken::new(token))),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<AuthToken>, StorageError> {
        Ok(self.token.lock().await.clone())
    }

    async fn save(&self, token: &AuthToken) -> Result<(), StorageError> {
        *self.token.lock().await = Some(token.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        *self.token.lock().await = None;
        Ok(())
    }
}
