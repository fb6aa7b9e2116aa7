//! Secret storage used for signing keys.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;

use crate::{ConfigError, ConfigResult};

/// Secure key-value storage for secrets such as the ledger HMAC key.
///
/// Values must never be logged by implementations or callers.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Returns the stored secret, if any.
    async fn get(&self, key: &str) -> ConfigResult<Option<String>>;

    /// Stores (or replaces) a secret.
    async fn store(&self, key: &str, value: &str) -> ConfigResult<()>;

    /// Deletes a secret; deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> ConfigResult<()>;
}

/// Process-local secret store, used in tests and ephemeral sessions.
#[derive(Default)]
pub struct InMemorySecretStore {
    values: RwLock<HashMap<String, String>>,
}

impl InMemorySecretStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get(&self, key: &str) -> ConfigResult<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn store(&self, key: &str, value: &str) -> ConfigResult<()> {
        self.values
            .write()
            .await
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn delete(&self, key: &str) -> ConfigResult<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

/// Secret store keeping one owner-only file per key inside a directory.
#[derive(Debug)]
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    /// Uses (and creates on first write) the supplied directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the backing directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> ConfigResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(ConfigError::InvalidSecretKey(key.to_owned()));
        }
        Ok(self.dir.join(format!("{key}.secret")))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, key: &str) -> ConfigResult<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value.trim_end().to_owned())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn store(&self, key: &str, value: &str) -> ConfigResult<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir).await?;
        fs::write(&path, value.as_bytes()).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> ConfigResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}
