//! Key-value state persisted across restarts.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

use crate::ConfigResult;

/// Durable key-value store for component state such as the L3 queue.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the stored value for `key`.
    async fn get(&self, key: &str) -> ConfigResult<Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Value) -> ConfigResult<()>;

    /// Removes `key`; removing a missing key is not an error.
    async fn remove(&self, key: &str) -> ConfigResult<()>;
}

/// Volatile state store.
#[derive(Default)]
pub struct InMemoryStateStore {
    values: Mutex<Map<String, Value>>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> ConfigResult<Option<Value>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> ConfigResult<()> {
        self.values.lock().await.insert(key.to_owned(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> ConfigResult<()> {
        self.values.lock().await.remove(key);
        Ok(())
    }
}

/// State store persisting a single JSON object to disk.
///
/// Every write rewrites the file through a temporary sibling and a rename, so a
/// crash mid-write leaves the previous snapshot intact.
pub struct JsonFileStateStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl JsonFileStateStore {
    /// Opens (or lazily creates) the state file at `path`.
    ///
    /// A corrupt file is logged and replaced by an empty object on the next
    /// write rather than failing the host.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors other than the file being absent.
    pub async fn open(path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let path = path.into();
        let values = match fs::read(&path).await {
            Ok(data) if data.is_empty() => Map::new(),
            Ok(data) => match serde_json::from_slice::<Value>(&data) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    warn!(path = %path.display(), "state file is not a JSON object; starting empty");
                    Map::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, values: &Map<String, Value>) -> ConfigResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn get(&self, key: &str) -> ConfigResult<Option<Value>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> ConfigResult<()> {
        let mut guard = self.values.lock().await;
        guard.insert(key.to_owned(), value);
        self.flush(&guard).await
    }

    async fn remove(&self, key: &str) -> ConfigResult<()> {
        let mut guard = self.values.lock().await;
        if guard.remove(key).is_some() {
            self.flush(&guard).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_path() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("state-store-{}", uuid::Uuid::new_v4()));
        path.push("state.json");
        path
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let path = temp_path();
        let store = JsonFileStateStore::open(&path).await.unwrap();
        store.set("queue", json!([{"id": "a"}])).await.unwrap();
        store.set("other", json!(1)).await.unwrap();
        store.remove("other").await.unwrap();

        let reopened = JsonFileStateStore::open(&path).await.unwrap();
        assert_eq!(reopened.get("queue").await.unwrap(), Some(json!([{"id": "a"}])));
        assert_eq!(reopened.get("other").await.unwrap(), None);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not json").unwrap();

        let store = JsonFileStateStore::open(&path).await.unwrap();
        assert_eq!(store.get("anything").await.unwrap(), None);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
