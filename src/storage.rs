use crate::error::StorageError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

pub const KEY_ACCESS_TOKEN: &str = "auth_token";
pub const KEY_REFRESH_TOKEN: &str = "refresh_token";
pub const KEY_USER: &str = "auth_user";

/// Durable string key/value storage. Values are trimmed; empty values are
/// treated as absent.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

fn normalize(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.values).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = lock(&self.values);
        match normalize(value) {
            Some(v) => {
                guard.insert(key.to_string(), v);
            }
            None => {
                guard.remove(key);
            }
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.values).remove(key);
        Ok(())
    }
}

/// JSON object on disk, rewritten on every change.
#[derive(Clone)]
pub struct FileStore {
    path: PathBuf,
    values: Arc<Mutex<Map<String, Value>>>,
}

impl FileStore {
    /// Opens the store. A missing or unreadable file starts empty so a
    /// corrupt profile never blocks startup.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = std::fs::read_to_string(&path)
            .ok()
            .and_then(|data| serde_json::from_str::<Value>(&data).ok())
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        Self {
            path,
            values: Arc::new(Mutex::new(values)),
        }
    }

    fn save(&self, values: &Map<String, Value>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_vec_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = lock(&self.values);
        Ok(guard.get(key).and_then(|v| v.as_str()).and_then(normalize))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = lock(&self.values);
        match normalize(value) {
            Some(v) => {
                guard.insert(key.to_string(), Value::String(v));
            }
            None => {
                guard.remove(key);
            }
        }
        self.save(&guard)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = lock(&self.values);
        if guard.remove(key).is_none() {
            return Ok(());
        }
        self.save(&guard)
    }
}
