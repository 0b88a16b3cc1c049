use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum StorageFault {
    #[error("storage io failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("stored value for '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("failed to encode '{key}': {reason}")]
    Encode { key: String, reason: String },
    #[error("storage backend unavailable: {0}")]
    Backend(String),
}

/// Durable string key/value medium underneath the local store.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageFault>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageFault>;
    fn remove(&self, key: &str) -> Result<(), StorageFault>;
}

/// All keys live in one JSON object file; every write is a
/// read-modify-write of that file.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update<F>(&self, key: &str, apply: F) -> Result<(), StorageFault>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StorageFault::Backend("file backend lock poisoned".to_string()))?;
        let mut on_disk = read_json_object(&self.path, key)?;
        apply(&mut on_disk);
        write_json_object(&self.path, key, &on_disk)
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageFault> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StorageFault::Backend("file backend lock poisoned".to_string()))?;
        let on_disk = read_json_object(&self.path, key)?;
        match on_disk.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(raw)) => Ok(Some(raw.clone())),
            Some(other) => Err(StorageFault::Corrupt {
                key: key.to_string(),
                reason: format!("expected string entry, found {other}"),
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageFault> {
        self.update(key, |map| {
            map.insert(key.to_string(), Value::String(value.to_string()));
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageFault> {
        self.update(key, |map| {
            map.remove(key);
        })
    }
}

/// Volatile backend. Clones share the same entries, which lets a test drop
/// a store and reopen another over the "same device".
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, StorageFault> {
        self.entries
            .lock()
            .map_err(|_| StorageFault::Backend("memory backend lock poisoned".to_string()))
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageFault> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageFault> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageFault> {
        self.entries()?.remove(key);
        Ok(())
    }
}

fn read_json_object(path: &Path, key: &str) -> Result<Map<String, Value>, StorageFault> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(source) => {
            return Err(StorageFault::Io {
                key: key.to_string(),
                source,
            })
        }
    };
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    let parsed: Value = serde_json::from_str(&raw).map_err(|err| StorageFault::Corrupt {
        key: key.to_string(),
        reason: format!("{} is not valid JSON: {err}", path.display()),
    })?;
    match parsed {
        Value::Object(map) => Ok(map),
        _ => Err(StorageFault::Corrupt {
            key: key.to_string(),
            reason: format!("{} does not hold a JSON object", path.display()),
        }),
    }
}

fn write_json_object(
    path: &Path,
    key: &str,
    payload: &Map<String, Value>,
) -> Result<(), StorageFault> {
    let io_fault = |source: std::io::Error| StorageFault::Io {
        key: key.to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_fault)?;
    }
    let body = serde_json::to_string_pretty(&Value::Object(payload.clone())).map_err(|err| {
        StorageFault::Encode {
            key: key.to_string(),
            reason: err.to_string(),
        }
    })?;
    std::fs::write(path, body).map_err(io_fault)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_backend_round_trips_and_removes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = FileBackend::new(temp.path().join("nested").join("store.json"));
        assert_eq!(backend.get("a")?, None);

        backend.set("a", "{\"x\":1}")?;
        backend.set("b", "[]")?;
        assert_eq!(backend.get("a")?.as_deref(), Some("{\"x\":1}"));

        backend.remove("a")?;
        backend.remove("missing")?;
        assert_eq!(backend.get("a")?, None);
        assert_eq!(backend.get("b")?.as_deref(), Some("[]"));
        Ok(())
    }

    #[test]
    fn file_backend_reports_corrupt_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("store.json");
        std::fs::write(&path, "not json")?;
        let backend = FileBackend::new(&path);
        let err = backend.get("a").err();
        assert!(matches!(err, Some(StorageFault::Corrupt { .. })));
        Ok(())
    }

    #[test]
    fn memory_backend_clones_share_entries() -> anyhow::Result<()> {
        let first = MemoryBackend::new();
        let second = first.clone();
        first.set("k", "v")?;
        assert_eq!(second.get("k")?.as_deref(), Some("v"));
        assert_eq!(second.keys(), vec!["k".to_string()]);
        Ok(())
    }
}
