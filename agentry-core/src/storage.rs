//! # Storage
//!
//! Key-value backends for state that must outlive a process, such as
//! persisted permission rules. Values are JSON; keys are flat strings.

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Storage backend trait
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn set(&mut self, key: &str, value: serde_json::Value) -> Result<()>;
    fn delete(&mut self, key: &str) -> Result<()>;
    fn exists(&self, key: &str) -> bool;
    fn keys(&self) -> Vec<String>;

    /// Keys starting with `prefix`
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect()
    }
}

/// In-memory storage (volatile, for tests and throwaway sessions)
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: BTreeMap<String, serde_json::Value>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.data.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }
}

/// File-based storage: one pretty-printed JSON file per key.
///
/// Keys are sanitized into file names, so `keys()` returns the sanitized
/// form. Sanitizing is idempotent, which keeps `get(k)` valid for every `k`
/// that `keys()` returns.
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path).map_err(|e| {
            Error::storage_failed(format!("failed to create {}", base_path.display()))
                .with_operation("storage::new")
                .set_source(e)
        })?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn key_to_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", sanitize_key(key)))
    }
}

fn sanitize_key(key: &str) -> String {
    key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_")
}

impl StorageBackend for FileStorage {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        let path = self.key_to_path(key);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt storage entry");
                None
            }
        }
    }

    fn set(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        let path = self.key_to_path(key);
        let content = serde_json::to_string_pretty(&value).map_err(|e| {
            Error::serialization_failed("failed to encode storage value")
                .with_operation("storage::set")
                .set_source(e)
        })?;
        // Atomic replace: temp file, then rename.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|e| {
                Error::storage_failed(format!("failed to write {}", path.display()))
                    .with_operation("storage::set")
                    .set_source(e)
            })
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let path = self.key_to_path(key);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| {
                Error::storage_failed(format!("failed to delete {}", path.display()))
                    .with_operation("storage::delete")
                    .set_source(e)
            })?;
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.key_to_path(key).exists()
    }

    fn keys(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.base_path) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    path.file_stem().and_then(|s| s.to_str()).map(String::from)
                } else {
                    None
                }
            })
            .collect();
        keys.sort();
        keys
    }
}
