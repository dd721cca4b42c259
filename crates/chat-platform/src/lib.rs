//! Small key/value persistence used for participant identity.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyValueStoreError {
    #[error("key not found")]
    NotFound,
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
    #[error("key-value store backend failure: {0}")]
    Backend(String),
}

/// Namespaced string storage. Keys are `(namespace, key)` pairs.
pub trait KeyValueStore: Send + Sync {
    fn set_value(&self, namespace: &str, key: &str, value: &str) -> Result<(), KeyValueStoreError>;

    fn get_value(&self, namespace: &str, key: &str) -> Result<String, KeyValueStoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryKeyValueStore {
    data: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn set_value(&self, namespace: &str, key: &str, value: &str) -> Result<(), KeyValueStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| KeyValueStoreError::Backend("poisoned lock".to_owned()))?;
        data.insert((namespace.to_owned(), key.to_owned()), value.to_owned());
        Ok(())
    }

    fn get_value(&self, namespace: &str, key: &str) -> Result<String, KeyValueStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| KeyValueStoreError::Backend("poisoned lock".to_owned()))?;
        data.get(&(namespace.to_owned(), key.to_owned()))
            .cloned()
            .ok_or(KeyValueStoreError::NotFound)
    }
}

type FileEntries = BTreeMap<String, BTreeMap<String, String>>;

/// JSON file backed store: `{ "<namespace>": { "<key>": "<value>" } }`.
///
/// Every write rewrites the whole file through a temp file and a rename.
#[derive(Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Arc<RwLock<()>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(RwLock::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<FileEntries, KeyValueStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FileEntries::new());
            }
            Err(err) => {
                return Err(KeyValueStoreError::Unavailable(format!(
                    "failed reading {}: {err}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_str(&raw).map_err(|err| {
            KeyValueStoreError::Backend(format!("failed parsing {}: {err}", self.path.display()))
        })
    }

    fn save(&self, entries: &FileEntries) -> Result<(), KeyValueStoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| {
                KeyValueStoreError::Unavailable(format!(
                    "failed creating store directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let encoded = serde_json::to_vec_pretty(entries)
            .map_err(|err| KeyValueStoreError::Backend(err.to_string()))?;
        let temp_path = temp_path_for(&self.path);
        fs::write(&temp_path, encoded).map_err(|err| {
            KeyValueStoreError::Unavailable(format!(
                "failed writing temp store {}: {err}",
                temp_path.display()
            ))
        })?;

        if let Err(rename_err) = fs::rename(&temp_path, &self.path) {
            // Windows does not allow replacing existing files via rename.
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    let _ = fs::remove_file(&temp_path);
                    return Err(KeyValueStoreError::Backend(format!(
                        "failed replacing {} after rename error ({rename_err}): {err}",
                        self.path.display()
                    )));
                }
            }
            fs::rename(&temp_path, &self.path).map_err(|err| {
                let _ = fs::remove_file(&temp_path);
                KeyValueStoreError::Backend(format!(
                    "failed writing {} after temp write: {err}",
                    self.path.display()
                ))
            })?;
        }

        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn set_value(&self, namespace: &str, key: &str, value: &str) -> Result<(), KeyValueStoreError> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| KeyValueStoreError::Backend("poisoned lock".to_owned()))?;
        let mut entries = self.load()?;
        entries
            .entry(namespace.to_owned())
            .or_default()
            .insert(key.to_owned(), value.to_owned());
        self.save(&entries)
    }

    fn get_value(&self, namespace: &str, key: &str) -> Result<String, KeyValueStoreError> {
        let _guard = self
            .lock
            .read()
            .map_err(|_| KeyValueStoreError::Backend("poisoned lock".to_owned()))?;
        self.load()?
            .get(namespace)
            .and_then(|values| values.get(key))
            .cloned()
            .ok_or(KeyValueStoreError::NotFound)
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("chat-store.json");
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    parent.join(format!(".{file_name}.{now_nanos}.tmp"))
}

/// A store pinned to one namespace.
#[derive(Clone)]
pub struct ScopedKeyValueStore<S: KeyValueStore> {
    inner: S,
    namespace: String,
}

impl<S: KeyValueStore> ScopedKeyValueStore<S> {
    pub fn new(inner: S, namespace: impl Into<String>) -> Self {
        Self {
            inner,
            namespace: namespace.into(),
        }
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), KeyValueStoreError> {
        self.inner.set_value(&self.namespace, key, value)
    }

    pub fn get(&self, key: &str) -> Result<String, KeyValueStoreError> {
        self.inner.get_value(&self.namespace, key)
    }

    /// Like `get`, but a missing key is `Ok(None)`.
    pub fn get_optional(&self, key: &str) -> Result<Option<String>, KeyValueStoreError> {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(KeyValueStoreError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
