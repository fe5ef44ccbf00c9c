//! Key-value storage for small pieces of client state.
//!
//! The rate limiter keeps its last-submit timestamp here. In the browser this
//! was local storage; here it is any [`KeyValueStore`]: an in-memory map, a
//! JSON file on disk, or a per-client view over either.

use std::collections::HashMap;
use std::fs::{self, File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// String values addressed by string keys
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove every entry for which `keep(key, value)` is false.
    ///
    /// # Returns
    /// The number of removed entries
    fn retain(&self, keep: &mut dyn FnMut(&str, &str) -> bool) -> Result<usize, StoreError>;

    /// Write pending changes to durable storage. Stores without one do nothing.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn retain(&self, keep: &mut dyn FnMut(&str, &str) -> bool) -> Result<usize, StoreError> {
        (**self).retain(keep)
    }

    fn flush(&self) -> Result<(), StoreError> {
        (**self).flush()
    }
}

fn retain_entries(
    entries: &mut HashMap<String, String>,
    keep: &mut dyn FnMut(&str, &str) -> bool,
) -> usize {
    let before = entries.len();
    entries.retain(|key, value| keep(key.as_str(), value.as_str()));
    before - entries.len()
}

/// Process-local store, lost on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn retain(&self, keep: &mut dyn FnMut(&str, &str) -> bool) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        Ok(retain_entries(&mut entries, keep))
    }
}

/// Store persisted as a single JSON object on disk
///
/// Reads and writes only touch the in-memory map. Changes reach the file on
/// [`KeyValueStore::flush`] and when the store is dropped. The file is
/// replaced atomically, so a crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
    dirty: AtomicBool,
    /// Held while writing so an older snapshot never replaces a newer one
    writer: Mutex<()>,
}

impl FileStore {
    /// Open the store at `path`, creating the file and its parent directory if needed.
    ///
    /// # Errors
    /// * Returns an error if the file cannot be created or read
    /// * Returns an error if the file does not contain a JSON object of strings
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                create_dir_all(parent)?;
            }
        }

        if !path.exists() {
            let mut file = File::create(&path)?;
            file.write_all(b"{}")?;
        }

        let contents = fs::read_to_string(&path)?;
        let entries: HashMap<String, String> = serde_json::from_str(&contents)?;
        debug!(path = %path.display(), keys = entries.len(), "Opened file store");

        Ok(Self {
            path,
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
            writer: Mutex::new(()),
        })
    }

    fn persist(&self) -> Result<(), StoreError> {
        let _writer = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let json = {
            let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
            serde_json::to_string_pretty(&*entries)?
        };

        let result = self.write_atomically(json.as_bytes());
        if result.is_err() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        result
    }

    fn write_atomically(&self, contents: &[u8]) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(contents)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn retain(&self, keep: &mut dyn FnMut(&str, &str) -> bool) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        let removed = retain_entries(&mut entries, keep);
        if removed > 0 {
            self.dirty.store(true, Ordering::SeqCst);
        }
        Ok(removed)
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.persist()
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if let Err(e) = self.persist() {
            warn!(path = %self.path.display(), "Could not write store on drop: {e}");
        }
    }
}

/// View of a store in which every key is prefixed with a scope,
/// giving each client its own namespace.
pub struct ScopedStore<S> {
    inner: S,
    scope: String,
}

impl<S: KeyValueStore> ScopedStore<S> {
    /// Wrap `inner` so that every key is stored as `{scope}:{key}`.
    pub fn new(inner: S, scope: impl Into<String>) -> Self {
        Self {
            inner,
            scope: scope.into(),
        }
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}:{}", self.scope, key)
    }
}

impl<S: KeyValueStore> KeyValueStore for ScopedStore<S> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(&self.scoped(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(&self.scoped(key), value)
    }

    /// Only entries inside this scope are offered to `keep`, with the prefix removed.
    fn retain(&self, keep: &mut dyn FnMut(&str, &str) -> bool) -> Result<usize, StoreError> {
        let prefix = self.scoped("");
        self.inner.retain(&mut |key: &str, value: &str| match key.strip_prefix(&prefix) {
            Some(own) => keep(own, value),
            None => true,
        })
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.inner.flush()
    }
}
