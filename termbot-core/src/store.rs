// ABOUTME: Single-writer, atomic-rewrite JSON store shared by the registry and user-state stores
// ABOUTME: Readers get a consistent snapshot; writes never leave a torn file on disk

use crate::error::StoreError;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A durable container for a single serde value, rewritten atomically
/// (temp file + rename) on every mutation. Absence of the file is treated
/// as the type's `Default`.
pub struct AtomicJsonStore<T> {
    path: PathBuf,
    state: Mutex<T>,
}

impl<T> AtomicJsonStore<T>
where
    T: Serialize + DeserializeOwned + Default + Clone,
{
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|source| StoreError::Read {
                path: path.display().to_string(),
                source,
            })?;
            serde_json::from_str(&content).map_err(|source| StoreError::Parse {
                path: path.display().to_string(),
                source,
            })?
        } else {
            T::default()
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Read a consistent snapshot without holding the lock past the call.
    pub fn snapshot(&self) -> T {
        self.state.lock().unwrap().clone()
    }

    /// Mutate the in-memory state and persist atomically before returning.
    /// If persistence fails, the in-memory state is rolled back to what was
    /// on disk so callers never observe durable-store drift.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, StoreError> {
        let mut guard = self.state.lock().unwrap();
        let before = guard.clone();
        let result = f(&mut guard);
        if let Err(e) = write_atomic(&self.path, &*guard) {
            *guard = before;
            return Err(e);
        }
        Ok(result)
    }
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value).expect("serde_json::Value never fails here");

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: path.display().to_string(),
                source,
            })?;
        }
    }

    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = if let Some(parent) = parent {
        tempfile::NamedTempFile::new_in(parent)
    } else {
        tempfile::NamedTempFile::new()
    }
    .map_err(|source| StoreError::Write {
        path: path.display().to_string(),
        source,
    })?;

    use std::io::Write;
    tmp.write_all(json.as_bytes())
        .map_err(|source| StoreError::Write {
            path: path.display().to_string(),
            source,
        })?;
    tmp.flush().map_err(|source| StoreError::Write {
        path: path.display().to_string(),
        source,
    })?;

    tmp.persist(path)
        .map_err(|e| StoreError::Write {
            path: path.display().to_string(),
            source: e.error,
        })?;

    Ok(())
}
