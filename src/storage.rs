//! Namespaced blob storage for command history and archived frames.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
    #[error("storage I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Namespace + key → bytes. Keys may contain `/` to form a hierarchy.
pub trait BlobStore: Send + Sync {
    fn put(&self, namespace: &str, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Keys in `namespace` starting with `prefix`, sorted.
    fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<String>, StoreError>;
}

fn check_key(key: &str) -> Result<(), StoreError> {
    let path = Path::new(key);
    let clean = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if clean {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// One file per blob under `root/<namespace>/<key>`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, namespace: &str, key: &str) -> Result<PathBuf, StoreError> {
        check_key(namespace)?;
        check_key(key)?;
        Ok(self.root.join(namespace).join(key))
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io { path: path.to_path_buf(), source }
}

fn walk(dir: &Path, base: &Path, keys: &mut Vec<String>) -> Result<(), StoreError> {
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let entry = entry.map_err(io_error(dir))?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, base, keys)?;
        } else if let Ok(relative) = path.strip_prefix(base) {
            let key: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            keys.push(key.join("/"));
        }
    }
    Ok(())
}

impl BlobStore for FsBlobStore {
    fn put(&self, namespace: &str, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path(namespace, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        fs::write(&path, bytes).map_err(io_error(&path))?;
        debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path(namespace, key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        check_key(namespace)?;
        let base = self.root.join(namespace);
        if !base.is_dir() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        walk(&base, &base, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, namespace: &str, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        check_key(namespace)?;
        check_key(key)?;
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((namespace.to_string(), key.to_string()), bytes.to_vec());
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|(ns, key)| ns == namespace && key.starts_with(prefix))
            .map(|(_, key)| key.clone())
            .collect())
    }
}
