//! Storage ports behind the library store.
//!
//! The store never touches disk directly. It reads and writes the whole library
//! document through a [`LibraryPersistence`] and keeps image bytes in an
//! [`ImageStore`]. Production uses [`LmdbPersistence`] and [`FsImageStore`]; tests
//! use the in-memory versions.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lmdb::{Database, DatabaseFlags, Environment, Transaction, WriteFlags};
use log::{debug, info};
use uuid::Uuid;

use crate::app_response::AppResponse;
use crate::library_config::LibraryConfig;

/// Read-all / write-all access to the serialized library document.
pub trait LibraryPersistence: Send {
    /// Returns `Ok(None)` when nothing has been stored yet.
    fn read_all(&self) -> Result<Option<Vec<u8>>, AppResponse>;
    fn write_all(&self, blob: &[u8]) -> Result<(), AppResponse>;
}

/// Backing storage for image bytes, addressed by the URI it hands out.
pub trait ImageStore: Send {
    /// Stores `bytes` under a name derived from `file_name` and returns its URI.
    /// Never overwrites an existing image.
    fn store(&self, file_name: &str, bytes: &[u8]) -> Result<String, AppResponse>;
    fn load(&self, uri: &str) -> Result<Vec<u8>, AppResponse>;
    /// Idempotent: removing a missing image succeeds.
    fn remove(&self, uri: &str) -> Result<(), AppResponse>;
}

/// LMDB environment holding the library document under a single key.
pub struct LmdbPersistence {
    env: Environment,
    db: Database,
    key: String,
}

impl LmdbPersistence {
    pub fn open(path: &Path, key: &str, map_size: usize) -> Result<Self, AppResponse> {
        fs::create_dir_all(path)?;

        let env = Environment::new()
            .set_max_dbs(1)
            .set_map_size(map_size)
            .open(path)?;
        let db = env.create_db(Some("library"), DatabaseFlags::empty())?;

        info!("LMDB library opened at {}", path.display());
        Ok(Self {
            env,
            db,
            key: key.to_string(),
        })
    }

    pub fn from_config(config: &LibraryConfig) -> Result<Self, AppResponse> {
        Self::open(&config.lmdb_dir(), &config.storage_key, config.map_size)
    }
}

impl LibraryPersistence for LmdbPersistence {
    fn read_all(&self) -> Result<Option<Vec<u8>>, AppResponse> {
        let txn = self.env.begin_ro_txn()?;
        let blob = match txn.get(self.db, &self.key) {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(lmdb::Error::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        txn.commit()?;
        Ok(blob)
    }

    fn write_all(&self, blob: &[u8]) -> Result<(), AppResponse> {
        let mut txn = self.env.begin_rw_txn()?;
        txn.put(self.db, &self.key, &blob, WriteFlags::empty())?;
        txn.commit()?;
        debug!("Library document written ({} bytes)", blob.len());
        Ok(())
    }
}

/// In-memory persistence for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryPersistence {
    blob: Mutex<Option<Vec<u8>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with a pre-existing document, e.g. to exercise load failures.
    pub fn with_blob(blob: impl Into<Vec<u8>>) -> Self {
        Self {
            blob: Mutex::new(Some(blob.into())),
        }
    }

    pub fn snapshot(&self) -> Option<Vec<u8>> {
        self.blob.lock().ok().and_then(|guard| guard.clone())
    }
}

impl LibraryPersistence for MemoryPersistence {
    fn read_all(&self) -> Result<Option<Vec<u8>>, AppResponse> {
        let guard = self
            .blob
            .lock()
            .map_err(|_| AppResponse::DatabaseError("Memory store poisoned".to_string()))?;
        Ok(guard.clone())
    }

    fn write_all(&self, blob: &[u8]) -> Result<(), AppResponse> {
        let mut guard = self
            .blob
            .lock()
            .map_err(|_| AppResponse::DatabaseError("Memory store poisoned".to_string()))?;
        *guard = Some(blob.to_vec());
        Ok(())
    }
}

/// Images kept as files in one directory. URIs are the file paths.
pub struct FsImageStore {
    dir: PathBuf,
}

impl FsImageStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AppResponse> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl ImageStore for FsImageStore {
    fn store(&self, file_name: &str, bytes: &[u8]) -> Result<String, AppResponse> {
        let file_name = sanitize_file_name(file_name);
        let mut target = self.dir.join(&file_name);
        if target.exists() {
            target = self.dir.join(format!("{}_{}", Uuid::new_v4().simple(), file_name));
        }
        fs::write(&target, bytes)?;
        Ok(target.to_string_lossy().into_owned())
    }

    fn load(&self, uri: &str) -> Result<Vec<u8>, AppResponse> {
        Ok(fs::read(uri)?)
    }

    fn remove(&self, uri: &str) -> Result<(), AppResponse> {
        match fs::remove_file(uri) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Images kept in a map, with `memory://` URIs.
#[derive(Default)]
pub struct MemoryImageStore {
    images: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.images.lock().map(|images| images.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ImageStore for MemoryImageStore {
    fn store(&self, file_name: &str, bytes: &[u8]) -> Result<String, AppResponse> {
        let mut images = self
            .images
            .lock()
            .map_err(|_| AppResponse::IoError("Image store poisoned".to_string()))?;
        let file_name = sanitize_file_name(file_name);
        let mut uri = format!("memory://{file_name}");
        if images.contains_key(&uri) {
            uri = format!("memory://{}_{}", Uuid::new_v4().simple(), file_name);
        }
        images.insert(uri.clone(), bytes.to_vec());
        Ok(uri)
    }

    fn load(&self, uri: &str) -> Result<Vec<u8>, AppResponse> {
        let images = self
            .images
            .lock()
            .map_err(|_| AppResponse::IoError("Image store poisoned".to_string()))?;
        images
            .get(uri)
            .cloned()
            .ok_or_else(|| AppResponse::NotFound(format!("No image stored at {uri}")))
    }

    fn remove(&self, uri: &str) -> Result<(), AppResponse> {
        let mut images = self
            .images
            .lock()
            .map_err(|_| AppResponse::IoError("Image store poisoned".to_string()))?;
        images.remove(uri);
        Ok(())
    }
}

/// Keeps only the last path segment and strips characters that are unsafe in file names.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        format!("img_{}", Uuid::new_v4().simple())
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lmdb_round_trip_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.lmdb");
        {
            let store = LmdbPersistence::open(&path, "k", 1024 * 1024).unwrap();
            assert_eq!(store.read_all().unwrap(), None);
            store.write_all(b"[1,2,3]").unwrap();
            assert_eq!(store.read_all().unwrap().as_deref(), Some(&b"[1,2,3]"[..]));
        }
        let reopened = LmdbPersistence::open(&path, "k", 1024 * 1024).unwrap();
        assert_eq!(reopened.read_all().unwrap().as_deref(), Some(&b"[1,2,3]"[..]));

        reopened.write_all(b"[]").unwrap();
        assert_eq!(reopened.read_all().unwrap().as_deref(), Some(&b"[]"[..]));
    }

    #[test]
    fn test_fs_image_store_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::open(dir.path().join("images")).unwrap();

        let first = store.store("/picker/tmp/wall.jpg", b"one").unwrap();
        let second = store.store("wall.jpg", b"two").unwrap();

        assert_ne!(first, second);
        assert!(first.ends_with("wall.jpg"));
        assert_eq!(store.load(&first).unwrap(), b"one");
        assert_eq!(store.load(&second).unwrap(), b"two");

        store.remove(&first).unwrap();
        store.remove(&first).unwrap();
        assert!(store.load(&first).is_err());
    }

    #[test]
    fn test_memory_image_store() {
        let store = MemoryImageStore::new();
        let uri = store.store("a.png", b"png").unwrap();
        assert_eq!(uri, "memory://a.png");
        assert_eq!(store.len(), 1);
        assert!(matches!(store.load("memory://missing"), Err(AppResponse::NotFound(_))));
        store.remove(&uri).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("content://a/b/c.jpg"), "c.jpg");
        assert_eq!(sanitize_file_name("C:\\pics\\x.png"), "x.png");
        assert!(sanitize_file_name("dir/").starts_with("img_"));
        assert!(sanitize_file_name("..").starts_with("img_"));
    }
}
