//! Storage client abstraction over the remote data store.
//!
//! Paths are logical collection paths (`/zone/home/...`). The [`StorageClient`]
//! trait is the boundary the cycle driver and the validator talk to;
//! [`LocalStorage`] implements it over a directory tree that mirrors the data
//! store, such as a FUSE or WebDAV mount.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::core::types::ObjectRef;

/// Hidden per-collection file holding attribute/value metadata.
pub const METADATA_FILE: &str = ".verssa-metadata.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("permission denied on {path}")]
    PermissionDenied { path: String },
    #[error("no such object or collection: {path}")]
    NotFound { path: String },
    #[error("{path} already exists")]
    AlreadyExists { path: String },
    #[error("storage operation on {path} failed: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    pub fn from_io(path: &str, source: io::Error) -> Self {
        let path = path.to_string();
        match source.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            io::ErrorKind::NotFound => Self::NotFound { path },
            io::ErrorKind::AlreadyExists => Self::AlreadyExists { path },
            _ => Self::Io { path, source },
        }
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Operations the agent needs from the data store.
pub trait StorageClient {
    /// Data objects directly inside `collection`, ordered by name.
    fn list_objects(&self, collection: &str) -> StorageResult<Vec<ObjectRef>>;
    /// Sub-collection paths directly inside `collection`, ordered by name.
    fn list_collections(&self, collection: &str) -> StorageResult<Vec<String>>;
    fn exists(&self, path: &str) -> StorageResult<bool>;
    /// Move the object at `path` into `dest_collection`, keeping its name.
    fn move_object(&self, path: &str, dest_collection: &str) -> StorageResult<()>;
    fn create_object(&self, path: &str, contents: &[u8]) -> StorageResult<()>;
    fn open_object(&self, path: &str) -> StorageResult<Box<dyn Read>>;
    /// All values recorded for attribute `key` on the object at `path`.
    fn metadata(&self, path: &str, key: &str) -> StorageResult<Vec<String>>;
    fn add_metadata(&self, path: &str, key: &str, value: &str) -> StorageResult<()>;
}

/// Split a logical path into `(collection, name)`.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((collection, name)) => (collection, name),
        None => ("", path),
    }
}

pub fn join_path(collection: &str, name: &str) -> String {
    format!("{}/{}", collection.trim_end_matches('/'), name)
}

type CollectionMetadata = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// [`StorageClient`] over a local directory mirroring the data store.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(StorageError::PermissionDenied {
                path: path.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn read_metadata(&self, collection: &str) -> StorageResult<CollectionMetadata> {
        let file = self.resolve(collection)?.join(METADATA_FILE);
        match fs::read_to_string(&file) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|err| StorageError::Io {
                path: collection.to_string(),
                source: io::Error::new(io::ErrorKind::InvalidData, err),
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(CollectionMetadata::new()),
            Err(err) => Err(StorageError::from_io(collection, err)),
        }
    }

    fn write_metadata(&self, collection: &str, metadata: &CollectionMetadata) -> StorageResult<()> {
        let dir = self.resolve(collection)?;
        let file = dir.join(METADATA_FILE);
        let mut buf = serde_json::to_string_pretty(metadata).map_err(|err| StorageError::Io {
            path: collection.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidData, err),
        })?;
        buf.push('\n');
        let tmp = dir.join(format!("{METADATA_FILE}.tmp"));
        fs::write(&tmp, buf).map_err(|err| StorageError::from_io(collection, err))?;
        fs::rename(&tmp, &file).map_err(|err| StorageError::from_io(collection, err))
    }

    fn list_entries(&self, collection: &str, want_dirs: bool) -> StorageResult<Vec<String>> {
        let dir = self.resolve(collection)?;
        let entries = fs::read_dir(&dir).map_err(|err| StorageError::from_io(collection, err))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| StorageError::from_io(collection, err))?;
            let file_type = entry
                .file_type()
                .map_err(|err| StorageError::from_io(collection, err))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(METADATA_FILE) {
                continue;
            }
            if file_type.is_dir() == want_dirs {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

impl StorageClient for LocalStorage {
    fn list_objects(&self, collection: &str) -> StorageResult<Vec<ObjectRef>> {
        Ok(self
            .list_entries(collection, false)?
            .into_iter()
            .map(|name| ObjectRef::from_path(join_path(collection, &name)))
            .collect())
    }

    fn list_collections(&self, collection: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .list_entries(collection, true)?
            .into_iter()
            .map(|name| join_path(collection, &name))
            .collect())
    }

    fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.resolve(path)?.exists())
    }

    fn move_object(&self, path: &str, dest_collection: &str) -> StorageResult<()> {
        let (source_collection, name) = split_path(path);
        let source = self.resolve(path)?;
        if !source.is_file() {
            return Err(StorageError::NotFound {
                path: path.to_string(),
            });
        }
        let dest_dir = self.resolve(dest_collection)?;
        if !dest_dir.is_dir() {
            return Err(StorageError::NotFound {
                path: dest_collection.to_string(),
            });
        }
        let dest = dest_dir.join(name);
        let dest_path = join_path(dest_collection, name);
        if dest.exists() {
            return Err(StorageError::AlreadyExists { path: dest_path });
        }
        fs::rename(&source, &dest).map_err(|err| StorageError::from_io(path, err))?;
        debug!(from = path, to = %dest_path, "moved object");

        // Metadata follows the object; a failure here must not undo the move.
        let mut source_meta = self.read_metadata(source_collection)?;
        if let Some(attributes) = source_meta.remove(name) {
            let mut dest_meta = self.read_metadata(dest_collection)?;
            dest_meta.insert(name.to_string(), attributes);
            self.write_metadata(dest_collection, &dest_meta)?;
            self.write_metadata(source_collection, &source_meta)?;
        }
        Ok(())
    }

    fn create_object(&self, path: &str, contents: &[u8]) -> StorageResult<()> {
        let (collection, _) = split_path(path);
        if !self.resolve(collection)?.is_dir() {
            return Err(StorageError::NotFound {
                path: collection.to_string(),
            });
        }
        fs::write(self.resolve(path)?, contents).map_err(|err| StorageError::from_io(path, err))
    }

    fn open_object(&self, path: &str) -> StorageResult<Box<dyn Read>> {
        let file = fs::File::open(self.resolve(path)?)
            .map_err(|err| StorageError::from_io(path, err))?;
        Ok(Box::new(io::BufReader::new(file)))
    }

    fn metadata(&self, path: &str, key: &str) -> StorageResult<Vec<String>> {
        let (collection, name) = split_path(path);
        let metadata = self.read_metadata(collection)?;
        Ok(metadata
            .get(name)
            .and_then(|attributes| attributes.get(key))
            .cloned()
            .unwrap_or_default())
    }

    fn add_metadata(&self, path: &str, key: &str, value: &str) -> StorageResult<()> {
        if !self.exists(path)? {
            return Err(StorageError::NotFound {
                path: path.to_string(),
            });
        }
        let (collection, name) = split_path(path);
        let mut metadata = self.read_metadata(collection)?;
        metadata
            .entry(name.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        self.write_metadata(collection, &metadata)
    }
}
