//! ---
//! mooring_section: "03-persistence-logging"
//! mooring_subsection: "module"
//! mooring_type: "source"
//! mooring_scope: "code"
//! mooring_description: "Persistence abstractions and storage bindings."
//! mooring_version: "v0.0.0-prealpha"
//! mooring_owner: "tbd"
//! ---
//! Directory-backed memento store.
//!
//! Each memento lives at `<root>/<kind subpath>/<escaped id>.<ext>` inside a
//! hashed envelope. Writes go to a temporary file in the same directory and
//! are renamed into place, so a reader sees either the old or the new file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use mooring_common::{PersistenceConfig, StoreFormat};
use mooring_memento::{Kind, Memento};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::store::MementoStore;
use crate::{PersistenceError, Result};

/// Current memento envelope version.
pub const ENVELOPE_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MementoEnvelope {
    version: u16,
    written_at: DateTime<Utc>,
    hash: String,
    memento: Memento,
}

/// Store that keeps one file per memento under a root directory.
#[derive(Debug, Clone)]
pub struct FileMementoStore {
    root: PathBuf,
    format: StoreFormat,
    read_only: bool,
}

impl FileMementoStore {
    /// Open (creating if needed) a writable store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, format: StoreFormat) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            format,
            read_only: false,
        })
    }

    /// Open an existing directory for reading only. The directory need not exist.
    pub fn open_read_only(root: impl Into<PathBuf>, format: StoreFormat) -> Self {
        Self {
            root: root.into(),
            format,
            read_only: true,
        }
    }

    /// Build the store described by the `[persistence]` config block.
    pub fn from_config(config: &PersistenceConfig) -> Result<Self> {
        if config.read_only {
            Ok(Self::open_read_only(&config.directory, config.format))
        } else {
            Self::open(&config.directory, config.format)
        }
    }

    /// Same directory and format, refusing mutation.
    pub fn read_only_view(&self) -> Self {
        Self {
            read_only: true,
            ..self.clone()
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> StoreFormat {
        self.format
    }

    /// Location of the file holding `(kind, id)`.
    pub fn path_for(&self, kind: Kind, id: &str) -> PathBuf {
        self.root
            .join(kind.subpath())
            .join(format!("{}.{}", escape_id(id), self.format.extension()))
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            Err(PersistenceError::ReadOnly(self.describe()))
        } else {
            Ok(())
        }
    }

    fn encode(&self, envelope: &MementoEnvelope) -> Result<Vec<u8>> {
        match self.format {
            StoreFormat::Cbor => serde_cbor::to_vec(envelope).map_err(PersistenceError::from),
            StoreFormat::Json => serde_json::to_vec_pretty(envelope).map_err(PersistenceError::from),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<MementoEnvelope> {
        match self.format {
            StoreFormat::Cbor => serde_cbor::from_slice(bytes).map_err(PersistenceError::from),
            StoreFormat::Json => serde_json::from_slice(bytes).map_err(PersistenceError::from),
        }
    }
}

impl MementoStore for FileMementoStore {
    fn describe(&self) -> String {
        format!("file:{}", self.root.display())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn write(&self, kind: Kind, id: &str, memento: &Memento) -> Result<()> {
        self.ensure_writable()?;
        let path = self.path_for(kind, id);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&dir)?;

        let envelope = MementoEnvelope {
            version: ENVELOPE_VERSION,
            written_at: Utc::now(),
            hash: compute_hash(memento)?,
            memento: memento.clone(),
        };
        let bytes = self.encode(&envelope)?;

        let mut temp = NamedTempFile::new_in(&dir)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|err| PersistenceError::Io(err.error))?;
        trace!(path = %path.display(), bytes = bytes.len(), "memento written");
        Ok(())
    }

    fn delete(&self, kind: Kind, id: &str) -> Result<()> {
        self.ensure_writable()?;
        let path = self.path_for(kind, id);
        match fs::remove_file(&path) {
            Ok(()) => {
                trace!(path = %path.display(), "memento deleted");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn read(&self, kind: Kind, id: &str) -> Result<Option<Memento>> {
        let path = self.path_for(kind, id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let envelope = self.decode(&bytes)?;
        if envelope.version > ENVELOPE_VERSION {
            return Err(PersistenceError::Corrupt {
                kind,
                id: id.to_owned(),
                reason: format!("unsupported envelope version {}", envelope.version),
            });
        }
        if compute_hash(&envelope.memento)? != envelope.hash {
            return Err(PersistenceError::HashMismatch {
                kind,
                id: id.to_owned(),
            });
        }
        Ok(Some(envelope.memento))
    }

    fn list(&self, kind: Kind) -> Result<Vec<String>> {
        let dir = self.root.join(kind.subpath());
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let extension = self.format.extension();
        let mut ids = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|err| {
                PersistenceError::Io(err.into_io_error().unwrap_or_else(|| {
                    io::Error::new(io::ErrorKind::Other, "walkdir loop detected")
                }))
            })?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(extension)
            {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match unescape_id(stem) {
                Some(id) => ids.push(id),
                None => debug!(path = %path.display(), "ignoring file with malformed name"),
            }
        }
        Ok(ids)
    }
}

fn compute_hash(memento: &Memento) -> Result<String> {
    let serialized = serde_json::to_vec(memento)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized);
    Ok(hex::encode(hasher.finalize()))
}

/// Percent-encode everything outside `[A-Za-z0-9_-]` so ids map to safe file names.
fn escape_id(id: &str) -> String {
    let mut escaped = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            escaped.push(byte as char);
        } else {
            escaped.push('%');
            escaped.push_str(&hex::encode_upper([byte]));
        }
    }
    escaped
}

fn unescape_id(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%' {
            let pair = bytes.get(idx + 1..idx + 3)?;
            decoded.extend(hex::decode(pair).ok()?);
            idx += 3;
        } else {
            decoded.push(bytes[idx]);
            idx += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mooring_memento::{EntityMemento, LocationMemento};
    use serde_json::json;
    use tempfile::tempdir;

    fn app() -> Memento {
        EntityMemento::new("app-1", "basic.Application")
            .with_location("loc-1")
            .with_config("replicas", json!(2))
            .into()
    }

    #[test]
    fn json_write_then_read() {
        let dir = tempdir().unwrap();
        let store = FileMementoStore::open(dir.path(), StoreFormat::Json).unwrap();
        store.write(Kind::Entity, "app-1", &app()).unwrap();

        assert!(dir.path().join("entities/app-1.json").exists());
        assert_eq!(store.read(Kind::Entity, "app-1").unwrap(), Some(app()));
        assert_eq!(store.list(Kind::Entity).unwrap(), vec!["app-1".to_owned()]);
    }

    #[test]
    fn cbor_write_then_read() {
        let dir = tempdir().unwrap();
        let store = FileMementoStore::open(dir.path(), StoreFormat::Cbor).unwrap();
        let loc = Memento::from(LocationMemento::new("loc-1", "basic.Location"));
        store.write(Kind::Location, "loc-1", &loc).unwrap();
        assert!(dir.path().join("locations/loc-1.cbor").exists());
        assert_eq!(store.read(Kind::Location, "loc-1").unwrap(), Some(loc));
    }

    #[test]
    fn tampered_file_fails_hash_check() {
        let dir = tempdir().unwrap();
        let store = FileMementoStore::open(dir.path(), StoreFormat::Json).unwrap();
        store.write(Kind::Entity, "app-1", &app()).unwrap();

        let path = store.path_for(Kind::Entity, "app-1");
        let mut envelope: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        envelope["memento"]["config"]["replicas"] = json!(9);
        fs::write(&path, serde_json::to_vec(&envelope).unwrap()).unwrap();

        assert!(matches!(
            store.read(Kind::Entity, "app-1"),
            Err(PersistenceError::HashMismatch { .. })
        ));
    }

    #[test]
    fn ids_with_separators_are_escaped() {
        let dir = tempdir().unwrap();
        let store = FileMementoStore::open(dir.path(), StoreFormat::Json).unwrap();
        let odd = Memento::from(LocationMemento::new("zone/a b.c", "basic.Location"));
        store.write(Kind::Location, "zone/a b.c", &odd).unwrap();

        assert_eq!(escape_id("zone/a b.c"), "zone%2Fa%20b%2Ec");
        assert_eq!(store.list(Kind::Location).unwrap(), vec!["zone/a b.c".to_owned()]);
        assert_eq!(store.read(Kind::Location, "zone/a b.c").unwrap(), Some(odd));
    }

    #[test]
    fn delete_is_idempotent_and_read_only_view_refuses() {
        let dir = tempdir().unwrap();
        let store = FileMementoStore::open(dir.path(), StoreFormat::Json).unwrap();
        store.write(Kind::Entity, "app-1", &app()).unwrap();

        let view = store.read_only_view();
        assert!(matches!(
            view.delete(Kind::Entity, "app-1"),
            Err(PersistenceError::ReadOnly(_))
        ));
        assert!(view.read(Kind::Entity, "app-1").unwrap().is_some());

        store.delete(Kind::Entity, "app-1").unwrap();
        store.delete(Kind::Entity, "app-1").unwrap();
        assert_eq!(store.read(Kind::Entity, "app-1").unwrap(), None);
    }

    #[test]
    fn missing_directories_list_empty() {
        let dir = tempdir().unwrap();
        let store = FileMementoStore::open_read_only(dir.path().join("absent"), StoreFormat::Json);
        assert!(store.list(Kind::Feed).unwrap().is_empty());
    }
}
