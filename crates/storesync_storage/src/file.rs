//! File-based snapshot backend for durable local storage.

use crate::backend::SnapshotBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const EXTENSION: &str = "snap";
const TEMP_EXTENSION: &str = "snap.tmp";

/// A directory-backed snapshot backend.
///
/// Every key is stored in its own file under the backend directory. Values
/// survive process restarts.
///
/// # Durability
///
/// `set` writes to a temporary file, calls `File::sync_all()` and then
/// renames it over the previous value, so a crash never leaves a torn record.
///
/// # Thread Safety
///
/// Writers are serialized by an internal lock; readers go straight to the
/// file system.
///
/// # Example
///
/// ```no_run
/// use storesync_storage::{FileBackend, SnapshotBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("state")).unwrap();
/// backend.set("local/cart", b"snapshot").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Opens a file backend rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the backend directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.{EXTENSION}", encode_key(key))))
    }
}

impl SnapshotBackend for FileBackend {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let temp = path.with_extension(TEMP_EXTENSION);

        let _guard = self.write_lock.lock();
        {
            let mut file = File::create(&temp)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &path)?;
        tracing::trace!(key, bytes = value.len(), "snapshot written");
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(stem) = name.strip_suffix(&format!(".{EXTENSION}")) {
                match decode_key(stem) {
                    Some(key) => keys.push(key),
                    None => tracing::warn!(file = name, "skipping unrecognised snapshot file"),
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Maps a key onto a file-name-safe stem.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `~XX` (hex), so the mapping is reversible.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("~{byte:02x}"));
        }
    }
    out
}

fn decode_key(stem: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(stem.len());
    let mut iter = stem.bytes();
    while let Some(byte) = iter.next() {
        if byte == b'~' {
            let hi = iter.next()?;
            let lo = iter.next()?;
            let hex = std::str::from_utf8(&[hi, lo]).ok()?.to_string();
            bytes.push(u8::from_str_radix(&hex, 16).ok()?);
        } else {
            bytes.push(byte);
        }
    }
    String::from_utf8(bytes).ok()
}
