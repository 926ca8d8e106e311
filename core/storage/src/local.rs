//! File-backed local document store.

use async_trait::async_trait;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use crate::provider::LocalStore;
use blocksync_common::{decode_key, encode_key, Error, Result};

const DOCUMENT_EXTENSION: &str = "json";

/// Longest encoded key used directly as a file stem.
///
/// Keeps `<key>.json` well under the 255-byte file name limit of common
/// file systems.
pub const MAX_KEY_STEM: usize = 200;

/// Stem prefix of documents whose key is too long for a file name.
const HASHED_PREFIX: &str = "h";

/// Local store keeping one JSON file per document.
///
/// Documents live in `<root>/<collection>/<key>.json` where `<key>` is the
/// encoded document name, so arbitrary names are safe as file names. Names
/// whose key exceeds [`MAX_KEY_STEM`] are stored as `h<blake2b>.json`
/// holding `{"name": ..., "document": ...}` so the name can be listed.
pub struct FileLocalStore {
    dir: PathBuf,
}

impl FileLocalStore {
    /// Open (or create) the named collection under `root`.
    ///
    /// # Errors
    /// - Invalid collection name
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>, collection: &str) -> Result<Self> {
        blocksync_common::validate_segment(collection)?;
        let dir = root.as_ref().join(collection);

        // Sync for constructor
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }

        Ok(Self { dir })
    }

    /// Directory holding the collection's documents.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_file(&self, name: &str) -> DocumentFile {
        let key = encode_key(name);
        if key.as_str().len() <= MAX_KEY_STEM {
            return DocumentFile::Keyed(self.dir.join(format!("{}.{}", key, DOCUMENT_EXTENSION)));
        }

        let digest = Blake2b::<U32>::digest(name.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        DocumentFile::Hashed(
            self.dir
                .join(format!("{}{}.{}", HASHED_PREFIX, hex, DOCUMENT_EXTENSION)),
        )
    }
}

enum DocumentFile {
    Keyed(PathBuf),
    /// Wrapped as `{"name", "document"}`.
    Hashed(PathBuf),
}

impl DocumentFile {
    fn path(&self) -> &Path {
        match self {
            DocumentFile::Keyed(path) | DocumentFile::Hashed(path) => path,
        }
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Name stored inside a hashed document file.
fn wrapped_name(wrapper: &Value) -> Option<&str> {
    wrapper.get("name").and_then(Value::as_str)
}

#[async_trait]
impl LocalStore for FileLocalStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, name: &str) -> Result<Option<Value>> {
        let file = self.document_file(name);
        let Some(bytes) = read_optional(file.path()).await? else {
            return Ok(None);
        };
        let value: Value = serde_json::from_slice(&bytes)?;

        match file {
            DocumentFile::Keyed(_) => Ok(Some(value)),
            DocumentFile::Hashed(path) => {
                if wrapped_name(&value) != Some(name) {
                    warn!("Stored name in {} does not match, treating as absent", path.display());
                    return Ok(None);
                }
                Ok(value.get("document").cloned())
            }
        }
    }

    async fn put(&self, name: &str, value: Value) -> Result<()> {
        let file = self.document_file(name);
        let data = match &file {
            DocumentFile::Keyed(_) => serde_json::to_vec(&value)?,
            DocumentFile::Hashed(_) => serde_json::to_vec(&json!({"name": name, "document": value}))?,
        };
        let path = file.path();

        // Write then rename so readers never see a torn document
        let tmp = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, &data).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::Io(e));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.document_file(name).path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            if stem.starts_with(HASHED_PREFIX) {
                let wrapper = read_optional(&path)
                    .await?
                    .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok());
                match wrapper.as_ref().and_then(wrapped_name) {
                    Some(name) => names.push(name.to_string()),
                    None => warn!("Ignoring unreadable document file {}", path.display()),
                }
                continue;
            }

            match decode_key(stem) {
                Ok(name) => names.push(name),
                Err(e) => warn!("Ignoring unexpected file {}: {}", path.display(), e),
            }
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_put_get() {
        let temp = TempDir::new().unwrap();
        let store = FileLocalStore::new(temp.path(), "blocks").unwrap();

        store.put("a/b: ünïcode", json!({"blocks": [1]})).await.unwrap();
        let value = store.get("a/b: ünïcode").await.unwrap();

        assert_eq!(value, Some(json!({"blocks": [1]})));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_list_and_delete() {
        let temp = TempDir::new().unwrap();
        let store = FileLocalStore::new(temp.path(), "blocks").unwrap();

        store.put("beta", json!([])).await.unwrap();
        store.put("alpha", json!([])).await.unwrap();
        std::fs::write(store.dir().join("notes.txt"), b"ignored").unwrap();

        assert_eq!(store.list_keys().await.unwrap(), vec!["alpha", "beta"]);

        store.delete("alpha").await.unwrap();
        store.delete("alpha").await.unwrap();
        assert_eq!(store.list_keys().await.unwrap(), vec!["beta"]);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let store = FileLocalStore::new(temp.path(), "blocks").unwrap();
            store.put("Notes", json!({"updatedAt": 5})).await.unwrap();
        }
        let store = FileLocalStore::new(temp.path(), "blocks").unwrap();
        assert_eq!(store.get("Notes").await.unwrap(), Some(json!({"updatedAt": 5})));
    }

    #[tokio::test]
    async fn test_long_names_use_hashed_files() {
        let temp = TempDir::new().unwrap();
        let store = FileLocalStore::new(temp.path(), "blocks").unwrap();
        let long = "ü".repeat(150);
        let other = "x".repeat(400);

        store.put(&long, json!({"updatedAt": 1})).await.unwrap();
        store.put(&other, json!({"updatedAt": 2})).await.unwrap();
        store.put("short", json!({"updatedAt": 3})).await.unwrap();

        assert_eq!(store.get(&long).await.unwrap(), Some(json!({"updatedAt": 1})));
        assert_eq!(store.get(&other).await.unwrap(), Some(json!({"updatedAt": 2})));

        let mut expected = vec![long.clone(), other.clone(), "short".to_string()];
        expected.sort();
        assert_eq!(store.list_keys().await.unwrap(), expected);

        for entry in std::fs::read_dir(store.dir()).unwrap() {
            assert!(entry.unwrap().file_name().len() <= 255);
        }

        store.delete(&long).await.unwrap();
        assert!(store.get(&long).await.unwrap().is_none());
        assert_eq!(store.list_keys().await.unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_collection_name() {
        let temp = TempDir::new().unwrap();
        assert!(FileLocalStore::new(temp.path(), "a/b").is_err());
    }
}
