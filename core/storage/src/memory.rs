//! In-memory capability implementations for testing.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::provider::{is_server_timestamp, BlobStore, LocalStore, RemoteStore};
use blocksync_common::{Error, RemotePath, Result};

/// In-memory local store.
///
/// All data is stored in memory and lost on drop. [`MemoryLocalStore::set_failing`]
/// makes every call fail, which simulates a broken browser database.
pub struct MemoryLocalStore {
    entries: Arc<RwLock<BTreeMap<String, Value>>>,
    failing: AtomicBool,
}

impl MemoryLocalStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Storage("Local store unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, name: &str) -> Result<Option<Value>> {
        self.check()?;
        Ok(self.entries.read().unwrap().get(name).cloned())
    }

    async fn put(&self, name: &str, value: Value) -> Result<()> {
        self.check()?;
        self.entries.write().unwrap().insert(name.to_string(), value);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.check()?;
        self.entries.write().unwrap().remove(name);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        self.check()?;
        Ok(self.entries.read().unwrap().keys().cloned().collect())
    }
}

/// In-memory hierarchical remote store.
///
/// Values live in a single JSON tree addressed by [`RemotePath`]. Server
/// timestamp markers are resolved to the wall clock on write, and empty
/// objects are pruned the way hierarchical backends do.
pub struct MemoryRemoteStore {
    tree: Arc<RwLock<Value>>,
    offline: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryRemoteStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            tree: Arc::new(RwLock::new(Value::Object(Map::new()))),
            offline: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    /// Simulate losing (or regaining) connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of successful `write` and `update` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network("Remote store unreachable".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk to the node at `components`, creating objects along the way.
fn slot_mut<'a>(root: &'a mut Value, components: &[String]) -> &'a mut Value {
    let mut node = root;
    for comp in components {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            unreachable!("node was just made an object");
        };
        node = map.entry(comp.clone()).or_insert(Value::Null);
    }
    node
}

fn remove_at(node: &mut Value, components: &[String]) {
    let Some((first, rest)) = components.split_first() else {
        return;
    };
    let Value::Object(map) = node else {
        return;
    };

    if rest.is_empty() {
        map.remove(first);
    } else if let Some(child) = map.get_mut(first) {
        remove_at(child, rest);
        if is_empty_node(child) {
            map.remove(first);
        }
    }
}

fn is_empty_node(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn resolve_server_values(value: &mut Value, now: i64) {
    if is_server_timestamp(value) {
        *value = Value::from(now);
        return;
    }
    match value {
        Value::Object(map) => map.values_mut().for_each(|v| resolve_server_values(v, now)),
        Value::Array(items) => items.iter_mut().for_each(|v| resolve_server_values(v, now)),
        _ => {}
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read(&self, path: &RemotePath) -> Result<Option<Value>> {
        self.check()?;
        let tree = self.tree.read().unwrap();

        let mut node = &*tree;
        for comp in path.components() {
            match node.get(comp) {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }

        if is_empty_node(node) {
            Ok(None)
        } else {
            Ok(Some(node.clone()))
        }
    }

    async fn write(&self, path: &RemotePath, mut value: Value) -> Result<()> {
        self.check()?;
        if is_empty_node(&value) {
            return self.remove(path).await;
        }
        resolve_server_values(&mut value, Utc::now().timestamp_millis());

        let mut tree = self.tree.write().unwrap();
        *slot_mut(&mut tree, path.components()) = value;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, path: &RemotePath, fields: Map<String, Value>) -> Result<()> {
        self.check()?;
        let now = Utc::now().timestamp_millis();

        let mut tree = self.tree.write().unwrap();
        let slot = slot_mut(&mut tree, path.components());
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(target) = slot {
            for (field, mut value) in fields {
                if value.is_null() {
                    target.remove(&field);
                } else {
                    resolve_server_values(&mut value, now);
                    target.insert(field, value);
                }
            }
        }
        if is_empty_node(slot) {
            remove_at(&mut tree, path.components());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, path: &RemotePath) -> Result<()> {
        self.check()?;
        let mut tree = self.tree.write().unwrap();
        if path.is_root() {
            *tree = Value::Object(Map::new());
        } else {
            remove_at(&mut tree, path.components());
        }
        Ok(())
    }
}

/// Stored blob with its content type.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// In-memory blob store handing out `memory://` URLs.
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, StoredBlob>>>,
    offline: AtomicBool,
    fail_uploads: AtomicBool,
}

impl MemoryBlobStore {
    /// Create a new empty blob store.
    pub fn new() -> Self {
        Self {
            blobs: Arc::new(RwLock::new(HashMap::new())),
            offline: AtomicBool::new(false),
            fail_uploads: AtomicBool::new(false),
        }
    }

    /// Simulate losing (or regaining) connectivity for every call.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Reject uploads while still resolving existing blobs.
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Fetch a stored blob.
    pub fn get(&self, path: &RemotePath) -> Option<StoredBlob> {
        self.blobs.read().unwrap().get(&path.to_string()).cloned()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().unwrap().len()
    }

    /// Whether no blob is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network("Blob store unreachable".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upload(&self, path: &RemotePath, data: Vec<u8>, content_type: &str) -> Result<()> {
        self.check()?;
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(Error::NotPermitted(format!("Upload rejected: {}", path)));
        }

        let blob = StoredBlob {
            data,
            content_type: content_type.to_string(),
        };
        self.blobs.write().unwrap().insert(path.to_string(), blob);
        Ok(())
    }

    async fn download_url(&self, path: &RemotePath) -> Result<String> {
        self.check()?;
        if !self.blobs.read().unwrap().contains_key(&path.to_string()) {
            return Err(Error::NotFound(format!("Blob not found: {}", path)));
        }
        Ok(format!("memory://{}?token={}", path, Uuid::new_v4()))
    }
}
