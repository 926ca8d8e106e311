//! Storage capability traits consumed by the sync core.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use blocksync_common::{RemotePath, Result};

/// Key under which a remote store recognises the server timestamp marker.
pub const SERVER_VALUE_KEY: &str = ".sv";

/// Local persistent key-value store holding one document per name.
///
/// Values are raw JSON so older document shapes can still be read back and
/// normalized by the caller.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Get the store name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Read the value stored under `name`.
    ///
    /// # Returns
    /// `None` when nothing was ever stored under `name`.
    async fn get(&self, name: &str) -> Result<Option<Value>>;

    /// Store `value` under `name`, replacing any previous value.
    ///
    /// # Postconditions
    /// - The value is durable once this returns `Ok`
    async fn put(&self, name: &str, value: Value) -> Result<()>;

    /// Remove the value stored under `name`. Removing a missing name is not an error.
    async fn delete(&self, name: &str) -> Result<()>;

    /// List every stored name.
    async fn list_keys(&self) -> Result<Vec<String>>;
}

/// Path-addressed hierarchical remote document store.
///
/// Implementations must handle their own authentication and transport.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Get the store name.
    fn name(&self) -> &str;

    /// Read the value at `path`.
    ///
    /// # Returns
    /// `None` if nothing is stored at `path`.
    ///
    /// # Errors
    /// - Network errors
    /// - Permission denied
    async fn read(&self, path: &RemotePath) -> Result<Option<Value>>;

    /// Replace the value at `path`.
    ///
    /// Any server timestamp marker inside `value` is replaced by the store's
    /// clock at write time.
    async fn write(&self, path: &RemotePath, value: Value) -> Result<()>;

    /// Merge the given fields into the object at `path`, creating it if needed.
    async fn update(&self, path: &RemotePath, fields: Map<String, Value>) -> Result<()>;

    /// Remove the value at `path`. Removing a missing path is not an error.
    async fn remove(&self, path: &RemotePath) -> Result<()>;

    /// Marker value the store resolves to its own time when written.
    fn server_timestamp(&self) -> Value {
        let mut marker = Map::new();
        marker.insert(SERVER_VALUE_KEY.to_string(), json!("timestamp"));
        Value::Object(marker)
    }
}

/// Binary blob storage for attachments.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get the store name.
    fn name(&self) -> &str;

    /// Upload `data` to `path`, replacing any previous blob.
    async fn upload(&self, path: &RemotePath, data: Vec<u8>, content_type: &str) -> Result<()>;

    /// Resolve `path` to a fetchable, possibly time-limited URL.
    ///
    /// # Errors
    /// - Blob not found
    /// - Permission denied
    /// - Network errors
    async fn download_url(&self, path: &RemotePath) -> Result<String>;
}

/// Check whether `value` is the server timestamp marker.
pub fn is_server_timestamp(value: &Value) -> bool {
    value
        .as_object()
        .map(|obj| obj.len() == 1 && obj.get(SERVER_VALUE_KEY) == Some(&json!("timestamp")))
        .unwrap_or(false)
}
