//! Storage capabilities consumed by the blocksync sync core.
//!
//! The sync core talks to four collaborators through traits defined here:
//! a local document store, a hierarchical remote document store, a blob
//! store for attachments, and an auth provider. In-memory implementations of
//! each are provided for tests and for embedders without a backend, plus a
//! file-backed local store.
//!
//! # Design Principles
//! - Backend isolation: no backend-specific logic in the sync crate
//! - Async operations: all I/O is async
//! - Unified error semantics: every capability returns the common `Error`

pub mod auth;
pub mod local;
pub mod memory;
pub mod provider;

pub use auth::{AuthCallback, AuthProvider, MemoryAuth, Subscription};
pub use local::FileLocalStore;
pub use memory::{MemoryBlobStore, MemoryLocalStore, MemoryRemoteStore, StoredBlob};
pub use provider::{is_server_timestamp, BlobStore, LocalStore, RemoteStore, SERVER_VALUE_KEY};
