//! Common utilities and types shared across blocksync crates.
//!
//! This crate provides the error type, remote path handling, the document
//! key codec and the tracing bootstrap used by the storage and sync crates.

pub mod error;
pub mod key;
pub mod logging;
pub mod types;

pub use error::{Error, Result};
pub use key::{decode_key, encode_key, RemoteKey};
pub use logging::init_tracing;
pub use types::{validate_segment, RemotePath, UserRef};
