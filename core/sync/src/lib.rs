//! Blocksync sync core
//!
//! Keeps a local document store consistent with an optional remote store:
//! - Canonical versioned envelopes, with normalization of older shapes
//! - Whole-document last-write-wins on `updatedAt`, with a guard read before writes
//! - Migration of inline binary payloads to blob storage and hydration on read
//! - Graceful degradation when the remote is unconfigured, signed out, or offline
//! - Optional debounced remote pushes and retry with exponential backoff

pub mod attachment;
pub mod config;
pub mod conflict;
pub mod context;
pub mod engine;
pub mod envelope;
pub mod normalize;
pub mod retry;
pub mod scheduler;
pub mod state;

// Re-export main types
pub use attachment::{hydrate, migrate, AttachmentTarget, Hydration, Migration, RemoteAccess};
pub use config::{RemoteCapability, RemoteConfig, SyncConfig};
pub use conflict::{guard_write, resolve, should_prefer_remote, validate_remote, Resolution, WriteGuard};
pub use context::{Clock, ManualClock, RemoteSession, SyncContext, SyncContextBuilder, SystemClock};
pub use engine::SyncEngine;
pub use envelope::{
    ensure_mode_orders, AttachmentKind, AttachmentRef, Block, BlockSource, DataUrl, Envelope,
    ModeOrders, ENVELOPE_VERSION,
};
pub use normalize::{normalize, RawPayload};
pub use retry::{RetryConfig, RetryExecutor};
pub use scheduler::{FlushJob, FlushScheduler};
pub use state::{LogLevel, RemoteOutcome, SyncLog, SyncLogEntry, MAX_LOG_ENTRIES};
