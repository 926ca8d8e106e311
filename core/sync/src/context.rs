//! Explicit sync session state.
//!
//! A [`SyncContext`] bundles the configured capabilities with the little
//! state sync needs between calls: the last observed auth session, the
//! name to key table filled by `list`, the sync log, and the timestamp
//! high-water mark. It is built once by the embedding application and shared
//! by every engine call.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use blocksync_common::{encode_key, RemoteKey, RemotePath, Result, UserRef};
use blocksync_storage::{AuthProvider, BlobStore, LocalStore, RemoteStore, Subscription};

use crate::config::{RemoteCapability, SyncConfig};
use crate::retry::RetryExecutor;
use crate::state::{RemoteOutcome, SyncLog};

/// Source of epoch-millisecond wall-clock time.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
enum SessionState {
    /// No auth event received yet.
    Unobserved,
    Observed(Option<UserRef>),
}

/// Remote location of the signed-in user's documents.
#[derive(Clone)]
pub struct RemoteSession {
    user: UserRef,
    store: Arc<dyn RemoteStore>,
    root: RemotePath,
}

impl RemoteSession {
    pub fn user(&self) -> &UserRef {
        &self.user
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// `sync/<namespace>/users/<uid>`.
    pub fn root(&self) -> &RemotePath {
        &self.root
    }

    pub fn files_path(&self, key: &RemoteKey) -> Result<RemotePath> {
        self.root.join("files")?.join(key.as_str())
    }

    pub fn index_root(&self) -> Result<RemotePath> {
        self.root.join("index")
    }

    pub fn index_path(&self, key: &RemoteKey) -> Result<RemotePath> {
        self.index_root()?.join(key.as_str())
    }

    pub fn attachments_root(&self) -> Result<RemotePath> {
        self.root.join("attachments")
    }
}

/// Shared state of one sync session.
pub struct SyncContext {
    config: SyncConfig,
    capability: RemoteCapability,
    local: Arc<dyn LocalStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
    auth: Arc<dyn AuthProvider>,
    session: Arc<RwLock<SessionState>>,
    subscription: Mutex<Option<Subscription>>,
    keys: RwLock<HashMap<String, RemoteKey>>,
    log: SyncLog,
    outcomes: Mutex<HashMap<String, RemoteOutcome>>,
    clock: Arc<dyn Clock>,
    last_timestamp: AtomicI64,
    retry: RetryExecutor,
}

impl SyncContext {
    /// Start building a context around the always-required collaborators.
    pub fn builder(
        config: SyncConfig,
        local: Arc<dyn LocalStore>,
        auth: Arc<dyn AuthProvider>,
    ) -> SyncContextBuilder {
        SyncContextBuilder {
            config,
            local,
            auth,
            remote: None,
            blobs: None,
            clock: None,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Result of validating the configuration at build time.
    pub fn capability(&self) -> &RemoteCapability {
        &self.capability
    }

    pub fn local(&self) -> &dyn LocalStore {
        self.local.as_ref()
    }

    pub fn blobs(&self) -> Option<&dyn BlobStore> {
        self.blobs.as_deref()
    }

    /// Side-channel log of remote sync activity.
    pub fn log(&self) -> &SyncLog {
        &self.log
    }

    /// Last remote outcome recorded for `name`.
    pub fn last_outcome(&self, name: &str) -> Option<RemoteOutcome> {
        self.outcomes.lock().unwrap().get(name).cloned()
    }

    pub(crate) fn record_outcome(&self, name: &str, outcome: RemoteOutcome) {
        self.outcomes.lock().unwrap().insert(name.to_string(), outcome);
    }

    pub(crate) fn forget_outcome(&self, name: &str) {
        self.outcomes.lock().unwrap().remove(name);
    }

    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Timestamp for a new save; never lower than one already handed out.
    pub fn next_timestamp(&self) -> i64 {
        let now = self.clock.now_millis();
        let previous = self.last_timestamp.fetch_max(now, Ordering::SeqCst);
        now.max(previous)
    }

    /// User of the current session.
    ///
    /// Until the first auth event arrives the provider is asked directly.
    pub fn current_user(&self) -> Option<UserRef> {
        let observed = self.session.read().unwrap().clone();
        match observed {
            SessionState::Observed(user) => user,
            SessionState::Unobserved => self.auth.current_user(),
        }
    }

    /// Whether the remote branch of an operation should run now.
    pub fn is_remote_usable(&self) -> bool {
        self.remote_session().is_some()
    }

    /// Remote location for the current user, if remote sync is usable.
    pub fn remote_session(&self) -> Option<RemoteSession> {
        if !self.capability.is_enabled() {
            return None;
        }
        let store = self.remote.clone()?;
        let user = self.current_user()?;

        let components = vec![
            "sync".to_string(),
            self.config.namespace.clone(),
            "users".to_string(),
            user.uid().to_string(),
        ];
        match RemotePath::from_components(components) {
            Ok(root) => Some(RemoteSession { user, store, root }),
            Err(e) => {
                warn!("Cannot build remote root for {}: {}", user, e);
                None
            }
        }
    }

    /// Remote key of `name`, preferring the key seen by the last `list`.
    pub fn remote_key(&self, name: &str) -> RemoteKey {
        self.keys
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| encode_key(name))
    }

    pub(crate) fn replace_keys(&self, keys: HashMap<String, RemoteKey>) {
        *self.keys.write().unwrap() = keys;
    }

    /// Stop following auth state changes.
    ///
    /// The last observed session stays in effect.
    pub fn detach_auth(&self) {
        if let Some(subscription) = self.subscription.lock().unwrap().take() {
            subscription.unsubscribe();
            debug!("Auth subscription cancelled");
        }
    }
}

/// Builder for [`SyncContext`].
pub struct SyncContextBuilder {
    config: SyncConfig,
    local: Arc<dyn LocalStore>,
    auth: Arc<dyn AuthProvider>,
    remote: Option<Arc<dyn RemoteStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SyncContextBuilder {
    pub fn remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and start following auth state.
    pub fn build(self) -> Arc<SyncContext> {
        let capability = match self.config.validate() {
            RemoteCapability::Enabled if self.remote.is_none() => RemoteCapability::Disabled {
                reason: "No remote store provided".to_string(),
            },
            capability => capability,
        };
        match &capability {
            RemoteCapability::Enabled => info!(
                namespace = %self.config.namespace,
                "Remote sync enabled"
            ),
            RemoteCapability::Disabled { reason } => info!("Remote sync disabled: {}", reason),
        }

        let session = Arc::new(RwLock::new(SessionState::Unobserved));
        let observer = Arc::clone(&session);
        let callback = move |user: Option<&UserRef>| {
            debug!(signed_in = user.is_some(), "Auth state changed");
            *observer.write().unwrap() = SessionState::Observed(user.cloned());
        };
        let subscription = self.auth.on_auth_state_change(Arc::new(callback));

        let retry = RetryExecutor::new(self.config.retry_config());

        Arc::new(SyncContext {
            config: self.config,
            capability,
            local: self.local,
            remote: self.remote,
            blobs: self.blobs,
            auth: self.auth,
            session,
            subscription: Mutex::new(Some(subscription)),
            keys: RwLock::new(HashMap::new()),
            log: SyncLog::new(),
            outcomes: Mutex::new(HashMap::new()),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            last_timestamp: AtomicI64::new(i64::MIN),
            retry,
        })
    }
}
