//! Sync engine that orchestrates document operations across local and remote stores.
//!
//! The local store is the durability floor: its failures are the only ones
//! returned to callers. Everything on the remote path is retried where
//! transient, then absorbed and recorded in the sync log.

use futures::FutureExt;
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use blocksync_common::{decode_key, Error, RemoteKey, RemotePath, Result};
use blocksync_storage::RemoteStore;

use crate::attachment::{hydrate, migrate, AttachmentTarget, RemoteAccess};
use crate::conflict::{guard_write, resolve, Resolution, WriteGuard};
use crate::context::{RemoteSession, SyncContext};
use crate::envelope::{ensure_mode_orders, Block, Envelope, ModeOrders};
use crate::normalize::normalize;
use crate::scheduler::FlushScheduler;
use crate::state::{RemoteOutcome, SyncLog};

/// Fallback `updatedAt` for stored documents that carry none, so any dated copy wins.
const UNDATED: i64 = 0;

/// Main sync engine.
pub struct SyncEngine {
    ctx: Arc<SyncContext>,
    flushes: Option<FlushScheduler>,
}

impl SyncEngine {
    /// Create an engine over `ctx`.
    ///
    /// Remote pushes are debounced when the configuration sets a flush delay.
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        let flushes = ctx.config().flush_delay().map(FlushScheduler::new);
        Self { ctx, flushes }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// Side-channel log of remote sync activity.
    pub fn sync_log(&self) -> &SyncLog {
        self.ctx.log()
    }

    /// What the remote branch of the last save of `name` did.
    ///
    /// `Scheduled` until a debounced push has run.
    pub fn last_outcome(&self, name: &str) -> Option<RemoteOutcome> {
        self.ctx.last_outcome(name)
    }

    /// Documents whose remote push is waiting for its quiet period.
    pub fn pending_flushes(&self) -> Vec<String> {
        self.flushes
            .as_ref()
            .map(FlushScheduler::pending)
            .unwrap_or_default()
    }

    /// Save `blocks` under `name`, deriving the mode orders from block order.
    pub async fn save(&self, name: &str, blocks: Vec<Block>) -> Result<()> {
        self.save_with_orders(name, blocks, &ModeOrders::new()).await
    }

    /// Save `blocks` under `name` with caller-supplied mode orders.
    ///
    /// # Postconditions
    /// - The local copy is durable once this returns `Ok`
    /// - The remote copy is updated (or scheduled) when remote sync is usable
    ///
    /// # Errors
    /// - Local store failures only
    pub async fn save_with_orders(
        &self,
        name: &str,
        blocks: Vec<Block>,
        orders: &ModeOrders,
    ) -> Result<()> {
        let orders = ensure_mode_orders(&blocks, orders);
        let updated_at = self.ctx.next_timestamp();
        let envelope = Envelope::new(blocks, orders, updated_at).redacted();

        self.ctx.local().put(name, envelope.to_value()?).await?;
        debug!(document = name, updated_at, "Saved locally");

        if !self.ctx.is_remote_usable() {
            debug!(document = name, "Remote sync unavailable, keeping local copy only");
            self.ctx.record_outcome(name, RemoteOutcome::Unavailable);
            return Ok(());
        }

        match &self.flushes {
            Some(flushes) => {
                let ctx = Arc::clone(&self.ctx);
                let document = name.to_string();
                self.ctx.record_outcome(name, RemoteOutcome::Scheduled);
                flushes.schedule(
                    name,
                    async move {
                        let outcome = push_remote(&ctx, &document, envelope).await;
                        ctx.record_outcome(&document, outcome);
                    }
                    .boxed(),
                );
                self.ctx.log().info(
                    "schedule",
                    format!("{}: remote push scheduled in {:?}", name, flushes.delay()),
                );
            }
            None => {
                let outcome = push_remote(&self.ctx, name, envelope).await;
                self.ctx.record_outcome(name, outcome);
            }
        }
        Ok(())
    }

    /// Load the document stored under `name`.
    ///
    /// The remote copy is read when remote sync is usable and replaces the
    /// local copy only when strictly newer. Attachments are hydrated on
    /// every load.
    ///
    /// # Returns
    /// `None` if neither store holds the document.
    ///
    /// # Errors
    /// - The local store failed and no remote copy was available
    pub async fn load(&self, name: &str) -> Result<Option<Envelope>> {
        let local = self.ctx.local().get(name).await;
        let mut chosen = match &local {
            Ok(raw) => raw.clone().map(|raw| normalize(Some(raw), UNDATED)),
            Err(e) => {
                warn!(document = name, "Local read failed: {}", e);
                None
            }
        };

        let mut remote_reachable = false;
        if let Some(session) = self.ctx.remote_session() {
            match self.read_remote_copy(&session, name).await {
                Ok(remote) => {
                    remote_reachable = true;
                    let local_updated_at = chosen.as_ref().map(|e| e.updated_at);
                    if resolve(local_updated_at, remote.as_ref()) == Resolution::PreferRemote {
                        let envelope = normalize(remote, UNDATED);
                        self.replace_local_with_remote(name, &envelope, local_updated_at)
                            .await;
                        chosen = Some(envelope);
                    }
                }
                Err(e) => self.ctx.log().error(
                    "load",
                    format!("{}: remote read failed, using local copy: {}", name, e),
                ),
            }
        }

        let Some(envelope) = chosen else {
            return local.map(|_| None);
        };

        let access = match (remote_reachable, self.ctx.blobs()) {
            (true, Some(blobs)) => RemoteAccess::Available(blobs),
            _ => RemoteAccess::Unavailable,
        };
        let hydration = hydrate(envelope, access).await;
        if hydration.errors > 0 {
            self.ctx.log().error(
                "hydrate",
                format!("{}: {} attachment(s) could not be resolved", name, hydration.errors),
            );
        }

        Ok(Some(hydration.envelope))
    }

    /// Delete `name` locally and, when remote sync is usable, remotely.
    ///
    /// A waiting flush for the document is cancelled and a running one is
    /// awaited first, so neither can resurrect the remote copy.
    ///
    /// # Errors
    /// - Local store failures only
    pub async fn delete(&self, name: &str) -> Result<()> {
        if let Some(flushes) = &self.flushes {
            if flushes.cancel(name).await {
                self.ctx
                    .log()
                    .info("delete", format!("{}: stopped pending remote push", name));
            }
        }
        self.ctx.forget_outcome(name);

        self.ctx.local().delete(name).await?;
        debug!(document = name, "Deleted locally");

        let Some(session) = self.ctx.remote_session() else {
            return Ok(());
        };

        let key = self.ctx.remote_key(name);
        let paths = document_paths(&session, &key);
        let (file_path, index_path) = match paths {
            Ok(paths) => paths,
            Err(e) => {
                self.ctx.log().error("delete", format!("{}: {}", name, e));
                return Ok(());
            }
        };

        let (file, index) = futures::join!(
            remote_remove(&self.ctx, session.store(), &file_path),
            remote_remove(&self.ctx, session.store(), &index_path),
        );
        match file.and(index) {
            Ok(()) => self
                .ctx
                .log()
                .success("delete", format!("{}: removed remote copy", name)),
            Err(e) => self
                .ctx
                .log()
                .error("delete", format!("{}: remote delete failed: {}", name, e)),
        }
        Ok(())
    }

    /// Names of every known document, sorted.
    ///
    /// The result is the union of the remote index (when reachable) and the
    /// local keys. Listing the remote index refreshes the name to key table.
    ///
    /// # Errors
    /// - The local store failed and the remote index was unavailable
    pub async fn list(&self) -> Result<Vec<String>> {
        let local = self.ctx.local().list_keys().await;

        let remote = match self.ctx.remote_session() {
            Some(session) => match self.list_remote(&session).await {
                Ok(names) => Some(names),
                Err(e) => {
                    self.ctx
                        .log()
                        .error("list", format!("Remote index unavailable: {}", e));
                    None
                }
            },
            None => None,
        };

        let mut names = BTreeSet::new();
        match (local, remote) {
            (Err(e), None) => return Err(e),
            (Err(e), Some(remote)) => {
                warn!("Local listing failed, using remote index only: {}", e);
                names.extend(remote);
            }
            (Ok(local), remote) => {
                names.extend(local);
                names.extend(remote.into_iter().flatten());
            }
        }

        Ok(names.into_iter().collect())
    }

    /// Run every pending remote push now.
    pub async fn flush_pending(&self) -> usize {
        match &self.flushes {
            Some(flushes) => flushes.flush_pending().await,
            None => 0,
        }
    }

    /// Cancel pending pushes and stop following auth state.
    pub fn shutdown(&self) {
        if let Some(flushes) = &self.flushes {
            let cancelled = flushes.cancel_all();
            if cancelled > 0 {
                debug!(cancelled, "Cancelled pending remote pushes");
            }
        }
        self.ctx.detach_auth();
    }

    async fn read_remote_copy(&self, session: &RemoteSession, name: &str) -> Result<Option<Value>> {
        let path = session.files_path(&self.ctx.remote_key(name))?;
        remote_read(&self.ctx, session.store(), &path).await
    }

    async fn replace_local_with_remote(
        &self,
        name: &str,
        envelope: &Envelope,
        local_updated_at: Option<i64>,
    ) {
        let result = match envelope.redacted().to_value() {
            Ok(value) => self.ctx.local().put(name, value).await,
            Err(e) => Err(e),
        };

        match (result, local_updated_at) {
            (Ok(()), Some(local)) => self.ctx.log().info(
                "load",
                format!(
                    "{}: remote copy at {} is newer than local {}, replaced local copy",
                    name, envelope.updated_at, local
                ),
            ),
            (Ok(()), None) => self
                .ctx
                .log()
                .info("load", format!("{}: fetched remote-only document", name)),
            (Err(e), _) => warn!(document = name, "Could not store remote copy locally: {}", e),
        }
    }

    async fn list_remote(&self, session: &RemoteSession) -> Result<Vec<String>> {
        let index_root = session.index_root()?;
        let index = remote_read(&self.ctx, session.store(), &index_root).await?;

        let entries = match index {
            Some(Value::Object(entries)) => entries,
            Some(_) => {
                return Err(Error::Serialization(
                    "Remote index is not an object".to_string(),
                ))
            }
            None => Map::new(),
        };

        let mut keys = HashMap::with_capacity(entries.len());
        for (key, entry) in entries {
            let name = match entry.get("name").and_then(Value::as_str) {
                Some(name) => name.to_string(),
                None => match decode_key(&key) {
                    Ok(name) => name,
                    Err(e) => {
                        warn!(key = %key, "Skipping index entry without a name: {}", e);
                        continue;
                    }
                },
            };
            match RemoteKey::new(key) {
                Ok(key) => {
                    keys.insert(name, key);
                }
                Err(e) => warn!(document = %name, "Skipping index entry: {}", e),
            }
        }

        let mut names: Vec<String> = keys.keys().cloned().collect();
        names.sort();
        self.ctx.replace_keys(keys);
        self.ctx
            .log()
            .info("list", format!("Remote index lists {} document(s)", names.len()));
        Ok(names)
    }
}

fn document_paths(session: &RemoteSession, key: &RemoteKey) -> Result<(RemotePath, RemotePath)> {
    Ok((session.files_path(key)?, session.index_path(key)?))
}

/// Push a locally saved envelope to the remote store.
///
/// Guard read, conflict check, attachment migration, document write, index
/// update. Every failure is logged and ends the push.
async fn push_remote(ctx: &SyncContext, name: &str, envelope: Envelope) -> RemoteOutcome {
    let log = ctx.log();
    let Some(session) = ctx.remote_session() else {
        log.info("save", format!("{}: remote unavailable, kept local copy", name));
        return RemoteOutcome::Unavailable;
    };

    let key = ctx.remote_key(name);
    let paths = document_paths(&session, &key)
        .and_then(|(file, index)| Ok((file, index, session.attachments_root()?)));
    let (file_path, index_path, attachments_root) = match paths {
        Ok(paths) => paths,
        Err(e) => {
            log.error("save", format!("{}: {}", name, e));
            return RemoteOutcome::Failed(e.to_string());
        }
    };

    let current = match remote_read(ctx, session.store(), &file_path).await {
        Ok(current) => current,
        Err(e) => {
            log.error("guard-read", format!("{}: {}", name, e));
            return RemoteOutcome::Failed(e.to_string());
        }
    };

    if let WriteGuard::SkipNewerRemote { remote_updated_at } =
        guard_write(envelope.updated_at, current.as_ref())
    {
        log.info(
            "conflict",
            format!(
                "{}: remote copy at {} is newer than save at {}, remote write skipped",
                name, remote_updated_at, envelope.updated_at
            ),
        );
        return RemoteOutcome::SkippedNewerRemote { remote_updated_at };
    }

    let target = AttachmentTarget {
        blobs: ctx.blobs(),
        root: &attachments_root,
    };
    let migration = migrate(&envelope, name, target).await;
    if !migration.is_complete() {
        log.error(
            "migrate",
            format!(
                "{}: {} inline attachment(s) could not be migrated, remote write skipped",
                name, migration.failed
            ),
        );
        return RemoteOutcome::SkippedUploadFailure {
            failed: migration.failed,
        };
    }
    if migration.migrated > 0 {
        log.info(
            "migrate",
            format!("{}: moved {} attachment(s) to blob storage", name, migration.migrated),
        );
    }

    let document = match migration.envelope.to_value() {
        Ok(document) => document,
        Err(e) => {
            log.error("write", format!("{}: {}", name, e));
            return RemoteOutcome::Failed(e.to_string());
        }
    };
    if let Err(e) = remote_write(ctx, session.store(), &file_path, document).await {
        log.error("write", format!("{}: {}", name, e));
        return RemoteOutcome::Failed(e.to_string());
    }

    let entry = index_entry(session.store().as_ref(), name, &migration.envelope);
    if let Err(e) = remote_update(ctx, session.store(), &index_path, entry).await {
        log.error("index", format!("{}: document written, index update failed: {}", name, e));
        return RemoteOutcome::Failed(e.to_string());
    }

    log.success(
        "write",
        format!("{}: synced at {}", name, migration.envelope.updated_at),
    );

    if migration.migrated > 0 {
        adopt_migrated_copy(ctx, name, &migration.envelope).await;
    }

    RemoteOutcome::Synced {
        migrated: migration.migrated,
    }
}

fn index_entry(store: &dyn RemoteStore, name: &str, envelope: &Envelope) -> Map<String, Value> {
    let mut entry = Map::new();
    entry.insert("name".to_string(), json!(name));
    entry.insert("updatedAt".to_string(), json!(envelope.updated_at));
    if let Some(size) = envelope.size_bytes {
        entry.insert("sizeBytes".to_string(), json!(size));
    }
    entry.insert("syncedAt".to_string(), store.server_timestamp());
    entry
}

/// Replace the local copy with its migrated form unless a newer save landed meanwhile.
async fn adopt_migrated_copy(ctx: &SyncContext, name: &str, migrated: &Envelope) {
    let current = match ctx.local().get(name).await {
        Ok(current) => current,
        Err(e) => {
            warn!(document = name, "Could not re-read local copy: {}", e);
            return;
        }
    };

    let Some(current) = current.map(|raw| normalize(Some(raw), UNDATED)) else {
        return;
    };
    if current.updated_at != migrated.updated_at {
        debug!(document = name, "Local copy changed since push, keeping it");
        return;
    }

    let result = match migrated.to_value() {
        Ok(value) => ctx.local().put(name, value).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!(document = name, "Could not store migrated copy locally: {}", e);
    }
}

async fn remote_read(
    ctx: &SyncContext,
    store: &Arc<dyn RemoteStore>,
    path: &RemotePath,
) -> Result<Option<Value>> {
    ctx.retry()
        .execute(|| {
            let store = Arc::clone(store);
            let path = path.clone();
            async move { store.read(&path).await }
        })
        .await
}

async fn remote_write(
    ctx: &SyncContext,
    store: &Arc<dyn RemoteStore>,
    path: &RemotePath,
    value: Value,
) -> Result<()> {
    ctx.retry()
        .execute(|| {
            let store = Arc::clone(store);
            let path = path.clone();
            let value = value.clone();
            async move { store.write(&path, value).await }
        })
        .await
}

async fn remote_update(
    ctx: &SyncContext,
    store: &Arc<dyn RemoteStore>,
    path: &RemotePath,
    fields: Map<String, Value>,
) -> Result<()> {
    ctx.retry()
        .execute(|| {
            let store = Arc::clone(store);
            let path = path.clone();
            let fields = fields.clone();
            async move { store.update(&path, fields).await }
        })
        .await
}

async fn remote_remove(
    ctx: &SyncContext,
    store: &Arc<dyn RemoteStore>,
    path: &RemotePath,
) -> Result<()> {
    ctx.retry()
        .execute(|| {
            let store = Arc::clone(store);
            let path = path.clone();
            async move { store.remove(&path).await }
        })
        .await
}
