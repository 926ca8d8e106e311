//! Attachment migration and hydration.
//!
//! Inline `data:` payloads are moved to the blob store before a document goes
//! remote, and the block's `src` is rewritten into an [`AttachmentRef`]. On
//! read, references are resolved back into short-lived URLs stored in the
//! local-only `resolvedSrc` field.

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::envelope::{
    redact_block, AttachmentKind, AttachmentRef, Block, BlockSource, DataUrl, Envelope,
    REQUIRES_AUTH_FIELD, RESOLVED_SRC_FIELD,
};
use blocksync_common::{encode_key, Error, RemotePath, Result};
use blocksync_storage::BlobStore;

/// Where migrated attachments go.
#[derive(Clone, Copy)]
pub struct AttachmentTarget<'a> {
    /// Blob store, if one is configured.
    pub blobs: Option<&'a dyn BlobStore>,
    /// Parent path of every attachment blob.
    pub root: &'a RemotePath,
}

/// Result of migrating a document.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Redacted envelope with every successfully uploaded payload replaced.
    pub envelope: Envelope,
    /// Blocks whose payload was uploaded.
    pub migrated: usize,
    /// Blocks whose payload is still inline because it was unreadable or
    /// its upload failed.
    pub failed: usize,
}

impl Migration {
    /// Whether the envelope is free of inline payloads.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Whether attachment URLs can be resolved for this read.
#[derive(Clone, Copy)]
pub enum RemoteAccess<'a> {
    Unavailable,
    Available(&'a dyn BlobStore),
}

/// Result of hydrating a document.
#[derive(Debug, Clone)]
pub struct Hydration {
    pub envelope: Envelope,
    /// References resolved to a URL.
    pub resolved: usize,
    /// References that could not be resolved while remote access was available.
    pub errors: usize,
}

/// Generate a globally unique attachment id for a block.
pub fn attachment_id(document: &str, block_id: &str) -> String {
    format!(
        "{}_{}_{}",
        encode_key(document),
        encode_key(block_id),
        Uuid::new_v4().simple()
    )
}

/// Upload every inline payload of `envelope` and rewrite the blocks to point at it.
///
/// Every block is redacted. A block whose `data:` URL cannot be decoded or
/// uploaded keeps it and is counted in [`Migration::failed`]; such an
/// envelope must not be written remotely. `sizeBytes` is recomputed for the
/// migrated blocks.
pub async fn migrate(envelope: &Envelope, document: &str, target: AttachmentTarget<'_>) -> Migration {
    let mut migrated = 0;
    let mut failed = 0;
    let mut blocks = Vec::with_capacity(envelope.blocks.len());

    for (index, block) in envelope.blocks.iter().enumerate() {
        let mut block = block.clone();
        redact_block(&mut block);

        if let Some(payload) = inline_payload(&block) {
            let block_id = block.id().unwrap_or_else(|| index.to_string());
            let uploaded = match payload {
                Ok(payload) => upload(&payload, document, &block_id, target).await,
                Err(e) => Err(e),
            };
            match uploaded {
                Ok(reference) => {
                    block.insert("src", serde_json::to_value(&reference).unwrap_or(Value::Null));
                    migrated += 1;
                }
                Err(e) => {
                    warn!(document, block = %block_id, "Inline attachment not migrated: {}", e);
                    failed += 1;
                }
            }
        }
        blocks.push(block);
    }

    if migrated > 0 {
        debug!(document, migrated, "Migrated inline attachments");
    }

    Migration {
        envelope: Envelope {
            blocks,
            ..envelope.clone()
        }
        .remeasured(),
        migrated,
        failed,
    }
}

fn inline_payload(block: &Block) -> Option<Result<DataUrl>> {
    match block.source() {
        BlockSource::Inline(payload) => Some(Ok(payload)),
        BlockSource::MalformedInline(src) => Some(DataUrl::parse(src)),
        _ => None,
    }
}

fn attachment_ref(block: &Block) -> Option<AttachmentRef> {
    match block.source() {
        BlockSource::Attachment(reference) => Some(reference),
        _ => None,
    }
}

async fn upload(
    payload: &DataUrl,
    document: &str,
    block_id: &str,
    target: AttachmentTarget<'_>,
) -> Result<AttachmentRef> {
    let blobs = target
        .blobs
        .ok_or_else(|| Error::Configuration("No blob store configured".to_string()))?;

    let attachment_id = attachment_id(document, block_id);
    let path = target.root.join(&attachment_id)?;
    blobs
        .upload(&path, payload.data.clone(), &payload.content_type)
        .await?;

    Ok(AttachmentRef {
        kind: AttachmentKind::Storage,
        attachment_id,
        storage_path: path.to_string(),
        content_type: payload.content_type.clone(),
        size: payload.data.len() as u64,
    })
}

/// Resolve every attachment reference of `envelope` into a fetchable URL.
///
/// Never fails: unresolved references get `resolvedSrc: null` and
/// `attachmentRequiresAuth: true` so a placeholder can be shown.
pub async fn hydrate(envelope: Envelope, access: RemoteAccess<'_>) -> Hydration {
    let mut resolved = 0;
    let mut errors = 0;
    let mut blocks = Vec::with_capacity(envelope.blocks.len());

    for mut block in envelope.blocks {
        let Some(reference) = attachment_ref(&block) else {
            blocks.push(block);
            continue;
        };

        let url = match access {
            RemoteAccess::Unavailable => None,
            RemoteAccess::Available(blobs) => match resolve(blobs, &reference).await {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(attachment = %reference.attachment_id, "Attachment resolve failed: {}", e);
                    errors += 1;
                    None
                }
            },
        };

        if url.is_some() {
            resolved += 1;
        }
        mark_resolution(&mut block, url);
        blocks.push(block);
    }

    Hydration {
        envelope: Envelope { blocks, ..envelope },
        resolved,
        errors,
    }
}

async fn resolve(blobs: &dyn BlobStore, reference: &AttachmentRef) -> Result<String> {
    let path = RemotePath::parse(&reference.storage_path)?;
    blobs.download_url(&path).await
}

fn mark_resolution(block: &mut Block, url: Option<String>) {
    let requires_auth = url.is_none();
    block.insert(RESOLVED_SRC_FIELD, url.map(Value::String).unwrap_or(Value::Null));
    block.insert(REQUIRES_AUTH_FIELD, Value::Bool(requires_auth));
}
