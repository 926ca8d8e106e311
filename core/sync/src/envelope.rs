//! Document envelope: the unit of sync.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

use blocksync_common::{Error, Result};

/// Schema version stamped on every envelope this crate writes.
pub const ENVELOPE_VERSION: u32 = 1;

/// Modes every document keeps an order for.
pub const KNOWN_MODES: [&str; 2] = ["default", "simple"];

/// Resolved URL of an attachment, present only in memory.
pub const RESOLVED_SRC_FIELD: &str = "resolvedSrc";

/// Set when an attachment could not be resolved.
pub const REQUIRES_AUTH_FIELD: &str = "attachmentRequiresAuth";

/// Transient download URL some UIs attach while rendering.
pub const DOWNLOAD_URL_FIELD: &str = "downloadUrl";

/// Fields that never leave the process.
pub const LOCAL_ONLY_FIELDS: [&str; 3] = [RESOLVED_SRC_FIELD, REQUIRES_AUTH_FIELD, DOWNLOAD_URL_FIELD];

// Browsers emit both padded and unpadded payloads.
const DATA_URL_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Mode name to ordered block ids.
pub type ModeOrders = BTreeMap<String, Vec<String>>;

/// A block as stored in a document.
///
/// Blocks are opaque records; only `id` and `src` mean anything to the sync core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Block(Map<String, Value>);

impl Block {
    /// Wrap a field map.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Convert a JSON value into a block; only objects qualify.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    /// Block id; numeric ids are rendered as strings.
    pub fn id(&self) -> Option<String> {
        match self.0.get("id")? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Read a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Set a field.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    /// Remove a field.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// All fields of the block.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Classify the block's `src` field.
    pub fn source(&self) -> BlockSource<'_> {
        match self.0.get("src") {
            None | Some(Value::Null) => BlockSource::Empty,
            Some(Value::String(src)) if DataUrl::is_data_url(src) => match DataUrl::parse(src) {
                Ok(data_url) => BlockSource::Inline(data_url),
                Err(_) => BlockSource::MalformedInline(src),
            },
            Some(Value::String(src)) => BlockSource::Text(src),
            Some(other) => match serde_json::from_value::<AttachmentRef>(other.clone()) {
                Ok(attachment) => BlockSource::Attachment(attachment),
                Err(_) => BlockSource::Other(other),
            },
        }
    }
}

/// What a block's `src` field holds.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockSource<'a> {
    /// No `src`.
    Empty,
    /// Plain text or URL.
    Text(&'a str),
    /// Inline binary payload encoded as a data URL.
    Inline(DataUrl),
    /// A `data:` URL whose payload cannot be decoded.
    MalformedInline(&'a str),
    /// Reference to externally stored content.
    Attachment(AttachmentRef),
    /// Anything else; passed through untouched.
    Other(&'a Value),
}

/// Decoded `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub content_type: String,
    pub data: Vec<u8>,
}

impl DataUrl {
    /// Whether `src` uses the `data:` scheme, well-formed or not.
    pub fn is_data_url(src: &str) -> bool {
        src.get(..5)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
    }

    /// Parse a `data:[<mediatype>][;base64],<data>` URL.
    ///
    /// # Errors
    /// - `InvalidInput` for anything that is not a well-formed data URL
    pub fn parse(src: &str) -> Result<Self> {
        if !Self::is_data_url(src) {
            return Err(Error::InvalidInput("Not a data URL".to_string()));
        }
        let (header, payload) = src[5..]
            .split_once(',')
            .ok_or_else(|| Error::InvalidInput("Data URL has no payload".to_string()))?;

        let (media, is_base64) = match header.rsplit_once(';') {
            Some((media, flag)) if flag.eq_ignore_ascii_case("base64") => (media, true),
            _ => (header, false),
        };

        let content_type = match media.split(';').next().map(str::trim) {
            Some(mime) if !mime.is_empty() => mime.to_ascii_lowercase(),
            _ => "text/plain".to_string(),
        };

        let data = if is_base64 {
            DATA_URL_BASE64
                .decode(payload.trim())
                .map_err(|e| Error::InvalidInput(format!("Bad base64 payload: {}", e)))?
        } else {
            percent_encoding::percent_decode_str(payload).collect()
        };

        Ok(Self { content_type, data })
    }
}

/// Kind tag of an attachment reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Storage,
}

/// Pointer to binary content held in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub attachment_id: String,
    pub storage_path: String,
    pub content_type: String,
    pub size: u64,
}

/// Canonical versioned document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub mode_orders: ModeOrders,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl Envelope {
    /// Envelope with no blocks.
    pub fn empty(updated_at: i64) -> Self {
        Self {
            version: None,
            blocks: Vec::new(),
            mode_orders: ModeOrders::new(),
            updated_at,
            size_bytes: None,
        }
    }

    /// Fresh envelope for a save, stamped with the current version and size.
    pub fn new(blocks: Vec<Block>, mode_orders: ModeOrders, updated_at: i64) -> Self {
        let size_bytes = blocks_size(&blocks);
        Self {
            version: Some(ENVELOPE_VERSION),
            blocks,
            mode_orders,
            updated_at,
            size_bytes,
        }
    }

    /// Recompute `sizeBytes` after the blocks changed.
    pub fn remeasured(mut self) -> Self {
        self.size_bytes = blocks_size(&self.blocks);
        self
    }

    /// Serialize to a JSON value for storage.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Copy with every local-only field stripped from every block.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.blocks.iter_mut().for_each(redact_block);
        copy
    }
}

fn blocks_size(blocks: &[Block]) -> Option<u64> {
    serde_json::to_vec(blocks).ok().map(|b| b.len() as u64)
}

/// Strip hydration state so it is never persisted.
pub fn redact_block(block: &mut Block) {
    for field in LOCAL_ONLY_FIELDS {
        block.remove(field);
    }
}

/// Give every known or incoming mode an order listing each block id once.
///
/// Ids already ordered keep their position; ids that are missing are appended
/// in block order and ids of removed blocks are dropped.
pub fn ensure_mode_orders(blocks: &[Block], incoming: &ModeOrders) -> ModeOrders {
    let ids: Vec<String> = blocks.iter().filter_map(Block::id).collect();
    let valid: HashSet<&str> = ids.iter().map(String::as_str).collect();

    let mut modes: Vec<&str> = KNOWN_MODES.to_vec();
    modes.extend(incoming.keys().map(String::as_str));

    let mut normalized = ModeOrders::new();
    for mode in modes {
        if normalized.contains_key(mode) {
            continue;
        }

        let mut seen = HashSet::new();
        let mut order: Vec<String> = incoming
            .get(mode)
            .into_iter()
            .flatten()
            .filter(|id| valid.contains(id.as_str()) && seen.insert(id.as_str()))
            .cloned()
            .collect();
        order.extend(ids.iter().filter(|id| !seen.contains(id.as_str())).cloned());

        normalized.insert(mode.to_string(), order);
    }
    normalized
}
