//! Decoded part headers and the message header handed to decoders.

use chrono::{DateTime, Utc};

/// Header of one decoded TNEF part, as reported by the decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHeader {
    /// Name as stored in the container. May be missing or carry a full path.
    pub filename: Option<String>,
    /// Declared content type, if the decoder knows one.
    pub content_type: Option<String>,
    /// Declared payload length in bytes.
    pub length: u64,
    /// Modification date, if present.
    pub date: Option<DateTime<Utc>>,
}

impl PartHeader {
    /// Leaf name to use for part `part_index`: path components stripped,
    /// `part-<index>` when nothing usable remains.
    pub fn leaf_name(&self, part_index: u32) -> String {
        self.filename
            .as_deref()
            .and_then(leaf_name)
            .unwrap_or_else(|| format!("part-{part_index}"))
    }

    /// Declared content type, or [`DEFAULT_PART_CONTENT_TYPE`](super::attachment::DEFAULT_PART_CONTENT_TYPE).
    pub fn content_type_or_default(&self) -> String {
        self.content_type
            .as_deref()
            .filter(|ct| !ct.is_empty())
            .unwrap_or(super::attachment::DEFAULT_PART_CONTENT_TYPE)
            .to_string()
    }
}

/// Strip directory components (either separator) and trailing NULs from a name.
pub fn leaf_name(name: &str) -> Option<String> {
    let name = name.trim_end_matches('\0');
    let leaf = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    if leaf.is_empty() || leaf == "." || leaf == ".." {
        None
    } else {
        Some(leaf.to_string())
    }
}

/// Per-message information a decoder may use (e.g. to decode legacy names).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeader {
    /// Identifier of the message.
    pub message_id: String,
    /// Charset label declared by the message, if any.
    pub charset: Option<String>,
}
