//! Attachment entities as seen in the host's attachment list.
//!
//! One type covers both the TNEF container the host listed and the synthetic
//! sub-attachments created from its decoded parts. A sub-attachment is
//! recognised by its back-reference to the container.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::host::ActionFn;

/// Media types treated as TNEF containers (compared case-insensitively as prefixes).
pub const TNEF_CONTENT_TYPES: [&str; 2] = ["application/ms-tnef", "application/vnd.ms-tnef"];

/// Fallback content type for parts that declare none.
pub const DEFAULT_PART_CONTENT_TYPE: &str = "application/binary";

/// Content type routed into the calendar when direct import is enabled.
pub const CALENDAR_CONTENT_TYPE: &str = "text/calendar";

/// Returns `true` if `content_type` names a TNEF container.
pub fn is_tnef_content_type(content_type: &str) -> bool {
    TNEF_CONTENT_TYPES.iter().any(|tnef| {
        content_type
            .get(..tnef.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(tnef))
    })
}

/// Handlers an attachment carried before interception, tried before the
/// globally captured originals.
#[derive(Clone, Default)]
pub struct InstanceHandlers {
    pub open: Option<ActionFn>,
    pub save: Option<ActionFn>,
}

impl fmt::Debug for InstanceHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHandlers")
            .field("open", &self.open.is_some())
            .field("save", &self.save.is_some())
            .finish()
    }
}

/// One entry of the host's attachment list.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// MIME content type (e.g. `"application/ms-tnef"`, `"text/calendar"`).
    pub content_type: String,

    /// Source URL. For sub-attachments: `<container url>.<part index>`.
    pub url: String,

    /// Name shown in the list.
    pub display_name: String,

    /// Identifier of the owning message.
    pub message_id: String,

    /// Declared size in bytes, if known.
    pub length: Option<u64>,

    /// Part date as declared inside the container.
    pub date: Option<DateTime<Utc>>,

    /// The TNEF container this part was decoded from.
    pub container: Option<Arc<Attachment>>,

    /// 1-based index within the container; 0 for host attachments.
    pub part_index: u32,

    /// Handlers captured from the host for this instance.
    pub handlers: InstanceHandlers,
}

impl Attachment {
    /// A host-listed attachment (no container, no part index).
    pub fn new(
        content_type: impl Into<String>,
        url: impl Into<String>,
        display_name: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            content_type: content_type.into(),
            url: url.into(),
            display_name: display_name.into(),
            message_id: message_id.into(),
            length: None,
            date: None,
            container: None,
            part_index: 0,
            handlers: InstanceHandlers::default(),
        }
    }

    /// Set the declared length.
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// Synthetic URL of part `part_index` inside `container_url`.
    pub fn part_url(container_url: &str, part_index: u32) -> String {
        format!("{container_url}.{part_index}")
    }

    /// `true` if this attachment itself is a TNEF container.
    pub fn is_tnef(&self) -> bool {
        is_tnef_content_type(&self.content_type)
    }

    /// The container this attachment was decoded from, if that container is TNEF.
    pub fn tnef_container(&self) -> Option<&Arc<Attachment>> {
        self.container.as_ref().filter(|c| c.is_tnef())
    }
}
