//! The mail client as seen from this crate.
//!
//! The host owns the attachment list, the transport that streams attachment
//! bytes, and the final open/save actions. Its interceptable entry points
//! live in a [`HookTable`] so they can be swapped and later restored.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;
use crate::model::attachment::Attachment;

/// Open or save one attachment.
pub type ActionFn = Arc<dyn Fn(&Attachment) -> Result<()> + Send + Sync>;
/// Copy one attachment.
pub type CloneFn = Arc<dyn Fn(&Attachment) -> Attachment + Send + Sync>;
/// "All attachments parsed" notification.
pub type LifecycleFn = Arc<dyn Fn() + Send + Sync>;

/// One swappable entry point.
pub struct Hook<T: Clone>(Mutex<Option<T>>);

impl<T: Clone> Hook<T> {
    /// A hook holding `handler`.
    pub fn new(handler: Option<T>) -> Self {
        Self(Mutex::new(handler))
    }

    /// The current handler.
    pub fn get(&self) -> Option<T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Install `handler`, returning the one it replaces.
    pub fn replace(&self, handler: Option<T>) -> Option<T> {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, handler)
    }
}

impl<T: Clone> Default for Hook<T> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<T: Clone> fmt::Debug for Hook<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.get().is_some() { "Hook(set)" } else { "Hook(empty)" })
    }
}

/// The host's interceptable entry points.
#[derive(Debug, Default)]
pub struct HookTable {
    pub open: Hook<ActionFn>,
    pub save: Hook<ActionFn>,
    pub clone: Hook<CloneFn>,
    pub end_all_attachments: Hook<LifecycleFn>,
}

impl HookTable {
    /// Call the current open handler, if any.
    pub fn open(&self, attachment: &Attachment) -> Option<Result<()>> {
        self.open.get().map(|f| f(attachment))
    }

    /// Call the current save handler, if any.
    pub fn save(&self, attachment: &Attachment) -> Option<Result<()>> {
        self.save.get().map(|f| f(attachment))
    }

    /// Call the current clone handler, falling back to a plain copy.
    pub fn clone_attachment(&self, attachment: &Attachment) -> Attachment {
        match self.clone.get() {
            Some(f) => f(attachment),
            None => attachment.clone(),
        }
    }

    /// Fire the "all attachments parsed" notification.
    pub fn end_all_attachments(&self) {
        if let Some(f) = self.end_all_attachments.get() {
            f();
        }
    }
}

/// Parameters of the host's generic streaming-open primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub content_type: String,
    pub display_name: String,
    pub url: String,
    pub message_id: String,
}

impl StreamRequest {
    /// Request the bytes of `attachment`.
    pub fn for_attachment(attachment: &Attachment) -> Self {
        Self {
            content_type: attachment.content_type.clone(),
            display_name: attachment.display_name.clone(),
            url: attachment.url.clone(),
            message_id: attachment.message_id.clone(),
        }
    }
}

/// Consumer of one attachment byte stream.
///
/// Returning `Err` from a data or stop callback asks the transport to cancel.
pub trait StreamListener: Send {
    /// The request has started.
    fn on_start_request(&mut self);
    /// The next chunk of bytes, in order.
    fn on_data_available(&mut self, chunk: &[u8]) -> Result<()>;
    /// The transport finished (`status` is its own outcome).
    fn on_stop_request(&mut self, status: Result<()>) -> Result<()>;
}

/// A decoded part handed to the host's open/save primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPart {
    pub content_type: String,
    /// `file://` URL of the decoded part.
    pub url: String,
    pub display_name: String,
    pub message_id: String,
}

/// The mail client.
pub trait Host: Send + Sync {
    /// Interceptable entry points, or `None` while host initialization is incomplete.
    fn hooks(&self) -> Option<Arc<HookTable>>;

    /// Identifier of the message currently displayed, or `None` in a
    /// standalone message view.
    fn displayed_message_id(&self) -> Option<String>;

    /// Attachments currently listed.
    fn attachments(&self) -> Vec<Arc<Attachment>>;

    /// Append one attachment to the list.
    fn append_attachment(&self, attachment: Attachment);

    /// Clear the rendered attachment view.
    fn clear_attachment_view(&self);

    /// Rebuild the attachment view from the list.
    fn redraw_attachment_view(&self);

    /// Start streaming an attachment's bytes into `listener`.
    fn open_attachment_stream(&self, request: StreamRequest, listener: Box<dyn StreamListener>);

    /// Launch a viewer for a decoded part.
    fn open_file(&self, part: &ResolvedPart) -> Result<()>;

    /// Let the user keep a decoded part.
    fn save_file(&self, part: &ResolvedPart) -> Result<()>;
}

/// Clear and rebuild the attachment view.
pub fn refresh_attachment_view(host: &dyn Host) {
    host.clear_attachment_view();
    host.redraw_attachment_view();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_hook_replace_returns_previous() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let first: LifecycleFn = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let hook = Hook::new(Some(first));
        let previous = hook.replace(None).expect("previous handler");
        previous();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(hook.get().is_none());
    }

    #[test]
    fn test_clone_falls_back_to_copy() {
        let table = HookTable::default();
        let att = Attachment::new("text/plain", "u", "a.txt", "m");
        let copy = table.clone_attachment(&att);
        assert_eq!(copy.url, "u");
        assert!(table.open(&att).is_none());
    }
}
