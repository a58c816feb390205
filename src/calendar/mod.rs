//! Calendar import capability.
//!
//! When a session opens a `text/calendar` part with direct import enabled,
//! the staged bytes go through a [`CalendarImporter`] and the resulting items
//! are committed by [`batch::import_items`]. Everything the coordinator
//! touches on the calendar side is behind the traits below.

pub mod batch;
pub mod ics;

use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// Kind of calendar component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ItemKind {
    Event,
    Todo,
}

/// One decoded calendar component.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CalendarItem {
    pub kind: ItemKind,
    pub uid: Option<String>,
    pub summary: Option<String>,
    /// The component as iCalendar text, `BEGIN:` to `END:`.
    pub raw: String,
}

/// Completion status of one calendar operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const OK: Self = Self(0);
    pub const FAILURE: Self = Self(0x8000_4005);
    /// The item's UID already exists in the calendar.
    pub const DUPLICATE_ID: Self = Self(0x805D_0001);

    /// Success codes have the high bit clear.
    pub fn is_success(self) -> bool {
        self.0 & 0x8000_0000 == 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Receives the completion of each `add_item`.
pub trait OperationListener: Send + Sync {
    fn on_operation_complete(&self, status: StatusCode);
}

/// A destination calendar.
pub trait Calendar: Send + Sync {
    fn name(&self) -> String;
    /// Suspend view updates until [`Calendar::end_batch`].
    fn start_batch(&self);
    fn end_batch(&self);
    /// Submit one item. `listener` is called exactly once unless this returns `Err`.
    fn add_item(&self, item: CalendarItem, listener: Arc<dyn OperationListener>) -> Result<()>;
}

/// Lists the available calendars.
pub trait CalendarManager: Send + Sync {
    fn calendars(&self) -> Vec<Arc<dyn Calendar>>;
}

/// Undo/redo history shared with the calendar application.
pub trait UndoManager: Send + Sync {
    fn begin_batch(&self);
    fn end_batch(&self);
    fn can_undo(&self) -> bool;
    fn can_redo(&self) -> bool;
}

/// Asks the user which calendar to import into.
pub trait CalendarChooser: Send + Sync {
    fn choose(
        &self,
        calendars: Vec<Arc<dyn Calendar>>,
        prompt: &str,
        on_chosen: Box<dyn FnOnce(Arc<dyn Calendar>) + Send>,
    );
}

/// Decodes staged bytes into calendar items.
pub trait CalendarImporter: Send + Sync {
    fn import_from_bytes(&self, data: &[u8]) -> Result<Vec<CalendarItem>>;
}

/// Outcome of one committed batch.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ImportSummary {
    pub calendar: String,
    pub source: String,
    pub total: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub last_error: Option<String>,
}

impl ImportSummary {
    /// Items that made it into the calendar.
    pub fn imported(&self) -> usize {
        self.total.saturating_sub(self.duplicates + self.failed)
    }

    /// The one message shown for this batch, if anything went wrong.
    pub fn message(&self) -> Option<String> {
        if self.failed > 0 {
            Some(format!(
                "Failed to import {} item(s) from {}: {}",
                self.failed,
                self.source,
                self.last_error.as_deref().unwrap_or("unknown error")
            ))
        } else if self.duplicates > 0 {
            Some(format!(
                "Skipped {} duplicate item(s) from {}",
                self.duplicates, self.source
            ))
        } else {
            None
        }
    }
}

/// Receives batch results and undo state changes.
pub trait ImportObserver: Send + Sync {
    fn on_import_finished(&self, summary: &ImportSummary);
    fn on_undo_state(&self, can_undo: bool, can_redo: bool);
}

/// Everything needed to import calendar parts directly.
#[derive(Clone)]
pub struct CalendarCapability {
    pub importer: Arc<dyn CalendarImporter>,
    pub manager: Arc<dyn CalendarManager>,
    pub undo: Arc<dyn UndoManager>,
    pub chooser: Option<Arc<dyn CalendarChooser>>,
    pub observer: Arc<dyn ImportObserver>,
}

impl fmt::Debug for CalendarCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalendarCapability")
            .field("chooser", &self.chooser.is_some())
            .finish_non_exhaustive()
    }
}
