//! Transactional commit of decoded calendar items.
//!
//! A batch opens an undo batch and a calendar batch, submits every item with
//! itself as completion listener, and closes the calendar batch once the
//! number of completions equals the number of items. Completions may arrive
//! synchronously from `add_item` or later from another thread.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use super::{
    Calendar, CalendarCapability, CalendarItem, ImportObserver, ImportSummary,
    OperationListener, StatusCode,
};
use crate::error::LookoutError;

/// Prompt handed to the calendar chooser.
pub const IMPORT_PROMPT: &str = "Import into which calendar?";

#[derive(Debug, Default)]
struct BatchProgress {
    completed: usize,
    duplicates: usize,
    failed: usize,
    last_error: Option<String>,
}

/// One in-flight import into one calendar.
pub struct ImportBatch {
    calendar: Arc<dyn Calendar>,
    total: usize,
    source: String,
    observer: Arc<dyn ImportObserver>,
    progress: Mutex<BatchProgress>,
}

impl ImportBatch {
    fn new(
        calendar: Arc<dyn Calendar>,
        total: usize,
        source: &str,
        observer: Arc<dyn ImportObserver>,
    ) -> Self {
        Self {
            calendar,
            total,
            source: source.to_string(),
            observer,
            progress: Mutex::new(BatchProgress::default()),
        }
    }

    /// Current counters.
    pub fn summary(&self) -> ImportSummary {
        let progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        self.summary_of(&progress)
    }

    /// `true` once every submitted item has completed.
    pub fn is_complete(&self) -> bool {
        let progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        progress.completed >= self.total
    }

    fn summary_of(&self, progress: &BatchProgress) -> ImportSummary {
        ImportSummary {
            calendar: self.calendar.name(),
            source: self.source.clone(),
            total: self.total,
            duplicates: progress.duplicates,
            failed: progress.failed,
            last_error: progress.last_error.clone(),
        }
    }

    /// Count one completion. `None` is a completion synthesized for an item
    /// whose submission already failed and was counted.
    fn record(&self, status: Option<StatusCode>) {
        let summary = {
            let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
            progress.completed += 1;
            match status {
                Some(StatusCode::DUPLICATE_ID) => progress.duplicates += 1,
                Some(status) if !status.is_success() => {
                    progress.failed += 1;
                    progress.last_error = Some(status.to_string());
                }
                _ => {}
            }
            if progress.completed != self.total {
                return;
            }
            self.summary_of(&progress)
        };
        self.finish(&summary);
    }

    fn record_submit_error(&self, err: &LookoutError) {
        {
            let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
            progress.failed += 1;
            progress.last_error = Some(err.to_string());
        }
        self.record(None);
    }

    fn finish(&self, summary: &ImportSummary) {
        self.calendar.end_batch();
        match summary.message() {
            Some(message) => warn!(calendar = %summary.calendar, "{message}"),
            None => info!(
                calendar = %summary.calendar,
                imported = summary.imported(),
                source = %summary.source,
                "Imported calendar items"
            ),
        }
        self.observer.on_import_finished(summary);
    }
}

impl OperationListener for ImportBatch {
    fn on_operation_complete(&self, status: StatusCode) {
        self.record(Some(status));
    }
}

/// Import `items` into the single calendar, or let the chooser pick one
/// when several exist.
pub fn import_items(capability: &CalendarCapability, items: Vec<CalendarItem>, source: &str) {
    let mut calendars = capability.manager.calendars();
    match calendars.len() {
        0 => warn!(source, "No calendar available for import"),
        1 => {
            let calendar = calendars.remove(0);
            commit(capability, calendar, items, source);
        }
        _ => match &capability.chooser {
            Some(chooser) => {
                let capability = capability.clone();
                let source = source.to_string();
                chooser.choose(
                    calendars,
                    IMPORT_PROMPT,
                    Box::new(move |calendar| {
                        commit(&capability, calendar, items, &source);
                    }),
                );
            }
            None => warn!(
                source,
                calendars = calendars.len(),
                "Several calendars and no chooser, import skipped"
            ),
        },
    }
}

/// Commit `items` into `calendar` inside one undo batch.
pub fn commit(
    capability: &CalendarCapability,
    calendar: Arc<dyn Calendar>,
    items: Vec<CalendarItem>,
    source: &str,
) -> Arc<ImportBatch> {
    capability.undo.begin_batch();
    calendar.start_batch();

    let batch = Arc::new(ImportBatch::new(
        Arc::clone(&calendar),
        items.len(),
        source,
        Arc::clone(&capability.observer),
    ));

    if items.is_empty() {
        batch.finish(&batch.summary());
    }

    for item in items {
        let listener: Arc<dyn OperationListener> = batch.clone();
        if let Err(e) = calendar.add_item(item, listener) {
            warn!(error = %e, source, "Calendar item import failed");
            batch.record_submit_error(&e);
        }
    }

    capability.undo.end_batch();
    capability
        .observer
        .on_undo_state(capability.undo.can_undo(), capability.undo.can_redo());
    batch
}
