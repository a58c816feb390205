//! A local, file-backed host.
//!
//! [`LocalHost`] presents one TNEF file on disk as the only attachment of a
//! message, streams it in fixed-size chunks, and records what the
//! interception layer asks it to open or save. [`DirCalendar`] stores
//! imported items as `<uid>.ics` files in a directory.
//!
//! Together they let the `lookout` binary drive the whole subsystem without
//! a mail client.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::calendar::{
    Calendar, CalendarCapability, CalendarItem, CalendarManager, ImportObserver, ImportSummary,
    OperationListener, StatusCode, UndoManager,
};
use crate::calendar::ics::IcsImporter;
use crate::error::{LookoutError, Result};
use crate::host::{HookTable, Host, ResolvedPart, StreamListener, StreamRequest};
use crate::model::attachment::{Attachment, TNEF_CONTENT_TYPES};
use crate::model::part::MessageHeader;
use crate::sink::{self, unique::unique_path};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Host ────────────────────────────────────────────────────────

/// One TNEF file presented as a message with a single attachment.
pub struct LocalHost {
    path: PathBuf,
    container: Arc<Attachment>,
    read_buffer_size: usize,
    output_dir: Option<PathBuf>,
    hooks: Arc<HookTable>,
    listed: Mutex<Vec<Arc<Attachment>>>,
    opened: Mutex<Vec<ResolvedPart>>,
    saved: Mutex<Vec<PathBuf>>,
    redraws: AtomicUsize,
}

impl LocalHost {
    /// Present `path` as a TNEF attachment, streamed in `read_buffer_size` chunks.
    pub fn open(path: &Path, read_buffer_size: usize) -> Result<Self> {
        let meta = std::fs::metadata(path).map_err(|e| LookoutError::io(path, e))?;
        if !meta.is_file() {
            return Err(LookoutError::InvalidPath(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "winmail.dat".to_string());
        let url = sink::file_url(path);
        let container = Attachment::new(TNEF_CONTENT_TYPES[0], url.clone(), display_name, url)
            .with_length(meta.len());
        let container = Arc::new(container);

        Ok(Self {
            path: path.to_path_buf(),
            container: Arc::clone(&container),
            read_buffer_size: read_buffer_size.max(1),
            output_dir: None,
            hooks: Arc::new(HookTable::default()),
            listed: Mutex::new(vec![container]),
            opened: Mutex::new(Vec::new()),
            saved: Mutex::new(Vec::new()),
            redraws: AtomicUsize::new(0),
        })
    }

    /// Copy saved parts into `dir`.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// The container attachment.
    pub fn container(&self) -> &Arc<Attachment> {
        &self.container
    }

    /// Identifier of the single message.
    pub fn message_id(&self) -> &str {
        &self.container.message_id
    }

    /// The attachment list is complete: fire the lifecycle notification.
    pub fn finish_loading(&self) {
        debug!(path = %self.path.display(), "Attachment list complete");
        self.hooks.end_all_attachments();
    }

    /// Attachments decoded from the container, in list order.
    pub fn parts(&self) -> Vec<Arc<Attachment>> {
        lock(&self.listed)
            .iter()
            .filter(|a| a.container.is_some())
            .cloned()
            .collect()
    }

    /// The part with 1-based index `part_index`.
    pub fn part(&self, part_index: u32) -> Option<Arc<Attachment>> {
        self.parts().into_iter().find(|a| a.part_index == part_index)
    }

    /// Parts handed to [`Host::open_file`].
    pub fn opened(&self) -> Vec<ResolvedPart> {
        lock(&self.opened).clone()
    }

    /// Destinations written by [`Host::save_file`].
    pub fn saved(&self) -> Vec<PathBuf> {
        lock(&self.saved).clone()
    }

    /// How often the attachment view was rebuilt.
    pub fn redraws(&self) -> usize {
        self.redraws.load(Ordering::SeqCst)
    }

    fn pump(&self, listener: &mut dyn StreamListener) -> Result<()> {
        let mut file = File::open(&self.path).map_err(|e| LookoutError::io(&self.path, e))?;
        let mut buf = vec![0u8; self.read_buffer_size];
        loop {
            let n = file
                .read(&mut buf)
                .map_err(|e| LookoutError::io(&self.path, e))?;
            if n == 0 {
                return Ok(());
            }
            listener.on_data_available(&buf[..n])?;
        }
    }
}

impl Host for LocalHost {
    fn hooks(&self) -> Option<Arc<HookTable>> {
        Some(Arc::clone(&self.hooks))
    }

    fn displayed_message_id(&self) -> Option<String> {
        Some(self.container.message_id.clone())
    }

    fn attachments(&self) -> Vec<Arc<Attachment>> {
        lock(&self.listed).clone()
    }

    fn append_attachment(&self, attachment: Attachment) {
        lock(&self.listed).push(Arc::new(attachment));
    }

    fn clear_attachment_view(&self) {}

    fn redraw_attachment_view(&self) {
        self.redraws.fetch_add(1, Ordering::SeqCst);
    }

    fn open_attachment_stream(&self, request: StreamRequest, mut listener: Box<dyn StreamListener>) {
        if request.url != self.container.url {
            warn!(url = %request.url, "No stream for this attachment");
            return;
        }
        listener.on_start_request();
        let status = self.pump(listener.as_mut());
        if let Err(e) = &status {
            debug!(url = %request.url, error = %e, "Stream cancelled");
        }
        if let Err(e) = listener.on_stop_request(status) {
            debug!(url = %request.url, error = %e, "Listener rejected stream end");
        }
    }

    fn open_file(&self, part: &ResolvedPart) -> Result<()> {
        info!(url = %part.url, content_type = %part.content_type, "Part ready to open");
        lock(&self.opened).push(part.clone());
        Ok(())
    }

    fn save_file(&self, part: &ResolvedPart) -> Result<()> {
        let staged = sink::path_from_file_url(&part.url)
            .ok_or_else(|| LookoutError::InvalidPath(part.url.clone()))?;
        let Some(dir) = &self.output_dir else {
            info!(path = %staged.display(), "Part kept in place");
            lock(&self.saved).push(staged);
            return Ok(());
        };
        std::fs::create_dir_all(dir).map_err(|e| LookoutError::io(dir, e))?;
        let dest = unique_path(dir, &part.display_name);
        std::fs::copy(&staged, &dest).map_err(|e| LookoutError::io(&dest, e))?;
        if let Err(e) = std::fs::remove_file(&staged) {
            debug!(path = %staged.display(), error = %e, "Could not remove staged part");
        }
        info!(path = %dest.display(), "Saved attachment");
        lock(&self.saved).push(dest);
        Ok(())
    }
}

/// Header lookup for the single local message.
#[derive(Debug, Clone)]
pub struct LocalHeaderLookup {
    header: MessageHeader,
}

impl LocalHeaderLookup {
    pub fn new(message_id: impl Into<String>, charset: Option<String>) -> Self {
        Self {
            header: MessageHeader {
                message_id: message_id.into(),
                charset,
            },
        }
    }
}

impl crate::intercept::HeaderLookup for LocalHeaderLookup {
    fn lookup(&self, message_id: &str) -> Option<MessageHeader> {
        (self.header.message_id == message_id).then(|| self.header.clone())
    }
}

// ── Calendar ────────────────────────────────────────────────────

/// A calendar stored as one `<uid>.ics` file per item.
#[derive(Debug)]
pub struct DirCalendar {
    dir: PathBuf,
    open_batches: AtomicUsize,
}

impl DirCalendar {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            open_batches: AtomicUsize::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `true` while a batch is open.
    pub fn in_batch(&self) -> bool {
        self.open_batches.load(Ordering::SeqCst) > 0
    }

    fn store(&self, uid: &str, item: &CalendarItem) -> StatusCode {
        let leaf: String = uid
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':' | '\0') { '_' } else { c })
            .collect();
        let path = self.dir.join(format!("{leaf}.ics"));
        let file = OpenOptions::new().write(true).create_new(true).open(&path);
        let mut file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(uid, "Item already in calendar");
                return StatusCode::DUPLICATE_ID;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not create calendar item");
                return StatusCode::FAILURE;
            }
        };
        let text = format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//lookout//EN\r\n{}\r\nEND:VCALENDAR\r\n",
            item.raw
        );
        match file.write_all(text.as_bytes()) {
            Ok(()) => StatusCode::OK,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not write calendar item");
                StatusCode::FAILURE
            }
        }
    }
}

impl Calendar for DirCalendar {
    fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.dir.display().to_string())
    }

    fn start_batch(&self) {
        self.open_batches.fetch_add(1, Ordering::SeqCst);
    }

    fn end_batch(&self) {
        let _ = self
            .open_batches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn add_item(&self, item: CalendarItem, listener: Arc<dyn OperationListener>) -> Result<()> {
        let Some(uid) = item.uid.clone() else {
            return Err(LookoutError::ImportItem(format!(
                "{:?} without UID",
                item.kind
            )));
        };
        std::fs::create_dir_all(&self.dir).map_err(|e| LookoutError::io(&self.dir, e))?;
        let status = self.store(&uid, &item);
        listener.on_operation_complete(status);
        Ok(())
    }
}

/// A fixed list of calendars.
#[derive(Default)]
pub struct CalendarList(pub Vec<Arc<dyn Calendar>>);

impl CalendarManager for CalendarList {
    fn calendars(&self) -> Vec<Arc<dyn Calendar>> {
        self.0.clone()
    }
}

/// Undo history that only counts committed batches.
#[derive(Debug, Default)]
pub struct Journal {
    depth: AtomicUsize,
    entries: AtomicUsize,
}

impl Journal {
    /// Number of completed top-level batches.
    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }
}

impl UndoManager for Journal {
    fn begin_batch(&self) {
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    fn end_batch(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.entries.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn can_undo(&self) -> bool {
        self.entries() > 0
    }

    fn can_redo(&self) -> bool {
        false
    }
}

/// Keeps every finished import summary.
#[derive(Debug, Default)]
pub struct SummaryLog {
    summaries: Mutex<Vec<ImportSummary>>,
}

impl SummaryLog {
    pub fn summaries(&self) -> Vec<ImportSummary> {
        lock(&self.summaries).clone()
    }
}

impl ImportObserver for SummaryLog {
    fn on_import_finished(&self, summary: &ImportSummary) {
        lock(&self.summaries).push(summary.clone());
    }

    fn on_undo_state(&self, can_undo: bool, can_redo: bool) {
        debug!(can_undo, can_redo, "Undo state changed");
    }
}

/// Calendar capability importing into the single directory calendar `dir`.
pub fn dir_calendar_capability(dir: impl Into<PathBuf>, observer: Arc<SummaryLog>) -> CalendarCapability {
    let calendar: Arc<dyn Calendar> = Arc::new(DirCalendar::new(dir));
    CalendarCapability {
        importer: Arc::new(IcsImporter),
        manager: Arc::new(CalendarList(vec![calendar])),
        undo: Arc::new(Journal::default()),
        chooser: None,
        observer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::ItemKind;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    struct Status(Mutex<Vec<StatusCode>>);

    impl OperationListener for Status {
        fn on_operation_complete(&self, status: StatusCode) {
            self.0.lock().unwrap().push(status);
        }
    }

    fn item(uid: Option<&str>) -> CalendarItem {
        CalendarItem {
            kind: ItemKind::Event,
            uid: uid.map(str::to_string),
            summary: None,
            raw: "BEGIN:VEVENT\r\nUID:x\r\nEND:VEVENT".into(),
        }
    }

    #[test]
    fn test_dir_calendar_reports_duplicates() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let cal = DirCalendar::new(tmp.path());
        let status = Arc::new(Status(Mutex::new(Vec::new())));
        cal.add_item(item(Some("a/1")), status.clone()).unwrap();
        cal.add_item(item(Some("a/1")), status.clone()).unwrap();
        assert_eq!(
            *status.0.lock().unwrap(),
            vec![StatusCode::OK, StatusCode::DUPLICATE_ID]
        );
        tmp.child("a_1.ics")
            .assert(predicate::str::contains("BEGIN:VEVENT"));
    }

    #[test]
    fn test_dir_calendar_rejects_missing_uid() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let cal = DirCalendar::new(tmp.path());
        let status = Arc::new(Status(Mutex::new(Vec::new())));
        assert!(cal.add_item(item(None), status.clone()).is_err());
        assert!(status.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_journal_counts_top_level_batches() {
        let journal = Journal::default();
        assert!(!journal.can_undo());
        journal.begin_batch();
        journal.begin_batch();
        journal.end_batch();
        assert_eq!(journal.entries(), 0);
        journal.end_batch();
        assert_eq!(journal.entries(), 1);
        assert!(journal.can_undo());
        journal.end_batch();
        assert_eq!(journal.entries(), 1);
    }

    #[test]
    fn test_local_host_rejects_directory() {
        let tmp = assert_fs::TempDir::new().unwrap();
        assert!(matches!(
            LocalHost::open(tmp.path(), 16),
            Err(LookoutError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_save_copies_with_unique_name() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let container = tmp.child("winmail.dat");
        container.write_binary(b"\x78\x9f\x3e\x22").unwrap();
        let out = tmp.child("out");
        out.child("a.txt").write_str("old").unwrap();
        let staged = tmp.child("staged.txt");
        staged.write_str("new").unwrap();

        let host = LocalHost::open(container.path(), 16)
            .unwrap()
            .with_output_dir(out.path());
        host.save_file(&ResolvedPart {
            content_type: "text/plain".into(),
            url: sink::file_url(staged.path()),
            display_name: "a.txt".into(),
            message_id: host.message_id().to_string(),
        })
        .unwrap();

        out.child("a-1.txt").assert("new");
        out.child("a.txt").assert("old");
        staged.assert(predicate::path::missing());
        assert_eq!(host.saved(), vec![out.child("a-1.txt").path().to_path_buf()]);
    }
}
