//! One TNEF container stream, from first byte to close.
//!
//! A [`StreamSession`] is the [`StreamListener`] handed to the host's
//! streaming-open primitive. Every chunk is checked against the displayed
//! message, fed to the decoder, and the decoder's part callbacks drive the
//! action for the session's mode:
//!
//! - **Scan** registers one sub-attachment per part.
//! - **Open** / **Save** write the requested part to a sink and hand the
//!   result to the host (or to the calendar importer).
//!
//! ```text
//! Idle ─chunk─▶ Streaming ─start─▶ PartHeader ─▶ PartBody ─end─▶ PartComplete
//!                  ▲                                                │
//!                  └────────────────────────────────────────────────┘
//! any ─stop / abort / identity mismatch─▶ Closed
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::calendar::{batch, CalendarCapability};
use crate::error::{LookoutError, Result};
use crate::host::{refresh_attachment_view, Host, ResolvedPart, StreamListener};
use crate::model::attachment::Attachment;
use crate::model::part::PartHeader;
use crate::sink::{self, PartSink, SinkRequest, StagedPart};
use crate::tnef::{PartHandler, TnefDecoder};

/// What a session does with the parts it decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionMode {
    Scan,
    Open,
    Save,
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    PartHeader,
    PartBody,
    PartComplete,
    Closed,
}

/// Session-wide settings taken from the configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub direct_to_calendar: bool,
    pub temp_dir: PathBuf,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            direct_to_calendar: false,
            temp_dir: std::env::temp_dir(),
        }
    }
}

/// The part currently being written.
#[derive(Debug)]
struct ActivePart {
    sink: PartSink,
    display_name: String,
    content_type: String,
    failed: bool,
}

/// Per-part state driven by the decoder callbacks.
struct Dispatch {
    container: Arc<Attachment>,
    message_id: String,
    mode: ActionMode,
    requested_part: u32,
    part_counter: u32,
    state: SessionState,
    active: Option<ActivePart>,
    satisfied: bool,
    host: Arc<dyn Host>,
    calendar: Option<CalendarCapability>,
    settings: SessionSettings,
}

/// Listener for one container stream.
pub struct StreamSession {
    decoder: Box<dyn TnefDecoder>,
    dispatch: Dispatch,
    started: bool,
}

impl StreamSession {
    /// Build a session over `container`.
    ///
    /// `message_id` binds the session to the message it was started for;
    /// `requested_part` 0 means every part.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        container: Arc<Attachment>,
        message_id: impl Into<String>,
        mode: ActionMode,
        requested_part: u32,
        decoder: Box<dyn TnefDecoder>,
        host: Arc<dyn Host>,
        calendar: Option<CalendarCapability>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            decoder,
            dispatch: Dispatch {
                container,
                message_id: message_id.into(),
                mode,
                requested_part,
                part_counter: 1,
                state: SessionState::Idle,
                active: None,
                satisfied: false,
                host,
                calendar,
                settings,
            },
            started: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.dispatch.state
    }

    pub fn mode(&self) -> ActionMode {
        self.dispatch.mode
    }

    /// Index the next completed part will get.
    pub fn part_counter(&self) -> u32 {
        self.dispatch.part_counter
    }

    pub fn has_open_sink(&self) -> bool {
        self.dispatch.active.is_some()
    }

    /// `true` once the first chunk has arrived.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Fail with `ProtocolViolation` if the host now displays another message.
    fn check_identity(&mut self) -> Result<()> {
        let Some(displayed) = self.dispatch.host.displayed_message_id() else {
            // Standalone message window: nothing to compare against.
            return Ok(());
        };
        if displayed == self.dispatch.message_id {
            return Ok(());
        }
        warn!(
            expected = %self.dispatch.message_id,
            displayed = %displayed,
            container = %self.dispatch.container.url,
            "Displayed message changed, aborting stream"
        );
        self.dispatch.close();
        Err(LookoutError::ProtocolViolation {
            expected: self.dispatch.message_id.clone(),
            found: displayed,
        })
    }
}

impl StreamListener for StreamSession {
    fn on_start_request(&mut self) {
        debug!(
            container = %self.dispatch.container.url,
            mode = ?self.dispatch.mode,
            requested_part = self.dispatch.requested_part,
            "Stream requested"
        );
    }

    fn on_data_available(&mut self, chunk: &[u8]) -> Result<()> {
        if self.dispatch.state == SessionState::Closed {
            return Err(LookoutError::ProtocolViolation {
                expected: self.dispatch.message_id.clone(),
                found: String::from("<closed session>"),
            });
        }
        self.check_identity()?;

        if !self.started {
            self.started = true;
            self.dispatch.state = SessionState::Streaming;
        }
        if self.dispatch.satisfied {
            // Let the transport drain without further side effects.
            return Ok(());
        }

        if let Err(e) = self.decoder.feed(chunk, &mut self.dispatch) {
            warn!(container = %self.dispatch.container.url, error = %e, "TNEF decoding failed");
        }
        Ok(())
    }

    fn on_stop_request(&mut self, status: Result<()>) -> Result<()> {
        if self.dispatch.state == SessionState::Closed {
            return Ok(());
        }
        if let Err(e) = &status {
            warn!(container = %self.dispatch.container.url, error = %e, "Transport failed");
        }
        let identity = self.check_identity();
        if identity.is_ok() && status.is_ok() && !self.dispatch.satisfied {
            if let Err(e) = self.decoder.finish(&mut self.dispatch) {
                warn!(container = %self.dispatch.container.url, error = %e, "TNEF stream incomplete");
            }
        }
        self.dispatch.close();
        debug!(container = %self.dispatch.container.url, "Stream closed");
        identity
    }
}

impl Dispatch {
    fn wants(&self, part: u32) -> bool {
        self.requested_part == 0 || self.requested_part == part
    }

    /// Release everything and refuse further work.
    fn close(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(name = %active.display_name, "Discarding unfinished part");
            active.sink.discard();
        }
        self.state = SessionState::Closed;
    }

    fn register_part(&self, header: &PartHeader, name: String, content_type: String) {
        let index = self.part_counter;
        let url = Attachment::part_url(&self.container.url, index);
        debug!(url = %url, name = %name, content_type = %content_type, "Adding sub-attachment");
        let part = Attachment {
            content_type,
            url,
            display_name: name,
            message_id: self.message_id.clone(),
            length: Some(header.length),
            date: header.date,
            container: Some(Arc::clone(&self.container)),
            part_index: index,
            handlers: Default::default(),
        };
        self.host.append_attachment(part);
        refresh_attachment_view(self.host.as_ref());
    }

    fn open_sink(&mut self, name: String, content_type: String) {
        let request = SinkRequest {
            mode: self.mode,
            content_type: &content_type,
            leaf_name: &name,
            direct_to_calendar: self.settings.direct_to_calendar,
            calendar_available: self.calendar.is_some(),
            temp_dir: &self.settings.temp_dir,
        };
        match sink::select_sink(&request) {
            Ok(sink) => {
                self.active = Some(ActivePart {
                    sink,
                    display_name: name,
                    content_type,
                    failed: false,
                });
            }
            Err(e) => warn!(name = %name, error = %e, "Could not open part sink"),
        }
    }

    /// Run the mode's action on a finished part.
    fn deliver(&self, staged: StagedPart, display_name: String, content_type: String) -> Result<()> {
        let path = match staged {
            StagedPart::Memory(bytes) => return self.import_calendar(&bytes, &display_name),
            StagedPart::File(path) => path,
        };
        let part = ResolvedPart {
            content_type,
            url: sink::file_url(&path),
            display_name,
            message_id: self.message_id.clone(),
        };
        match self.mode {
            ActionMode::Open => {
                info!(url = %part.url, "Opening attachment");
                self.host.open_file(&part)
            }
            ActionMode::Save => {
                info!(url = %part.url, "Saving attachment");
                self.host.save_file(&part)
            }
            ActionMode::Scan => Ok(()),
        }
    }

    fn import_calendar(&self, bytes: &[u8], source: &str) -> Result<()> {
        let Some(capability) = &self.calendar else {
            return Err(LookoutError::HostDelegation(
                "calendar part staged without a calendar capability".into(),
            ));
        };
        let items = match capability.importer.import_from_bytes(bytes) {
            Ok(items) => items,
            Err(e) => {
                warn!(source, error = %e, "Could not read calendar part");
                Vec::new()
            }
        };
        info!(source, items = items.len(), "Importing calendar part");
        batch::import_items(capability, items, source);
        Ok(())
    }
}

impl PartHandler for Dispatch {
    fn on_part_start(&mut self, header: PartHeader) {
        if self.state == SessionState::Closed || self.satisfied {
            return;
        }
        if self.state == SessionState::PartBody {
            // The previous part never ended; its index stays taken.
            warn!(part = self.part_counter, "Part started before previous one ended");
            if let Some(stale) = self.active.take() {
                stale.sink.discard();
            }
            self.part_counter += 1;
        }
        self.state = SessionState::PartHeader;

        let name = header.leaf_name(self.part_counter);
        let content_type = header.content_type_or_default();

        match self.mode {
            ActionMode::Scan => self.register_part(&header, name, content_type),
            ActionMode::Open | ActionMode::Save => {
                if self.wants(self.part_counter) {
                    debug!(
                        part = self.part_counter,
                        name = %name,
                        length = header.length,
                        "Decoding requested part"
                    );
                    self.open_sink(name, content_type);
                }
            }
        }
        self.state = SessionState::PartBody;
    }

    fn on_part_data(&mut self, _offset: u64, data: &[u8]) {
        let Some(active) = self.active.as_mut().filter(|a| !a.failed) else {
            return;
        };
        if let Err(e) = active.sink.write(data) {
            warn!(name = %active.display_name, error = %e, "Part write failed");
            active.failed = true;
        }
    }

    fn on_part_end(&mut self) {
        if self.state == SessionState::Closed || self.satisfied {
            return;
        }
        self.state = SessionState::PartComplete;

        if let Some(active) = self.active.take() {
            let ActivePart {
                sink,
                display_name,
                content_type,
                failed,
            } = active;
            if failed {
                sink.discard();
            } else {
                match sink.finish() {
                    Ok(staged) => {
                        if let Err(e) = self.deliver(staged, display_name, content_type) {
                            warn!(part = self.part_counter, error = %e, "Attachment action failed");
                        }
                    }
                    Err(e) => warn!(name = %display_name, error = %e, "Could not finish part"),
                }
            }
            refresh_attachment_view(self.host.as_ref());
        }

        if self.requested_part != 0 && self.part_counter == self.requested_part {
            self.satisfied = true;
        }
        self.part_counter += 1;
        self.state = SessionState::Streaming;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HookTable, StreamRequest};
    use std::sync::Mutex;

    /// Replays a fixed list of callbacks on the first `feed`.
    enum Step {
        Start(&'static str),
        Data(&'static [u8]),
        End,
        Run(Box<dyn FnOnce() + Send>),
    }

    struct Scripted(Vec<Step>);

    impl TnefDecoder for Scripted {
        fn feed(&mut self, _chunk: &[u8], handler: &mut dyn PartHandler) -> Result<()> {
            let mut offset = 0;
            for step in self.0.drain(..) {
                match step {
                    Step::Start(name) => handler.on_part_start(PartHeader {
                        filename: Some(name.to_string()),
                        content_type: None,
                        length: 0,
                        date: None,
                    }),
                    Step::Data(data) => {
                        handler.on_part_data(offset, data);
                        offset += data.len() as u64;
                    }
                    Step::End => handler.on_part_end(),
                    Step::Run(f) => f(),
                }
            }
            Ok(())
        }
        fn finish(&mut self, _handler: &mut dyn PartHandler) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        displayed: Mutex<Option<String>>,
        appended: Mutex<Vec<Attachment>>,
        opened: Mutex<Vec<ResolvedPart>>,
        saved: Mutex<Vec<ResolvedPart>>,
        reject_actions: bool,
    }

    impl Host for Recorder {
        fn hooks(&self) -> Option<Arc<HookTable>> {
            None
        }
        fn displayed_message_id(&self) -> Option<String> {
            self.displayed.lock().unwrap().clone()
        }
        fn attachments(&self) -> Vec<Arc<Attachment>> {
            Vec::new()
        }
        fn append_attachment(&self, attachment: Attachment) {
            self.appended.lock().unwrap().push(attachment);
        }
        fn clear_attachment_view(&self) {}
        fn redraw_attachment_view(&self) {}
        fn open_attachment_stream(&self, _request: StreamRequest, _listener: Box<dyn StreamListener>) {}
        fn open_file(&self, part: &ResolvedPart) -> Result<()> {
            self.opened.lock().unwrap().push(part.clone());
            if self.reject_actions {
                return Err(LookoutError::HostDelegation("no viewer".into()));
            }
            Ok(())
        }
        fn save_file(&self, part: &ResolvedPart) -> Result<()> {
            self.saved.lock().unwrap().push(part.clone());
            Ok(())
        }
    }

    fn session(
        host: &Arc<Recorder>,
        mode: ActionMode,
        requested: u32,
        steps: Vec<Step>,
        dir: &std::path::Path,
    ) -> StreamSession {
        let container = Arc::new(Attachment::new(
            "application/ms-tnef",
            "mailbox://inbox/1?part=1.2",
            "winmail.dat",
            "msg-1",
        ));
        let host: Arc<dyn Host> = host.clone();
        StreamSession::new(
            container,
            "msg-1",
            mode,
            requested,
            Box::new(Scripted(steps)),
            host,
            None,
            SessionSettings {
                direct_to_calendar: false,
                temp_dir: dir.to_path_buf(),
            },
        )
    }

    fn two_parts() -> Vec<Step> {
        vec![
            Step::Start("C:\\docs\\a.txt"),
            Step::Data(b"alpha"),
            Step::End,
            Step::Start("b.txt"),
            Step::Data(b"beta"),
            Step::End,
        ]
    }

    #[test]
    fn test_scan_registers_every_part() {
        let tmp = tempfile::tempdir().unwrap();
        let host = Arc::new(Recorder::default());
        let mut s = session(&host, ActionMode::Scan, 0, two_parts(), tmp.path());
        assert_eq!(s.state(), SessionState::Idle);

        s.on_start_request();
        s.on_data_available(b"x").unwrap();
        assert_eq!(s.state(), SessionState::Streaming);
        assert!(s.is_started());
        s.on_stop_request(Ok(())).unwrap();
        assert_eq!(s.state(), SessionState::Closed);

        let appended = host.appended.lock().unwrap();
        assert_eq!(appended.len(), 2);
        assert_eq!(appended[0].display_name, "a.txt");
        assert_eq!(appended[0].part_index, 1);
        assert_eq!(appended[0].url, "mailbox://inbox/1?part=1.2.1");
        assert_eq!(appended[0].content_type, "application/binary");
        assert_eq!(appended[1].part_index, 2);
        assert!(host.opened.lock().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_save_only_requested_part() {
        let tmp = tempfile::tempdir().unwrap();
        let host = Arc::new(Recorder::default());
        let mut s = session(&host, ActionMode::Save, 2, two_parts(), tmp.path());
        s.on_data_available(b"x").unwrap();
        s.on_data_available(b"ignored").unwrap();
        s.on_stop_request(Ok(())).unwrap();

        let saved = host.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].display_name, "b.txt");
        assert_eq!(std::fs::read(tmp.path().join("b.txt")).unwrap(), b"beta");
        assert!(!tmp.path().join("a.txt").exists());
        assert_eq!(s.part_counter(), 3);
    }

    #[test]
    fn test_identity_mismatch_closes_without_action() {
        let tmp = tempfile::tempdir().unwrap();
        let host = Arc::new(Recorder::default());
        *host.displayed.lock().unwrap() = Some("msg-2".into());
        let mut s = session(&host, ActionMode::Open, 1, two_parts(), tmp.path());

        let err = s.on_data_available(b"x").unwrap_err();
        assert!(matches!(err, LookoutError::ProtocolViolation { .. }));
        assert_eq!(s.state(), SessionState::Closed);
        assert!(s.on_data_available(b"x").is_err());
        assert!(host.opened.lock().unwrap().is_empty());
    }

    #[test]
    fn test_open_without_request_opens_every_part() {
        let tmp = tempfile::tempdir().unwrap();
        let host = Arc::new(Recorder::default());
        *host.displayed.lock().unwrap() = Some("msg-1".into());
        let mut s = session(&host, ActionMode::Open, 0, two_parts(), tmp.path());
        s.on_data_available(b"x").unwrap();
        s.on_stop_request(Ok(())).unwrap();
        assert_eq!(host.opened.lock().unwrap().len(), 2);
        assert!(!s.has_open_sink());
    }

    #[test]
    fn test_failed_open_does_not_stop_later_parts() {
        let tmp = tempfile::tempdir().unwrap();
        let host = Arc::new(Recorder {
            reject_actions: true,
            ..Recorder::default()
        });
        let mut s = session(&host, ActionMode::Open, 0, two_parts(), tmp.path());
        s.on_data_available(b"x").unwrap();
        s.on_stop_request(Ok(())).unwrap();

        let opened = host.opened.lock().unwrap();
        let names: Vec<&str> = opened.iter().map(|p| p.display_name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(s.part_counter(), 3);
    }

    #[test]
    fn test_sink_failure_skips_only_that_part() {
        let tmp = tempfile::tempdir().unwrap();
        // A plain file where the temp directory should be: the first sink
        // cannot be created.
        let staging = tmp.path().join("staging");
        std::fs::write(&staging, b"in the way").unwrap();

        let fix = staging.clone();
        let steps = vec![
            Step::Start("a.txt"),
            Step::Data(b"alpha"),
            Step::End,
            Step::Run(Box::new(move || {
                std::fs::remove_file(&fix).unwrap();
                std::fs::create_dir(&fix).unwrap();
            })),
            Step::Start("b.txt"),
            Step::Data(b"beta"),
            Step::End,
        ];
        let host = Arc::new(Recorder::default());
        let mut s = session(&host, ActionMode::Save, 0, steps, &staging);
        s.on_data_available(b"x").unwrap();
        s.on_stop_request(Ok(())).unwrap();

        let saved = host.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].display_name, "b.txt");
        assert_eq!(std::fs::read(staging.join("b.txt")).unwrap(), b"beta");
        assert!(!staging.join("a.txt").exists());
        assert_eq!(s.part_counter(), 3);
    }

    #[test]
    fn test_unterminated_part_keeps_its_index() {
        let tmp = tempfile::tempdir().unwrap();
        let host = Arc::new(Recorder::default());
        let steps = vec![
            Step::Start("a.txt"),
            Step::Data(b"alpha"),
            Step::Start("b.txt"),
            Step::Data(b"beta"),
            Step::End,
        ];
        let mut s = session(&host, ActionMode::Scan, 0, steps, tmp.path());
        s.on_data_available(b"x").unwrap();
        s.on_stop_request(Ok(())).unwrap();

        let appended = host.appended.lock().unwrap();
        let indexes: Vec<u32> = appended.iter().map(|a| a.part_index).collect();
        assert_eq!(indexes, vec![1, 2]);
        assert_eq!(s.part_counter(), 3);
    }
}
