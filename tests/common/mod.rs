//! Shared helpers for the integration tests: a TNEF byte builder and an
//! in-memory host.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use lookout::error::Result;
use lookout::host::{HookTable, Host, ResolvedPart, StreamListener, StreamRequest};
use lookout::model::attachment::Attachment;

pub const MESSAGE_ID: &str = "<msg-1@example.com>";
pub const CONTAINER_URL: &str = "imap://mail/INBOX/42?part=1.2";

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

// ── TNEF builder ────────────────────────────────────────────────

fn attribute(level: u8, id: u32, data: &[u8]) -> Vec<u8> {
    let mut out = vec![level];
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    let sum = data.iter().fold(0u16, |s, &b| s.wrapping_add(u16::from(b)));
    out.extend_from_slice(&sum.to_le_bytes());
    out
}

/// A TNEF container holding `parts` as (title, payload) in order.
pub fn tnef(parts: &[(&str, &[u8])]) -> Vec<u8> {
    let raw: Vec<(&[u8], &[u8])> = parts.iter().map(|(t, p)| (t.as_bytes(), *p)).collect();
    tnef_raw(&raw)
}

/// Like [`tnef`], with titles given as raw (legacy charset) bytes.
pub fn tnef_raw(parts: &[(&[u8], &[u8])]) -> Vec<u8> {
    let mut out = 0x223E_9F78u32.to_le_bytes().to_vec();
    out.extend_from_slice(&0x0102u16.to_le_bytes());
    out.extend(attribute(0x01, 0x0007_8008, b"IPM.Microsoft Mail.Note\0"));
    for (title, payload) in parts {
        out.extend(attribute(0x02, 0x0006_9002, &[0u8; 14]));
        let mut name = title.to_vec();
        name.push(0);
        out.extend(attribute(0x02, 0x0001_8010, &name));
        out.extend(attribute(0x02, 0x0006_800F, payload));
    }
    out
}

pub const INVITE: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
BEGIN:VEVENT\r\n\
UID:one@example.com\r\n\
SUMMARY:First\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:two@example.com\r\n\
SUMMARY:Second\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

// ── Fake host ───────────────────────────────────────────────────

/// Host whose streams are served from in-memory payloads.
///
/// Streams run synchronously inside `open_attachment_stream` unless the
/// host is deferred, in which case they queue until the test drives them.
pub struct FakeHost {
    pub hooks: Arc<HookTable>,
    pub displayed: Mutex<Option<String>>,
    pub listed: Mutex<Vec<Arc<Attachment>>>,
    pub payloads: Mutex<HashMap<String, Vec<u8>>>,
    pub chunk_size: usize,
    pub deferred: bool,
    pub pending: Mutex<Vec<Box<dyn StreamListener>>>,
    pub requests: Mutex<Vec<StreamRequest>>,
    pub opened: Mutex<Vec<ResolvedPart>>,
    pub saved: Mutex<Vec<ResolvedPart>>,
    pub redraws: AtomicUsize,
}

impl FakeHost {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            hooks: Arc::new(HookTable::default()),
            displayed: Mutex::new(Some(MESSAGE_ID.to_string())),
            listed: Mutex::new(Vec::new()),
            payloads: Mutex::new(HashMap::new()),
            chunk_size,
            deferred: false,
            pending: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            saved: Mutex::new(Vec::new()),
            redraws: AtomicUsize::new(0),
        }
    }

    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// List a TNEF attachment served from `bytes`.
    pub fn add_container(&self, bytes: Vec<u8>) -> Arc<Attachment> {
        let att = Arc::new(
            Attachment::new("application/ms-tnef", CONTAINER_URL, "winmail.dat", MESSAGE_ID)
                .with_length(bytes.len() as u64),
        );
        self.payloads
            .lock()
            .unwrap()
            .insert(CONTAINER_URL.to_string(), bytes);
        self.listed.lock().unwrap().push(Arc::clone(&att));
        att
    }

    /// List an ordinary attachment.
    pub fn add_plain(&self, attachment: Attachment) -> Arc<Attachment> {
        let att = Arc::new(attachment);
        self.listed.lock().unwrap().push(Arc::clone(&att));
        att
    }

    /// Sub-attachments registered so far.
    pub fn parts(&self) -> Vec<Arc<Attachment>> {
        self.listed
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.container.is_some())
            .cloned()
            .collect()
    }

    pub fn set_displayed(&self, message_id: Option<&str>) {
        *self.displayed.lock().unwrap() = message_id.map(str::to_string);
    }

    pub fn payload(&self, url: &str) -> Vec<u8> {
        self.payloads.lock().unwrap().get(url).cloned().unwrap_or_default()
    }

    /// Feed `listener` the whole payload of `url` and stop it.
    pub fn pump(&self, url: &str, listener: &mut dyn StreamListener) {
        listener.on_start_request();
        let bytes = self.payload(url);
        let mut status = Ok(());
        for chunk in bytes.chunks(self.chunk_size.max(1)) {
            if let Err(e) = listener.on_data_available(chunk) {
                status = Err(e);
                break;
            }
        }
        let _ = listener.on_stop_request(status);
    }

    /// Streams queued by a deferred host.
    pub fn take_pending(&self) -> Vec<Box<dyn StreamListener>> {
        std::mem::take(&mut *self.pending.lock().unwrap())
    }
}

impl Host for FakeHost {
    fn hooks(&self) -> Option<Arc<HookTable>> {
        Some(Arc::clone(&self.hooks))
    }

    fn displayed_message_id(&self) -> Option<String> {
        self.displayed.lock().unwrap().clone()
    }

    fn attachments(&self) -> Vec<Arc<Attachment>> {
        self.listed.lock().unwrap().clone()
    }

    fn append_attachment(&self, attachment: Attachment) {
        self.listed.lock().unwrap().push(Arc::new(attachment));
    }

    fn clear_attachment_view(&self) {}

    fn redraw_attachment_view(&self) {
        self.redraws.fetch_add(1, Ordering::SeqCst);
    }

    fn open_attachment_stream(&self, request: StreamRequest, mut listener: Box<dyn StreamListener>) {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);
        if self.deferred {
            self.pending.lock().unwrap().push(listener);
        } else {
            self.pump(&url, listener.as_mut());
        }
    }

    fn open_file(&self, part: &ResolvedPart) -> Result<()> {
        self.opened.lock().unwrap().push(part.clone());
        Ok(())
    }

    fn save_file(&self, part: &ResolvedPart) -> Result<()> {
        self.saved.lock().unwrap().push(part.clone());
        Ok(())
    }
}

/// Contents of the `file://` part handed to the host.
pub fn read_part(part: &ResolvedPart) -> Vec<u8> {
    let path = lookout::sink::path_from_file_url(&part.url).unwrap();
    std::fs::read(path).unwrap()
}
