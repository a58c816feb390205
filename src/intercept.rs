//! Attachment interception registry.
//!
//! The [`Interceptor`] takes over the host's open, save and clone entry
//! points and its "all attachments parsed" notification. Attachments that
//! were not decoded from a TNEF container pass straight through to the
//! handler they had before; sub-attachments start a targeted stream session
//! on their container instead.
//!
//! Delegation order for a pass-through open/save:
//!
//! 1. the attachment's own captured handler,
//! 2. the host's original global handler,
//! 3. nothing (logged).

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, info, warn};

use crate::calendar::CalendarCapability;
use crate::config::{Config, StartupConfig};
use crate::error::{LookoutError, Result};
use crate::host::{ActionFn, CloneFn, Host, HookTable, LifecycleFn, StreamRequest};
use crate::model::attachment::Attachment;
use crate::model::part::MessageHeader;
use crate::session::{ActionMode, SessionSettings, StreamSession};
use crate::tnef::{default_decoder_factory, DecoderFactory};

/// A user action on one attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Open,
    Save,
}

/// Where an open/save call ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delegate {
    /// A new stream session on the TNEF container.
    Intercept,
    /// The handler the attachment carried itself.
    Instance,
    /// The host's original global handler.
    Original,
    /// No handler available.
    Unhandled,
}

/// Result of installing into the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed { attempts: u32 },
    /// Host globals never appeared; the subsystem stays inert.
    Incomplete { attempts: u32 },
}

/// One strategy for finding the header of a message.
pub trait HeaderLookup: Send + Sync {
    fn lookup(&self, message_id: &str) -> Option<MessageHeader>;
}

impl<F> HeaderLookup for F
where
    F: Fn(&str) -> Option<MessageHeader> + Send + Sync,
{
    fn lookup(&self, message_id: &str) -> Option<MessageHeader> {
        self(message_id)
    }
}

/// Handlers replaced at install time.
#[derive(Default)]
struct Originals {
    table: Option<Arc<HookTable>>,
    open: Option<ActionFn>,
    save: Option<ActionFn>,
    clone: Option<CloneFn>,
    end_all_attachments: Option<LifecycleFn>,
}

/// The interception registry. Build once, wrap in an `Arc`, then
/// [`install`](Interceptor::install).
pub struct Interceptor {
    host: Arc<dyn Host>,
    settings: SessionSettings,
    calendar: Option<CalendarCapability>,
    decoders: DecoderFactory,
    header_lookups: Vec<Box<dyn HeaderLookup>>,
    originals: Mutex<Originals>,
}

impl Interceptor {
    /// A registry for `host` with settings from `config` and the built-in decoder.
    pub fn new(host: Arc<dyn Host>, config: &Config) -> Self {
        Self {
            host,
            settings: SessionSettings {
                direct_to_calendar: config.calendar.direct_to_calendar,
                temp_dir: config.output.temp_dir(),
            },
            calendar: None,
            decoders: default_decoder_factory(),
            header_lookups: Vec::new(),
            originals: Mutex::new(Originals::default()),
        }
    }

    /// Bind the calendar import capability.
    pub fn with_calendar(mut self, calendar: CalendarCapability) -> Self {
        self.calendar = Some(calendar);
        self
    }

    /// Replace the decoder used by new sessions.
    pub fn with_decoder_factory(mut self, decoders: DecoderFactory) -> Self {
        self.decoders = decoders;
        self
    }

    /// Append a header lookup strategy. Strategies are tried in order.
    pub fn with_header_lookup(mut self, lookup: impl HeaderLookup + 'static) -> Self {
        self.header_lookups.push(Box::new(lookup));
        self
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    fn originals(&self) -> std::sync::MutexGuard<'_, Originals> {
        self.originals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_installed(&self) -> bool {
        self.originals().table.is_some()
    }

    /// Swap our handlers into the host. Returns `false` while the host's
    /// hook table does not exist yet.
    pub fn install(self: &Arc<Self>) -> bool {
        if self.is_installed() {
            return true;
        }
        let Some(table) = self.host.hooks() else {
            return false;
        };

        let weak = Arc::downgrade(self);
        let open: ActionFn = {
            let weak = Weak::clone(&weak);
            Arc::new(move |att: &Attachment| match weak.upgrade() {
                Some(this) => this.open_attachment(att),
                None => Ok(()),
            })
        };
        let save: ActionFn = {
            let weak = Weak::clone(&weak);
            Arc::new(move |att: &Attachment| match weak.upgrade() {
                Some(this) => this.save_attachment(att),
                None => Ok(()),
            })
        };
        let clone: CloneFn = {
            let weak = Weak::clone(&weak);
            Arc::new(move |att: &Attachment| match weak.upgrade() {
                Some(this) => this.clone_attachment(att),
                None => att.clone(),
            })
        };
        let end_all: LifecycleFn = Arc::new(move || {
            if let Some(this) = weak.upgrade() {
                this.on_end_all_attachments();
            }
        });

        let mut originals = self.originals();
        originals.open = table.open.replace(Some(open));
        originals.save = table.save.replace(Some(save));
        originals.clone = table.clone.replace(Some(clone));
        originals.end_all_attachments = table.end_all_attachments.replace(Some(end_all));
        originals.table = Some(table);
        info!("Attachment handlers installed");
        true
    }

    /// [`install`](Self::install), retrying while host initialization is incomplete.
    ///
    /// Blocks the calling thread for up to `wait_max` waits of `wait_time_ms`
    /// each; hosts with an event loop should call it off their UI thread.
    pub fn install_with_retry(self: &Arc<Self>, startup: &StartupConfig) -> InstallOutcome {
        let mut attempts = 1;
        while !self.install() {
            if attempts > startup.wait_max {
                let err = LookoutError::InitializationTimeout { attempts };
                warn!(error = %err, "Initialization incomplete, attachments will not be expanded");
                return InstallOutcome::Incomplete { attempts };
            }
            debug!(attempt = attempts, "Waiting for host initialization");
            std::thread::sleep(startup.wait_time());
            attempts += 1;
        }
        debug!(attempts, "Host initialization complete");
        InstallOutcome::Installed { attempts }
    }

    /// Put the host's original handlers back.
    pub fn uninstall(&self) {
        let originals = std::mem::take(&mut *self.originals());
        let Some(table) = originals.table else {
            return;
        };
        table.open.replace(originals.open);
        table.save.replace(originals.save);
        table.clone.replace(originals.clone);
        table.end_all_attachments.replace(originals.end_all_attachments);
        info!("Attachment handlers restored");
    }

    fn original(&self, action: Action) -> Option<ActionFn> {
        let originals = self.originals();
        match action {
            Action::Open => originals.open.clone(),
            Action::Save => originals.save.clone(),
        }
    }

    /// Where `action` on `attachment` would go.
    pub fn delegate_for(&self, action: Action, attachment: &Attachment) -> Delegate {
        if attachment.tnef_container().is_some() {
            return Delegate::Intercept;
        }
        let own = match action {
            Action::Open => attachment.handlers.open.is_some(),
            Action::Save => attachment.handlers.save.is_some(),
        };
        if own {
            Delegate::Instance
        } else if self.original(action).is_some() {
            Delegate::Original
        } else {
            Delegate::Unhandled
        }
    }

    fn dispatch(&self, action: Action, attachment: &Attachment) -> Result<()> {
        let delegate = self.delegate_for(action, attachment);
        debug!(
            url = %attachment.url,
            part = attachment.part_index,
            ?action,
            ?delegate,
            "Attachment action"
        );
        let handler = match delegate {
            Delegate::Intercept => {
                let Some(container) = attachment.tnef_container() else {
                    return Ok(());
                };
                let mode = match action {
                    Action::Open => ActionMode::Open,
                    Action::Save => ActionMode::Save,
                };
                self.start_session(
                    Arc::clone(container),
                    &attachment.message_id,
                    mode,
                    attachment.part_index,
                );
                return Ok(());
            }
            Delegate::Instance => match action {
                Action::Open => attachment.handlers.open.clone(),
                Action::Save => attachment.handlers.save.clone(),
            },
            Delegate::Original => self.original(action),
            Delegate::Unhandled => None,
        };
        match handler {
            Some(handler) => handler(attachment),
            None => {
                warn!(url = %attachment.url, ?action, "No handler for attachment action");
                Ok(())
            }
        }
    }

    /// Open `attachment`, decoding it from its container if needed.
    pub fn open_attachment(&self, attachment: &Attachment) -> Result<()> {
        self.dispatch(Action::Open, attachment)
    }

    /// Save `attachment`, decoding it from its container if needed.
    pub fn save_attachment(&self, attachment: &Attachment) -> Result<()> {
        self.dispatch(Action::Save, attachment)
    }

    /// Copy `attachment` through the original clone, keeping its container
    /// link and part index.
    pub fn clone_attachment(&self, attachment: &Attachment) -> Attachment {
        let original = self.originals().clone.clone();
        let mut copy = match original {
            Some(clone) => clone(attachment),
            None => attachment.clone(),
        };
        if attachment.tnef_container().is_some() {
            copy.container = attachment.container.clone();
            copy.part_index = attachment.part_index;
        }
        copy
    }

    /// The host has listed every attachment: expand the TNEF ones, then
    /// let the original notification run.
    pub fn on_end_all_attachments(&self) {
        let started = self.scan_for_tnef();
        debug!(containers = started, "Scanned attachment list");
        let original = self.originals().end_all_attachments.clone();
        if let Some(original) = original {
            original();
        }
    }

    /// Start one Scan session per listed TNEF container. Returns how many.
    pub fn scan_for_tnef(&self) -> usize {
        let mut started = 0;
        for attachment in self.host.attachments() {
            // Parts decoded from a container have no stream of their own.
            if !attachment.is_tnef() || attachment.container.is_some() {
                continue;
            }
            debug!(url = %attachment.url, "Found TNEF attachment");
            let message_id = attachment.message_id.clone();
            self.start_session(attachment, &message_id, ActionMode::Scan, 0);
            started += 1;
        }
        started
    }

    /// First header any lookup strategy finds.
    pub fn resolve_header(&self, message_id: &str) -> Option<MessageHeader> {
        let header = self
            .header_lookups
            .iter()
            .find_map(|lookup| lookup.lookup(message_id));
        if header.is_none() {
            debug!(message_id, "No message header for this message");
        }
        header
    }

    fn start_session(
        &self,
        container: Arc<Attachment>,
        message_id: &str,
        mode: ActionMode,
        requested_part: u32,
    ) {
        let header = self.resolve_header(message_id);
        debug!(
            message_id,
            charset = header.as_ref().and_then(|h| h.charset.as_deref()).unwrap_or(""),
            "Starting stream session"
        );
        let decoder = (self.decoders)(header.as_ref());
        let mut request = StreamRequest::for_attachment(&container);
        request.message_id = message_id.to_string();

        let session = StreamSession::new(
            container,
            message_id,
            mode,
            requested_part,
            decoder,
            Arc::clone(&self.host),
            self.calendar.clone(),
            self.settings.clone(),
        );

        self.host.open_attachment_stream(request, Box::new(session));
    }
}

impl Drop for Interceptor {
    fn drop(&mut self) {
        self.uninstall();
    }
}
