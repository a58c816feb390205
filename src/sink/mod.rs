//! Destinations for decoded part bytes.
//!
//! A part is either written to an exclusive temp file or staged in memory
//! for a direct calendar import.

pub mod unique;

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{LookoutError, Result};
use crate::model::attachment::CALENDAR_CONTENT_TYPE;
use crate::session::ActionMode;

/// Attempts at claiming a fresh temp file before giving up.
const CREATE_ATTEMPTS: usize = 8;

/// Everything the selector looks at.
#[derive(Debug, Clone, Copy)]
pub struct SinkRequest<'a> {
    pub mode: ActionMode,
    pub content_type: &'a str,
    pub leaf_name: &'a str,
    pub direct_to_calendar: bool,
    pub calendar_available: bool,
    pub temp_dir: &'a Path,
}

impl SinkRequest<'_> {
    /// Stage in memory only for an Open of a calendar part with direct import
    /// enabled and a calendar capability bound.
    pub fn wants_memory(&self) -> bool {
        self.mode == ActionMode::Open
            && self.direct_to_calendar
            && self.calendar_available
            && self
                .content_type
                .eq_ignore_ascii_case(CALENDAR_CONTENT_TYPE)
    }
}

/// An open destination for one part.
#[derive(Debug)]
pub enum PartSink {
    File {
        path: PathBuf,
        writer: BufWriter<File>,
    },
    Memory(Vec<u8>),
}

/// A finished part, ready for its action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedPart {
    File(PathBuf),
    Memory(Vec<u8>),
}

/// Open the sink `request` calls for.
pub fn select_sink(request: &SinkRequest<'_>) -> Result<PartSink> {
    if request.wants_memory() {
        debug!(name = request.leaf_name, "Staging calendar part in memory");
        return Ok(PartSink::Memory(Vec::new()));
    }
    PartSink::temp_file(request.temp_dir, request.leaf_name)
}

impl PartSink {
    /// Create an exclusive, uniquely named file for `leaf_name` in `dir`.
    pub fn temp_file(dir: &Path, leaf_name: &str) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| LookoutError::io(dir, e))?;

        for _ in 0..CREATE_ATTEMPTS {
            let path = unique::unique_path(dir, leaf_name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    debug!(path = %path.display(), "Opened part file");
                    return Ok(Self::File {
                        path,
                        writer: BufWriter::new(file),
                    });
                }
                // Lost a race with another writer; resolve again.
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(LookoutError::io(&path, e)),
            }
        }
        Err(LookoutError::Sink(format!(
            "no free name for '{leaf_name}' in {} after {CREATE_ATTEMPTS} attempts",
            dir.display()
        )))
    }

    /// Append one fragment.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::File { path, writer } => writer
                .write_all(data)
                .map_err(|e| LookoutError::io(path.as_path(), e)),
            Self::Memory(buf) => {
                buf.extend_from_slice(data);
                Ok(())
            }
        }
    }

    /// Flush and close.
    pub fn finish(self) -> Result<StagedPart> {
        match self {
            Self::File { path, writer } => {
                let file = writer
                    .into_inner()
                    .map_err(|e| LookoutError::io(&path, e.into_error()))?;
                file.sync_all().map_err(|e| LookoutError::io(&path, e))?;
                Ok(StagedPart::File(path))
            }
            Self::Memory(buf) => Ok(StagedPart::Memory(buf)),
        }
    }

    /// Drop without producing a part; a partially written file is removed.
    pub fn discard(self) {
        if let Self::File { path, writer } = self {
            drop(writer);
            if let Err(e) = std::fs::remove_file(&path) {
                debug!(path = %path.display(), error = %e, "Could not remove discarded part file");
            }
        }
    }
}

/// `file://` URL for a local path.
pub fn file_url(path: &Path) -> String {
    let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let display = path.to_string_lossy().replace('\\', "/");
    if display.starts_with('/') {
        format!("file://{display}")
    } else {
        format!("file:///{display}")
    }
}

/// Local path of a `file://` URL produced by [`file_url`].
pub fn path_from_file_url(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("file://")?;
    let bytes = rest.as_bytes();
    // `file:///C:/dir` names `C:/dir`.
    if bytes.len() > 2 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':' {
        return Some(PathBuf::from(&rest[1..]));
    }
    Some(PathBuf::from(rest))
}
