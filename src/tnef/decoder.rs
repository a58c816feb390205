//! Built-in incremental TNEF decoder.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ signature: u32 LE = 0x223E9F78       │
//! │ legacy key: u16 LE                   │
//! ├──────────────────────────────────────┤
//! │ ATTRIBUTES (repeated)                │
//! │  level: u8 (1 = message, 2 = attach) │
//! │  id: u32 LE (low 16 bits = tag)      │
//! │  length: u32 LE                      │
//! │  data: [u8; length]                  │
//! │  checksum: u16 LE (byte sum)         │
//! └──────────────────────────────────────┘
//! ```
//!
//! Only attachment-level attributes are interpreted. Part payloads are
//! forwarded as they arrive, part titles and dates are buffered until their
//! checksum has been read, and every other attribute is checksummed and
//! skipped.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, NaiveDate, Utc};
use encoding_rs::{Encoding, WINDOWS_1252};
use tracing::{debug, warn};

use super::{PartHandler, TnefDecoder};
use crate::error::{LookoutError, Result};
use crate::model::part::{MessageHeader, PartHeader};

/// TNEF stream signature.
pub const SIGNATURE: u32 = 0x223E_9F78;

const PREAMBLE_LEN: usize = 6;
const ATTR_HEADER_LEN: usize = 9;
const CHECKSUM_LEN: usize = 2;

/// Largest title or date attribute we are willing to buffer (16 MB).
const MAX_BUFFERED_ATTRIBUTE: u32 = 16 * 1024 * 1024;

const LEVEL_ATTACHMENT: u8 = 0x02;

const TAG_ATTACH_DATA: u16 = 0x800F;
const TAG_ATTACH_TITLE: u16 = 0x8010;
const TAG_ATTACH_MODIFY_DATE: u16 = 0x8013;
const TAG_ATTACH_REND_DATA: u16 = 0x9002;

#[derive(Debug, Clone, Copy)]
struct AttrHeader {
    level: u8,
    id: u32,
    length: u32,
}

impl AttrHeader {
    fn tag(&self) -> u16 {
        (self.id & 0xFFFF) as u16
    }

    fn is_part_data(&self) -> bool {
        self.level == LEVEL_ATTACHMENT && self.tag() == TAG_ATTACH_DATA
    }

    /// Attributes whose body is read once complete.
    fn is_buffered(&self) -> bool {
        self.level == LEVEL_ATTACHMENT
            && matches!(self.tag(), TAG_ATTACH_TITLE | TAG_ATTACH_MODIFY_DATE)
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Preamble,
    AttrHeader,
    AttrBody { attr: AttrHeader, remaining: u32 },
    Checksum { attr: AttrHeader },
    Failed,
}

/// Streaming decoder for the attachment attributes of a TNEF container.
pub struct StreamDecoder {
    stage: Stage,
    /// Partially received fixed-size field.
    pending: Vec<u8>,
    /// Body of the current title or date attribute.
    body: Vec<u8>,
    checksum: u16,
    /// Bytes consumed so far.
    offset: u64,
    part_offset: u64,
    title: Option<String>,
    date: Option<DateTime<Utc>>,
    encoding: &'static Encoding,
}

impl StreamDecoder {
    /// Create a decoder. The message charset, if any, is used for part names.
    pub fn new(header: Option<&MessageHeader>) -> Self {
        let encoding = header
            .and_then(|h| h.charset.as_deref())
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .unwrap_or(WINDOWS_1252);
        Self {
            stage: Stage::Preamble,
            pending: Vec::with_capacity(ATTR_HEADER_LEN),
            body: Vec::new(),
            checksum: 0,
            offset: 0,
            part_offset: 0,
            title: None,
            date: None,
            encoding,
        }
    }

    /// Move up to `len - pending` bytes from `chunk` into the pending buffer.
    /// Returns the field once complete.
    fn take_fixed(&mut self, chunk: &mut &[u8], len: usize) -> Option<Vec<u8>> {
        let n = (len - self.pending.len()).min(chunk.len());
        self.pending.extend_from_slice(&chunk[..n]);
        *chunk = &chunk[n..];
        self.offset += n as u64;
        if self.pending.len() == len {
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }

    fn fail(&mut self, reason: String) -> LookoutError {
        self.stage = Stage::Failed;
        LookoutError::decode(self.offset, reason)
    }

    fn begin_attribute(&mut self, attr: AttrHeader, handler: &mut dyn PartHandler) -> Result<()> {
        self.checksum = 0;
        self.body.clear();

        if attr.is_part_data() {
            let filename = self.title.clone();
            let content_type = filename
                .as_deref()
                .and_then(content_type_for_name)
                .map(str::to_string);
            debug!(
                offset = self.offset,
                length = attr.length,
                name = filename.as_deref().unwrap_or(""),
                "TNEF part start"
            );
            handler.on_part_start(PartHeader {
                filename,
                content_type,
                length: u64::from(attr.length),
                date: self.date,
            });
            self.part_offset = 0;
        } else if attr.is_buffered() && attr.length > MAX_BUFFERED_ATTRIBUTE {
            return Err(self.fail(format!(
                "attribute {:#010x} too large ({} bytes)",
                attr.id, attr.length
            )));
        }

        self.stage = Stage::AttrBody {
            attr,
            remaining: attr.length,
        };
        Ok(())
    }

    fn end_attribute(&mut self, attr: AttrHeader, handler: &mut dyn PartHandler) {
        if attr.level != LEVEL_ATTACHMENT {
            return;
        }
        match attr.tag() {
            TAG_ATTACH_REND_DATA => {
                self.title = None;
                self.date = None;
            }
            TAG_ATTACH_TITLE => {
                let raw = self.body.split(|&b| b == 0).next().unwrap_or(&[]);
                let (name, _) = self.encoding.decode_without_bom_handling(raw);
                self.title = Some(name.into_owned()).filter(|n| !n.is_empty());
            }
            TAG_ATTACH_MODIFY_DATE => self.date = parse_date(&self.body),
            TAG_ATTACH_DATA => handler.on_part_end(),
            _ => {}
        }
    }
}

impl TnefDecoder for StreamDecoder {
    fn feed(&mut self, mut chunk: &[u8], handler: &mut dyn PartHandler) -> Result<()> {
        while !chunk.is_empty() {
            match self.stage {
                Stage::Failed => return Ok(()),
                Stage::Preamble => {
                    let Some(bytes) = self.take_fixed(&mut chunk, PREAMBLE_LEN) else {
                        break;
                    };
                    let signature = LittleEndian::read_u32(&bytes[..4]);
                    if signature != SIGNATURE {
                        return Err(self.fail(format!("bad signature {signature:#010x}")));
                    }
                    debug!(key = LittleEndian::read_u16(&bytes[4..]), "TNEF stream");
                    self.stage = Stage::AttrHeader;
                }
                Stage::AttrHeader => {
                    let Some(bytes) = self.take_fixed(&mut chunk, ATTR_HEADER_LEN) else {
                        break;
                    };
                    let attr = AttrHeader {
                        level: bytes[0],
                        id: LittleEndian::read_u32(&bytes[1..5]),
                        length: LittleEndian::read_u32(&bytes[5..9]),
                    };
                    self.begin_attribute(attr, handler)?;
                }
                Stage::AttrBody { attr, remaining } => {
                    let n = (remaining as usize).min(chunk.len());
                    let (data, rest) = chunk.split_at(n);
                    chunk = rest;
                    self.offset += n as u64;
                    self.checksum = data
                        .iter()
                        .fold(self.checksum, |sum, &b| sum.wrapping_add(u16::from(b)));

                    if attr.is_part_data() {
                        if !data.is_empty() {
                            handler.on_part_data(self.part_offset, data);
                            self.part_offset += n as u64;
                        }
                    } else if attr.is_buffered() {
                        self.body.extend_from_slice(data);
                    }

                    let remaining = remaining - n as u32;
                    self.stage = if remaining == 0 {
                        Stage::Checksum { attr }
                    } else {
                        Stage::AttrBody { attr, remaining }
                    };
                }
                Stage::Checksum { attr } => {
                    let Some(bytes) = self.take_fixed(&mut chunk, CHECKSUM_LEN) else {
                        break;
                    };
                    let declared = LittleEndian::read_u16(&bytes);
                    if declared != self.checksum {
                        warn!(
                            offset = self.offset,
                            attribute = attr.id,
                            declared,
                            computed = self.checksum,
                            "TNEF checksum mismatch"
                        );
                    }
                    self.end_attribute(attr, handler);
                    self.stage = Stage::AttrHeader;
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self, _handler: &mut dyn PartHandler) -> Result<()> {
        match self.stage {
            Stage::Failed => Ok(()),
            Stage::Preamble | Stage::AttrHeader if self.pending.is_empty() => Ok(()),
            _ => Err(self.fail("stream ended inside an attribute".to_string())),
        }
    }
}

/// Decode a TNEF date: seven little-endian u16 (year, month, day, hour,
/// minute, second, weekday).
fn parse_date(data: &[u8]) -> Option<DateTime<Utc>> {
    if data.len() < 12 {
        return None;
    }
    let field = |i: usize| u32::from(LittleEndian::read_u16(&data[i * 2..i * 2 + 2]));
    NaiveDate::from_ymd_opt(field(0) as i32, field(1), field(2))?
        .and_hms_opt(field(3), field(4), field(5))
        .map(|dt| dt.and_utc())
}

/// Content type for well-known extensions. TNEF legacy attributes carry none.
pub fn content_type_for_name(name: &str) -> Option<&'static str> {
    let (_, ext) = name.rsplit_once('.')?;
    let content_type = match ext.to_ascii_lowercase().as_str() {
        "ics" | "vcs" => "text/calendar",
        "txt" => "text/plain",
        "htm" | "html" => "text/html",
        "rtf" => "application/rtf",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "xls" => "application/vnd.ms-excel",
        "ppt" => "application/vnd.ms-powerpoint",
        "zip" => "application/zip",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        _ => return None,
    };
    Some(content_type)
}
