//! Minimal iCalendar importer: splits a `VCALENDAR` into its events and todos.

use super::{CalendarImporter, CalendarItem, ItemKind};
use crate::error::{LookoutError, Result};

/// Importer for `text/calendar` payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct IcsImporter;

impl CalendarImporter for IcsImporter {
    fn import_from_bytes(&self, data: &[u8]) -> Result<Vec<CalendarItem>> {
        parse_items(&String::from_utf8_lossy(data))
    }
}

/// Undo RFC 5545 line folding (a line starting with space or tab continues
/// the previous one).
fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        match (line.strip_prefix([' ', '\t']), lines.last_mut()) {
            (Some(rest), Some(prev)) => prev.push_str(rest),
            _ => lines.push(line.to_string()),
        }
    }
    lines
}

/// Property value of `line` if its name (before any `;` parameters) is `name`.
fn property<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    let key = key.split(';').next().unwrap_or(key);
    key.eq_ignore_ascii_case(name).then_some(value)
}

fn component_kind(name: &str) -> Option<ItemKind> {
    if name.eq_ignore_ascii_case("VEVENT") {
        Some(ItemKind::Event)
    } else if name.eq_ignore_ascii_case("VTODO") {
        Some(ItemKind::Todo)
    } else {
        None
    }
}

/// Parse every `VEVENT` / `VTODO` of a calendar document.
pub fn parse_items(text: &str) -> Result<Vec<CalendarItem>> {
    let lines = unfold(text);
    if !lines
        .iter()
        .any(|l| property(l, "BEGIN").is_some_and(|v| v.eq_ignore_ascii_case("VCALENDAR")))
    {
        return Err(LookoutError::decode(0, "not an iCalendar document"));
    }

    let mut items = Vec::new();
    let mut current: Option<(ItemKind, Vec<&str>)> = None;
    // Nested components (e.g. VALARM) must not end the item early.
    let mut depth = 0usize;

    for line in &lines {
        if let Some((kind, body)) = current.as_mut() {
            body.push(line);
            if property(line, "BEGIN").is_some() {
                depth += 1;
            } else if property(line, "END").is_some() {
                if depth > 0 {
                    depth -= 1;
                    continue;
                }
                let kind = *kind;
                let raw = body.join("\r\n");
                let top_level = |name: &str| {
                    let mut nested = 0usize;
                    body.iter().skip(1).find_map(|l| {
                        if property(l, "BEGIN").is_some() {
                            nested += 1;
                        } else if property(l, "END").is_some() {
                            nested = nested.saturating_sub(1);
                        } else if nested == 0 {
                            return property(l, name).map(str::to_string);
                        }
                        None
                    })
                };
                items.push(CalendarItem {
                    kind,
                    uid: top_level("UID"),
                    summary: top_level("SUMMARY"),
                    raw,
                });
                current = None;
            }
        } else if let Some(kind) = property(line, "BEGIN").and_then(component_kind) {
            current = Some((kind, vec![line.as_str()]));
            depth = 0;
        }
    }

    Ok(items)
}
