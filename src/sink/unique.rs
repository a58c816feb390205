//! Collision-free output paths.
//!
//! `report.txt` → `report-1.txt` → `report-2.txt` … An existing `-<digits>`
//! suffix in front of the extension is treated as a previous uniquifier and
//! counting continues from it.

use std::path::{Path, PathBuf};

/// A leaf name split around its uniquifier.
#[derive(Debug, PartialEq, Eq)]
struct LeafParts<'a> {
    prefix: &'a str,
    uniquifier: u64,
    extension: &'a str,
}

/// Split `leaf` into prefix, uniquifier and extension (extension keeps its dot).
fn split_leaf(leaf: &str) -> LeafParts<'_> {
    // A leading dot names a hidden file, not an extension.
    let (stem, extension) = match leaf.rfind('.') {
        Some(dot) if dot > 0 => leaf.split_at(dot),
        _ => (leaf, ""),
    };

    if let Some(dash) = stem.rfind('-') {
        let digits = &stem[dash + 1..];
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = digits.parse::<u64>() {
                return LeafParts {
                    prefix: &stem[..dash],
                    uniquifier: n,
                    extension,
                };
            }
        }
    }

    LeafParts {
        prefix: stem,
        uniquifier: 0,
        extension,
    }
}

/// Return `dir/leaf` if it is free, otherwise the first free
/// `dir/<prefix>-<n><ext>` counting up from the existing uniquifier.
pub fn unique_path(dir: &Path, leaf: &str) -> PathBuf {
    let candidate = dir.join(leaf);
    if !candidate.exists() {
        return candidate;
    }

    let parts = split_leaf(leaf);
    let mut n = parts.uniquifier;
    loop {
        n = n.saturating_add(1);
        let candidate = dir.join(format!("{}-{}{}", parts.prefix, n, parts.extension));
        if !candidate.exists() || n == u64::MAX {
            return candidate;
        }
    }
}
