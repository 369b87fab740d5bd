//! Storage key derivation for uploaded files.
//!
//! Two mutually exclusive policies exist and one is picked per deployment:
//! - [`KeyPolicy::SanitizedDated`] keeps a cleaned-up version of the client's
//!   file name under a `YYYYMM` partition. Re-uploading the same name in the
//!   same month lands on the same key and overwrites the earlier object.
//! - [`KeyPolicy::RandomOpaque`] uses a fresh UUID plus the original
//!   extension, so keys never collide.
//!
//! Derivation is total: degenerate input yields [`PLACEHOLDER_NAME`], never
//! an error or an empty key.

use chrono::{DateTime, Datelike, Utc};
use clap::ValueEnum;
use uuid::Uuid;

/// Name used when nothing usable survives sanitization.
pub const PLACEHOLDER_NAME: &str = "unnamed_file";

/// Longest key accepted from clients and produced by [`KeyPolicy`].
pub const MAX_KEY_LEN: usize = 1024;

/// Longest single path segment a derived key contains.
pub const MAX_SEGMENT_LEN: usize = 255;

/// Extensions longer than this are not worth keeping when shortening a name.
const MAX_EXTENSION_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum KeyPolicy {
    #[default]
    SanitizedDated,
    RandomOpaque,
}

impl KeyPolicy {
    /// Derive the storage key for `original_name`, optionally nested under
    /// `dir_hint`. `now` supplies the month partition.
    ///
    /// The result never exceeds [`MAX_KEY_LEN`]: the name is shortened to
    /// [`MAX_SEGMENT_LEN`] and trailing directory segments are dropped until
    /// the whole key fits.
    pub fn derive_key(
        self,
        original_name: Option<&str>,
        dir_hint: Option<&str>,
        now: DateTime<Utc>,
    ) -> String {
        let leaf = match self {
            KeyPolicy::SanitizedDated => format!(
                "{:04}{:02}/{}",
                now.year(),
                now.month(),
                sanitize_filename(original_name)
            ),
            KeyPolicy::RandomOpaque => {
                format!("{}{}", Uuid::new_v4(), file_extension(original_name))
            }
        };
        let budget = MAX_KEY_LEN - leaf.len() - 1;
        match normalize_dir(dir_hint).and_then(|dir| fit_dir(&dir, budget)) {
            Some(dir) => format!("{}/{}", dir, leaf),
            None => leaf,
        }
    }
}

/// Keep as many leading segments of `dir` as fit in `budget` bytes.
fn fit_dir(dir: &str, budget: usize) -> Option<String> {
    let mut end = 0;
    for (idx, _) in dir.match_indices('/').chain(std::iter::once((dir.len(), ""))) {
        if idx > budget {
            break;
        }
        end = idx;
    }
    (end > 0).then(|| dir[..end].to_string())
}

/// Shorten an already cleaned (ASCII-only) segment to `max` bytes, keeping a
/// short extension when there is one.
fn shorten(segment: &str, max: usize) -> String {
    if segment.len() <= max {
        return segment.to_string();
    }
    let ext = segment
        .rfind('.')
        .map(|idx| &segment[idx..])
        .filter(|ext| ext.len() <= MAX_EXTENSION_LEN)
        .unwrap_or_default();
    let stem = segment[..max - ext.len()].trim_end_matches(|c| matches!(c, '.' | '_' | '-'));
    if stem.is_empty() {
        segment[..max].to_string()
    } else {
        format!("{}{}", stem, ext)
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Reduce a client file name to `[a-zA-Z0-9._-]`.
///
/// Whitespace runs become `_`, everything else outside the set is dropped,
/// runs of `_` or `.` collapse to one and `.`/`_`/`-` are trimmed from both
/// ends. Collapsing dots means no `..` can survive.
pub fn sanitize_filename(name: Option<&str>) -> String {
    name.and_then(clean_segment)
        .unwrap_or_else(|| PLACEHOLDER_NAME.to_string())
}

fn clean_segment(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut in_whitespace = false;
    for c in raw.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                out.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        if !is_allowed(c) {
            continue;
        }
        if matches!(c, '_' | '.') && out.ends_with(c) {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches(|c| matches!(c, '.' | '_' | '-'));
    (!trimmed.is_empty()).then(|| shorten(trimmed, MAX_SEGMENT_LEN))
}

/// Extension of `name` including the dot, restricted to ASCII alphanumerics.
/// Empty when there is no dot or the extension is implausibly long.
pub fn file_extension(name: Option<&str>) -> String {
    let Some(name) = name else {
        return String::new();
    };
    let Some(idx) = name.rfind('.') else {
        return String::new();
    };
    let ext: String = name[idx + 1..].chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if ext.is_empty() || ext.len() >= MAX_EXTENSION_LEN {
        String::new()
    } else {
        format!(".{}", ext)
    }
}

/// Trim slashes from a directory hint and clean each segment.
///
/// Segments are sanitized like file names; empty and dot-only segments are
/// dropped. Returns `None` when nothing remains.
pub fn normalize_dir(dir_hint: Option<&str>) -> Option<String> {
    let segments: Vec<String> = dir_hint?
        .trim_matches('/')
        .split('/')
        .filter_map(clean_segment)
        .collect();
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Join a client-chosen file name under an optional directory hint without
/// rewriting the name. The result still has to pass [`validate_key`].
pub fn join_dir(dir_hint: Option<&str>, name: &str) -> String {
    match dir_hint.map(|d| d.trim_matches('/')).filter(|d| !d.is_empty()) {
        Some(dir) => format!("{}/{}", dir, name),
        None => name.to_string(),
    }
}

/// Reject keys that cannot be used as given: empty, too long, absolute,
/// containing a `..` segment, control characters or backslashes.
pub fn validate_key(key: &str) -> Result<(), &'static str> {
    if key.is_empty() {
        return Err("key is empty");
    }
    if key.len() > MAX_KEY_LEN {
        return Err("key is too long");
    }
    if key.starts_with('/') {
        return Err("key must not start with `/`");
    }
    if key.split('/').any(|segment| segment == ".." || segment == ".") {
        return Err("key must not contain relative path segments");
    }
    if key.chars().any(|c| c.is_control() || c == '\\') {
        return Err("key contains control characters or backslashes");
    }
    Ok(())
}
