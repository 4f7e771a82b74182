//! Parses the markdown-like document `browser_snapshot` returns into a
//! `NormalizedSnapshot`. The document always begins with three lines:
//!
//! ```text
//! - Page URL: https://example.com/account
//! - Page Title: Account settings
//! - Page Snapshot:
//!   - heading "Account settings" [level=1]
//!   ...
//! ```
//!
//! The engine never re-parses the indented outline itself — `content` is
//! preserved verbatim and searched by substring from predicates.

use crate::errors::EngineError;
use crate::types::NormalizedSnapshot;

const URL_PREFIX: &str = "- Page URL:";
const TITLE_PREFIX: &str = "- Page Title:";
const SNAPSHOT_MARKER: &str = "- Page Snapshot:";

/// Parse raw `browser_snapshot` text into a `NormalizedSnapshot`.
///
/// Fails with `EngineError::SnapshotValidation` (carrying the first 200
/// characters of `raw`) if any of the three required lines is missing.
pub fn parse_snapshot(raw: &str, screenshot_path: Option<String>) -> Result<NormalizedSnapshot, EngineError> {
    let mut url = None;
    let mut title = None;
    let mut marker_line_end = None;

    for line in raw.lines() {
        let trimmed = line.trim_start();
        if url.is_none() && trimmed.starts_with(URL_PREFIX) {
            url = Some(trimmed[URL_PREFIX.len()..].trim().to_string());
        } else if title.is_none() && trimmed.starts_with(TITLE_PREFIX) {
            title = Some(trimmed[TITLE_PREFIX.len()..].trim().to_string());
        } else if marker_line_end.is_none() && trimmed.starts_with(SNAPSHOT_MARKER) {
            // Record the byte offset just past this line so content can be
            // sliced out of the original (unmodified) text below.
            let offset = line_offset(raw, line);
            marker_line_end = Some(offset + line.len());
        }
    }

    let (url, title, marker_line_end) = match (url, title, marker_line_end) {
        (Some(u), Some(t), Some(m)) => (u, t, m),
        _ => return Err(EngineError::snapshot_validation(raw)),
    };

    let content = raw[marker_line_end..].trim_start_matches(['\n', '\r']).to_string();

    Ok(NormalizedSnapshot {
        url,
        title,
        content,
        screenshot_path,
    })
}

/// Byte offset of `needle` (a line obtained via `raw.lines()`) within `raw`.
/// `str::lines()` guarantees each yielded slice is a subslice of `raw`, so
/// pointer arithmetic is safe here.
fn line_offset(raw: &str, needle: &str) -> usize {
    needle.as_ptr() as usize - raw.as_ptr() as usize
}
