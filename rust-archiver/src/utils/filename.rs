//! Artifact file naming.
//!
//! Archived files carry their media identifier in the name, as
//! `<title> [<media id>].<ext>`, so the download directory alone is enough
//! to rebuild the completion ledger.

use std::path::Path;

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive)
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Extensions of files that are still being written and never count as
/// archived artifacts.
const INCOMPLETE_EXTENSIONS: &[&str] = &["part", "tmp", "ytdl"];

/// Sanitize a media title for use in a file name on any platform.
///
/// Invalid and control characters become `_` (runs collapse to one), the
/// square brackets that delimit the media id are replaced too, and leading
/// or trailing spaces and dots are trimmed. An empty result becomes
/// `"unnamed"`.
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) || c == '[' || c == ']' {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let upper = trimmed.to_uppercase();
    if WINDOWS_RESERVED_NAMES
        .iter()
        .any(|r| upper == *r || upper.starts_with(&format!("{r}.")))
    {
        return format!("_{trimmed}");
    }

    trimmed.to_string()
}

/// Media id as it appears inside the `[...]` of an artifact name.
///
/// Every character that is invalid in a file name, a bracket or whitespace
/// becomes `_`, one for one, so ids from extractors that use `/` or `:`
/// still yield a flat file name. Plain ids pass through unchanged.
pub fn artifact_media_id(media_id: &str) -> String {
    let id: String = media_id
        .trim()
        .chars()
        .map(|c| {
            if c.is_control()
                || c.is_whitespace()
                || WINDOWS_INVALID_CHARS.contains(&c)
                || c == '['
                || c == ']'
            {
                '_'
            } else {
                c
            }
        })
        .collect();
    if id.is_empty() { "_".to_string() } else { id }
}

/// Build the file name of an archived artifact.
pub fn artifact_file_name(title: &str, media_id: &str, extension: &str) -> String {
    format!(
        "{} [{}].{}",
        sanitize_filename(title),
        artifact_media_id(media_id),
        extension
    )
}

/// Extract the media id embedded in an artifact file name.
///
/// Returns `None` for names without a trailing `[id]` before the extension
/// and for files that are still being written.
pub fn extract_media_id(file_name: &str) -> Option<&str> {
    let path = Path::new(file_name);
    let extension = path.extension()?.to_str()?;
    if INCOMPLETE_EXTENSIONS
        .iter()
        .any(|e| extension.eq_ignore_ascii_case(e))
    {
        return None;
    }

    let stem = path.file_stem()?.to_str()?;
    let inner = stem.strip_suffix(']')?;
    let open = inner.rfind('[')?;
    let id = &inner[open + 1..];
    if id.is_empty() || id.contains(char::is_whitespace) {
        return None;
    }
    Some(id)
}
