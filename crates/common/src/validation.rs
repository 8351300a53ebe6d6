//! Input validation for names that end up in file paths and stream URLs.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Maximum length for camera ids and clip ids
pub const MAX_ID_LENGTH: usize = 256;

/// Maximum length for an RTSP stream path
pub const MAX_STREAM_PATH_LENGTH: usize = 128;

fn stream_path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"^[a-z0-9][a-z0-9_\-]*$").expect("valid stream path regex")
    })
}

/// Derive a stream path from a camera display name: lowercase, spaces become
/// underscores, anything outside `[a-z0-9_-]` is dropped.
pub fn sanitize_stream_path(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            'a'..='z' | '0'..='9' | '_' | '-' => Some(c),
            _ => None,
        })
        .collect()
}

/// Validate non-empty string
pub fn validate_non_empty(value: &str, field_name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{} cannot be empty", field_name));
    }
    Ok(())
}

/// Validate an id coming back from the vendor before it is used in a file name
pub fn validate_id(id: &str, field_name: &str) -> Result<()> {
    validate_non_empty(id, field_name)?;
    if id.len() > MAX_ID_LENGTH {
        return Err(anyhow!(
            "{} exceeds maximum length of {} bytes (got {})",
            field_name,
            MAX_ID_LENGTH,
            id.len()
        ));
    }

    if id.contains("..") || id.contains('/') || id.contains('\\') {
        return Err(anyhow!(
            "{} contains invalid characters (no path separators or '..' allowed)",
            field_name
        ));
    }

    Ok(())
}

/// Validate a stream path as it will appear in `rtsp://host/<path>`
pub fn validate_stream_path(path: &str) -> Result<()> {
    validate_non_empty(path, "stream_path")?;
    if path.len() > MAX_STREAM_PATH_LENGTH {
        return Err(anyhow!(
            "stream_path exceeds maximum length of {} bytes",
            MAX_STREAM_PATH_LENGTH
        ));
    }
    if !stream_path_pattern().is_match(path) {
        return Err(anyhow!(
            "stream_path '{}' must match [a-z0-9][a-z0-9_-]*",
            path
        ));
    }
    Ok(())
}
