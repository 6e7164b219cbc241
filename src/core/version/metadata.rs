use crate::core::error::{PanelError, PanelResult};

/// Characters unsafe in Windows or POSIX file names, plus the metadata separator.
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*', '+'];

fn is_allowed(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '.' || ch == '-'
}

fn is_separator(ch: char) -> bool {
    ch == '.' || ch == '-'
}

/// Check that `metadata` can be used after the `+` of a version directory name.
///
/// Accepts Unicode letters and digits, `.` and `-`. Separators may not
/// start or end the string or repeat back to back. Empty is valid.
pub fn validate_metadata(metadata: &str) -> PanelResult<()> {
    let invalid = |reason: String| PanelError::InvalidMetadata {
        input: metadata.to_string(),
        reason,
    };

    if metadata.contains('+') {
        return Err(invalid("'+' separates version and metadata only once".into()));
    }

    for ch in metadata.chars() {
        if ch.is_control() {
            return Err(invalid(format!("control character U+{:04X}", ch as u32)));
        }
        if FORBIDDEN.contains(&ch) {
            return Err(invalid(format!("forbidden character '{ch}'")));
        }
        if !is_allowed(ch) {
            return Err(invalid(format!("unsupported character '{ch}'")));
        }
    }

    if metadata.starts_with(is_separator) || metadata.ends_with(is_separator) {
        return Err(invalid("may not start or end with '.' or '-'".into()));
    }
    if metadata.contains("..") || metadata.contains("--") {
        return Err(invalid("repeated '.' or '-'".into()));
    }

    Ok(())
}

/// Turn arbitrary user input into valid metadata.
///
/// Disallowed characters become `.`, runs of `.` or `-` collapse to one,
/// and leading/trailing separators are trimmed.
pub fn sanitize_metadata(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.trim().chars() {
        let mapped = if is_allowed(ch) { ch } else { '.' };
        if is_separator(mapped) && out.ends_with(mapped) {
            continue;
        }
        out.push(mapped);
    }
    out.trim_matches(is_separator).to_string()
}
