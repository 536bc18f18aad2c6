//! Cross-platform remote path validation and quoting.
//!
//! Platform-specific quoting/escaping lives here rather than in
//! `linux.rs`/`windows.rs` so both command builders share one definition of
//! "safe path" and one definition of "safe quoting".

use crate::error::{Result, SsmError};

fn reject_control_or_null(path: &str, field: &str) -> Result<()> {
    if path.chars().any(|c| c == '\0' || c.is_control()) {
        return Err(SsmError::InvalidArgument {
            field: field.to_string(),
            reason: "path contains a null or control byte".to_string(),
        });
    }
    Ok(())
}

fn has_traversal_component(path: &str, sep: char) -> bool {
    path.split(sep).any(|component| component == "..")
}

/// Normalize and validate a Linux remote path: backslashes become `/`,
/// traversal components and control bytes are rejected.
pub fn normalize_linux_path(path: &str) -> Result<String> {
    reject_control_or_null(path, "path")?;
    let normalized = path.replace('\\', "/");
    if has_traversal_component(&normalized, '/') {
        return Err(SsmError::InvalidArgument {
            field: "path".to_string(),
            reason: format!("path traversal is not allowed: {path}"),
        });
    }
    Ok(normalized)
}

/// Quote a value for embedding in a POSIX shell single-quoted string.
///
/// Uses the standard `'\''` technique: close the quote, emit an escaped
/// single quote, reopen the quote. This handles every possible input, so the
/// double-quote fallback documented in the design notes is never reached.
pub fn quote_posix(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'\''"#))
}

/// Normalize and validate a Windows remote path.
///
/// Accepts drive-letter paths (`C:\...`) and UNC paths
/// (`\\server\share\...`); rejects traversal and malformed UNC segments.
pub fn normalize_windows_path(path: &str) -> Result<String> {
    reject_control_or_null(path, "path")?;
    let normalized = path.replace('/', "\\");

    if let Some(rest) = normalized.strip_prefix(r"\\") {
        let mut parts = rest.splitn(2, '\\');
        let server = parts.next().unwrap_or("");
        let share = parts.next().unwrap_or("");
        validate_unc_segment(server, "server")?;
        validate_unc_segment(share, "share")?;
    } else {
        let mut chars = normalized.chars();
        let drive_letter_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
            && chars.next() == Some(':');
        if !drive_letter_ok {
            return Err(SsmError::InvalidArgument {
                field: "path".to_string(),
                reason: format!("not a drive-letter or UNC path: {path}"),
            });
        }
    }

    if has_traversal_component(&normalized, '\\') {
        return Err(SsmError::InvalidArgument {
            field: "path".to_string(),
            reason: format!("path traversal is not allowed: {path}"),
        });
    }

    Ok(normalized)
}

fn validate_unc_segment(segment: &str, name: &str) -> Result<()> {
    const FORBIDDEN: &[char] = &['/', ':', '<', '>', '|', '"', '?', '*'];
    if segment.is_empty() {
        return Err(SsmError::InvalidArgument {
            field: "path".to_string(),
            reason: format!("UNC {name} must not be empty"),
        });
    }
    if segment.starts_with('.') || segment.ends_with('.') || segment.contains("..") {
        return Err(SsmError::InvalidArgument {
            field: "path".to_string(),
            reason: format!("UNC {name} must not start/end with '.' or contain '..'"),
        });
    }
    if segment.chars().any(|c| FORBIDDEN.contains(&c)) {
        return Err(SsmError::InvalidArgument {
            field: "path".to_string(),
            reason: format!("UNC {name} contains a forbidden character"),
        });
    }
    Ok(())
}

/// Quote a value for embedding in a PowerShell single-quoted string.
pub fn quote_powershell(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Reject a PowerShell here-string body containing the terminator sentinel
/// (`'@` at the start of a line), which would truncate the script early.
pub fn reject_herestring_sentinel(body: &str) -> Result<()> {
    if body.lines().any(|line| line.trim_start() == "'@" || line == "'@") {
        return Err(SsmError::InvalidArgument {
            field: "payload".to_string(),
            reason: "payload contains the PowerShell here-string terminator sentinel ('@)"
                .to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_linux_backslashes() {
        assert_eq!(normalize_linux_path(r"a\b\c").unwrap(), "a/b/c");
    }

    #[test]
    fn rejects_linux_traversal() {
        assert!(normalize_linux_path("../etc/passwd").is_err());
        assert!(normalize_linux_path("a/../b").is_err());
    }

    #[test]
    fn rejects_null_and_control_bytes() {
        assert!(normalize_linux_path("a\0b").is_err());
        assert!(normalize_windows_path("C:\\a\0b").is_err());
    }

    #[test]
    fn quote_posix_escapes_embedded_quotes() {
        assert_eq!(quote_posix("it's"), r#"'it'\''s'"#);
        assert_eq!(quote_posix("plain"), "'plain'");
    }

    #[test]
    fn accepts_drive_letter_paths() {
        assert_eq!(normalize_windows_path("C:/Users/x").unwrap(), r"C:\Users\x");
    }

    #[test]
    fn rejects_unc_with_empty_share() {
        assert!(normalize_windows_path(r"\\server\").is_err());
        assert!(normalize_windows_path(r"\\\share").is_err());
    }

    #[test]
    fn accepts_valid_unc_path() {
        assert_eq!(
            normalize_windows_path(r"\\server\share\dir").unwrap(),
            r"\\server\share\dir"
        );
    }

    #[test]
    fn rejects_windows_traversal() {
        assert!(normalize_windows_path(r"C:\a\..\b").is_err());
    }

    #[test]
    fn rejects_unc_segment_with_forbidden_chars() {
        assert!(normalize_windows_path(r"\\ser*ver\share").is_err());
    }

    #[test]
    fn rejects_malformed_non_unc_non_drive_path() {
        assert!(normalize_windows_path("relative/path").is_err());
    }

    #[test]
    fn quote_powershell_escapes_embedded_quotes() {
        assert_eq!(quote_powershell("it's"), "'it''s'");
    }

    #[test]
    fn herestring_sentinel_detection() {
        assert!(reject_herestring_sentinel("normal base64 content").is_ok());
        assert!(reject_herestring_sentinel("line1\n'@\nline3").is_err());
        assert!(reject_herestring_sentinel("'@").is_err());
    }
}
