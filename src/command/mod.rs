//! Platform-specific command construction for SSM `SendCommand` payloads.
//!
//! The Linux/Windows split is a tagged variant dispatched through one trait
//! (`CommandBuilder`), not a subclass hierarchy — see `for_platform`.

mod linux;
mod path;
mod windows;

pub use path::{quote_posix, quote_powershell, reject_herestring_sentinel};

use crate::error::Result;
use crate::platform::Platform;

/// Maximum single echo-pipe payload before switching to a chunked here-doc.
pub const INLINE_PAYLOAD_THRESHOLD_BYTES: usize = 4096;

/// An SSM document name plus the shell command(s) to send as its parameter.
pub struct WrappedCommand {
    pub document_name: &'static str,
    pub commands: Vec<String>,
}

/// Platform-specific rendering of the operations the engine needs to perform
/// on a remote instance via SSM `SendCommand`.
pub trait CommandBuilder: Send + Sync {
    fn document_name(&self) -> &'static str;

    /// Wrap a user-supplied command with entry/exit instrumentation so the
    /// exit code can be recovered from stdout via `parse_exit_code`.
    fn wrap_exec(&self, command: &str) -> WrappedCommand;

    fn file_exists(&self, path: &str) -> Result<WrappedCommand>;
    fn file_size(&self, path: &str) -> Result<WrappedCommand>;
    fn mkdir_p(&self, path: &str) -> Result<WrappedCommand>;
    fn read_file(&self, path: &str) -> Result<WrappedCommand>;

    /// `append` is used automatically when `payload` exceeds
    /// `INLINE_PAYLOAD_THRESHOLD_BYTES` after base64 encoding.
    fn write_file(&self, path: &str, payload_base64: &str, append: bool) -> Result<WrappedCommand>;
}

/// Selects the builder implementation for a detected platform.
pub fn for_platform(platform: Platform) -> Box<dyn CommandBuilder> {
    match platform {
        Platform::Windows => Box::new(windows::WindowsCommandBuilder),
        Platform::Linux | Platform::Unknown => Box::new(linux::LinuxCommandBuilder),
    }
}

/// Extract the last `EXIT_CODE:N` marker from command output, scanning from
/// the end since prior output lines may themselves contain the substring.
pub fn parse_exit_code(output: &str) -> Option<i32> {
    output
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix("EXIT_CODE:").and_then(|n| n.trim().parse().ok()))
}

/// Parse a `EXISTS`/`NOT_EXISTS` literal, falling back to exit-code semantics
/// (0 => exists) when the literal is absent.
pub fn parse_exists(output: &str, exit_code: Option<i32>) -> bool {
    let trimmed = output.trim();
    if trimmed.contains("NOT_EXISTS") {
        false
    } else if trimmed.contains("EXISTS") {
        true
    } else {
        exit_code == Some(0)
    }
}

/// Parse a file-size response: first line of numeric output, trimmed.
pub fn parse_file_size(output: &str) -> Option<u64> {
    output.lines().next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exit_code_from_last_marker_scanning_backwards() {
        let output = "some program output\nEXIT_CODE:0\n";
        assert_eq!(parse_exit_code(output), Some(0));
    }

    #[test]
    fn parses_last_exit_code_when_output_contains_marker_text() {
        let output = "echo EXIT_CODE:99 happened earlier\nEXIT_CODE:2\n";
        assert_eq!(parse_exit_code(output), Some(2));
    }

    #[test]
    fn missing_marker_returns_none() {
        assert_eq!(parse_exit_code("no marker here"), None);
    }

    #[test]
    fn parse_exists_prefers_literal_over_exit_code() {
        assert!(parse_exists("EXISTS\n", Some(1)));
        assert!(!parse_exists("NOT_EXISTS\n", Some(0)));
    }

    #[test]
    fn parse_exists_falls_back_to_exit_code() {
        assert!(parse_exists("", Some(0)));
        assert!(!parse_exists("", Some(1)));
        assert!(!parse_exists("", None));
    }

    #[test]
    fn parse_file_size_reads_first_line() {
        assert_eq!(parse_file_size("1024\n"), Some(1024));
        assert_eq!(parse_file_size("  42  \nextra\n"), Some(42));
        assert_eq!(parse_file_size("not a number"), None);
    }

    #[test]
    fn for_platform_selects_linux_for_unknown() {
        let builder = for_platform(Platform::Unknown);
        assert_eq!(builder.document_name(), "AWS-RunShellScript");
    }

    #[test]
    fn for_platform_selects_windows() {
        let builder = for_platform(Platform::Windows);
        assert_eq!(builder.document_name(), "AWS-RunPowerShellScript");
    }
}
