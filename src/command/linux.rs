use super::path::{normalize_linux_path, quote_posix};
use super::{CommandBuilder, WrappedCommand, INLINE_PAYLOAD_THRESHOLD_BYTES};
use crate::error::Result;

pub struct LinuxCommandBuilder;

impl CommandBuilder for LinuxCommandBuilder {
    fn document_name(&self) -> &'static str {
        "AWS-RunShellScript"
    }

    fn wrap_exec(&self, command: &str) -> WrappedCommand {
        WrappedCommand {
            document_name: self.document_name(),
            commands: vec![format!(
                "set -e\n{command}\nEXIT_CODE=$?\necho \"EXIT_CODE:$EXIT_CODE\"\nexit $EXIT_CODE"
            )],
        }
    }

    fn file_exists(&self, path: &str) -> Result<WrappedCommand> {
        let path = normalize_linux_path(path)?;
        let quoted = quote_posix(&path);
        Ok(WrappedCommand {
            document_name: self.document_name(),
            commands: vec![format!("test -e {quoted} && echo EXISTS || echo NOT_EXISTS")],
        })
    }

    fn file_size(&self, path: &str) -> Result<WrappedCommand> {
        let path = normalize_linux_path(path)?;
        let quoted = quote_posix(&path);
        Ok(WrappedCommand {
            document_name: self.document_name(),
            commands: vec![format!("stat -c %s {quoted} 2>/dev/null || stat -f %z {quoted}")],
        })
    }

    fn mkdir_p(&self, path: &str) -> Result<WrappedCommand> {
        let path = normalize_linux_path(path)?;
        let quoted = quote_posix(&path);
        Ok(WrappedCommand {
            document_name: self.document_name(),
            commands: vec![format!("mkdir -p {quoted}")],
        })
    }

    fn read_file(&self, path: &str) -> Result<WrappedCommand> {
        let path = normalize_linux_path(path)?;
        let quoted = quote_posix(&path);
        Ok(WrappedCommand {
            document_name: self.document_name(),
            commands: vec![format!("base64 -w 0 {quoted}")],
        })
    }

    fn write_file(&self, path: &str, payload_base64: &str, append: bool) -> Result<WrappedCommand> {
        let path = normalize_linux_path(path)?;
        let quoted = quote_posix(&path);
        let redirect = if append { ">>" } else { ">" };

        if payload_base64.len() > INLINE_PAYLOAD_THRESHOLD_BYTES {
            let sentinel = "ZTICTL_EOF_SENTINEL";
            Ok(WrappedCommand {
                document_name: self.document_name(),
                commands: vec![format!(
                    "base64 -d <<'{sentinel}' {redirect} {quoted}\n{payload_base64}\n{sentinel}"
                )],
            })
        } else {
            Ok(WrappedCommand {
                document_name: self.document_name(),
                commands: vec![format!(
                    "echo {} | base64 -d {redirect} {quoted}",
                    quote_posix(payload_base64)
                )],
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_exec_appends_exit_code_marker() {
        let builder = LinuxCommandBuilder;
        let wrapped = builder.wrap_exec("echo hi");
        assert!(wrapped.commands[0].contains("EXIT_CODE:$EXIT_CODE"));
        assert!(wrapped.commands[0].contains("echo hi"));
    }

    #[test]
    fn file_exists_rejects_traversal_path() {
        let builder = LinuxCommandBuilder;
        assert!(builder.file_exists("../etc/passwd").is_err());
    }

    #[test]
    fn write_file_uses_heredoc_for_large_payloads() {
        let builder = LinuxCommandBuilder;
        let payload = "A".repeat(INLINE_PAYLOAD_THRESHOLD_BYTES + 1);
        let wrapped = builder.write_file("/tmp/out", &payload, false).unwrap();
        assert!(wrapped.commands[0].contains("<<'ZTICTL_EOF_SENTINEL'"));
    }

    #[test]
    fn write_file_uses_inline_echo_for_small_payloads() {
        let builder = LinuxCommandBuilder;
        let wrapped = builder.write_file("/tmp/out", "aGVsbG8=", false).unwrap();
        assert!(wrapped.commands[0].starts_with("echo "));
        assert!(wrapped.commands[0].contains(" > "));
    }

    #[test]
    fn write_file_append_uses_double_redirect() {
        let builder = LinuxCommandBuilder;
        let wrapped = builder.write_file("/tmp/out", "aGVsbG8=", true).unwrap();
        assert!(wrapped.commands[0].contains(" >> "));
    }

    #[test]
    fn mkdir_p_quotes_path_with_spaces() {
        let builder = LinuxCommandBuilder;
        let wrapped = builder.mkdir_p("/tmp/my dir").unwrap();
        assert!(wrapped.commands[0].contains("'/tmp/my dir'"));
    }
}
