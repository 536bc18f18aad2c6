use super::path::{normalize_windows_path, quote_powershell, reject_herestring_sentinel};
use super::{CommandBuilder, WrappedCommand, INLINE_PAYLOAD_THRESHOLD_BYTES};
use crate::error::Result;

pub struct WindowsCommandBuilder;

impl CommandBuilder for WindowsCommandBuilder {
    fn document_name(&self) -> &'static str {
        "AWS-RunPowerShellScript"
    }

    fn wrap_exec(&self, command: &str) -> WrappedCommand {
        WrappedCommand {
            document_name: self.document_name(),
            commands: vec![format!(
                "try {{\n{command}\n$code = if ($LASTEXITCODE -ne $null) {{ $LASTEXITCODE }} else {{ 0 }}\n}} catch {{\n$code = 1\n}}\nWrite-Output \"EXIT_CODE:$code\"\nexit $code"
            )],
        }
    }

    fn file_exists(&self, path: &str) -> Result<WrappedCommand> {
        let path = normalize_windows_path(path)?;
        let quoted = quote_powershell(&path);
        Ok(WrappedCommand {
            document_name: self.document_name(),
            commands: vec![format!(
                "if (Test-Path {quoted}) {{'EXISTS'}} else {{'NOT_EXISTS'}}"
            )],
        })
    }

    fn file_size(&self, path: &str) -> Result<WrappedCommand> {
        let path = normalize_windows_path(path)?;
        let quoted = quote_powershell(&path);
        Ok(WrappedCommand {
            document_name: self.document_name(),
            commands: vec![format!("(Get-Item {quoted}).Length")],
        })
    }

    fn mkdir_p(&self, path: &str) -> Result<WrappedCommand> {
        let path = normalize_windows_path(path)?;
        let quoted = quote_powershell(&path);
        Ok(WrappedCommand {
            document_name: self.document_name(),
            commands: vec![format!("New-Item -ItemType Directory -Force -Path {quoted} | Out-Null")],
        })
    }

    fn read_file(&self, path: &str) -> Result<WrappedCommand> {
        let path = normalize_windows_path(path)?;
        let quoted = quote_powershell(&path);
        Ok(WrappedCommand {
            document_name: self.document_name(),
            commands: vec![format!(
                "[Convert]::ToBase64String([IO.File]::ReadAllBytes({quoted}))"
            )],
        })
    }

    fn write_file(&self, path: &str, payload_base64: &str, append: bool) -> Result<WrappedCommand> {
        let path = normalize_windows_path(path)?;
        let quoted = quote_powershell(&path);

        if payload_base64.len() > INLINE_PAYLOAD_THRESHOLD_BYTES {
            reject_herestring_sentinel(payload_base64)?;
            let write_call = if append {
                format!(
                    "$stream = [IO.File]::Open({quoted}, [IO.FileMode]::Append)\n$stream.Write($bytes, 0, $bytes.Length)\n$stream.Close()"
                )
            } else {
                format!("[IO.File]::WriteAllBytes({quoted}, $bytes)")
            };
            Ok(WrappedCommand {
                document_name: self.document_name(),
                commands: vec![format!(
                    "$b64 = @'\n{payload_base64}\n'@\n$bytes = [Convert]::FromBase64String($b64)\n{write_call}"
                )],
            })
        } else {
            let write_call = if append {
                format!(
                    "$stream = [IO.File]::Open({quoted}, [IO.FileMode]::Append)\n$stream.Write($bytes, 0, $bytes.Length)\n$stream.Close()"
                )
            } else {
                format!("[IO.File]::WriteAllBytes({quoted}, $bytes)")
            };
            Ok(WrappedCommand {
                document_name: self.document_name(),
                commands: vec![format!(
                    "$bytes = [Convert]::FromBase64String({})\n{write_call}",
                    quote_powershell(payload_base64)
                )],
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_exec_emits_exit_code_marker() {
        let builder = WindowsCommandBuilder;
        let wrapped = builder.wrap_exec("Get-Process");
        assert!(wrapped.commands[0].contains("EXIT_CODE:$code"));
    }

    #[test]
    fn file_exists_rejects_empty_unc_share() {
        let builder = WindowsCommandBuilder;
        assert!(builder.file_exists(r"\\server\").is_err());
    }

    #[test]
    fn write_file_rejects_payload_with_herestring_sentinel() {
        let builder = WindowsCommandBuilder;
        let payload = format!("{}\n'@", "A".repeat(INLINE_PAYLOAD_THRESHOLD_BYTES + 1));
        let result = builder.write_file(r"C:\out.bin", &payload, false);
        assert!(result.is_err());
    }

    #[test]
    fn write_file_small_payload_is_not_sentinel_checked_but_still_safe() {
        let builder = WindowsCommandBuilder;
        // Inline (non-here-string) form embeds the payload inside a quoted
        // PowerShell string literal, so the here-string terminator is not a
        // hazard there.
        let wrapped = builder.write_file(r"C:\out.bin", "aGVsbG8=", false).unwrap();
        assert!(wrapped.commands[0].contains("FromBase64String"));
    }

    #[test]
    fn read_file_uses_readallbytes() {
        let builder = WindowsCommandBuilder;
        let wrapped = builder.read_file(r"C:\data.bin").unwrap();
        assert!(wrapped.commands[0].contains("ReadAllBytes"));
    }
}
