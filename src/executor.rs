//! Submits one SSM command to one instance and polls to completion.

use crate::client_pool::ClientPoolHandle;
use crate::command::{self, parse_exit_code, WrappedCommand};
use crate::error::{Result, SsmError};
use crate::platform::PlatformDetector;
use crate::retry::{ExponentialBackoffPolicy, RetryPolicy};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const STDERR_TRUNCATE_BYTES: usize = 4096;
const POLL_INITIAL_DELAY: Duration = Duration::from_secs(1);
const POLL_MAX_DELAY: Duration = Duration::from_secs(10);
/// SSM may briefly report `InvocationDoesNotExist` right after submission;
/// this is API propagation lag, not a real failure.
const INVOCATION_LAG_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Cancelled,
    TimedOut,
    Cancelling,
}

impl InvocationStatus {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            InvocationStatus::Success
                | InvocationStatus::Failed
                | InvocationStatus::Cancelled
                | InvocationStatus::TimedOut
        )
    }

    fn from_sdk(raw: &str) -> Option<Self> {
        match raw {
            "Pending" => Some(Self::Pending),
            "InProgress" | "Delayed" => Some(Self::InProgress),
            "Success" => Some(Self::Success),
            "Failed" => Some(Self::Failed),
            "Cancelled" => Some(Self::Cancelled),
            "TimedOut" => Some(Self::TimedOut),
            "Cancelling" => Some(Self::Cancelling),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandInvocation {
    pub command_id: String,
    pub instance_id: String,
    pub region: String,
    pub document_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: InvocationStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &s[..end])
}

/// Execute `command` on `instance_id` in `region`, polling until a terminal
/// status, `timeout`, or `cancel`.
pub async fn execute(
    pool: &dyn ClientPoolHandle,
    detector: &PlatformDetector,
    region: &str,
    instance_id: &str,
    command: &str,
    comment: Option<&str>,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<CommandInvocation> {
    let detection = detector.detect(pool, region, instance_id).await?;
    let builder = command::for_platform(detection.platform);
    let WrappedCommand {
        document_name,
        commands,
    } = builder.wrap_exec(command);

    let ssm = pool.get_ssm(region).await?;
    let retry = ExponentialBackoffPolicy::for_cloud_api();

    let submitted_at = Utc::now();
    let command_id = retry
        .execute_with_retry(|| async {
            let mut request = ssm
                .send_command()
                .instance_ids(instance_id)
                .document_name(document_name)
                .parameters("commands", commands.clone());
            if let Some(c) = comment {
                request = request.comment(c);
            }
            let response = request.send().await.map_err(|e| SsmError::CloudProvider {
                service: "ssm".to_string(),
                message: "SendCommand failed".to_string(),
                source: Some(Box::new(e)),
            })?;
            response
                .command()
                .and_then(|c| c.command_id())
                .map(str::to_string)
                .ok_or_else(|| SsmError::Internal("SendCommand returned no command id".to_string()))
        })
        .await?;

    let mut delay = POLL_INITIAL_DELAY;
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if cancel.is_cancelled() {
            let _ = ssm
                .cancel_command()
                .command_id(&command_id)
                .send()
                .await;
            return Ok(CommandInvocation {
                command_id,
                instance_id: instance_id.to_string(),
                region: region.to_string(),
                document_name: document_name.to_string(),
                started_at: submitted_at,
                ended_at: Some(Utc::now()),
                status: InvocationStatus::Cancelled,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
            });
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(SsmError::Timeout(format!(
                "command {command_id} on {instance_id} did not complete within {timeout:?}"
            )));
        }

        tokio::select! {
            _ = sleep(delay) => {}
            _ = cancel.cancelled() => continue,
        }
        delay = (delay * 2).min(POLL_MAX_DELAY);

        let response = ssm
            .get_command_invocation()
            .command_id(&command_id)
            .instance_id(instance_id)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                let elapsed = Utc::now().signed_duration_since(submitted_at);
                let lag_window = elapsed.to_std().unwrap_or_default() < INVOCATION_LAG_GRACE;
                if lag_window {
                    continue;
                }
                return Err(SsmError::CloudProvider {
                    service: "ssm".to_string(),
                    message: "GetCommandInvocation failed".to_string(),
                    source: Some(Box::new(e)),
                });
            }
        };

        let status_str = response.status().map(|s| s.as_str()).unwrap_or("Unknown");
        let Some(status) = InvocationStatus::from_sdk(status_str) else {
            warn!(status = status_str, "unrecognized SSM invocation status");
            continue;
        };

        if !status.is_terminal() {
            continue;
        }

        let stdout = response.standard_output_content().unwrap_or("").to_string();
        let stderr = truncate(
            response.standard_error_content().unwrap_or(""),
            STDERR_TRUNCATE_BYTES,
        );
        let reported_code = response.response_code();
        let exit_code = parse_exit_code(&stdout).or(Some(reported_code as i32));

        let invocation = CommandInvocation {
            command_id: command_id.clone(),
            instance_id: instance_id.to_string(),
            region: region.to_string(),
            document_name: document_name.to_string(),
            started_at: submitted_at,
            ended_at: Some(Utc::now()),
            status,
            stdout,
            stderr: stderr.clone(),
            exit_code,
        };

        return match status {
            InvocationStatus::Success => Ok(invocation),
            InvocationStatus::Failed | InvocationStatus::TimedOut => Err(SsmError::Command {
                instance_id: instance_id.to_string(),
                exit_code,
                stderr,
            }),
            InvocationStatus::Cancelled => Ok(invocation),
            _ => unreachable!("non-terminal statuses are filtered above"),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_classified_correctly() {
        assert!(InvocationStatus::Success.is_terminal());
        assert!(InvocationStatus::Failed.is_terminal());
        assert!(InvocationStatus::Cancelled.is_terminal());
        assert!(InvocationStatus::TimedOut.is_terminal());
        assert!(!InvocationStatus::Pending.is_terminal());
        assert!(!InvocationStatus::InProgress.is_terminal());
        assert!(!InvocationStatus::Cancelling.is_terminal());
    }

    #[test]
    fn from_sdk_maps_known_strings() {
        assert_eq!(InvocationStatus::from_sdk("Success"), Some(InvocationStatus::Success));
        assert_eq!(InvocationStatus::from_sdk("Delayed"), Some(InvocationStatus::InProgress));
        assert_eq!(InvocationStatus::from_sdk("Bogus"), None);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "a".repeat(10);
        assert_eq!(truncate(&s, 5), "aaaaa...(truncated)");
        assert_eq!(truncate("short", 100), "short");
    }
}
