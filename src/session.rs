//! Interactive session launch: starts an SSM session and hands off to the
//! native `session-manager-plugin` binary, which speaks the actual
//! data-channel protocol. Reimplementing that protocol is out of scope.

use crate::client_pool::ClientPoolHandle;
use crate::error::{Result, SsmError};
use std::process::ExitStatus;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const PLUGIN_BINARY: &str = "session-manager-plugin";

fn install_hint() -> &'static str {
    if cfg!(target_os = "windows") {
        "install it from https://docs.aws.amazon.com/systems-manager/latest/userguide/session-manager-working-with-install-plugin.html#install-plugin-windows"
    } else if cfg!(target_os = "macos") {
        "install it with: brew install --cask session-manager-plugin"
    } else {
        "install it from https://docs.aws.amazon.com/systems-manager/latest/userguide/session-manager-working-with-install-plugin.html#install-plugin-linux"
    }
}

fn locate_plugin() -> Result<std::path::PathBuf> {
    which::which(PLUGIN_BINARY).map_err(|_| {
        SsmError::DependencyMissing(format!(
            "{PLUGIN_BINARY} not found on PATH; {}",
            install_hint()
        ))
    })
}

async fn start_session(
    pool: &dyn ClientPoolHandle,
    region: &str,
    instance_id: &str,
    document_name: Option<&str>,
    parameters: Option<std::collections::HashMap<String, Vec<String>>>,
) -> Result<aws_sdk_ssm::operation::start_session::StartSessionOutput> {
    let ssm = pool.get_ssm(region).await?;
    let mut request = ssm.start_session().target(instance_id);
    if let Some(doc) = document_name {
        request = request.document_name(doc);
    }
    if let Some(params) = parameters {
        for (key, values) in params {
            request = request.parameters(key, values);
        }
    }
    request.send().await.map_err(|e| SsmError::CloudProvider {
        service: "ssm".to_string(),
        message: "StartSession failed".to_string(),
        source: Some(Box::new(e)),
    })
}

/// Run the native plugin against an already-started session, blocking until
/// it exits or `cancel` fires.
async fn run_plugin(
    pool: &dyn ClientPoolHandle,
    region: &str,
    instance_id: &str,
    session_id: String,
    stream_url: String,
    token_value: String,
    cancel: CancellationToken,
) -> Result<ExitStatus> {
    let plugin_path = locate_plugin()?;
    let ssm = pool.get_ssm(region).await?;

    let session_payload = serde_json::json!({
        "SessionId": session_id,
        "TokenValue": token_value,
        "StreamUrl": stream_url,
    })
    .to_string();

    info!(instance_id, region, session_id, "launching session-manager-plugin");

    let handle = std::sync::Arc::new(
        duct::cmd!(
            &plugin_path,
            &session_payload,
            region,
            "StartSession",
            "",
            format!("{{\"Target\":\"{instance_id}\"}}"),
            format!("https://ssm.{region}.amazonaws.com")
        )
        .stdin_null()
        .stdout_capture()
        .stderr_capture()
        .start()
        .map_err(SsmError::Io)?,
    );

    let handle_for_wait = handle.clone();
    let wait = tokio::task::spawn_blocking(move || handle_for_wait.wait().map(|output| output.status));

    tokio::select! {
        result = wait => {
            result
                .map_err(|e| SsmError::Internal(format!("session-manager-plugin join failed: {e}")))?
                .map_err(SsmError::Io)
        }
        _ = cancel.cancelled() => {
            if let Err(e) = handle.kill() {
                warn!(session_id, error = %e, "failed to kill session-manager-plugin on cancellation");
            }
            let _ = ssm.terminate_session().session_id(&session_id).send().await;
            Err(SsmError::Cancelled)
        }
    }
}

fn session_fields(
    response: &aws_sdk_ssm::operation::start_session::StartSessionOutput,
) -> Result<(String, String, String)> {
    let session_id = response
        .session_id()
        .ok_or_else(|| SsmError::Internal("StartSession returned no session id".to_string()))?
        .to_string();
    let stream_url = response
        .stream_url()
        .ok_or_else(|| SsmError::Internal("StartSession returned no stream url".to_string()))?
        .to_string();
    let token_value = response
        .token_value()
        .ok_or_else(|| SsmError::Internal("StartSession returned no token value".to_string()))?
        .to_string();
    Ok((session_id, stream_url, token_value))
}

/// Start an interactive SSM session on `instance_id` and block until the
/// plugin process exits, forwarding cancellation as a process kill.
pub async fn connect(
    pool: &dyn ClientPoolHandle,
    region: &str,
    instance_id: &str,
    cancel: CancellationToken,
) -> Result<ExitStatus> {
    let response = start_session(pool, region, instance_id, None, None).await?;
    let (session_id, stream_url, token_value) = session_fields(&response)?;
    run_plugin(pool, region, instance_id, session_id, stream_url, token_value, cancel).await
}

/// Start a local-to-remote TCP port-forwarding session.
pub async fn forward(
    pool: &dyn ClientPoolHandle,
    region: &str,
    instance_id: &str,
    local_port: u16,
    remote_port: u16,
    cancel: CancellationToken,
) -> Result<ExitStatus> {
    let mut parameters = std::collections::HashMap::new();
    parameters.insert("portNumber".to_string(), vec![remote_port.to_string()]);
    parameters.insert("localPortNumber".to_string(), vec![local_port.to_string()]);

    let response = start_session(
        pool,
        region,
        instance_id,
        Some("AWS-StartPortForwardingSession"),
        Some(parameters),
    )
    .await?;
    let (session_id, stream_url, token_value) = session_fields(&response)?;
    run_plugin(pool, region, instance_id, session_id, stream_url, token_value, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_plugin_surfaces_dependency_missing_when_absent() {
        if which::which(PLUGIN_BINARY).is_ok() {
            return;
        }
        let err = locate_plugin().unwrap_err();
        assert!(matches!(err, SsmError::DependencyMissing(_)));
    }

    #[test]
    fn install_hint_is_platform_specific() {
        let hint = install_hint();
        assert!(!hint.is_empty());
    }
}
