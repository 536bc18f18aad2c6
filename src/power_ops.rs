//! Start/stop/reboot instances, optionally fanned out across a target list
//! and optionally waited on until the expected EC2 state is reached.

use crate::client_pool::ClientPoolHandle;
use crate::error::{Result, SsmError};
use crate::retry::{ExponentialBackoffPolicy, RetryPolicy};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Start,
    Stop,
    Reboot,
}

impl PowerAction {
    fn target_state(self) -> Option<&'static str> {
        match self {
            PowerAction::Start => Some("running"),
            PowerAction::Stop => Some("stopped"),
            PowerAction::Reboot => None,
        }
    }
}

const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Apply `action` to a single instance, optionally blocking until the
/// instance reaches the action's target EC2 state.
pub async fn apply(
    pool: &dyn ClientPoolHandle,
    region: &str,
    instance_id: &str,
    action: PowerAction,
    wait: bool,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let ec2 = pool.get_ec2(region).await?;
    let retry = ExponentialBackoffPolicy::for_cloud_api();

    retry
        .execute_with_retry(|| async {
            let result = match action {
                PowerAction::Start => ec2.start_instances().instance_ids(instance_id).send().await.map(|_| ()),
                PowerAction::Stop => ec2.stop_instances().instance_ids(instance_id).send().await.map(|_| ()),
                PowerAction::Reboot => ec2.reboot_instances().instance_ids(instance_id).send().await.map(|_| ()),
            };
            result.map_err(|e| SsmError::CloudProvider {
                service: "ec2".to_string(),
                message: format!("{action:?} failed"),
                source: Some(Box::new(e)),
            })
        })
        .await?;

    if !wait {
        return Ok(());
    }

    let Some(target_state) = action.target_state() else {
        return Ok(());
    };

    wait_for_state(&ec2, instance_id, target_state, timeout, cancel).await
}

async fn wait_for_state(
    ec2: &aws_sdk_ec2::Client,
    instance_id: &str,
    target_state: &str,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if cancel.is_cancelled() {
            return Err(SsmError::Cancelled);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(SsmError::Timeout(format!(
                "instance {instance_id} did not reach state '{target_state}' within {timeout:?}"
            )));
        }

        let response = ec2
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| SsmError::CloudProvider {
                service: "ec2".to_string(),
                message: "DescribeInstances failed while waiting".to_string(),
                source: Some(Box::new(e)),
            })?;

        let current_state = response
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .find(|i| i.instance_id() == Some(instance_id))
            .and_then(|i| i.state())
            .and_then(|s| s.name())
            .map(|n| n.as_str().to_string());

        if current_state.as_deref() == Some(target_state) {
            return Ok(());
        }

        tokio::select! {
            _ = sleep(WAIT_POLL_INTERVAL) => {}
            _ = cancel.cancelled() => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_targets_running() {
        assert_eq!(PowerAction::Start.target_state(), Some("running"));
    }

    #[test]
    fn stop_targets_stopped() {
        assert_eq!(PowerAction::Stop.target_state(), Some("stopped"));
    }

    #[test]
    fn reboot_has_no_wait_target() {
        assert_eq!(PowerAction::Reboot.target_state(), None);
    }
}
