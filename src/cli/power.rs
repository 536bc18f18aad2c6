use crate::client_pool::ClientPoolHandle;
use crate::error::SsmError;
use crate::power_ops::{self, PowerAction};
use crate::scheduler::{self, FailurePolicy};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[allow(clippy::too_many_arguments)]
pub async fn apply(
    pool: Arc<dyn ClientPoolHandle>,
    instance: Option<String>,
    instances: Option<String>,
    region: &str,
    action: PowerAction,
    parallel: usize,
    wait: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let canonical_region = crate::region::resolve(region)?;

    let targets: Vec<String> = match (instance, instances) {
        (Some(one), None) => vec![one],
        (None, Some(many)) => many.split(',').map(|s| s.trim().to_string()).collect(),
        (Some(_), Some(_)) => {
            return Err(SsmError::InvalidArgument {
                field: "instance".to_string(),
                reason: "specify either a single instance or --instances, not both".to_string(),
            }
            .into());
        }
        (None, None) => {
            return Err(SsmError::InvalidArgument {
                field: "instance".to_string(),
                reason: "an instance id or --instances is required".to_string(),
            }
            .into());
        }
    };

    let timeout = Duration::from_secs(300);
    let results = scheduler::run::<(), String, _, _>(
        targets.clone(),
        parallel,
        FailurePolicy::ContinueOnError,
        cancel,
        None,
        move |instance_id, _index, cancel| {
            let pool = pool.clone();
            let region = canonical_region.clone();
            async move {
                power_ops::apply(pool.as_ref(), &region, &instance_id, action, wait, timeout, cancel)
                    .await
                    .map_err(|e| e.to_string())
            }
        },
    )
    .await;

    let mut had_error = false;
    for (target, outcome) in targets.iter().zip(results.iter()) {
        match outcome {
            Some(Ok(())) => println!("{target}: ok"),
            Some(Err(e)) => {
                had_error = true;
                eprintln!("{target}: FAILED: {e}");
            }
            None => {
                had_error = true;
                eprintln!("{target}: cancelled");
            }
        }
    }

    if had_error {
        std::process::exit(1);
    }
    Ok(())
}
