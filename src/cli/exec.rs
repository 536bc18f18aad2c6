use crate::client_pool::ClientPoolHandle;
use crate::config::Config;
use crate::error::SsmError;
use crate::instance::{self, InstanceFilters, InteractiveSelector};
use crate::platform::PlatformDetector;
use crate::region;
use crate::scheduler::{self, FailurePolicy};
use crate::{executor, session};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn connect(
    pool: &dyn ClientPoolHandle,
    identifier: Option<String>,
    region: &str,
    selector: &dyn InteractiveSelector,
) -> Result<()> {
    let canonical_region = region::resolve(region)?;
    let target = instance::select_with_fallback(
        pool,
        identifier.as_deref(),
        &canonical_region,
        &InstanceFilters::default(),
        selector,
    )
    .await?;

    let status = session::connect(pool, &canonical_region, &target.instance_id, CancellationToken::new()).await?;
    if !status.success() {
        std::process::exit(status.code().unwrap_or(1));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn exec_one(
    pool: &dyn ClientPoolHandle,
    detector: &PlatformDetector,
    region: &str,
    instance_id: &str,
    command: &str,
    comment: Option<String>,
    timeout_secs: u64,
    cancel: CancellationToken,
    output: &str,
) -> Result<()> {
    let canonical_region = region::resolve(region)?;
    let invocation = executor::execute(
        pool,
        detector,
        &canonical_region,
        instance_id,
        command,
        comment.as_deref(),
        Duration::from_secs(timeout_secs),
        cancel,
    )
    .await?;

    if output == "json" {
        println!(
            "{}",
            serde_json::json!({
                "command_id": invocation.command_id,
                "status": format!("{:?}", invocation.status),
                "exit_code": invocation.exit_code,
                "stdout": invocation.stdout,
                "stderr": invocation.stderr,
            })
        );
    } else {
        print!("{}", invocation.stdout);
        if !invocation.stderr.is_empty() {
            eprint!("{}", invocation.stderr);
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn exec_tagged(
    pool: Arc<dyn ClientPoolHandle>,
    detector: Arc<PlatformDetector>,
    config: &Config,
    region: &str,
    command: &str,
    tags: Option<String>,
    parallel: usize,
    cancel: CancellationToken,
    output: &str,
) -> Result<()> {
    let canonical_region = region::resolve(region)?;
    let filters = InstanceFilters {
        tags: tags.map(|t| instance::parse_tag_filters(&t)).transpose()?.unwrap_or_default(),
        ..Default::default()
    };
    let targets = instance::list(pool.as_ref(), &canonical_region, &filters).await?;
    let ids: Vec<String> = targets.into_iter().map(|i| i.instance_id).collect();

    run_fanout(
        pool,
        detector,
        canonical_region,
        ids,
        command,
        parallel,
        false,
        Duration::from_secs(config.transfer.command_timeout_secs),
        cancel,
        output,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
pub async fn exec_multi(
    pool: Arc<dyn ClientPoolHandle>,
    detector: Arc<PlatformDetector>,
    config: &Config,
    regions: Option<String>,
    all_regions: bool,
    region_group: Option<String>,
    command: &str,
    tags: Option<String>,
    parallel: usize,
    continue_on_error: bool,
    timeout_secs: u64,
    cancel: CancellationToken,
    output: &str,
) -> Result<()> {
    let target_regions: Vec<String> = if let Some(group) = region_group {
        region::expand_group(&group, config)?
    } else if let Some(list) = regions {
        list.split(',').map(|r| region::resolve(r.trim())).collect::<crate::error::Result<_>>()?
    } else if all_regions {
        return Err(SsmError::InvalidArgument {
            field: "--all-regions".to_string(),
            reason: "enumerating every AWS region is not supported; pass --regions or --region-group".to_string(),
        }
        .into());
    } else {
        return Err(SsmError::InvalidArgument {
            field: "regions".to_string(),
            reason: "one of --regions, --all-regions, or --region-group is required".to_string(),
        }
        .into());
    };

    let filters = InstanceFilters {
        tags: tags.map(|t| instance::parse_tag_filters(&t)).transpose()?.unwrap_or_default(),
        ..Default::default()
    };

    let mut targets = Vec::new();
    for region in &target_regions {
        for inst in instance::list(pool.as_ref(), region, &filters).await? {
            targets.push(format!("{region}|{}", inst.instance_id));
        }
    }

    let policy = if continue_on_error { FailurePolicy::ContinueOnError } else { FailurePolicy::StopOnError };
    let timeout = Duration::from_secs(timeout_secs);
    let command = command.to_string();

    let results = scheduler::run::<String, String, _, _>(
        targets.clone(),
        parallel,
        policy,
        cancel,
        None,
        move |target, _index, cancel| {
            let command = command.clone();
            let pool = pool.clone();
            let detector = detector.clone();
            async move {
                let (region, instance_id) = target.split_once('|').expect("targets are region|instance");
                execute_pooled(pool, detector, region.to_string(), instance_id.to_string(), command, timeout, cancel).await
            }
        },
    )
    .await;

    render_fanout_results(&targets, results, output)
}

async fn execute_pooled(
    pool: Arc<dyn ClientPoolHandle>,
    detector: Arc<PlatformDetector>,
    region: String,
    instance_id: String,
    command: String,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<String, String> {
    executor::execute(pool.as_ref(), detector.as_ref(), &region, &instance_id, &command, None, timeout, cancel)
        .await
        .map(|inv| inv.stdout)
        .map_err(|e| e.to_string())
}

#[allow(clippy::too_many_arguments)]
async fn run_fanout(
    pool: Arc<dyn ClientPoolHandle>,
    detector: Arc<PlatformDetector>,
    region: String,
    instance_ids: Vec<String>,
    command: &str,
    parallel: usize,
    continue_on_error: bool,
    timeout: Duration,
    cancel: CancellationToken,
    output: &str,
) -> Result<()> {
    let policy = if continue_on_error { FailurePolicy::ContinueOnError } else { FailurePolicy::StopOnError };
    let command = command.to_string();

    let results = scheduler::run::<String, String, _, _>(
        instance_ids.clone(),
        parallel,
        policy,
        cancel,
        None,
        move |instance_id, _index, cancel| {
            let command = command.clone();
            let region = region.clone();
            let pool = pool.clone();
            let detector = detector.clone();
            async move { execute_pooled(pool, detector, region, instance_id, command, timeout, cancel).await }
        },
    )
    .await;

    render_fanout_results(&instance_ids, results, output)
}

fn render_fanout_results(labels: &[String], results: Vec<Option<Result<String, String>>>, output: &str) -> Result<()> {
    let had_error = results.iter().any(|r| !matches!(r, Some(Ok(_))));

    if output == "json" {
        let json: Vec<_> = labels
            .iter()
            .zip(results.iter())
            .map(|(label, outcome)| match outcome {
                Some(Ok(stdout)) => serde_json::json!({"target": label, "ok": true, "stdout": stdout}),
                Some(Err(e)) => serde_json::json!({"target": label, "ok": false, "error": e}),
                None => serde_json::json!({"target": label, "ok": false, "error": "cancelled"}),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        for (label, outcome) in labels.iter().zip(results.iter()) {
            match outcome {
                Some(Ok(stdout)) => println!("== {label} ==\n{stdout}"),
                Some(Err(e)) => eprintln!("== {label} == FAILED: {e}"),
                None => eprintln!("== {label} == cancelled"),
            }
        }
    }

    if had_error {
        std::process::exit(1);
    }
    Ok(())
}

pub async fn forward(
    pool: &dyn ClientPoolHandle,
    instance_id: &str,
    ports: &str,
    region: &str,
    cancel: CancellationToken,
) -> Result<()> {
    let (local, remote) = ports
        .split_once(':')
        .ok_or_else(|| SsmError::InvalidArgument {
            field: "ports".to_string(),
            reason: "expected local:remote".to_string(),
        })?;
    let local_port: u16 = local.parse().map_err(|_| SsmError::InvalidArgument {
        field: "ports".to_string(),
        reason: format!("invalid local port '{local}'"),
    })?;
    let remote_port: u16 = remote.parse().map_err(|_| SsmError::InvalidArgument {
        field: "ports".to_string(),
        reason: format!("invalid remote port '{remote}'"),
    })?;

    let canonical_region = region::resolve(region)?;
    let status = session::forward(pool, &canonical_region, instance_id, local_port, remote_port, cancel).await?;
    if !status.success() {
        std::process::exit(status.code().unwrap_or(1));
    }
    Ok(())
}
