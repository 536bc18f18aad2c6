//! S3-staged transfer: used for files at or above the configured size
//! threshold. Creates a temporary IAM inline policy scoping instance access
//! to a single object key, and always tears the temporary resources down on
//! every exit path.

use super::bucket;
use super::{Direction, Method, TransferJob, TransferStatus};
use crate::client_pool::ClientPoolHandle;
use crate::command;
use crate::config::Config;
use crate::error::{Result, SsmError};
use crate::executor;
use crate::platform::PlatformDetector;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const POLICY_NAME_PREFIX: &str = "ztictl-transfer-";

/// Tracks the transient resources a staged job creates so every exit path
/// can release them, regardless of how the job terminated.
struct CleanupGuard<'a> {
    pool: &'a dyn ClientPoolHandle,
    region: &'a str,
    bucket: String,
    key: String,
    role_name: Option<String>,
    policy_name: Option<String>,
}

impl<'a> CleanupGuard<'a> {
    async fn run(self) {
        if let Some((role, policy)) = self.role_name.zip(self.policy_name) {
            if let Ok(iam) = self.pool.get_iam(self.region).await {
                if let Err(e) = iam
                    .delete_role_policy()
                    .role_name(&role)
                    .policy_name(&policy)
                    .send()
                    .await
                {
                    warn!(role, policy, error = %e, "failed to detach temporary IAM policy");
                }
            }
        }
        if let Ok(s3) = self.pool.get_s3(self.region).await {
            if let Err(e) = s3.delete_object().bucket(&self.bucket).key(&self.key).send().await {
                warn!(bucket = %self.bucket, key = %self.key, error = %e, "failed to delete staged object");
            }
        }
    }
}

async fn account_id(pool: &dyn ClientPoolHandle, region: &str) -> Result<String> {
    let sts = pool.get_sts(region).await?;
    let identity = sts
        .get_caller_identity()
        .send()
        .await
        .map_err(|e| SsmError::Auth(format!("GetCallerIdentity failed: {e}")))?;
    identity
        .account()
        .map(str::to_string)
        .ok_or_else(|| SsmError::Auth("GetCallerIdentity returned no account id".to_string()))
}

async fn instance_role_name(pool: &dyn ClientPoolHandle, region: &str, instance_id: &str) -> Result<String> {
    let ec2 = pool.get_ec2(region).await?;
    let response = ec2
        .describe_instances()
        .instance_ids(instance_id)
        .send()
        .await
        .map_err(|e| SsmError::CloudProvider {
            service: "ec2".to_string(),
            message: "DescribeInstances failed".to_string(),
            source: Some(Box::new(e)),
        })?;

    let profile_arn = response
        .reservations()
        .iter()
        .flat_map(|r| r.instances())
        .find(|i| i.instance_id() == Some(instance_id))
        .and_then(|i| i.iam_instance_profile())
        .and_then(|p| p.arn())
        .ok_or_else(|| {
            SsmError::PolicyAttach(format!("instance {instance_id} has no IAM instance profile"))
        })?;

    let profile_name = profile_arn
        .rsplit('/')
        .next()
        .ok_or_else(|| SsmError::PolicyAttach(format!("malformed instance profile arn: {profile_arn}")))?;

    let iam = pool.get_iam(region).await?;
    let profile = iam
        .get_instance_profile()
        .instance_profile_name(profile_name)
        .send()
        .await
        .map_err(|e| SsmError::PolicyAttach(format!("GetInstanceProfile failed: {e}")))?;

    profile
        .instance_profile()
        .and_then(|p| p.roles().first())
        .and_then(|r| r.role_name().map(str::to_string))
        .ok_or_else(|| SsmError::PolicyAttach(format!("instance profile {profile_name} has no role")))
}

fn scoped_policy_document(action: &str, bucket: &str, key: &str) -> String {
    format!(
        r#"{{"Version":"2012-10-17","Statement":[{{"Effect":"Allow","Action":"{action}","Resource":"arn:aws:s3:::{bucket}/{key}"}}]}}"#
    )
}

#[allow(clippy::too_many_arguments)]
pub async fn upload(
    pool: &dyn ClientPoolHandle,
    detector: &PlatformDetector,
    config: &Config,
    region: &str,
    instance_id: &str,
    local_path: &Path,
    remote_path: &str,
    size_bytes: u64,
    cancel: CancellationToken,
    job_id: &str,
) -> Result<TransferJob> {
    let account = account_id(pool, region).await?;
    let bucket_name = bucket::bucket_name(config, &account, region);
    bucket::ensure_bucket(pool, region, &bucket_name).await?;

    let filename = local_path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "payload".to_string());
    let key = bucket::object_key(job_id, &filename);

    let s3 = pool.get_s3(region).await?;
    let body = aws_sdk_s3::primitives::ByteStream::from_path(local_path)
        .await
        .map_err(|e| SsmError::Io(std::io::Error::other(e)))?;
    s3.put_object()
        .bucket(&bucket_name)
        .key(&key)
        .body(body)
        .send()
        .await
        .map_err(|e| SsmError::ObjectStore(format!("PutObject failed: {e}")))?;

    let role_name = instance_role_name(pool, region, instance_id).await?;
    let policy_name = format!("{POLICY_NAME_PREFIX}{job_id}");
    let iam = pool.get_iam(region).await?;
    iam.put_role_policy()
        .role_name(&role_name)
        .policy_name(&policy_name)
        .policy_document(scoped_policy_document("s3:GetObject", &bucket_name, &key))
        .send()
        .await
        .map_err(|e| SsmError::PolicyAttach(format!("PutRolePolicy failed: {e}")))?;

    let guard = CleanupGuard {
        pool,
        region,
        bucket: bucket_name.clone(),
        key: key.clone(),
        role_name: Some(role_name),
        policy_name: Some(policy_name),
    };

    let result = run_upload_fetch(
        pool, detector, config, region, instance_id, &bucket_name, &key, remote_path, size_bytes, cancel,
    )
    .await;

    guard.run().await;

    result.map(|status| TransferJob {
        job_id: job_id.to_string(),
        direction: Direction::Upload,
        instance_id: instance_id.to_string(),
        region: region.to_string(),
        local_path: local_path.display().to_string(),
        remote_path: remote_path.to_string(),
        size_bytes,
        method: Method::Staged,
        status,
    })
}

#[allow(clippy::too_many_arguments)]
async fn run_upload_fetch(
    pool: &dyn ClientPoolHandle,
    detector: &PlatformDetector,
    config: &Config,
    region: &str,
    instance_id: &str,
    bucket_name: &str,
    key: &str,
    remote_path: &str,
    size_bytes: u64,
    cancel: CancellationToken,
) -> Result<TransferStatus> {
    sleep(Duration::from_secs(config.transfer.iam_propagation_delay_secs)).await;

    let platform = detector.detect(pool, region, instance_id).await?.platform;
    let fetch_command = match platform {
        crate::platform::Platform::Windows => format!(
            "Read-S3Object -BucketName '{bucket_name}' -Key '{key}' -File '{remote_path}'"
        ),
        _ => format!("aws s3 cp s3://{bucket_name}/{key} {remote_path}"),
    };

    let timeout = Duration::from_secs(config.transfer.command_timeout_secs);
    let invocation = executor::execute(
        pool,
        detector,
        region,
        instance_id,
        &fetch_command,
        Some("ztictl transfer: staged fetch"),
        timeout,
        cancel.clone(),
    )
    .await?;

    if invocation.exit_code != Some(0) {
        return Err(SsmError::Command {
            instance_id: instance_id.to_string(),
            exit_code: invocation.exit_code,
            stderr: invocation.stderr,
        });
    }

    let builder = command::for_platform(platform);
    let size_cmd = builder.file_size(remote_path)?;
    let size_invocation = executor::execute(
        pool,
        detector,
        region,
        instance_id,
        &size_cmd.commands.join("\n"),
        Some("ztictl transfer: verify staged upload size"),
        timeout,
        cancel,
    )
    .await?;
    let remote_size = command::parse_file_size(&size_invocation.stdout).ok_or_else(|| {
        SsmError::ObjectStore("could not parse remote file size for verification".to_string())
    })?;

    if remote_size != size_bytes {
        return Err(SsmError::VerificationMismatch {
            expected: size_bytes,
            actual: remote_size,
        });
    }

    Ok(TransferStatus::Success)
}

#[allow(clippy::too_many_arguments)]
pub async fn download(
    pool: &dyn ClientPoolHandle,
    detector: &PlatformDetector,
    config: &Config,
    region: &str,
    instance_id: &str,
    remote_path: &str,
    local_path: &Path,
    size_bytes: u64,
    cancel: CancellationToken,
    job_id: &str,
) -> Result<TransferJob> {
    let account = account_id(pool, region).await?;
    let bucket_name = bucket::bucket_name(config, &account, region);
    bucket::ensure_bucket(pool, region, &bucket_name).await?;

    let filename = local_path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "payload".to_string());
    let key = bucket::object_key(job_id, &filename);

    let role_name = instance_role_name(pool, region, instance_id).await?;
    let policy_name = format!("{POLICY_NAME_PREFIX}{job_id}");
    let iam = pool.get_iam(region).await?;
    iam.put_role_policy()
        .role_name(&role_name)
        .policy_name(&policy_name)
        .policy_document(scoped_policy_document("s3:PutObject", &bucket_name, &key))
        .send()
        .await
        .map_err(|e| SsmError::PolicyAttach(format!("PutRolePolicy failed: {e}")))?;

    let guard = CleanupGuard {
        pool,
        region,
        bucket: bucket_name.clone(),
        key: key.clone(),
        role_name: Some(role_name),
        policy_name: Some(policy_name),
    };

    let result = run_download_push_and_fetch(
        pool, detector, config, region, instance_id, &bucket_name, &key, remote_path, local_path,
        size_bytes, cancel,
    )
    .await;

    guard.run().await;

    result.map(|status| TransferJob {
        job_id: job_id.to_string(),
        direction: Direction::Download,
        instance_id: instance_id.to_string(),
        region: region.to_string(),
        local_path: local_path.display().to_string(),
        remote_path: remote_path.to_string(),
        size_bytes,
        method: Method::Staged,
        status,
    })
}

#[allow(clippy::too_many_arguments)]
async fn run_download_push_and_fetch(
    pool: &dyn ClientPoolHandle,
    detector: &PlatformDetector,
    config: &Config,
    region: &str,
    instance_id: &str,
    bucket_name: &str,
    key: &str,
    remote_path: &str,
    local_path: &Path,
    size_bytes: u64,
    cancel: CancellationToken,
) -> Result<TransferStatus> {
    sleep(Duration::from_secs(config.transfer.iam_propagation_delay_secs)).await;

    let platform = detector.detect(pool, region, instance_id).await?.platform;
    let push_command = match platform {
        crate::platform::Platform::Windows => format!(
            "Write-S3Object -BucketName '{bucket_name}' -Key '{key}' -File '{remote_path}'"
        ),
        _ => format!("aws s3 cp {remote_path} s3://{bucket_name}/{key}"),
    };

    let timeout = Duration::from_secs(config.transfer.command_timeout_secs);
    let invocation = executor::execute(
        pool,
        detector,
        region,
        instance_id,
        &push_command,
        Some("ztictl transfer: staged push"),
        timeout,
        cancel,
    )
    .await?;
    if invocation.exit_code != Some(0) {
        return Err(SsmError::Command {
            instance_id: instance_id.to_string(),
            exit_code: invocation.exit_code,
            stderr: invocation.stderr,
        });
    }

    let s3 = pool.get_s3(region).await?;
    const MAX_POLL_ATTEMPTS: u32 = 10;
    let mut found = false;
    for _ in 0..MAX_POLL_ATTEMPTS {
        if s3.head_object().bucket(bucket_name).key(key).send().await.is_ok() {
            found = true;
            break;
        }
        sleep(Duration::from_secs(2)).await;
    }
    if !found {
        return Err(SsmError::Timeout(format!(
            "staged object {key} never appeared in bucket {bucket_name}"
        )));
    }

    let object = s3
        .get_object()
        .bucket(bucket_name)
        .key(key)
        .send()
        .await
        .map_err(|e| SsmError::ObjectStore(format!("GetObject failed: {e}")))?;
    let bytes = object
        .body
        .collect()
        .await
        .map_err(|e| SsmError::ObjectStore(format!("failed reading object body: {e}")))?
        .into_bytes();

    if let Some(parent) = local_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(SsmError::Io)?;
    }
    tokio::fs::write(local_path, &bytes).await.map_err(SsmError::Io)?;

    if bytes.len() as u64 != size_bytes {
        return Err(SsmError::VerificationMismatch {
            expected: size_bytes,
            actual: bytes.len() as u64,
        });
    }

    Ok(TransferStatus::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_policy_document_restricts_to_single_key() {
        let doc = scoped_policy_document("s3:GetObject", "my-bucket", "transfers/job-1/file.bin");
        assert!(doc.contains("arn:aws:s3:::my-bucket/transfers/job-1/file.bin"));
        assert!(doc.contains("s3:GetObject"));
    }

    #[test]
    fn policy_name_carries_job_id_and_prefix() {
        let policy_name = format!("{POLICY_NAME_PREFIX}abc-123");
        assert!(policy_name.starts_with("ztictl-transfer-"));
        assert!(policy_name.ends_with("abc-123"));
    }
}
