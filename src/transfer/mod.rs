//! Adaptive file transfer: direct inline for small files, S3-staged for
//! large ones, with lifecycle management of the transient cloud resources
//! staged mode creates.

pub(crate) mod bucket;
mod staged;

use crate::client_pool::ClientPoolHandle;
use crate::command::{self, parse_exists, parse_file_size};
use crate::config::Config;
use crate::error::{Result, SsmError};
use crate::executor;
use crate::platform::PlatformDetector;
use base64::Engine;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Direct,
    Staged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TransferJob {
    pub job_id: String,
    pub direction: Direction,
    pub instance_id: String,
    pub region: String,
    pub local_path: String,
    pub remote_path: String,
    pub size_bytes: u64,
    pub method: Method,
    pub status: TransferStatus,
}

#[derive(Debug, Clone)]
pub enum TransferProgress {
    ChunkSent { job_id: String, bytes_sent: u64, total_bytes: u64 },
}

fn decide_method(size_bytes: u64, threshold: u64) -> Method {
    if size_bytes < threshold {
        Method::Direct
    } else {
        Method::Staged
    }
}

/// Upload `local_path` to `remote_path` on the instance.
pub async fn upload(
    pool: &dyn ClientPoolHandle,
    detector: &PlatformDetector,
    config: &Config,
    region: &str,
    instance_id: &str,
    local_path: &Path,
    remote_path: &str,
    progress: Option<UnboundedSender<TransferProgress>>,
    cancel: CancellationToken,
) -> Result<TransferJob> {
    let job_id = Uuid::new_v4().to_string();
    let metadata = tokio::fs::metadata(local_path).await.map_err(SsmError::Io)?;
    let size_bytes = metadata.len();
    let method = decide_method(size_bytes, config.transfer.file_size_threshold_bytes);

    match method {
        Method::Direct => {
            direct_upload(
                pool, detector, config, region, instance_id, local_path, remote_path, size_bytes,
                progress, cancel, &job_id,
            )
            .await
        }
        Method::Staged => {
            staged::upload(
                pool, detector, config, region, instance_id, local_path, remote_path, size_bytes,
                cancel, &job_id,
            )
            .await
        }
    }
}

/// Download `remote_path` on the instance to `local_path`.
pub async fn download(
    pool: &dyn ClientPoolHandle,
    detector: &PlatformDetector,
    config: &Config,
    region: &str,
    instance_id: &str,
    remote_path: &str,
    local_path: &Path,
    cancel: CancellationToken,
) -> Result<TransferJob> {
    let job_id = Uuid::new_v4().to_string();

    let builder_platform = detector.detect(pool, region, instance_id).await?.platform;
    let builder = command::for_platform(builder_platform);
    let size_cmd = builder.file_size(remote_path)?;
    let timeout = Duration::from_secs(config.transfer.command_timeout_secs);

    let size_invocation = executor::execute(
        pool,
        detector,
        region,
        instance_id,
        &size_cmd.commands.join("\n"),
        Some("ztictl transfer: remote file size"),
        timeout,
        cancel.clone(),
    )
    .await?;
    let size_bytes = parse_file_size(&size_invocation.stdout).ok_or_else(|| {
        SsmError::ObjectStore(format!("could not determine remote file size for {remote_path}"))
    })?;

    let method = decide_method(size_bytes, config.transfer.file_size_threshold_bytes);

    match method {
        Method::Direct => {
            direct_download(
                pool, detector, config, region, instance_id, remote_path, local_path, size_bytes,
                cancel, &job_id,
            )
            .await
        }
        Method::Staged => {
            staged::download(
                pool, detector, config, region, instance_id, remote_path, local_path, size_bytes,
                cancel, &job_id,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn direct_upload(
    pool: &dyn ClientPoolHandle,
    detector: &PlatformDetector,
    config: &Config,
    region: &str,
    instance_id: &str,
    local_path: &Path,
    remote_path: &str,
    size_bytes: u64,
    progress: Option<UnboundedSender<TransferProgress>>,
    cancel: CancellationToken,
    job_id: &str,
) -> Result<TransferJob> {
    let bytes = tokio::fs::read(local_path).await.map_err(SsmError::Io)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    let timeout = Duration::from_secs(config.transfer.command_timeout_secs);

    let platform = detector.detect(pool, region, instance_id).await?.platform;
    let builder = command::for_platform(platform);

    let remote_dir = remote_parent(remote_path);
    if let Some(dir) = remote_dir {
        let mkdir = builder.mkdir_p(&dir)?;
        executor::execute(
            pool,
            detector,
            region,
            instance_id,
            &mkdir.commands.join("\n"),
            Some("ztictl transfer: ensure remote directory"),
            timeout,
            cancel.clone(),
        )
        .await?;
    }

    let write_cmd = builder.write_file(remote_path, &encoded, false)?;
    let invocation = executor::execute(
        pool,
        detector,
        region,
        instance_id,
        &write_cmd.commands.join("\n"),
        Some("ztictl transfer: direct upload"),
        timeout,
        cancel,
    )
    .await?;

    if let Some(tx) = progress {
        let _ = tx.send(TransferProgress::ChunkSent {
            job_id: job_id.to_string(),
            bytes_sent: size_bytes,
            total_bytes: size_bytes,
        });
    }

    let status = if invocation.exit_code == Some(0) {
        TransferStatus::Success
    } else {
        return Err(SsmError::Command {
            instance_id: instance_id.to_string(),
            exit_code: invocation.exit_code,
            stderr: invocation.stderr,
        });
    };

    Ok(TransferJob {
        job_id: job_id.to_string(),
        direction: Direction::Upload,
        instance_id: instance_id.to_string(),
        region: region.to_string(),
        local_path: local_path.display().to_string(),
        remote_path: remote_path.to_string(),
        size_bytes,
        method: Method::Direct,
        status,
    })
}

#[allow(clippy::too_many_arguments)]
async fn direct_download(
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
    let platform = detector.detect(pool, region, instance_id).await?.platform;
    let builder = command::for_platform(platform);
    let exists_cmd = builder.file_exists(remote_path)?;
    let timeout = Duration::from_secs(config.transfer.command_timeout_secs);

    let exists_invocation = executor::execute(
        pool,
        detector,
        region,
        instance_id,
        &exists_cmd.commands.join("\n"),
        Some("ztictl transfer: remote file existence"),
        timeout,
        cancel.clone(),
    )
    .await?;
    if !parse_exists(&exists_invocation.stdout, exists_invocation.exit_code) {
        return Err(SsmError::ObjectStore(format!("remote path does not exist: {remote_path}")));
    }

    let read_cmd = builder.read_file(remote_path)?;
    let invocation = executor::execute(
        pool,
        detector,
        region,
        instance_id,
        &read_cmd.commands.join("\n"),
        Some("ztictl transfer: direct download"),
        timeout,
        cancel,
    )
    .await?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(invocation.stdout.trim())
        .map_err(|e| SsmError::ObjectStore(format!("invalid base64 from remote read: {e}")))?;

    if let Some(parent) = local_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(SsmError::Io)?;
    }
    tokio::fs::write(local_path, &decoded).await.map_err(SsmError::Io)?;

    if decoded.len() as u64 != size_bytes {
        return Err(SsmError::VerificationMismatch {
            expected: size_bytes,
            actual: decoded.len() as u64,
        });
    }

    Ok(TransferJob {
        job_id: job_id.to_string(),
        direction: Direction::Download,
        instance_id: instance_id.to_string(),
        region: region.to_string(),
        local_path: local_path.display().to_string(),
        remote_path: remote_path.to_string(),
        size_bytes,
        method: Method::Direct,
        status: TransferStatus::Success,
    })
}

fn remote_parent(remote_path: &str) -> Option<String> {
    let normalized = remote_path.replace('\\', "/");
    let trimmed = normalized.trim_end_matches('/');
    trimmed.rfind('/').map(|idx| trimmed[..idx].to_string()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decide_method_boundary_is_strictly_less_than_threshold() {
        assert_eq!(decide_method(999, 1000), Method::Direct);
        assert_eq!(decide_method(1000, 1000), Method::Staged);
        assert_eq!(decide_method(1001, 1000), Method::Staged);
    }

    #[test]
    fn remote_parent_extracts_directory() {
        assert_eq!(remote_parent("/opt/app/file.txt"), Some("/opt/app".to_string()));
        assert_eq!(remote_parent("/file.txt"), None);
        assert_eq!(remote_parent("file.txt"), None);
    }
}
