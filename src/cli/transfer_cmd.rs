use crate::client_pool::ClientPoolHandle;
use crate::config::Config;
use crate::platform::PlatformDetector;
use crate::region;
use crate::transfer;
use anyhow::Result;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn upload(
    pool: &dyn ClientPoolHandle,
    detector: &PlatformDetector,
    config: &Config,
    region: &str,
    instance_id: &str,
    local: &Path,
    remote: &str,
    cancel: CancellationToken,
) -> Result<()> {
    let canonical_region = region::resolve(region)?;
    let job = transfer::upload(pool, detector, config, &canonical_region, instance_id, local, remote, None, cancel).await?;
    println!("uploaded {} -> {} ({:?}, {} bytes)", job.local_path, job.remote_path, job.method, job.size_bytes);
    Ok(())
}

pub async fn download(
    pool: &dyn ClientPoolHandle,
    detector: &PlatformDetector,
    config: &Config,
    region: &str,
    instance_id: &str,
    remote: &str,
    local: &Path,
    cancel: CancellationToken,
) -> Result<()> {
    let canonical_region = region::resolve(region)?;
    let job = transfer::download(pool, detector, config, &canonical_region, instance_id, remote, local, cancel).await?;
    println!("downloaded {} -> {} ({:?}, {} bytes)", job.remote_path, job.local_path, job.method, job.size_bytes);
    Ok(())
}
