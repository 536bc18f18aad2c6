//! Per-region AWS client cache.
//!
//! Components never hold the concrete pool; they receive a `&dyn
//! ClientPoolHandle` so construction details stay isolated here.

use crate::error::{Result, SsmError};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ec2::Client as Ec2Client;
use aws_sdk_iam::Client as IamClient;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_ssm::Client as SsmClient;
use aws_sdk_sts::Client as StsClient;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

#[derive(Clone)]
struct RegionClients {
    ec2: Ec2Client,
    ssm: SsmClient,
    sts: StsClient,
    s3: S3Client,
    iam: IamClient,
}

/// Trait exposing the pool's lookup surface so components depend on a handle
/// rather than the concrete pool, avoiding cyclic ownership.
///
/// `get_iam` is a generalization beyond the four originally-named client
/// kinds: the Transfer Engine's staged mode needs scoped inline policy
/// attach/detach on the instance role, and the ownership invariant (the pool
/// exclusively owns AWS clients) applies to it the same as the rest.
#[async_trait]
pub trait ClientPoolHandle: Send + Sync {
    async fn get_ec2(&self, region: &str) -> Result<Ec2Client>;
    async fn get_ssm(&self, region: &str) -> Result<SsmClient>;
    async fn get_sts(&self, region: &str) -> Result<StsClient>;
    async fn get_s3(&self, region: &str) -> Result<S3Client>;
    async fn get_iam(&self, region: &str) -> Result<IamClient>;
}

/// Lazily constructs and caches AWS service clients keyed by region.
pub struct ClientPool {
    clients: RwLock<HashMap<String, RegionClients>>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    async fn clients_for(&self, region: &str) -> Result<RegionClients> {
        if let Some(clients) = self.clients.read().expect("client pool lock poisoned").get(region) {
            return Ok(clients.clone());
        }

        let mut guard = self.clients.write().expect("client pool lock poisoned");
        if let Some(clients) = guard.get(region) {
            return Ok(clients.clone());
        }

        debug!(region, "constructing AWS clients for region");
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_ec2::config::Region::new(region.to_string()))
            .load()
            .await;

        // A bare credential probe surfaces auth failures eagerly rather than
        // on the first real API call, and keeps the message secret-free.
        if sdk_config.credentials_provider().is_none() {
            return Err(SsmError::Auth(format!(
                "no AWS credentials available for region {region}"
            )));
        }

        let clients = RegionClients {
            ec2: Ec2Client::new(&sdk_config),
            ssm: SsmClient::new(&sdk_config),
            sts: StsClient::new(&sdk_config),
            s3: S3Client::new(&sdk_config),
            iam: IamClient::new(&sdk_config),
        };
        guard.insert(region.to_string(), clients.clone());
        Ok(clients)
    }
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientPoolHandle for ClientPool {
    async fn get_ec2(&self, region: &str) -> Result<Ec2Client> {
        Ok(self.clients_for(region).await?.ec2)
    }

    async fn get_ssm(&self, region: &str) -> Result<SsmClient> {
        Ok(self.clients_for(region).await?.ssm)
    }

    async fn get_sts(&self, region: &str) -> Result<StsClient> {
        Ok(self.clients_for(region).await?.sts)
    }

    async fn get_s3(&self, region: &str) -> Result<S3Client> {
        Ok(self.clients_for(region).await?.s3)
    }

    async fn get_iam(&self, region: &str) -> Result<IamClient> {
        Ok(self.clients_for(region).await?.iam)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn caches_clients_per_region() {
        let pool = ClientPool::new();
        let _ = pool.get_ec2("us-east-1").await;
        assert_eq!(pool.clients.read().unwrap().len(), 1);
        let _ = pool.get_ssm("us-east-1").await;
        assert_eq!(
            pool.clients.read().unwrap().len(),
            1,
            "second lookup in the same region must not reconstruct clients"
        );
        let _ = pool.get_ec2("ca-central-1").await;
        assert_eq!(pool.clients.read().unwrap().len(), 2);
    }
}
