//! Staging bucket lifecycle for S3-backed (staged) transfers.

use crate::client_pool::ClientPoolHandle;
use crate::config::Config;
use crate::error::{Result, SsmError};
use aws_sdk_s3::types::{
    BucketLifecycleConfiguration, Expiration, LifecycleRule, LifecycleRuleFilter,
    LifecycleRuleStatus, ServerSideEncryption, ServerSideEncryptionByDefault,
    ServerSideEncryptionConfiguration, ServerSideEncryptionRule,
};

const LIFECYCLE_RULE_ID: &str = "ztictl-transfer-expiry";
const LIFECYCLE_EXPIRY_DAYS: i32 = 1;

pub fn bucket_name(config: &Config, account_id: &str, region: &str) -> String {
    format!("{}-{}-{}", config.aws.s3_bucket_prefix, account_id, region)
}

/// Create the staging bucket if absent, with SSE-S3 default encryption and a
/// 24-hour object expiry lifecycle rule. Idempotent: an existing
/// already-owned bucket is treated as success.
pub async fn ensure_bucket(pool: &dyn ClientPoolHandle, region: &str, bucket: &str) -> Result<()> {
    let s3 = pool.get_s3(region).await?;

    let create_result = s3.create_bucket().bucket(bucket);
    let create_result = if region == "us-east-1" {
        create_result
    } else {
        create_result.create_bucket_configuration(
            aws_sdk_s3::types::CreateBucketConfiguration::builder()
                .location_constraint(aws_sdk_s3::types::BucketLocationConstraint::from(region))
                .build(),
        )
    };

    match create_result.send().await {
        Ok(_) => {}
        Err(e) => {
            let already_owned = e
                .as_service_error()
                .map(|se| se.is_bucket_already_owned_by_you())
                .unwrap_or(false);
            if !already_owned {
                return Err(SsmError::ObjectStore(format!("CreateBucket failed: {e}")));
            }
        }
    }

    s3.put_bucket_encryption()
        .bucket(bucket)
        .server_side_encryption_configuration(
            ServerSideEncryptionConfiguration::builder()
                .rules(
                    ServerSideEncryptionRule::builder()
                        .apply_server_side_encryption_by_default(
                            ServerSideEncryptionByDefault::builder()
                                .sse_algorithm(ServerSideEncryption::Aes256)
                                .build()
                                .expect("sse_algorithm is required and set above"),
                        )
                        .build(),
                )
                .build()
                .expect("at least one rule is set above"),
        )
        .send()
        .await
        .map_err(|e| SsmError::ObjectStore(format!("PutBucketEncryption failed: {e}")))?;

    s3.put_bucket_lifecycle_configuration()
        .bucket(bucket)
        .lifecycle_configuration(
            BucketLifecycleConfiguration::builder()
                .rules(
                    LifecycleRule::builder()
                        .id(LIFECYCLE_RULE_ID)
                        .status(LifecycleRuleStatus::Enabled)
                        .filter(LifecycleRuleFilter::Prefix("transfers/".to_string()))
                        .expiration(
                            Expiration::builder()
                                .days(LIFECYCLE_EXPIRY_DAYS)
                                .build(),
                        )
                        .build()
                        .expect("id, status, filter, and expiration are all set above"),
                )
                .build()
                .expect("at least one rule is set above"),
        )
        .send()
        .await
        .map_err(|e| SsmError::ObjectStore(format!("PutBucketLifecycleConfiguration failed: {e}")))?;

    Ok(())
}

pub fn object_key(job_id: &str, filename: &str) -> String {
    format!("transfers/{job_id}/{filename}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_name_interpolates_prefix_account_region() {
        let config = Config::default();
        assert_eq!(
            bucket_name(&config, "123456789012", "ca-central-1"),
            "ztictl-transfer-123456789012-ca-central-1"
        );
    }

    #[test]
    fn object_key_is_namespaced_under_transfers() {
        assert_eq!(object_key("job-1", "data.bin"), "transfers/job-1/data.bin");
    }
}
