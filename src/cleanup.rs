//! Sweeps stale staged-transfer artifacts: objects under `transfers/` that
//! outlived the bucket lifecycle window, and leftover `ztictl-transfer-`
//! inline policies on instance roles that a crashed transfer never detached.

use crate::client_pool::ClientPoolHandle;
use crate::config::Config;
use crate::error::{Result, SsmError};
use crate::transfer::bucket;
use chrono::{Duration as ChronoDuration, Utc};

const POLICY_PREFIX: &str = "ztictl-transfer-";

pub async fn run(pool: &dyn ClientPoolHandle, config: &Config, region: &str, dry_run: bool) -> Result<()> {
    let canonical_region = crate::region::resolve(region)?;

    println!("{}", "=".repeat(72));
    println!("Stale transfer artifact cleanup ({canonical_region})");
    println!("{}", "=".repeat(72));
    if dry_run {
        println!("[DRY RUN] no objects or policies will be deleted");
    }

    let sts = pool.get_sts(&canonical_region).await?;
    let identity = sts.get_caller_identity().send().await.map_err(|e| SsmError::Auth(format!("GetCallerIdentity failed: {e}")))?;
    let account = identity.account().ok_or_else(|| SsmError::Auth("GetCallerIdentity returned no account id".to_string()))?;
    let bucket_name = bucket::bucket_name(config, account, &canonical_region);

    let s3 = pool.get_s3(&canonical_region).await?;
    let cutoff = Utc::now() - ChronoDuration::days(1);

    let mut stale_objects = Vec::new();
    let mut continuation_token: Option<String> = None;
    let mut bucket_listed = true;
    loop {
        let mut request = s3.list_objects_v2().bucket(&bucket_name).prefix("transfers/");
        if let Some(token) = &continuation_token {
            request = request.continuation_token(token);
        }
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                println!("could not list bucket {bucket_name}: {e} (skipping stale object sweep)");
                bucket_listed = false;
                break;
            }
        };

        for object in response.contents() {
            let Some(key) = object.key() else { continue };
            let last_modified = object.last_modified().and_then(|d| chrono::DateTime::from_timestamp(d.secs(), 0));
            if last_modified.map(|lm| lm < cutoff).unwrap_or(true) {
                stale_objects.push(key.to_string());
            }
        }

        continuation_token = response.next_continuation_token().map(str::to_string);
        if continuation_token.is_none() {
            break;
        }
    }

    if bucket_listed {
        println!("found {} stale object(s)", stale_objects.len());
        for key in &stale_objects {
            if dry_run {
                println!("  would delete s3://{bucket_name}/{key}");
            } else {
                match s3.delete_object().bucket(&bucket_name).key(key).send().await {
                    Ok(_) => println!("  deleted s3://{bucket_name}/{key}"),
                    Err(e) => eprintln!("  warning: failed to delete s3://{bucket_name}/{key}: {e}"),
                }
            }
        }
    }

    let iam = pool.get_iam(&canonical_region).await?;
    let roles = iam.list_roles().send().await.map_err(|e| SsmError::PolicyAttach(format!("ListRoles failed: {e}")))?;

    let mut stale_policies = Vec::new();
    for role in roles.roles() {
        let Some(role_name) = role.role_name() else { continue };
        let Ok(policies) = iam.list_role_policies().role_name(role_name).send().await else {
            continue;
        };
        for policy_name in policies.policy_names() {
            if policy_name.starts_with(POLICY_PREFIX) {
                stale_policies.push((role_name.to_string(), policy_name.to_string()));
            }
        }
    }

    println!("found {} leftover inline polic(ies)", stale_policies.len());
    for (role_name, policy_name) in &stale_policies {
        if dry_run {
            println!("  would detach {policy_name} from role {role_name}");
        } else {
            match iam.delete_role_policy().role_name(role_name).policy_name(policy_name).send().await {
                Ok(_) => println!("  detached {policy_name} from role {role_name}"),
                Err(e) => eprintln!("  warning: failed to detach {policy_name} from role {role_name}: {e}"),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_prefix_matches_staged_transfer_naming() {
        assert!("ztictl-transfer-abc123".starts_with(POLICY_PREFIX));
        assert!(!"other-policy".starts_with(POLICY_PREFIX));
    }
}
