//! Smoke tests against real AWS. Require credentials and a reachable SSM
//! fleet, so they're gated behind the `e2e` feature and skipped by default:
//!
//!     cargo test --features e2e --test e2e_smoke_test
#![cfg(feature = "e2e")]

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use ztictl::client_pool::{ClientPool, ClientPoolHandle};
use ztictl::config::Config;
use ztictl::instance::InstanceFilters;

fn region() -> String {
    std::env::var("ZTICTL_E2E_REGION").unwrap_or_else(|_| "us-east-1".to_string())
}

#[tokio::test]
async fn lists_instances_without_error() {
    let pool: Arc<dyn ClientPoolHandle> = Arc::new(ClientPool::new());
    let instances = ztictl::instance::list(pool.as_ref(), &region(), &InstanceFilters::default())
        .await
        .expect("listing instances should succeed with valid credentials");
    for instance in &instances {
        assert!(instance.instance_id.starts_with("i-"));
    }
}

#[tokio::test]
async fn cleanup_dry_run_does_not_mutate_anything() {
    let pool: Arc<dyn ClientPoolHandle> = Arc::new(ClientPool::new());
    let config = Config::default();
    ztictl::cleanup::run(pool.as_ref(), &config, &region(), true)
        .await
        .expect("dry-run cleanup should succeed with valid credentials");
}

#[tokio::test]
async fn power_ops_reject_unreachable_instance_quickly() {
    let pool: Arc<dyn ClientPoolHandle> = Arc::new(ClientPool::new());
    let cancel = CancellationToken::new();
    let result = ztictl::power_ops::apply(
        pool.as_ref(),
        &region(),
        "i-000000000000000ff",
        ztictl::power_ops::PowerAction::Start,
        false,
        std::time::Duration::from_secs(5),
        cancel,
    )
    .await;
    assert!(result.is_err(), "a nonexistent instance id must not succeed");
}
