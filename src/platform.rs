//! Classifies a managed instance as Linux or Windows.
//!
//! Queries SSM first (high confidence), falls back to EC2 (medium), and
//! finally assumes Linux at low confidence rather than failing outright —
//! most fleets skew Linux and the caller can always override.

use crate::client_pool::ClientPoolHandle;
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Windows,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct PlatformDetectionResult {
    pub platform: Platform,
    pub confidence: Confidence,
    pub source: &'static str,
    pub detected_at: DateTime<Utc>,
    pub platform_name: Option<String>,
    pub platform_version: Option<String>,
}

struct CacheEntry {
    result: PlatformDetectionResult,
}

pub struct PlatformDetector {
    cache: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl PlatformDetector {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn clear_cache(&self) {
        self.cache.write().expect("platform cache lock poisoned").clear();
    }

    pub async fn detect(
        &self,
        pool: &dyn ClientPoolHandle,
        region: &str,
        instance_id: &str,
    ) -> Result<PlatformDetectionResult> {
        let cache_key = format!("{region}/{instance_id}");
        if let Some(entry) = self.cache.read().expect("platform cache lock poisoned").get(&cache_key) {
            let age = Utc::now().signed_duration_since(entry.result.detected_at);
            if age.to_std().unwrap_or(self.ttl) < self.ttl {
                return Ok(entry.result.clone());
            }
        }

        let result = self.detect_uncached(pool, region, instance_id).await?;

        self.cache
            .write()
            .expect("platform cache lock poisoned")
            .insert(cache_key, CacheEntry { result: result.clone() });
        Ok(result)
    }

    async fn detect_uncached(
        &self,
        pool: &dyn ClientPoolHandle,
        region: &str,
        instance_id: &str,
    ) -> Result<PlatformDetectionResult> {
        if let Ok(ssm) = pool.get_ssm(region).await {
            let info = ssm
                .describe_instance_information()
                .filters(
                    aws_sdk_ssm::types::InstanceInformationStringFilter::builder()
                        .key("InstanceIds")
                        .values(instance_id)
                        .build()
                        .expect("filter requires key and at least one value"),
                )
                .send()
                .await;

            if let Ok(resp) = info {
                if let Some(entry) = resp.instance_information_list().first() {
                    let platform_name = entry.platform_name().map(str::to_string);
                    let platform_version = entry.platform_version().map(str::to_string);
                    let platform = normalize_platform(platform_name.as_deref().unwrap_or(""));
                    return Ok(PlatformDetectionResult {
                        platform,
                        confidence: Confidence::High,
                        source: "SSM",
                        detected_at: Utc::now(),
                        platform_name,
                        platform_version,
                    });
                }
            }
        }

        if let Ok(ec2) = pool.get_ec2(region).await {
            let resp = ec2
                .describe_instances()
                .instance_ids(instance_id)
                .send()
                .await;

            if let Ok(resp) = resp {
                let found = resp
                    .reservations()
                    .iter()
                    .flat_map(|r| r.instances())
                    .find(|i| i.instance_id() == Some(instance_id));

                if let Some(instance) = found {
                    let platform_name = instance
                        .platform_details()
                        .map(str::to_string)
                        .unwrap_or_default();
                    let platform = normalize_platform(&platform_name);
                    return Ok(PlatformDetectionResult {
                        platform,
                        confidence: Confidence::Medium,
                        source: "EC2",
                        detected_at: Utc::now(),
                        platform_name: Some(platform_name),
                        platform_version: None,
                    });
                }
            }
        }

        warn!(instance_id, region, "platform detection fell through to default Linux");
        Ok(PlatformDetectionResult {
            platform: Platform::Linux,
            confidence: Confidence::Low,
            source: "default",
            detected_at: Utc::now(),
            platform_name: None,
            platform_version: None,
        })
    }
}

fn normalize_platform(raw: &str) -> Platform {
    let lower = raw.to_lowercase();
    if lower.is_empty() {
        return Platform::Linux;
    }
    if lower.contains("windows") {
        return Platform::Windows;
    }
    const LINUX_MARKERS: &[&str] = &["linux", "unix", "ubuntu", "amazon", "centos", "rhel", "debian"];
    if LINUX_MARKERS.iter().any(|m| lower.contains(m)) {
        return Platform::Linux;
    }
    Platform::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_windows_variants() {
        assert_eq!(normalize_platform("Windows"), Platform::Windows);
        assert_eq!(normalize_platform("Windows Server 2022"), Platform::Windows);
        assert_eq!(normalize_platform("WINDOWS"), Platform::Windows);
    }

    #[test]
    fn normalizes_linux_variants() {
        for name in ["Linux", "Ubuntu", "Amazon Linux 2", "CentOS", "RHEL", "Debian", "unix"] {
            assert_eq!(normalize_platform(name), Platform::Linux, "{name}");
        }
    }

    #[test]
    fn empty_string_normalizes_to_linux() {
        assert_eq!(normalize_platform(""), Platform::Linux);
    }

    #[test]
    fn unrecognized_string_is_unknown() {
        assert_eq!(normalize_platform("plan9"), Platform::Unknown);
    }

    #[test]
    fn confidence_orders_high_over_medium_over_low() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
        assert!(Confidence::Low > Confidence::None);
    }

    #[test]
    fn clear_cache_empties_entries() {
        let detector = PlatformDetector::new(Duration::from_secs(900));
        detector.cache.write().unwrap().insert(
            "us-east-1/i-1234567890abcdef0".to_string(),
            CacheEntry {
                result: PlatformDetectionResult {
                    platform: Platform::Linux,
                    confidence: Confidence::High,
                    source: "SSM",
                    detected_at: Utc::now(),
                    platform_name: None,
                    platform_version: None,
                },
            },
        );
        assert_eq!(detector.cache.read().unwrap().len(), 1);
        detector.clear_cache();
        assert_eq!(detector.cache.read().unwrap().len(), 0);
    }
}
