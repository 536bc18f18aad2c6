//! Instance discovery: listing with combined EC2+SSM state, and
//! name/ID resolution.

use crate::client_pool::ClientPoolHandle;
use crate::error::{Result, SsmError};
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsmAgentState {
    Online,
    ConnectionLost,
    Inactive,
    NoAgent,
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub instance_id: String,
    pub name: Option<String>,
    pub state: String,
    pub platform: crate::platform::Platform,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub tags: HashMap<String, String>,
    pub ssm_state: SsmAgentState,
}

#[derive(Debug, Clone, Default)]
pub struct InstanceFilters {
    /// key=value pairs, all must match.
    pub tags: Vec<(String, String)>,
    pub state: Option<String>,
    pub name_substring: Option<String>,
}

fn instance_id_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^i-[0-9a-f]{8,17}$").expect("valid regex"))
}

/// Parse a `key=value,key2=value2` tag filter string.
pub fn parse_tag_filters(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or("").trim();
            let value = parts.next().unwrap_or("").trim();
            if key.is_empty() {
                return Err(SsmError::InvalidFilter(format!(
                    "empty tag key in filter segment '{pair}'"
                )));
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

fn matches_filters(instance: &Instance, filters: &InstanceFilters) -> bool {
    for (key, value) in &filters.tags {
        match instance.tags.get(key) {
            Some(v) if v == value => {}
            _ => return false,
        }
    }
    if let Some(state) = &filters.state {
        if &instance.state != state {
            return false;
        }
    }
    if let Some(sub) = &filters.name_substring {
        let matches = instance
            .name
            .as_deref()
            .is_some_and(|n| n.to_lowercase().contains(&sub.to_lowercase()));
        if !matches {
            return false;
        }
    }
    true
}

/// List instances in a region, merging EC2 `DescribeInstances` with SSM
/// `DescribeInstanceInformation`, applying the given filters.
pub async fn list(
    pool: &dyn ClientPoolHandle,
    region: &str,
    filters: &InstanceFilters,
) -> Result<Vec<Instance>> {
    let ec2 = pool.get_ec2(region).await?;
    let ssm = pool.get_ssm(region).await?;

    let mut ssm_info: HashMap<String, SsmAgentState> = HashMap::new();
    let mut next_token: Option<String> = None;
    loop {
        let mut request = ssm.describe_instance_information();
        if let Some(token) = &next_token {
            request = request.next_token(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SsmError::CloudProvider {
                service: "ssm".to_string(),
                message: "DescribeInstanceInformation failed".to_string(),
                source: Some(Box::new(e)),
            })?;
        for entry in response.instance_information_list() {
            if let Some(id) = entry.instance_id() {
                let state = match entry.ping_status() {
                    Some(s) if s.as_str() == "Online" => SsmAgentState::Online,
                    Some(s) if s.as_str() == "ConnectionLost" => SsmAgentState::ConnectionLost,
                    Some(_) => SsmAgentState::Inactive,
                    None => SsmAgentState::Inactive,
                };
                ssm_info.insert(id.to_string(), state);
            }
        }
        next_token = response.next_token().map(str::to_string);
        if next_token.is_none() {
            break;
        }
    }

    let mut instances = Vec::new();
    let mut next_token: Option<String> = None;
    loop {
        let mut request = ec2.describe_instances();
        if let Some(token) = &next_token {
            request = request.next_token(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SsmError::CloudProvider {
                service: "ec2".to_string(),
                message: "DescribeInstances failed".to_string(),
                source: Some(Box::new(e)),
            })?;

        for reservation in response.reservations() {
            for ec2_instance in reservation.instances() {
                let Some(instance_id) = ec2_instance.instance_id() else {
                    continue;
                };
                let tags: HashMap<String, String> = ec2_instance
                    .tags()
                    .iter()
                    .filter_map(|t| Some((t.key()?.to_string(), t.value().unwrap_or("").to_string())))
                    .collect();
                let name = tags.get("Name").cloned();
                let state = ec2_instance
                    .state()
                    .and_then(|s| s.name())
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let platform_raw = ec2_instance.platform_details().unwrap_or("");

                let instance = Instance {
                    instance_id: instance_id.to_string(),
                    name,
                    state,
                    platform: normalize_for_listing(platform_raw),
                    private_ip: ec2_instance.private_ip_address().map(str::to_string),
                    public_ip: ec2_instance.public_ip_address().map(str::to_string),
                    tags,
                    ssm_state: ssm_info
                        .get(instance_id)
                        .copied()
                        .unwrap_or(SsmAgentState::NoAgent),
                };
                if matches_filters(&instance, filters) {
                    instances.push(instance);
                }
            }
        }

        next_token = response.next_token().map(str::to_string);
        if next_token.is_none() {
            break;
        }
    }

    Ok(instances)
}

fn normalize_for_listing(platform_details: &str) -> crate::platform::Platform {
    if platform_details.to_lowercase().contains("windows") {
        crate::platform::Platform::Windows
    } else {
        crate::platform::Platform::Linux
    }
}

/// Resolve an identifier (instance ID or `Name` tag value) to a single
/// `Instance`, erroring on ambiguity or absence.
pub async fn resolve(pool: &dyn ClientPoolHandle, identifier: &str, region: &str) -> Result<Instance> {
    if instance_id_regex().is_match(identifier) {
        let ec2 = pool.get_ec2(region).await?;
        let response = ec2
            .describe_instances()
            .instance_ids(identifier)
            .send()
            .await
            .map_err(|e| SsmError::CloudProvider {
                service: "ec2".to_string(),
                message: "DescribeInstances failed".to_string(),
                source: Some(Box::new(e)),
            })?;
        let found = response
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .any(|i| i.instance_id() == Some(identifier));
        if !found {
            return Err(SsmError::InstanceNotFound(identifier.to_string()));
        }
        let all = list(pool, region, &InstanceFilters::default()).await?;
        return all
            .into_iter()
            .find(|i| i.instance_id == identifier)
            .ok_or_else(|| SsmError::InstanceNotFound(identifier.to_string()));
    }

    let filters = InstanceFilters {
        name_substring: None,
        ..Default::default()
    };
    let all = list(pool, region, &filters).await?;
    let matches: Vec<Instance> = all
        .into_iter()
        .filter(|i| i.name.as_deref() == Some(identifier))
        .collect();

    match matches.len() {
        0 => Err(SsmError::InstanceNotFound(identifier.to_string())),
        1 => Ok(matches.into_iter().next().expect("checked len == 1")),
        n => Err(SsmError::AmbiguousInstance {
            identifier: identifier.to_string(),
            count: n,
        }),
    }
}

/// Injected so the engine can prompt for a target without depending on any
/// particular terminal UI.
#[async_trait::async_trait]
pub trait InteractiveSelector: Send + Sync {
    async fn select(&self, instances: &[Instance]) -> Result<Instance>;
}

/// Always errors; used in `CI`/`ZTICTL_NON_INTERACTIVE` contexts and tests.
pub struct NonInteractiveSelector;

#[async_trait::async_trait]
impl InteractiveSelector for NonInteractiveSelector {
    async fn select(&self, _instances: &[Instance]) -> Result<Instance> {
        Err(SsmError::Cancelled)
    }
}

fn non_interactive_requested() -> bool {
    std::env::var("ZTICTL_NON_INTERACTIVE")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
        || std::env::var("CI").is_ok()
}

/// Resolve an explicit identifier, or fall back to the injected interactive
/// selector when one is not supplied and the environment allows prompting.
pub async fn select_with_fallback(
    pool: &dyn ClientPoolHandle,
    identifier: Option<&str>,
    region: &str,
    filters: &InstanceFilters,
    selector: &dyn InteractiveSelector,
) -> Result<Instance> {
    if let Some(id) = identifier {
        return resolve(pool, id, region).await;
    }

    if non_interactive_requested() {
        return Err(SsmError::InvalidArgument {
            field: "identifier".to_string(),
            reason: "an instance identifier is required in non-interactive mode".to_string(),
        });
    }

    let candidates = list(pool, region, filters).await?;
    selector.select(&candidates).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_instance(id: &str, name: Option<&str>, state: &str) -> Instance {
        let mut tags = HashMap::new();
        if let Some(n) = name {
            tags.insert("Name".to_string(), n.to_string());
        }
        Instance {
            instance_id: id.to_string(),
            name: name.map(str::to_string),
            state: state.to_string(),
            platform: crate::platform::Platform::Linux,
            private_ip: None,
            public_ip: None,
            tags,
            ssm_state: SsmAgentState::Online,
        }
    }

    #[test]
    fn parse_tag_filters_splits_pairs() {
        let parsed = parse_tag_filters("env=prod,team=ml").unwrap();
        assert_eq!(
            parsed,
            vec![
                ("env".to_string(), "prod".to_string()),
                ("team".to_string(), "ml".to_string())
            ]
        );
    }

    #[test]
    fn parse_tag_filters_rejects_empty_key() {
        assert!(parse_tag_filters("=value").is_err());
    }

    #[test]
    fn parse_tag_filters_empty_string_yields_empty_vec() {
        assert!(parse_tag_filters("").unwrap().is_empty());
    }

    #[test]
    fn matches_filters_by_tag_state_and_name() {
        let instance = sample_instance("i-1234567890abcdef0", Some("worker-1"), "running");
        let filters = InstanceFilters {
            tags: vec![("Name".to_string(), "worker-1".to_string())],
            state: Some("running".to_string()),
            name_substring: Some("work".to_string()),
        };
        assert!(matches_filters(&instance, &filters));
    }

    #[test]
    fn matches_filters_rejects_state_mismatch() {
        let instance = sample_instance("i-1234567890abcdef0", Some("worker-1"), "stopped");
        let filters = InstanceFilters {
            state: Some("running".to_string()),
            ..Default::default()
        };
        assert!(!matches_filters(&instance, &filters));
    }

    #[tokio::test]
    async fn non_interactive_selector_always_errors() {
        let selector = NonInteractiveSelector;
        let result = selector.select(&[]).await;
        assert!(matches!(result, Err(SsmError::Cancelled)));
    }

    #[test]
    fn instance_id_regex_accepts_8_to_17_hex_digits() {
        assert!(instance_id_regex().is_match("i-1234567890abcdef0"));
        assert!(instance_id_regex().is_match("i-12345678"));
        assert!(!instance_id_regex().is_match("i-1234567"));
        assert!(!instance_id_regex().is_match("vol-1234567890abcdef0"));
    }
}
