//! Region shortcode/canonical resolution and validation.
//!
//! This is the single source of truth for region-string validation in the
//! crate. No other module should duplicate the shortcode table or the
//! region-format regex.

use crate::config::Config;
use crate::error::{Result, SsmError};
use std::sync::OnceLock;

/// Known shortcode -> canonical region aliases.
const SHORTCODES: &[(&str, &str)] = &[
    ("use1", "us-east-1"),
    ("use2", "us-east-2"),
    ("usw1", "us-west-1"),
    ("usw2", "us-west-2"),
    ("cac1", "ca-central-1"),
    ("euw1", "eu-west-1"),
    ("euw2", "eu-west-2"),
    ("euw3", "eu-west-3"),
    ("euc1", "eu-central-1"),
    ("eun1", "eu-north-1"),
    ("aps1", "ap-south-1"),
    ("apne1", "ap-northeast-1"),
    ("apne2", "ap-northeast-2"),
    ("apse1", "ap-southeast-1"),
    ("apse2", "ap-southeast-2"),
    ("sae1", "sa-east-1"),
    ("mes1", "me-south-1"),
    ("afs1", "af-south-1"),
];

fn region_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r"^(us-gov|us|eu|ap|ca|sa|me|af|cn)-(east|west|north|south|central|northeast|southeast|northwest|southwest)-([1-9][0-9]?)$",
        )
        .expect("region regex is a compile-time constant")
    })
}

/// Resolve a shortcode or canonical region string to its canonical form.
pub fn resolve(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if let Some((_, canonical)) = SHORTCODES.iter().find(|(code, _)| *code == trimmed) {
        return Ok((*canonical).to_string());
    }
    if validate(trimmed) {
        return Ok(trimmed.to_string());
    }
    Err(SsmError::InvalidRegion(input.to_string()))
}

/// Validate that `canonical` is a syntactically well-formed AWS region string.
pub fn validate(canonical: &str) -> bool {
    let caps = match region_regex().captures(canonical) {
        Some(c) => c,
        None => return false,
    };
    let prefix = &caps[1];
    let direction = &caps[2];
    if prefix == "us-gov" && direction != "east" && direction != "west" {
        return false;
    }
    true
}

/// Expand a named region group from the config's `[region_groups]` table.
///
/// Each member is resolved through `resolve`, so both shortcodes and
/// canonical strings are accepted inside a group definition.
pub fn expand_group(name: &str, config: &Config) -> Result<Vec<String>> {
    let members = config.region_groups.get(name).ok_or_else(|| {
        SsmError::InvalidArgument {
            field: "region_group".to_string(),
            reason: format!("unknown region group '{name}'"),
        }
    })?;
    members.iter().map(|m| resolve(m)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_shortcodes() {
        assert_eq!(resolve("cac1").unwrap(), "ca-central-1");
        assert_eq!(resolve("use1").unwrap(), "us-east-1");
        assert_eq!(resolve("apne2").unwrap(), "ap-northeast-2");
    }

    #[test]
    fn resolves_already_canonical_regions() {
        assert_eq!(resolve("eu-central-1").unwrap(), "eu-central-1");
    }

    #[test]
    fn rejects_invalid_region_strings() {
        for bad in [
            "us-east-0",
            "us-east-100",
            "us-invalid-1",
            "us-gov-north-1",
            "not-a-region",
            "",
        ] {
            assert!(resolve(bad).is_err(), "expected {bad} to be rejected");
            assert!(!validate(bad), "expected {bad} to fail validate()");
        }
    }

    #[test]
    fn us_gov_accepts_only_east_and_west() {
        assert!(validate("us-gov-east-1"));
        assert!(validate("us-gov-west-1"));
        assert!(!validate("us-gov-central-1"));
    }

    #[test]
    fn round_trip_resolve_validate() {
        for (_, canonical) in SHORTCODES {
            assert!(validate(canonical), "{canonical} should validate");
            assert_eq!(resolve(canonical).unwrap(), *canonical);
        }
        for (shortcode, canonical) in SHORTCODES {
            assert!(validate(&resolve(shortcode).unwrap()));
            assert_eq!(resolve(shortcode).unwrap(), *canonical);
        }
    }

    #[test]
    fn expand_group_resolves_members() {
        let mut config = Config::default();
        config.region_groups.insert(
            "prod".to_string(),
            vec!["cac1".to_string(), "us-east-1".to_string()],
        );
        let expanded = expand_group("prod", &config).unwrap();
        assert_eq!(expanded, vec!["ca-central-1", "us-east-1"]);
    }

    #[test]
    fn expand_group_unknown_name_errors() {
        let config = Config::default();
        assert!(expand_group("nonexistent", &config).is_err());
    }

    #[test]
    fn expand_group_invalid_member_errors() {
        let mut config = Config::default();
        config
            .region_groups
            .insert("bad".to_string(), vec!["not-a-region".to_string()]);
        assert!(expand_group("bad", &config).is_err());
    }
}
