//! On-disk configuration for ztictl
//!
//! Mirrors the teacher's two-tier lookup: `.ztictl.toml` in the current
//! directory takes priority, otherwise `~/.config/ztictl/config.toml`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub aws: AwsConfig,
    pub transfer: TransferConfig,
    pub fanout: FanoutConfig,
    pub platform_detection: PlatformDetectionConfig,
    pub cleanup: CleanupConfig,
    pub logging: LoggingConfig,
    /// Named groups of regions, e.g. `[region_groups] prod = ["cac1", "use1"]`.
    pub region_groups: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub default_region: String,
    pub s3_bucket_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Files at or above this size use staged (S3-backed) transfer.
    pub file_size_threshold_bytes: u64,
    pub iam_propagation_delay_secs: u64,
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Max concurrent targets per region during fan-out.
    pub parallel: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformDetectionConfig {
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub grace_period_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            aws: AwsConfig::default(),
            transfer: TransferConfig::default(),
            fanout: FanoutConfig::default(),
            platform_detection: PlatformDetectionConfig::default(),
            cleanup: CleanupConfig::default(),
            logging: LoggingConfig::default(),
            region_groups: HashMap::new(),
        }
    }
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            default_region: "us-east-1".to_string(),
            s3_bucket_prefix: "ztictl-transfer".to_string(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            file_size_threshold_bytes: 1024 * 1024,
            iam_propagation_delay_secs: 5,
            command_timeout_secs: 60,
        }
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self { parallel: 5 }
    }
}

impl Default for PlatformDetectionConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 15 * 60,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: dirs::data_local_dir()
                .map(|d| d.join("ztictl").join("logs"))
                .unwrap_or_else(|| PathBuf::from("logs")),
            enabled: true,
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p.to_path_buf()
        } else {
            let local = PathBuf::from(".ztictl.toml");
            if local.exists() {
                local
            } else {
                dirs::config_dir()
                    .map(|d| d.join("ztictl").join("config.toml"))
                    .unwrap_or_else(|| PathBuf::from(".ztictl.toml"))
            }
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config: {}", config_path.display()))?;
            let config: Config = toml::from_str(&content).with_context(|| {
                let mut err = format!("Failed to parse config: {}", config_path.display());
                err.push_str("\n  Common issues:");
                err.push_str("\n    - Invalid TOML syntax");
                err.push_str("\n    - Incorrect value types");
                err.push_str("\n  Tip: Run 'ztictl config init' to create a new config file");
                err
            })?;
            Ok(config)
        } else {
            if path.is_some() {
                eprintln!("WARNING: Config file not found: {}", config_path.display());
                eprintln!("   Using default configuration. Run 'ztictl config init' to create a config file.");
            }
            Ok(Config::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config dir: {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }
}

pub fn init_config(output: &Path) -> Result<()> {
    let config = Config::default();
    config.save(output)?;
    println!("Created config file: {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.aws.default_region, "us-east-1");
        assert_eq!(config.transfer.file_size_threshold_bytes, 1024 * 1024);
        assert_eq!(config.fanout.parallel, 5);
        assert_eq!(config.cleanup.grace_period_secs, 30);
        assert!(config.region_groups.is_empty());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");

        let mut config = Config::default();
        config
            .region_groups
            .insert("prod".to_string(), vec!["cac1".to_string(), "use1".to_string()]);
        assert!(config.save(&config_path).is_ok());
        assert!(config_path.exists());

        let loaded = Config::load(Some(&config_path)).unwrap();
        assert_eq!(loaded.aws.default_region, config.aws.default_region);
        assert_eq!(loaded.region_groups.get("prod").unwrap().len(), 2);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let fake_path = temp_dir.path().join("nonexistent.toml");

        let config = Config::load(Some(&fake_path)).unwrap();
        assert_eq!(config.fanout.parallel, 5);
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "invalid toml content {").unwrap();

        let result = Config::load(Some(&config_path));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_load_partial_toml_uses_defaults_for_rest() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("partial.toml");
        std::fs::write(&config_path, "[aws]\ndefault_region = \"ca-central-1\"\n").unwrap();

        let config = Config::load(Some(&config_path)).unwrap();
        assert_eq!(config.aws.default_region, "ca-central-1");
        assert_eq!(config.transfer.file_size_threshold_bytes, 1024 * 1024);
    }

    #[test]
    fn test_init_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("init_test.toml");

        assert!(init_config(&config_path).is_ok());
        assert!(config_path.exists());

        let config = Config::load(Some(&config_path)).unwrap();
        assert_eq!(config.aws.s3_bucket_prefix, "ztictl-transfer");
    }
}
