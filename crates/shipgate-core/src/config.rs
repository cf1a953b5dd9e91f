//! Control-plane configuration: cloud naming context and per-environment
//! promotion policies, loaded from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::orchestrator::HealthPolicy;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cloud.account_id must not be empty")]
    EmptyAccountId,

    #[error("no environment policies configured")]
    NoEnvironments,

    #[error("duplicate environment policy: {name}")]
    DuplicateEnvironment { name: String },

    #[error("environment {name}: health.poll_interval_secs must be non-zero")]
    ZeroPollInterval { name: String },
}

/// Cloud naming context the resolver expands tenant ids into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudNaming {
    #[serde(default = "default_partition")]
    pub partition: String,
    pub account_id: String,
    pub region: String,
}

fn default_partition() -> String {
    "aws".to_string()
}

/// Promotion policy for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionPolicy {
    pub name: String,

    /// Approvals needed before deploying; zero skips the approval wait.
    #[serde(default)]
    pub required_approvals: u32,

    /// Source refs allowed to deploy here; empty means unrestricted.
    #[serde(default)]
    pub allowed_refs: Vec<String>,

    /// Deadline for collecting approvals, measured from entry into the
    /// awaiting-approval state. `None` waits indefinitely.
    #[serde(default)]
    pub approval_deadline_secs: Option<u64>,

    #[serde(default)]
    pub health: HealthPolicy,
}

impl PromotionPolicy {
    /// Policy with no approvals, no ref restriction, default health checks.
    pub fn unrestricted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required_approvals: 0,
            allowed_refs: Vec::new(),
            approval_deadline_secs: None,
            health: HealthPolicy::default(),
        }
    }

    /// Whether the given source ref may deploy to this environment.
    pub fn allows_ref(&self, source_ref: &str) -> bool {
        self.allowed_refs.is_empty() || self.allowed_refs.iter().any(|r| r == source_ref)
    }
}

/// Top-level control-plane configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    pub cloud: CloudNaming,

    #[serde(rename = "environment")]
    pub environments: Vec<PromotionPolicy>,
}

impl ControlPlaneConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: ControlPlaneConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Policy for a named environment, if configured.
    pub fn policy(&self, name: &str) -> Option<&PromotionPolicy> {
        self.environments.iter().find(|p| p.name == name)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cloud.account_id.is_empty() {
            return Err(ConfigError::EmptyAccountId);
        }
        if self.environments.is_empty() {
            return Err(ConfigError::NoEnvironments);
        }
        let mut seen = std::collections::HashSet::new();
        for policy in &self.environments {
            if !seen.insert(policy.name.as_str()) {
                return Err(ConfigError::DuplicateEnvironment {
                    name: policy.name.clone(),
                });
            }
            if policy.health.poll_interval_secs == 0 {
                return Err(ConfigError::ZeroPollInterval {
                    name: policy.name.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [cloud]
        account_id = "123456789012"
        region = "eu-west-1"

        [[environment]]
        name = "staging"

        [[environment]]
        name = "production"
        required_approvals = 1
        allowed_refs = ["main"]
        approval_deadline_secs = 86400

        [environment.health]
        poll_interval_secs = 10
        timeout_secs = 600
        auto_rollback = true
    "#;

    #[test]
    fn test_parse_sample_config() {
        let config = ControlPlaneConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.cloud.partition, "aws");
        assert_eq!(config.environments.len(), 2);

        let staging = config.policy("staging").unwrap();
        assert_eq!(staging.required_approvals, 0);
        assert!(staging.allows_ref("any/branch"));
        assert_eq!(staging.health, HealthPolicy::default());

        let production = config.policy("production").unwrap();
        assert_eq!(production.required_approvals, 1);
        assert!(production.allows_ref("main"));
        assert!(!production.allows_ref("feature/x"));
        assert_eq!(production.approval_deadline_secs, Some(86400));
    }

    #[test]
    fn test_rejects_duplicate_environment() {
        let raw = r#"
            [cloud]
            account_id = "1"
            region = "eu-west-1"

            [[environment]]
            name = "staging"

            [[environment]]
            name = "staging"
        "#;
        let err = ControlPlaneConfig::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateEnvironment { .. }));
    }

    #[test]
    fn test_rejects_empty_account_id() {
        let raw = r#"
            [cloud]
            account_id = ""
            region = "eu-west-1"

            [[environment]]
            name = "staging"
        "#;
        let err = ControlPlaneConfig::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyAccountId));
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let raw = r#"
            [cloud]
            account_id = "1"
            region = "eu-west-1"

            [[environment]]
            name = "staging"

            [environment.health]
            poll_interval_secs = 0
        "#;
        let err = ControlPlaneConfig::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroPollInterval { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shipgate.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = ControlPlaneConfig::load(&path).unwrap();
        assert_eq!(config.environments.len(), 2);

        let err = ControlPlaneConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
