//! Configuration management for contract negotiation
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (contracts.toml)
//! - Environment variables (CONTRACTS__*)
//!
//! ## Example config file (contracts.toml):
//! ```toml
//! [impact]
//! depth_default = 5
//! depth_max = 10
//!
//! [proposals]
//! auto_expire_enabled = true
//! default_expiration_days = 30
//!
//! [versioning]
//! mode = "auto"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{ContractError, Result};
use crate::version::VersioningMode;

/// Traversal depth no configuration may exceed
pub const HARD_DEPTH_CAP: usize = 10;

/// Main configuration for the negotiation core
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Impact analysis settings
    #[serde(default)]
    pub impact: ImpactConfig,

    /// Proposal settings
    #[serde(default)]
    pub proposals: ProposalConfig,

    /// Versioning settings
    #[serde(default)]
    pub versioning: VersioningConfig,
}

/// Dependency traversal bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactConfig {
    /// Depth used when a caller does not ask for one
    #[serde(default = "default_depth")]
    pub depth_default: usize,

    /// Largest depth a caller may ask for
    #[serde(default = "default_depth_max")]
    pub depth_max: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalConfig {
    /// Whether `expire_due` expires anything at all
    #[serde(default = "default_true")]
    pub auto_expire_enabled: bool,

    /// Expiration stamped on new proposals
    #[serde(default)]
    pub default_expiration_days: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersioningConfig {
    #[serde(default)]
    pub mode: VersioningMode,
}

// Default value functions
fn default_depth() -> usize {
    5
}

fn default_depth_max() -> usize {
    HARD_DEPTH_CAP
}

fn default_true() -> bool {
    true
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            depth_default: default_depth(),
            depth_max: default_depth_max(),
        }
    }
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            auto_expire_enabled: true,
            default_expiration_days: None,
        }
    }
}

impl ImpactConfig {
    /// Clamp a requested depth into `1..=depth_max`, falling back to the default
    pub fn effective_depth(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.depth_default)
            .clamp(1, self.depth_max.min(HARD_DEPTH_CAP))
    }
}

impl CoreConfig {
    /// Load configuration from default locations
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["contracts.toml", ".contracts.toml", "config/contracts.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) =
            directories::ProjectDirs::from("dev", "familiar", "schema-contracts")
        {
            let xdg_config = config_dir.config_dir().join("contracts.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (CONTRACTS__IMPACT__DEPTH_MAX=...)
        builder = builder.add_source(
            Environment::with_prefix("CONTRACTS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        Ok(config)
    }

    /// Check the bounds the rest of the crate relies on
    pub fn validate(&self) -> Result<()> {
        let impact = &self.impact;
        if impact.depth_max == 0 || impact.depth_max > HARD_DEPTH_CAP {
            return Err(ContractError::validation(
                "impact.depth_max",
                format!("must be between 1 and {}, got {}", HARD_DEPTH_CAP, impact.depth_max),
            ));
        }
        if impact.depth_default == 0 || impact.depth_default > impact.depth_max {
            return Err(ContractError::validation(
                "impact.depth_default",
                format!("must be between 1 and {}, got {}", impact.depth_max, impact.depth_default),
            ));
        }
        if self.proposals.default_expiration_days == Some(0) {
            return Err(ContractError::validation(
                "proposals.default_expiration_days",
                "must be at least 1 day",
            ));
        }
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = self
            .to_toml()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}
