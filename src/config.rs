//! Configuration management for txflow
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub orchestrator: OrchestratorConfig,
    pub networks: HashMap<String, NetworkConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Bounded wait for a submitted transaction (or deployment) to confirm
    pub confirmation_timeout_ms: u64,
    /// Receipt polling interval while waiting for confirmation
    pub poll_interval_ms: u64,
    /// Buffer applied on top of estimated gas limits (percent)
    pub gas_limit_buffer_percent: u64,
    /// Buffer applied on top of quoted gas prices (percent)
    pub gas_price_buffer_percent: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    /// Name of the environment variable holding the hex signing key
    pub private_key_env: String,
    pub gas_price_strategy: GasPriceStrategy,
    pub max_gas_price_gwei: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

impl OrchestratorConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout_ms: 120_000,
            poll_interval_ms: 1_000,
            gas_limit_buffer_percent: 20,
            gas_price_buffer_percent: 10,
        }
    }
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("TXFLOW_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &PathBuf) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.networks.is_empty() {
            anyhow::bail!("At least one network must be configured");
        }

        for (name, network) in &self.networks {
            if network.rpc_url.is_empty() {
                anyhow::bail!("Network {} has no RPC URL configured", name);
            }
            if network.private_key_env.is_empty() {
                anyhow::bail!("Network {} has no signing key env var configured", name);
            }
        }

        if self.orchestrator.poll_interval_ms == 0 {
            anyhow::bail!("Poll interval must be non-zero");
        }
        if self.orchestrator.confirmation_timeout_ms < self.orchestrator.poll_interval_ms {
            anyhow::bail!("Confirmation timeout must be at least one poll interval");
        }

        Ok(())
    }

    /// Get network config by name
    pub fn network(&self, name: &str) -> Result<&NetworkConfig> {
        self.networks
            .get(name)
            .with_context(|| format!("Network {} not configured", name))
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
