//! Node configuration loading

use crate::state::StateManager;
use crate::verifier::HeaderVerifier;
use anyhow::{Context, Result};
use retarget_core::compact::target_from_hex;
use retarget_core::{BlockHeader, ConsensusParams, DifficultyAdjuster, Network};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Optional replacements for preset consensus parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParamOverrides {
    /// Big-endian hex, optional `0x` prefix
    pub pow_limit: Option<String>,
    pub pow_target_timespan: Option<i64>,
    pub pow_target_spacing: Option<i64>,
    pub pow_allow_min_difficulty_blocks: Option<bool>,
    pub pow_no_retargeting: Option<bool>,
    pub lwma_averaging_window: Option<u64>,
    pub lwma_activation_height: Option<u64>,
}

/// Configuration for a header-verifying node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network whose presets are the starting point
    pub network: Network,
    #[serde(default)]
    pub overrides: ParamOverrides,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: Network::Main,
            overrides: ParamOverrides::default(),
        }
    }
}

impl NodeConfig {
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    /// Parse a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid node configuration")
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_json_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        log::info!("Loaded {} configuration from {}", config.network, path.display());
        Ok(config)
    }

    /// Write configuration as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    /// Network presets with overrides applied, validated
    pub fn consensus_params(&self) -> Result<ConsensusParams> {
        let mut params = self.network.params();
        let o = &self.overrides;

        if let Some(limit) = &o.pow_limit {
            params.pow_limit = target_from_hex(limit)
                .with_context(|| format!("Invalid pow_limit override {:?}", limit))?;
        }
        if let Some(timespan) = o.pow_target_timespan {
            params.pow_target_timespan = timespan;
        }
        if let Some(spacing) = o.pow_target_spacing {
            params.pow_target_spacing = spacing;
        }
        if let Some(allow) = o.pow_allow_min_difficulty_blocks {
            params.pow_allow_min_difficulty_blocks = allow;
        }
        if let Some(no_retargeting) = o.pow_no_retargeting {
            params.pow_no_retargeting = no_retargeting;
        }
        if let Some(window) = o.lwma_averaging_window {
            params.lwma_averaging_window = window;
        }
        if let Some(height) = o.lwma_activation_height {
            params.lwma_activation_height = height;
        }

        params
            .validate()
            .with_context(|| format!("Invalid consensus parameters for {}", self.network))?;

        if o != &ParamOverrides::default() {
            log::debug!("Consensus parameters for {} overridden: {:?}", self.network, o);
        }
        Ok(params)
    }

    pub fn header_verifier(&self) -> Result<HeaderVerifier> {
        let params = self.consensus_params()?;
        Ok(HeaderVerifier::new(DifficultyAdjuster::new(params)?))
    }

    /// State manager for this configuration rooted at `genesis`
    pub fn state_manager(&self, genesis: BlockHeader) -> Result<StateManager> {
        StateManager::new(genesis, self.header_verifier()?)
            .context("Failed to initialise chain state")
    }
}
