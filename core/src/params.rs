//! Consensus parameters consumed by the retarget algorithms.
//!
//! Parameters are an explicit immutable value threaded through every call;
//! several networks can coexist in the same process.

use crate::compact::{target_from_hex, target_to_bits, Target};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Altezza di attivazione LWMA sulle reti pubbliche
pub const LWMA_ACTIVATION_HEIGHT: u64 = 146_000;

/// Finestra LWMA di default (blocks)
pub const DEFAULT_LWMA_WINDOW: u64 = 90;

const MAIN_POW_LIMIT: &str = "00000fffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";
const REGTEST_POW_LIMIT: &str = "7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";

/// Networks with built-in parameter presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Main,
    Test,
    Regtest,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Main => "main",
            Network::Test => "test",
            Network::Regtest => "regtest",
        }
    }

    /// Compact target carried by this network's genesis block
    pub fn genesis_bits(&self) -> u32 {
        match self {
            Network::Main | Network::Test => 0x1e0ffff0,
            Network::Regtest => 0x207fffff,
        }
    }

    pub fn params(&self) -> ConsensusParams {
        ConsensusParams::for_network(*self)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" | "mainnet" => Ok(Network::Main),
            "test" | "testnet" => Ok(Network::Test),
            "regtest" => Ok(Network::Regtest),
            other => Err(ParamsError::UnknownNetwork(other.to_string())),
        }
    }
}

/// Proof-of-work consensus parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Easiest allowed target
    #[serde(with = "hex_target")]
    pub pow_limit: Target,
    /// Expected duration of one fixed-window interval, in seconds
    pub pow_target_timespan: i64,
    /// Expected time between blocks, in seconds
    pub pow_target_spacing: i64,
    /// Testnet rule: allow limit-difficulty blocks after a long gap
    pub pow_allow_min_difficulty_blocks: bool,
    /// Never move the target (regression test networks)
    pub pow_no_retargeting: bool,
    /// Number of blocks averaged by LWMA
    pub lwma_averaging_window: u64,
    /// First tip height at which LWMA replaces the fixed-window retarget
    pub lwma_activation_height: u64,
}

impl ConsensusParams {
    /// Parametri preimpostati per una rete
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Main => Self {
                pow_limit: preset_limit(MAIN_POW_LIMIT),
                pow_target_timespan: 7 * 24 * 60 * 60,
                pow_target_spacing: 72,
                pow_allow_min_difficulty_blocks: false,
                pow_no_retargeting: false,
                lwma_averaging_window: DEFAULT_LWMA_WINDOW,
                lwma_activation_height: LWMA_ACTIVATION_HEIGHT,
            },
            Network::Test => Self {
                pow_limit: preset_limit(MAIN_POW_LIMIT),
                pow_target_timespan: 302_400,
                pow_target_spacing: 150,
                pow_allow_min_difficulty_blocks: true,
                pow_no_retargeting: false,
                lwma_averaging_window: DEFAULT_LWMA_WINDOW,
                lwma_activation_height: LWMA_ACTIVATION_HEIGHT,
            },
            Network::Regtest => Self {
                pow_limit: preset_limit(REGTEST_POW_LIMIT),
                pow_target_timespan: 302_400,
                pow_target_spacing: 150,
                pow_allow_min_difficulty_blocks: true,
                pow_no_retargeting: true,
                lwma_averaging_window: DEFAULT_LWMA_WINDOW,
                lwma_activation_height: LWMA_ACTIVATION_HEIGHT,
            },
        }
    }

    /// Blocks between fixed-window retargets
    pub fn difficulty_adjustment_interval(&self) -> u64 {
        (self.pow_target_timespan / self.pow_target_spacing) as u64
    }

    /// The proof-of-work limit in compact form
    pub fn pow_limit_bits(&self) -> u32 {
        target_to_bits(&self.pow_limit)
    }

    /// LWMA normalizer `k = N(N+1)T/2`
    pub fn lwma_k(&self) -> i64 {
        let n = self.lwma_averaging_window as i64;
        n * (n + 1) * self.pow_target_spacing / 2
    }

    /// Rejects parameter sets the retarget code cannot run with.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.pow_limit.is_zero() {
            return Err(ParamsError::ZeroPowLimit);
        }
        if self.pow_target_spacing <= 0 {
            return Err(ParamsError::NonPositiveSpacing(self.pow_target_spacing));
        }
        if self.pow_target_timespan < self.pow_target_spacing {
            return Err(ParamsError::TimespanShorterThanSpacing {
                timespan: self.pow_target_timespan,
                spacing: self.pow_target_spacing,
            });
        }
        if self.lwma_averaging_window == 0 {
            return Err(ParamsError::ZeroAveragingWindow);
        }

        // k·N and the 6T solve time clamp must stay inside i64
        let n = i64::try_from(self.lwma_averaging_window)
            .map_err(|_| ParamsError::AveragingWindowTooLarge(self.lwma_averaging_window))?;
        n.checked_add(1)
            .and_then(|n1| n.checked_mul(n1))
            .and_then(|nn| nn.checked_mul(self.pow_target_spacing))
            .map(|k2| k2 / 2)
            .and_then(|k| k.checked_mul(n))
            .and_then(|_| self.pow_target_spacing.checked_mul(6))
            .ok_or(ParamsError::AveragingWindowTooLarge(self.lwma_averaging_window))?;

        if self.pow_target_timespan.checked_mul(4).is_none() {
            return Err(ParamsError::TimespanTooLarge(self.pow_target_timespan));
        }

        Ok(())
    }
}

fn preset_limit(hex: &str) -> Target {
    // Presets are compile-time constants of exactly 32 bytes
    target_from_hex(hex).unwrap_or_else(|_| Target::MAX)
}

/// Errori di configurazione dei parametri
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamsError {
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    #[error("Proof-of-work limit cannot be zero")]
    ZeroPowLimit,

    #[error("Target spacing must be positive, got {0}")]
    NonPositiveSpacing(i64),

    #[error("Target timespan {timespan}s is shorter than spacing {spacing}s")]
    TimespanShorterThanSpacing { timespan: i64, spacing: i64 },

    #[error("Target timespan too large: {0}")]
    TimespanTooLarge(i64),

    #[error("LWMA averaging window cannot be zero")]
    ZeroAveragingWindow,

    #[error("LWMA averaging window too large: {0}")]
    AveragingWindowTooLarge(u64),
}

mod hex_target {
    use super::Target;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(target: &Target, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&crate::compact::target_to_hex(target))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Target, D::Error> {
        let s = String::deserialize(deserializer)?;
        crate::compact::target_from_hex(&s).map_err(serde::de::Error::custom)
    }
}
