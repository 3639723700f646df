//! Difficulty adjustment: selects the retarget rule for the next block
//!
//! Below the LWMA activation height the target moves only at fixed-window
//! interval boundaries (with the testnet minimum-difficulty exceptions in
//! between); from the activation height on, LWMA recomputes it every block.

use crate::block::BlockHeader;
use crate::chain::{BlockRecord, ChainError, ChainIndex};
use crate::compact::bits_to_target;
use crate::lwma::lwma_next_work_required;
use crate::params::{ConsensusParams, Network, ParamsError};
use crate::pow::check_proof_of_work;
use crate::retarget::calculate_next_work_required;

/// Retarget algoritmo attivo a una data altezza
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetargetAlgorithm {
    FixedWindow,
    Lwma,
}

impl RetargetAlgorithm {
    /// Algorithm that computes the successor of the block at `tip_height`
    pub fn for_tip_height(tip_height: u64, params: &ConsensusParams) -> Self {
        if tip_height >= params.lwma_activation_height {
            RetargetAlgorithm::Lwma
        } else {
            RetargetAlgorithm::FixedWindow
        }
    }
}

/// Which rule produced the next target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetargetRule {
    /// Per-block LWMA recomputation
    Lwma,
    /// Fixed-window retarget at an interval boundary
    IntervalRetarget {
        first_block_height: u64,
        actual_timespan: i64,
    },
    /// Between boundaries the tip's target carries over
    KeepPrevious,
    /// Candidate arrives long after the tip: limit difficulty allowed
    MinDifficultyGap,
    /// Target of the last block that was not a minimum-difficulty exception
    LastRegularDifficulty { height: u64 },
}

/// Risultato del calcolo di difficulty adjustment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DifficultyAdjustment {
    /// Altezza del tip
    pub tip_height: u64,
    /// Difficulty attuale (bits format)
    pub current_bits: u32,
    /// Nuova difficulty calcolata (bits format)
    pub new_bits: u32,
    /// Regola applicata
    pub rule: RetargetRule,
}

impl DifficultyAdjustment {
    pub fn algorithm(&self) -> RetargetAlgorithm {
        match self.rule {
            RetargetRule::Lwma => RetargetAlgorithm::Lwma,
            _ => RetargetAlgorithm::FixedWindow,
        }
    }

    /// Indica se i bits cambiano
    pub fn needs_adjustment(&self) -> bool {
        self.new_bits != self.current_bits
    }

    /// Indica se la difficulty è aumentata (target più basso)
    pub fn is_increase(&self) -> bool {
        bits_to_target(self.new_bits).target < bits_to_target(self.current_bits).target
    }

    /// Indica se la difficulty è diminuita (target più alto)
    pub fn is_decrease(&self) -> bool {
        bits_to_target(self.new_bits).target > bits_to_target(self.current_bits).target
    }

    /// Formatta l'aggiustamento in modo leggibile
    pub fn format_adjustment(&self) -> String {
        let rule = match self.rule {
            RetargetRule::Lwma => "LWMA".to_string(),
            RetargetRule::IntervalRetarget {
                first_block_height,
                actual_timespan,
            } => format!(
                "interval retarget from block {} over {}s",
                first_block_height, actual_timespan
            ),
            RetargetRule::KeepPrevious => "no retarget".to_string(),
            RetargetRule::MinDifficultyGap => "minimum-difficulty gap".to_string(),
            RetargetRule::LastRegularDifficulty { height } => {
                format!("last regular difficulty from block {}", height)
            }
        };

        let direction = if self.is_increase() {
            "increased"
        } else if self.is_decrease() {
            "decreased"
        } else {
            "unchanged"
        };

        format!(
            "Difficulty {} at tip {} ({}): 0x{:08x} -> 0x{:08x}",
            direction, self.tip_height, rule, self.current_bits, self.new_bits
        )
    }
}

/// Calcola la regola e i bits richiesti per il block successivo a `tip`
///
/// `candidate_time` is the timestamp of the block being built or checked; it
/// only matters for the minimum-difficulty exception.
pub fn next_work_adjustment<C: ChainIndex + ?Sized>(
    chain: &C,
    tip: &BlockRecord,
    candidate_time: i64,
    params: &ConsensusParams,
) -> Result<DifficultyAdjustment, DifficultyError> {
    let (new_bits, rule) = match RetargetAlgorithm::for_tip_height(tip.height, params) {
        RetargetAlgorithm::Lwma => (
            lwma_next_work_required(chain, tip.height, params)?,
            RetargetRule::Lwma,
        ),
        RetargetAlgorithm::FixedWindow => fixed_window_work(chain, tip, candidate_time, params)?,
    };

    let adjustment = DifficultyAdjustment {
        tip_height: tip.height,
        current_bits: tip.bits,
        new_bits,
        rule,
    };

    if matches!(rule, RetargetRule::IntervalRetarget { .. }) {
        log::info!("{}", adjustment.format_adjustment());
    } else {
        log::debug!("{}", adjustment.format_adjustment());
    }

    Ok(adjustment)
}

fn fixed_window_work<C: ChainIndex + ?Sized>(
    chain: &C,
    tip: &BlockRecord,
    candidate_time: i64,
    params: &ConsensusParams,
) -> Result<(u32, RetargetRule), ChainError> {
    let interval = params.difficulty_adjustment_interval();
    let pow_limit_bits = params.pow_limit_bits();

    if (tip.height + 1) % interval != 0 {
        if params.pow_allow_min_difficulty_blocks {
            if candidate_time > tip.timestamp + params.pow_target_spacing * 2 {
                return Ok((pow_limit_bits, RetargetRule::MinDifficultyGap));
            }

            let mut block = *tip;
            while block.height > 0 && block.height % interval != 0 && block.bits == pow_limit_bits {
                block = chain.ancestor(block.height - 1)?;
            }
            return Ok((
                block.bits,
                RetargetRule::LastRegularDifficulty {
                    height: block.height,
                },
            ));
        }

        return Ok((tip.bits, RetargetRule::KeepPrevious));
    }

    // The first retarget measures from genesis, one block fewer
    let blocks_to_go_back = if tip.height + 1 == interval {
        interval - 1
    } else {
        interval
    };

    let first = chain.ancestor(tip.height.saturating_sub(blocks_to_go_back))?;
    let actual_timespan = tip.timestamp - first.timestamp;

    Ok((
        calculate_next_work_required(tip.bits, actual_timespan, params),
        RetargetRule::IntervalRetarget {
            first_block_height: first.height,
            actual_timespan,
        },
    ))
}

/// Compact target required for the block that follows `tip`.
pub fn get_next_work_required<C: ChainIndex + ?Sized>(
    chain: &C,
    tip: &BlockRecord,
    candidate: &BlockHeader,
    params: &ConsensusParams,
) -> Result<u32, DifficultyError> {
    next_work_adjustment(chain, tip, i64::from(candidate.time), params).map(|a| a.new_bits)
}

/// Difficulty adjustment manager
///
/// Holds a validated parameter set; construction is where misconfiguration
/// surfaces, before any block is processed.
#[derive(Debug, Clone)]
pub struct DifficultyAdjuster {
    params: ConsensusParams,
}

impl DifficultyAdjuster {
    /// Crea difficulty adjuster con parametri custom
    pub fn new(params: ConsensusParams) -> Result<Self, ParamsError> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Crea difficulty adjuster con i parametri di una rete
    pub fn for_network(network: Network) -> Self {
        Self {
            params: network.params(),
        }
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    /// Calcola la nuova difficulty per il block successivo a `tip`
    pub fn calculate_next_difficulty<C: ChainIndex + ?Sized>(
        &self,
        chain: &C,
        tip: &BlockRecord,
        candidate_time: i64,
    ) -> Result<DifficultyAdjustment, DifficultyError> {
        next_work_adjustment(chain, tip, candidate_time, &self.params)
    }

    pub fn next_work_required<C: ChainIndex + ?Sized>(
        &self,
        chain: &C,
        tip: &BlockRecord,
        candidate: &BlockHeader,
    ) -> Result<u32, DifficultyError> {
        get_next_work_required(chain, tip, candidate, &self.params)
    }

    pub fn check_proof_of_work(&self, hash: &[u8; 32], bits: u32) -> bool {
        check_proof_of_work(hash, bits, &self.params)
    }

    /// Difficulty minima consentita (proof-of-work limit)
    pub fn minimum_difficulty(&self) -> u32 {
        self.params.pow_limit_bits()
    }
}

/// Errori del difficulty adjustment
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DifficultyError {
    #[error("Chain index error: {0}")]
    Chain(#[from] ChainError),
}
