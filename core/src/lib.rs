//! Retarget Core - proof-of-work target computation and verification
//!
//! Two retarget regimes share one chain: a fixed-window retarget every
//! `difficulty_adjustment_interval` blocks, replaced by a per-block LWMA
//! once the tip reaches `lwma_activation_height`. Every result is a pure
//! function of committed chain data and the consensus parameters.

pub mod block;
pub mod chain;
pub mod compact;
pub mod difficulty;
pub mod lwma;
pub mod params;
pub mod pow;
pub mod retarget;

// Re-export dei tipi principali
pub use block::{BlockHeader, HeaderError};
pub use chain::{BlockIndex, BlockRecord, ChainError, ChainIndex};
pub use compact::{bits_to_target, target_to_bits, CompactTarget, Target};
pub use difficulty::{
    get_next_work_required, next_work_adjustment, DifficultyAdjuster, DifficultyAdjustment,
    DifficultyError, RetargetAlgorithm, RetargetRule,
};
pub use lwma::lwma_next_work_required;
pub use params::{ConsensusParams, Network, ParamsError};
pub use pow::{block_proof, check_proof_of_work, check_proof_of_work_detailed, PowError};
pub use retarget::calculate_next_work_required;

/// Versione attuale del block header
pub const BLOCK_VERSION: i32 = 1;
