//! Proof-of-work verification

use crate::block::hash_to_target;
use crate::compact::{bits_to_target, Target};
use crate::params::ConsensusParams;

/// Reason a hash/bits pair fails proof-of-work
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PowError {
    #[error("Compact target has the sign bit set")]
    Negative,

    #[error("Compact target overflows 256 bits")]
    Overflow,

    #[error("Compact target is zero")]
    ZeroTarget,

    #[error("Target is easier than the proof-of-work limit")]
    AboveLimit,

    #[error("Block hash is above the claimed target")]
    HashAboveTarget,
}

/// Checks `hash` (internal byte order) against the claimed compact target.
pub fn check_proof_of_work_detailed(
    hash: &[u8; 32],
    bits: u32,
    params: &ConsensusParams,
) -> Result<(), PowError> {
    let decoded = bits_to_target(bits);

    if decoded.negative {
        return Err(PowError::Negative);
    }
    if decoded.overflow {
        return Err(PowError::Overflow);
    }
    if decoded.target.is_zero() {
        return Err(PowError::ZeroTarget);
    }
    if decoded.target > params.pow_limit {
        return Err(PowError::AboveLimit);
    }

    if hash_to_target(hash) > decoded.target {
        return Err(PowError::HashAboveTarget);
    }

    Ok(())
}

/// Verifica se il hash soddisfa la difficulty dichiarata
pub fn check_proof_of_work(hash: &[u8; 32], bits: u32, params: &ConsensusParams) -> bool {
    match check_proof_of_work_detailed(hash, bits, params) {
        Ok(()) => true,
        Err(e) => {
            log::trace!("Proof of work rejected for bits 0x{:08x}: {}", bits, e);
            false
        }
    }
}

/// Expected number of hashes to find a block at `bits`: 2^256 / (target + 1)
///
/// Zero for targets that could never be valid.
pub fn block_proof(bits: u32) -> Target {
    let decoded = bits_to_target(bits);
    if !decoded.is_valid() || decoded.target.is_zero() {
        return Target::zero();
    }

    // 2^256 does not fit, but (2^256 - t - 1) / (t + 1) + 1 is equal
    let target = decoded.target;
    (!target / (target + Target::one())) + Target::one()
}

/// Difficulty relative to the proof-of-work limit (1.0 at the limit)
pub fn difficulty(bits: u32, params: &ConsensusParams) -> f64 {
    let decoded = bits_to_target(bits);
    if !decoded.is_valid() || decoded.target.is_zero() {
        return 0.0;
    }
    target_to_f64(&params.pow_limit) / target_to_f64(&decoded.target)
}

fn target_to_f64(target: &Target) -> f64 {
    target
        .0
        .iter()
        .rev()
        .fold(0.0, |acc, &word| acc * 18_446_744_073_709_551_616.0 + word as f64)
}
