//! Linearly weighted moving average (LWMA) retarget
//!
//! Recomputes the target for every block from the last `N` solve times and
//! targets, weighting the most recent block `N` times as heavily as the
//! oldest one.
//!
//! Each block's target is divided by `k·N` *before* being summed. The
//! truncation this introduces is part of the consensus rule and must not be
//! replaced by a single division of the sum.

use crate::chain::{ChainError, ChainIndex};
use crate::compact::{bits_to_target, target_to_bits, Target};
use crate::params::ConsensusParams;

/// Longest solve time one block may contribute, in target spacings
pub const MAX_SOLVETIME_SPACINGS: i64 = 6;

/// Calcola il target LWMA per il block successivo a `tip_height`
///
/// Chains shorter than the averaging window get the proof-of-work limit.
pub fn lwma_next_work_required<C: ChainIndex + ?Sized>(
    chain: &C,
    tip_height: u64,
    params: &ConsensusParams,
) -> Result<u32, ChainError> {
    let spacing = params.pow_target_spacing;
    let window = params.lwma_averaging_window;
    let k = params.lwma_k();
    let pow_limit = params.pow_limit;

    if tip_height < window {
        return Ok(target_to_bits(&pow_limit));
    }

    let divisor = Target::from((k * window as i64) as u64);
    let max_solvetime = MAX_SOLVETIME_SPACINGS * spacing;

    let mut previous_timestamp = chain.ancestor(tip_height - window)?.timestamp;
    let mut weighted_solvetimes: i64 = 0;
    let mut sum_target = Target::zero();

    for (weight, height) in (1i64..).zip(tip_height - window + 1..=tip_height) {
        let block = chain.ancestor(height)?;

        // Force strictly increasing timestamps
        let this_timestamp = if block.timestamp > previous_timestamp {
            block.timestamp
        } else {
            previous_timestamp.saturating_add(1)
        };

        let solvetime = max_solvetime.min(this_timestamp - previous_timestamp);
        previous_timestamp = this_timestamp;

        weighted_solvetimes += solvetime * weight;

        let target = bits_to_target(block.bits).target;
        sum_target = sum_target + target / divisor;

        log::trace!(
            "LWMA block {}: solvetime {}s, weight {}, bits 0x{:08x}",
            height,
            solvetime,
            weight,
            block.bits
        );
    }

    let (mut next_target, _) =
        Target::from(weighted_solvetimes as u64).overflowing_mul(sum_target);

    if next_target > pow_limit {
        next_target = pow_limit;
    }

    let bits = target_to_bits(&next_target);
    log::debug!(
        "LWMA retarget at tip {}: weighted solvetime {} (k = {}), next bits 0x{:08x}",
        tip_height,
        weighted_solvetimes,
        k,
        bits
    );
    Ok(bits)
}
