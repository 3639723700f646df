//! Fixed-window difficulty retarget
//!
//! Fires once per `difficulty_adjustment_interval` blocks and scales the
//! previous target by the ratio of observed to expected interval duration,
//! bounded to a factor of four either way.

use crate::compact::{bits_to_target, target_to_bits, Target};
use crate::params::ConsensusParams;

/// Clamps an observed interval duration into `[timespan/4, timespan*4]`.
pub fn clamp_timespan(actual_timespan: i64, params: &ConsensusParams) -> i64 {
    let min = params.pow_target_timespan / 4;
    let max = params.pow_target_timespan * 4;
    actual_timespan.clamp(min, max)
}

/// Calcola la nuova difficulty a fine intervallo
///
/// `actual_timespan` is the tip timestamp minus the timestamp of the first
/// block of the interval; it may be negative when timestamps run backwards.
pub fn calculate_next_work_required(
    previous_bits: u32,
    actual_timespan: i64,
    params: &ConsensusParams,
) -> u32 {
    if params.pow_no_retargeting {
        return previous_bits;
    }

    let clamped = clamp_timespan(actual_timespan, params);

    let pow_limit = params.pow_limit;
    let mut target = bits_to_target(previous_bits).target;

    // The intermediate product can need one bit more than the limit
    let shifted = target.bits() > pow_limit.bits().saturating_sub(1);
    if shifted {
        target = target >> 1;
    }

    let (product, _) = target.overflowing_mul(Target::from(clamped as u64));
    let mut next = product / Target::from(params.pow_target_timespan as u64);

    if shifted {
        next = next << 1;
    }

    if next > pow_limit {
        next = pow_limit;
    }

    let bits = target_to_bits(&next);
    log::debug!(
        "Fixed-window retarget: timespan {}s (clamped {}s, expected {}s), bits 0x{:08x} -> 0x{:08x}",
        actual_timespan,
        clamped,
        params.pow_target_timespan,
        previous_bits,
        bits
    );
    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Network;
    use proptest::prelude::*;

    fn main_params() -> ConsensusParams {
        Network::Main.params()
    }

    #[test]
    fn test_on_schedule_keeps_bits() {
        let params = main_params();
        let bits = calculate_next_work_required(0x1d00ffff, params.pow_target_timespan, &params);
        assert_eq!(bits, 0x1d00ffff);
    }

    #[test]
    fn test_twice_as_fast_halves_target() {
        let params = main_params();
        let bits = calculate_next_work_required(0x1d00ffff, params.pow_target_timespan / 2, &params);
        // 0xffff << 208 halved
        assert_eq!(bits, 0x1c7fff80);
    }

    #[test]
    fn test_clamped_to_quarter() {
        let params = main_params();
        let quarter = calculate_next_work_required(0x1d00ffff, params.pow_target_timespan / 4, &params);
        let much_faster = calculate_next_work_required(0x1d00ffff, 1, &params);
        let backwards = calculate_next_work_required(0x1d00ffff, -5_000, &params);
        assert_eq!(quarter, 0x1c3fffc0);
        assert_eq!(much_faster, quarter);
        assert_eq!(backwards, quarter);
    }

    #[test]
    fn test_clamped_to_four_times() {
        let params = main_params();
        let four = calculate_next_work_required(0x1c00ffff, params.pow_target_timespan * 4, &params);
        let slower = calculate_next_work_required(0x1c00ffff, params.pow_target_timespan * 40, &params);
        assert_eq!(four, 0x1c03fffc);
        assert_eq!(slower, four);
    }

    #[test]
    fn test_capped_at_pow_limit() {
        let params = main_params();
        let bits = calculate_next_work_required(0x1e0ffff0, params.pow_target_timespan * 2, &params);
        assert_eq!(bits, params.pow_limit_bits());
    }

    #[test]
    fn test_product_wraps_near_limit() {
        // Near-limit targets times a 4x timespan exceed 256 bits and wrap
        let params = main_params();
        let bits = calculate_next_work_required(0x1e0ffff0, params.pow_target_timespan * 4, &params);
        assert_eq!(bits, 0x1e0884d0);

        let bits = calculate_next_work_required(0x1e07ffff, params.pow_target_timespan * 4, &params);
        assert_eq!(bits, 0x1e044284);
    }

    #[test]
    fn test_no_retargeting() {
        let params = Network::Regtest.params();
        let bits = calculate_next_work_required(0x207fffff, 1, &params);
        assert_eq!(bits, 0x207fffff);
    }

    #[test]
    fn test_limit_width_target_is_shifted() {
        // A target as wide as the limit takes the shift path and still lands
        // exactly on the limit when the interval ran on schedule
        let params = main_params();
        let bits = calculate_next_work_required(0x1e0fffff, params.pow_target_timespan, &params);
        assert_eq!(bits, 0x1e0fffff);

        let bits = calculate_next_work_required(0x1e0fffff, params.pow_target_timespan / 2, &params);
        assert_eq!(bits, 0x1e07ffff);
    }

    #[test]
    fn test_clamp_timespan() {
        let params = main_params();
        assert_eq!(clamp_timespan(0, &params), 151_200);
        assert_eq!(clamp_timespan(604_800, &params), 604_800);
        assert_eq!(clamp_timespan(i64::MAX, &params), 2_419_200);
    }

    proptest! {
        #[test]
        fn prop_adjustment_bounded_by_four(
            mantissa in 0x008000u32..=0x7fffff,
            size in 0x10u32..=0x1c,
            timespan in -10_000_000i64..10_000_000,
        ) {
            let params = main_params();
            let bits = (size << 24) | mantissa;
            let old = bits_to_target(bits).target;
            let new = bits_to_target(calculate_next_work_required(bits, timespan, &params)).target;

            // Encoding truncates, so allow for the dropped low bytes
            prop_assert!(new <= old * Target::from(4u64));
            prop_assert!(new >= old / Target::from(4u64) - (old >> 16));
        }
    }
}
