//! Platform commission split.

/// Basis points in one whole (100%).
pub const BASIS_POINTS_SCALE: i64 = 10_000;

/// Rate applied when none is configured: 8%.
pub const DEFAULT_COMMISSION_RATE_BPS: u32 = 800;

/// Result of splitting a gross amount between the platform and the payee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionSplit {
    pub commission: i64,
    pub payout: i64,
}

/// Splits `amount` (minor units) at `rate_bps` basis points.
///
/// The commission is rounded to the nearest minor unit with halves rounding
/// up, and the payout is always the remainder, so the two parts sum to
/// `amount` exactly.
pub fn compute_split(amount: i64, rate_bps: u32) -> CommissionSplit {
    let scaled = i128::from(amount) * i128::from(rate_bps);
    let scale = i128::from(BASIS_POINTS_SCALE);
    // floor((2x + s) / 2s) == round-half-up(x / s), also for negative x
    let commission = (2 * scaled + scale).div_euclid(2 * scale) as i64;

    CommissionSplit {
        commission,
        payout: amount - commission,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rate_on_round_amount() {
        let split = compute_split(10_000, DEFAULT_COMMISSION_RATE_BPS);
        assert_eq!(split.commission, 800);
        assert_eq!(split.payout, 9_200);
    }

    #[test]
    fn test_half_unit_rounds_up() {
        // 8% of 1_250 is 100 exactly, 8% of 1_256 is 100.48, 8% of 1_257 is 100.56
        assert_eq!(compute_split(1_250, 800).commission, 100);
        assert_eq!(compute_split(1_256, 800).commission, 100);
        assert_eq!(compute_split(1_257, 800).commission, 101);
        // 50 bps of 100 is exactly 0.5
        assert_eq!(compute_split(100, 50).commission, 1);
    }

    #[test]
    fn test_zero_rate_and_full_rate() {
        assert_eq!(
            compute_split(4_321, 0),
            CommissionSplit { commission: 0, payout: 4_321 }
        );
        assert_eq!(
            compute_split(4_321, 10_000),
            CommissionSplit { commission: 4_321, payout: 0 }
        );
    }

    #[test]
    fn test_parts_always_sum_to_amount() {
        for rate in [0u32, 1, 250, 799, 800, 801, 1_500, 9_999, 10_000] {
            for amount in (1..5_000i64).step_by(7).chain([i64::from(u32::MAX), 9_999_999_999]) {
                let split = compute_split(amount, rate);
                assert_eq!(split.commission + split.payout, amount);

                let exact = amount as f64 * f64::from(rate) / 10_000.0;
                assert_eq!(split.commission, (exact + 0.5).floor() as i64, "amount={amount} rate={rate}");
            }
        }
    }
}
