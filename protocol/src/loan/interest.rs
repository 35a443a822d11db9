//! # Interest Accounting
//!
//! Pure functions, no state, no clock — elapsed time comes in as an
//! argument. This is where a rounding mistake becomes a fund-loss bug, so
//! the rules are rigid:
//!
//! - multiply before dividing, one division, performed last;
//! - all intermediates in `u128` so `principal * apr_bps * minutes` can
//!   never overflow for representable inputs;
//! - elapsed time truncates to whole minutes — 59 seconds accrue nothing;
//! - a zero rate means the fixed interest *is* the interest, forever,
//!   including arbitrarily far past the default deadline.
//!
//! Two entry points with different failure semantics: [`total_debt`]
//! saturates and never fails (status and fingerprint reads must always
//! produce an answer), while [`repayment_amount`] uses checked arithmetic
//! because money is about to move against its result.

use chrono::Duration;
use thiserror::Error;

use crate::config::ACCRUAL_DENOMINATOR;

/// The outstanding debt does not fit in `u64`.
///
/// Only reachable with adversarial principal/rate combinations; every
/// realistic loan stays far below the boundary.
#[derive(Debug, Error)]
#[error("debt computation overflowed: principal {principal} with accrued interest {accrued}")]
pub struct DebtOverflow {
    /// Outstanding principal at the time of the computation.
    pub principal: u64,
    /// Accrued interest that could not be added to it.
    pub accrued: u64,
}

/// Interest accrued after `elapsed` time on top of `fixed_interest`.
///
/// With `apr_bps == 0` this returns `fixed_interest` unconditionally — no
/// time dependence at all. Otherwise it adds
/// `principal * apr_bps * whole_minutes / (10_000 * MINUTES_IN_YEAR)`,
/// truncating. Monotonic non-decreasing in `elapsed`; saturates at
/// `u64::MAX` instead of failing.
pub fn accrued_interest(
    principal: u64,
    fixed_interest: u64,
    apr_bps: u32,
    elapsed: Duration,
) -> u64 {
    if apr_bps == 0 {
        return fixed_interest;
    }

    let minutes = elapsed.num_minutes().max(0) as u128;
    let accrued = u128::from(principal) * u128::from(apr_bps) * minutes / ACCRUAL_DENOMINATOR;
    let accrued = u64::try_from(accrued).unwrap_or(u64::MAX);
    fixed_interest.saturating_add(accrued)
}

/// Total outstanding debt, saturating. Never fails.
///
/// This is the read-path companion of [`repayment_amount`]: status
/// derivation and fingerprints call it because a query must never revert.
pub fn total_debt(principal: u64, fixed_interest: u64, apr_bps: u32, elapsed: Duration) -> u64 {
    principal.saturating_add(accrued_interest(principal, fixed_interest, apr_bps, elapsed))
}

/// Total amount that settles the debt right now, checked.
///
/// Used by every money-moving path; overflow aborts the operation instead
/// of silently clamping what the borrower owes.
pub fn repayment_amount(
    principal: u64,
    fixed_interest: u64,
    apr_bps: u32,
    elapsed: Duration,
) -> Result<u64, DebtOverflow> {
    let accrued = accrued_interest(principal, fixed_interest, apr_bps, elapsed);
    principal
        .checked_add(accrued)
        .ok_or(DebtOverflow { principal, accrued })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_returns_fixed_interest_regardless_of_time() {
        for minutes in [0i64, 1, 60, 525_600, 525_600 * 300] {
            assert_eq!(
                accrued_interest(1_000_000, 777, 0, Duration::minutes(minutes)),
                777
            );
        }
    }

    #[test]
    fn zero_elapsed_accrues_nothing() {
        assert_eq!(accrued_interest(1_000_000, 50, 500, Duration::zero()), 50);
    }

    #[test]
    fn partial_minute_accrues_nothing() {
        let base = accrued_interest(u64::MAX / 2, 0, 160_000, Duration::zero());
        assert_eq!(
            accrued_interest(u64::MAX / 2, 0, 160_000, Duration::seconds(59)),
            base
        );
    }

    #[test]
    fn one_year_at_five_percent() {
        // 5% APR on 1,000,000 over exactly a year = 50,000.
        let year = Duration::minutes(525_600);
        assert_eq!(accrued_interest(1_000_000, 0, 500, year), 50_000);
    }

    #[test]
    fn half_year_at_ten_percent() {
        let half_year = Duration::minutes(525_600 / 2);
        assert_eq!(accrued_interest(1_000_000, 0, 1_000, half_year), 50_000);
    }

    #[test]
    fn fixed_interest_stacks_on_accrual() {
        let year = Duration::minutes(525_600);
        assert_eq!(accrued_interest(1_000_000, 123, 500, year), 50_123);
    }

    #[test]
    fn monotonic_in_elapsed_time() {
        let mut last = 0;
        for minutes in 0..=2_000i64 {
            let now = accrued_interest(987_654_321, 42, 1_337, Duration::minutes(minutes));
            assert!(now >= last, "accrual regressed at minute {minutes}");
            last = now;
        }
    }

    #[test]
    fn centuries_of_accrual_do_not_panic() {
        // 300 years at max APR on a huge principal: intermediates stay in
        // u128, the result saturates instead of panicking.
        let elapsed = Duration::minutes(525_600 * 300);
        let _ = accrued_interest(u64::MAX, u64::MAX, 160_000, elapsed);
        let _ = total_debt(u64::MAX, u64::MAX, 160_000, elapsed);
    }

    #[test]
    fn negative_elapsed_clamps_to_zero() {
        assert_eq!(
            accrued_interest(1_000_000, 9, 500, Duration::minutes(-10)),
            9
        );
    }

    #[test]
    fn repayment_amount_is_principal_plus_interest() {
        let year = Duration::minutes(525_600);
        assert_eq!(
            repayment_amount(1_000_000, 123, 500, year).unwrap(),
            1_050_123
        );
    }

    #[test]
    fn repayment_amount_overflow_is_an_error() {
        let err = repayment_amount(u64::MAX, 1, 0, Duration::zero()).unwrap_err();
        assert_eq!(err.principal, u64::MAX);
        assert_eq!(err.accrued, 1);
    }

    #[test]
    fn total_debt_saturates_where_repayment_errors() {
        assert_eq!(total_debt(u64::MAX, 1, 0, Duration::zero()), u64::MAX);
    }
}
