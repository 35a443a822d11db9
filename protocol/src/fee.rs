//! # Protocol Fee Split
//!
//! One function, one invariant: `fee + net == gross`, exactly, for every
//! input. Dust is neither lost nor minted. Rounding favours the payer —
//! the fee truncates, the net absorbs the remainder.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::BPS_DENOMINATOR;

/// Errors from fee computation.
#[derive(Debug, Error)]
pub enum FeeError {
    /// The configured fee rate exceeds 100%.
    #[error("fee rate {fee_bps} bps exceeds denominator {denominator}")]
    RateOutOfBounds {
        /// The offending rate.
        fee_bps: u16,
        /// The maximum representable rate (100%).
        denominator: u64,
    },
}

/// The two legs of a fee-split gross amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    /// Portion owed to the protocol fee collector.
    pub fee: u64,
    /// Portion that continues to the intended recipient.
    pub net: u64,
}

/// Splits `gross` into a protocol fee and a net remainder.
///
/// `fee = gross * fee_bps / 10_000` with the division performed last and
/// truncating. A zero rate yields a zero fee, which callers must translate
/// into *no* fee transfer at all — zero-value transfers are banned
/// protocol-wide.
pub fn apply_fee(gross: u64, fee_bps: u16) -> Result<FeeSplit, FeeError> {
    if u64::from(fee_bps) > BPS_DENOMINATOR {
        return Err(FeeError::RateOutOfBounds {
            fee_bps,
            denominator: BPS_DENOMINATOR,
        });
    }

    // u128 keeps gross * bps from overflowing; fee <= gross so the narrow
    // back to u64 cannot truncate.
    let fee = (u128::from(gross) * u128::from(fee_bps) / u128::from(BPS_DENOMINATOR)) as u64;
    Ok(FeeSplit {
        fee,
        net: gross - fee,
    })
}
