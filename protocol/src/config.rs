//! # Protocol Configuration & Constants
//!
//! Every magic number in Covenant lives here. If you're hardcoding a bound
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! These values are consensus-critical for anyone settling against a
//! Covenant deployment: two engines disagreeing on `MINUTES_IN_YEAR` will
//! disagree on every accrued-interest figure after the first minute.

// ---------------------------------------------------------------------------
// Loan Bounds
// ---------------------------------------------------------------------------

/// Minimum loan duration in seconds. Ten minutes.
///
/// Anything shorter is either a fat-fingered proposal or an attempt to
/// create a loan that defaults before the borrower can react.
pub const MIN_LOAN_DURATION_SECS: u64 = 600;

/// Maximum accruing interest rate, as APR in basis points.
///
/// 160,000 bps = 1,600% APR. Deliberately generous — the protocol is not
/// in the business of usury policy, only of keeping the accrual math
/// inside `u64` for any realistic principal.
pub const MAX_ACCRUING_INTEREST_APR_BPS: u32 = 160_000;

// ---------------------------------------------------------------------------
// Fixed-Point Denominators
// ---------------------------------------------------------------------------

/// Denominator for all basis-point rates: protocol fee and APR alike.
/// 1 bp = 0.01%, so 10,000 bps = 100%.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Minutes in a (non-leap) year: 365 * 24 * 60.
///
/// Interest accrues per whole elapsed minute; partial minutes accrue
/// nothing. The minute is the accrual quantum of the whole protocol.
pub const MINUTES_IN_YEAR: u64 = 525_600;

/// The combined denominator for APR-per-minute accrual:
/// `principal * apr_bps * minutes / ACCRUAL_DENOMINATOR`.
///
/// Kept as a single constant so the division happens exactly once, last.
pub const ACCRUAL_DENOMINATOR: u128 = (BPS_DENOMINATOR as u128) * (MINUTES_IN_YEAR as u128);

// ---------------------------------------------------------------------------
// Extension Bounds
// ---------------------------------------------------------------------------

/// Minimum loan extension, in seconds. One day.
pub const MIN_EXTENSION_DURATION_SECS: u64 = 86_400;

/// Maximum loan extension, in seconds. Ninety days.
///
/// Longer restructurings should go through refinancing, which re-runs the
/// full terms validation instead of just pushing a timestamp.
pub const MAX_EXTENSION_DURATION_SECS: u64 = 90 * 86_400;

// ---------------------------------------------------------------------------
// Installment Debt Limit
// ---------------------------------------------------------------------------

/// Starting headroom of the installment debt limit, in basis points of the
/// initial debt. 20,000 bps = the limit line starts at 2x the initial debt.
///
/// The limit decays linearly to zero at `default_timestamp`; a loan whose
/// outstanding debt ever pokes above the line is in default early. This is
/// the anti-griefing guard against letting unpayable debt accrue quietly
/// until maturity.
pub const DEBT_LIMIT_FACTOR_BPS: u64 = 20_000;

/// Fixed-point scale for the precomputed debt-limit tangent.
pub const DEBT_LIMIT_SCALE: u128 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Capability Tags
// ---------------------------------------------------------------------------

/// Tag a proposal validator must hold before a loan engine will accept
/// proposals from it.
pub const TAG_LOAN_PROPOSAL: &str = "LOAN_PROPOSAL";

/// Tag a loan engine (identified by its vault address) must hold before it
/// may mint receipts and take custody of collateral.
pub const TAG_ACTIVE_LOAN: &str = "ACTIVE_LOAN";
