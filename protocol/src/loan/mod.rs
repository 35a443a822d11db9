//! # Loan Lifecycle Engines
//!
//! The hard core of the protocol. Two engines share one discipline:
//!
//! ```text
//! interest.rs     — pure accrual math (multiply first, divide once, last)
//! simple.rs       — bullet loans: one repayment settles everything
//! extension.rs    — default-deadline extensions for simple loans
//! installment.rs  — amortizing loans: partial repayment, pull-settlement
//! ```
//!
//! ## State Machine
//!
//! ```text
//!    NonExistent ──create──► Running ──repay──► Repaid ──claim──► (deleted)
//!                               │                                    ▲
//!                               └──deadline / debt limit──► Defaulted─┘
//!                                                            (claim seizes
//!                                                             collateral)
//! ```
//!
//! Status is never stored as free-standing state that could drift: it is
//! derived from the record's fields and the sampled clock, and a missing
//! record *is* the `NonExistent` status.
//!
//! ## Ordering invariant
//!
//! Every operation runs two phases, never interleaved: compute and persist
//! the new record first, perform external transfers last. A hostile
//! transfer recipient re-entering the engine must only ever observe
//! already-settled state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::asset::{Asset, AssetCategory};
use crate::clock::Clock;
use crate::config::{MAX_ACCRUING_INTEREST_APR_BPS, MIN_LOAN_DURATION_SECS};
use crate::fee::FeeError;
use crate::proposal::{ProposalError, ProposalValidator, Terms};
use crate::registry::{
    AccessControlRegistry, ConfigRegistry, NonceRegistry, ReceiptError, ReceiptRegistry,
};
use crate::vault::{AssetGateway, VaultError};

pub mod extension;
pub mod installment;
pub mod interest;
pub mod simple;

pub use extension::{ExtensionOffer, OfferAuthorization};
pub use installment::{InstallmentLoan, InstallmentLoanEngine};
pub use simple::{Loan, SimpleLoanEngine};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Derived lifecycle status of a loan at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    /// No record under this id — never created, or settled and deleted.
    NonExistent,
    /// Debt outstanding, deadline not reached, limits respected.
    Running,
    /// Debt fully repaid; proceeds await the receipt holder's claim.
    Repaid,
    /// Deadline reached (inclusive) or debt limit breached, debt unpaid.
    Defaulted,
}

impl LoanStatus {
    /// Stable single-byte discriminant used in fingerprint preimages.
    pub fn discriminant(&self) -> u8 {
        match self {
            LoanStatus::NonExistent => 0,
            LoanStatus::Running => 2,
            LoanStatus::Repaid => 3,
            LoanStatus::Defaulted => 4,
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoanStatus::NonExistent => write!(f, "NonExistent"),
            LoanStatus::Running => write!(f, "Running"),
            LoanStatus::Repaid => write!(f, "Repaid"),
            LoanStatus::Defaulted => write!(f, "Defaulted"),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures surfaced by the loan engines.
///
/// Every variant carries the offending value and the violated bound so a
/// caller can present a diagnostic without re-querying state. All failures
/// abort the whole operation; nothing here is retried internally.
#[derive(Debug, Error)]
pub enum LoanError {
    /// An address lacks the capability tag required for this entry point.
    #[error("address {address} is missing required tag {tag}")]
    MissingTag { address: String, tag: String },

    /// Proposal validation failed.
    #[error(transparent)]
    Proposal(#[from] ProposalError),

    /// An asset transfer or permit failed.
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// Receipt bookkeeping failed.
    #[error(transparent)]
    Receipt(#[from] ReceiptError),

    /// Fee computation failed.
    #[error(transparent)]
    Fee(#[from] FeeError),

    /// Outstanding debt no longer fits in the accounting width.
    #[error(transparent)]
    Arithmetic(#[from] interest::DebtOverflow),

    /// Proposed duration is below the protocol minimum.
    #[error("loan duration {duration_secs}s is below the minimum {min_secs}s")]
    InvalidDuration { duration_secs: u64, min_secs: u64 },

    /// The proposed duration pushes the deadline past the representable
    /// time range.
    #[error("loan duration {duration_secs}s does not fit the time representation")]
    DurationUnrepresentable { duration_secs: u64 },

    /// Proposed APR exceeds the protocol maximum.
    #[error("accruing interest APR {apr_bps} bps exceeds the maximum {max_bps} bps")]
    InterestRateOutOfBounds { apr_bps: u32, max_bps: u32 },

    /// The proposed credit amount is zero.
    #[error("credit amount must be nonzero")]
    ZeroCreditAmount,

    /// The credit asset is unregistered or not registered as fungible.
    #[error("invalid credit asset {address}: not a registered fungible token")]
    InvalidCreditAsset { address: String },

    /// The collateral descriptor disagrees with the asset registry, or
    /// describes zero value.
    #[error("invalid collateral asset {address}: {reason}")]
    InvalidCollateralAsset { address: String, reason: String },

    /// The accepted terms do not permit creating a fresh loan.
    #[error("accepted terms do not permit loan creation")]
    TermsForbidCreation,

    /// The accepted terms do not permit refinancing.
    #[error("accepted terms do not permit refinancing")]
    TermsForbidRefinance,

    /// No loan record exists under this id.
    #[error("no loan exists with id {0}")]
    UnknownLoan(u64),

    /// The loan is in default; the attempted operation needs a live loan.
    #[error("loan defaulted at {default_timestamp}")]
    LoanDefaulted { default_timestamp: DateTime<Utc> },

    /// The loan's derived status forbids the attempted operation.
    #[error("operation not allowed while loan is {status}")]
    InvalidLoanStatus { status: LoanStatus },

    /// A claim was attempted with nothing accrued to claim.
    #[error("nothing to claim on loan {loan_id}")]
    NothingToClaim { loan_id: u64 },

    /// Claim/extension attempted by someone other than the receipt holder.
    #[error("caller {caller} is not the receipt holder {holder}")]
    CallerNotReceiptHolder { caller: String, holder: String },

    /// A repayment of zero was attempted.
    #[error("repayment amount must be nonzero")]
    ZeroRepayment,

    /// A partial repayment exceeds the outstanding debt.
    #[error("repayment {attempted} exceeds outstanding debt {outstanding}")]
    RepaymentExceedsDebt { attempted: u64, outstanding: u64 },

    /// Refinance terms name a different borrower than the live loan.
    #[error("refinance borrower mismatch: loan has {expected}, terms name {found}")]
    RefinanceBorrowerMismatch { expected: String, found: String },

    /// Refinance terms name a different credit asset than the live loan.
    #[error("refinance credit asset mismatch: loan has {expected}, terms name {found}")]
    RefinanceCreditMismatch { expected: String, found: String },

    /// Refinance collateral descriptor differs from the live loan's.
    #[error("refinance collateral mismatch on field `{field}`")]
    RefinanceCollateralMismatch { field: &'static str },

    /// Extension duration is outside the configured window.
    #[error(
        "extension duration {duration_secs}s outside bounds [{min_secs}s, {max_secs}s]"
    )]
    ExtensionDurationOutOfBounds {
        duration_secs: u64,
        min_secs: u64,
        max_secs: u64,
    },

    /// An extension offer was evaluated past its own expiration.
    #[error("extension offer expired at {expiration}, now is {now}")]
    OfferExpired {
        expiration: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// The offer's nonce was already revoked.
    #[error("extension offer nonce {nonce} of {owner} has been revoked")]
    OfferNonceRevoked { owner: String, nonce: u64 },

    /// The caller may not make or accept this extension offer.
    #[error("{caller} is not a valid party for this extension offer")]
    InvalidExtensionCaller { caller: String },

    /// The offer was neither declared on-chain nor carries a valid
    /// proposer signature.
    #[error("extension offer is not authorized by its proposer")]
    UnauthorizedOffer,

    /// The extended deadline would not move strictly forward.
    #[error("proposed default timestamp {proposed} must exceed {current} and the current time")]
    InvalidNewDefaultTimestamp {
        current: DateTime<Utc>,
        proposed: DateTime<Utc>,
    },
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// The capability bundle a loan engine is constructed with.
///
/// The engines only ever see these trait objects — concrete registry,
/// gateway, and validator types are a deployment decision.
#[derive(Clone)]
pub struct Dependencies {
    /// Executes all asset transfers.
    pub gateway: Arc<dyn AssetGateway>,
    /// Validates opaque proposals into [`Terms`].
    pub validator: Arc<dyn ProposalValidator>,
    /// Mints/burns loan receipts and answers ownership queries.
    pub receipts: Arc<dyn ReceiptRegistry>,
    /// Capability-tag registry gating privileged entry points.
    pub access: Arc<dyn AccessControlRegistry>,
    /// Protocol fee and asset-category configuration.
    pub config: Arc<dyn ConfigRegistry>,
    /// Replay-revocation bookkeeping for offers.
    pub nonces: Arc<dyn NonceRegistry>,
    /// Time source, sampled once per operation.
    pub clock: Arc<dyn Clock>,
}

// ---------------------------------------------------------------------------
// Shared validation
// ---------------------------------------------------------------------------

/// Structural validation every accepted [`Terms`] must pass, identical for
/// both engines: nonzero credit, duration and APR bounds, and asset
/// categories consistent with the registry.
pub(crate) fn validate_terms(config: &dyn ConfigRegistry, terms: &Terms) -> Result<(), LoanError> {
    if terms.credit_amount == 0 {
        return Err(LoanError::ZeroCreditAmount);
    }

    if terms.duration_secs < MIN_LOAN_DURATION_SECS {
        return Err(LoanError::InvalidDuration {
            duration_secs: terms.duration_secs,
            min_secs: MIN_LOAN_DURATION_SECS,
        });
    }

    if terms.accruing_interest_apr_bps > MAX_ACCRUING_INTEREST_APR_BPS {
        return Err(LoanError::InterestRateOutOfBounds {
            apr_bps: terms.accruing_interest_apr_bps,
            max_bps: MAX_ACCRUING_INTEREST_APR_BPS,
        });
    }

    match config.asset_category(&terms.credit_address) {
        Some(AssetCategory::Fungible) => {}
        _ => {
            return Err(LoanError::InvalidCreditAsset {
                address: terms.credit_address.clone(),
            });
        }
    }

    let collateral = &terms.collateral;
    match config.asset_category(&collateral.address) {
        None => {
            return Err(LoanError::InvalidCollateralAsset {
                address: collateral.address.clone(),
                reason: "unregistered token".into(),
            });
        }
        Some(registered) if registered != collateral.category => {
            return Err(LoanError::InvalidCollateralAsset {
                address: collateral.address.clone(),
                reason: format!(
                    "declared {} but registered {}",
                    collateral.category, registered
                ),
            });
        }
        Some(_) => {}
    }
    if collateral.transfer_units() == 0 {
        return Err(LoanError::InvalidCollateralAsset {
            address: collateral.address.clone(),
            reason: "zero-value collateral".into(),
        });
    }

    Ok(())
}

/// Computes `now + duration_secs` as the default deadline, rejecting
/// durations the time representation cannot carry.
pub(crate) fn deadline_after(
    now: DateTime<Utc>,
    duration_secs: u64,
) -> Result<DateTime<Utc>, LoanError> {
    i64::try_from(duration_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or(LoanError::DurationUnrepresentable { duration_secs })
}

// ---------------------------------------------------------------------------
// Settlement legs
// ---------------------------------------------------------------------------

/// One fungible transfer leg of a settlement: `(amount, from, to)`.
pub(crate) type CreditLeg<'a> = (u64, &'a str, &'a str);

/// Runs a sequence of credit legs as a unit. When a leg fails, every leg
/// that already ran is sent back in reverse order before the error
/// surfaces, so callers observe either the full settlement or none of it.
pub(crate) fn settle_credit_legs(
    gateway: &dyn AssetGateway,
    credit_address: &str,
    legs: &[CreditLeg<'_>],
) -> Result<(), LoanError> {
    for (index, (amount, from, to)) in legs.iter().enumerate() {
        let asset = Asset::fungible(credit_address, *amount);
        if let Err(err) = gateway.transfer(&asset, from, to) {
            for (amount, from, to) in legs[..index].iter().rev() {
                let _ = gateway.transfer(&Asset::fungible(credit_address, *amount), to, from);
            }
            return Err(err.into());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Fingerprints
// ---------------------------------------------------------------------------

/// BLAKE3 digest over `0x00`-separated parts.
///
/// The separator bytes keep field boundaries unambiguous when one part's
/// suffix matches another's prefix.
pub(crate) fn fingerprint_digest(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(&[0x00]);
        }
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// The fingerprint every engine returns for an unknown loan id.
pub const ZERO_FINGERPRINT: [u8; 32] = [0u8; 32];
