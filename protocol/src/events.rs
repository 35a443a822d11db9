//! # Loan Events
//!
//! Every observable state transition appends a [`LoanEvent`] to the owning
//! engine's event log and emits a matching `tracing` record. The log is
//! drained by the embedding application (indexer, notifier, audit trail);
//! the engines themselves never read it back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An observable state transition of a loan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanEvent {
    /// A new loan record was persisted and a receipt minted to the lender.
    Created {
        loan_id: u64,
        /// Hex-encoded hash of the accepted proposal.
        proposal_hash: String,
        lender: String,
        borrower: String,
        principal_amount: u64,
        fixed_interest_amount: u64,
        accruing_interest_apr_bps: u32,
        default_timestamp: DateTime<Utc>,
    },

    /// The loan's debt was fully repaid (simple variant) or reached zero
    /// principal (installment variant).
    PaidBack { loan_id: u64 },

    /// The receipt holder collected funds or seized collateral.
    Claimed {
        loan_id: u64,
        /// `true` when the claim seized collateral after a default rather
        /// than paying out repaid credit.
        defaulted: bool,
    },

    /// An old loan's debt was replaced by a new loan.
    Refinanced { old_loan_id: u64, new_loan_id: u64 },

    /// An extension offer was declared on-chain by its proposer.
    ExtensionOfferMade {
        /// Hex-encoded canonical offer hash.
        offer_hash: String,
        loan_id: u64,
        proposer: String,
    },

    /// The loan's default deadline was pushed out by an accepted offer.
    Extended {
        loan_id: u64,
        new_default_timestamp: DateTime<Utc>,
    },
}
