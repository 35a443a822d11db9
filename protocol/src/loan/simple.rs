//! # Simple Loans
//!
//! The bullet-loan engine: one disbursement up front, one repayment that
//! settles principal plus all interest at once. Repayment routing depends
//! on who holds the receipt at that moment — the original lender is paid
//! directly and the loan evaporates; any later holder is paid through the
//! vault and collects via an explicit claim.
//!
//! Every operation persists the engine's own state before calling out to
//! the asset gateway, and restores the pre-operation snapshot if a
//! transfer leg fails. Individual transfers are all-or-nothing by the
//! gateway contract; when a later leg of a multi-leg settlement fails,
//! every leg that already ran is sent back before the error surfaces.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::asset::Asset;
use crate::config::{TAG_ACTIVE_LOAN, TAG_LOAN_PROPOSAL};
use crate::events::LoanEvent;
use crate::fee::{apply_fee, FeeSplit};
use crate::proposal::{ProposalSpec, Terms};
use crate::vault::Permit;

use super::{
    deadline_after, fingerprint_digest, interest, settle_credit_legs, validate_terms, CreditLeg,
    Dependencies, LoanError, LoanStatus, ZERO_FINGERPRINT,
};

// ---------------------------------------------------------------------------
// Loan record
// ---------------------------------------------------------------------------

/// A stored simple-loan record.
///
/// Status is not a field: it is derived from `paid_back`, the deadline,
/// and the sampled clock. After an escrowed repayment the interest terms
/// are crystallized — `fixed_interest_amount` absorbs everything accrued
/// and the rate drops to zero, so the claimable amount stops moving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    /// Fungible token the credit was denominated in.
    pub credit_address: String,
    /// Lender at creation time; repayment routes here while they still
    /// hold the receipt.
    pub original_lender: String,
    /// Borrower owing the debt.
    pub borrower: String,
    /// Instant the loan started accruing.
    pub start_timestamp: DateTime<Utc>,
    /// Deadline; the loan is in default from this instant on, inclusive.
    pub default_timestamp: DateTime<Utc>,
    /// Accruing interest APR in basis points. 0 after crystallization.
    pub accruing_interest_apr_bps: u32,
    /// Time-independent interest component.
    pub fixed_interest_amount: u64,
    /// Principal owed.
    pub principal_amount: u64,
    /// Collateral held by the vault for this loan.
    pub collateral: Asset,
    /// Set when an escrowed repayment has settled the debt.
    pub paid_back: bool,
}

impl Loan {
    /// Derives the lifecycle status at `now`. The default boundary is
    /// inclusive: `now == default_timestamp` is already defaulted.
    pub fn status_at(&self, now: DateTime<Utc>) -> LoanStatus {
        if self.paid_back {
            LoanStatus::Repaid
        } else if now >= self.default_timestamp {
            LoanStatus::Defaulted
        } else {
            LoanStatus::Running
        }
    }

    fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now - self.start_timestamp
    }

    /// Total amount that settles this loan at `now`.
    pub fn repayment_amount(&self, now: DateTime<Utc>) -> Result<u64, LoanError> {
        Ok(interest::repayment_amount(
            self.principal_amount,
            self.fixed_interest_amount,
            self.accruing_interest_apr_bps,
            self.elapsed(now),
        )?)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(super) struct EngineState {
    pub(super) loans: HashMap<u64, Loan>,
    /// Hashes of extension offers declared on-chain by their proposer.
    pub(super) made_offers: HashSet<[u8; 32]>,
    pub(super) events: Vec<LoanEvent>,
}

/// The simple-loan engine.
///
/// Holds the loan book behind a lock that is never held across a gateway
/// call, so a re-entering transfer recipient only ever observes settled
/// state.
pub struct SimpleLoanEngine {
    pub(super) deps: Dependencies,
    pub(super) vault_address: String,
    pub(super) state: RwLock<EngineState>,
}

impl SimpleLoanEngine {
    /// Creates an engine whose escrow identity is `vault_address`.
    pub fn new(deps: Dependencies, vault_address: &str) -> Self {
        Self {
            deps,
            vault_address: vault_address.to_string(),
            state: RwLock::new(EngineState::default()),
        }
    }

    /// The engine's escrow address.
    pub fn vault_address(&self) -> &str {
        &self.vault_address
    }

    /// Metadata URI served for this engine's receipts.
    pub fn loan_metadata_uri(&self) -> String {
        self.deps.config.loan_metadata_uri(&self.vault_address)
    }

    /// Drains the accumulated event log.
    pub fn drain_events(&self) -> Vec<LoanEvent> {
        std::mem::take(&mut self.state.write().events)
    }

    /// Snapshot of a loan record, if one exists.
    pub fn get_loan(&self, loan_id: u64) -> Option<Loan> {
        self.state.read().loans.get(&loan_id).cloned()
    }

    /// Derived status of a loan right now. Unknown ids are `NonExistent`.
    pub fn loan_status(&self, loan_id: u64) -> LoanStatus {
        let now = self.deps.clock.now();
        self.state
            .read()
            .loans
            .get(&loan_id)
            .map(|loan| loan.status_at(now))
            .unwrap_or(LoanStatus::NonExistent)
    }

    /// Amount that would settle the loan right now. Zero for ids with no
    /// record, so receipt-pricing callers never have to special-case
    /// settled loans.
    pub fn loan_repayment_amount(&self, loan_id: u64) -> Result<u64, LoanError> {
        let now = self.deps.clock.now();
        match self.get_loan(loan_id) {
            Some(loan) => loan.repayment_amount(now),
            None => Ok(0),
        }
    }

    /// Commitment to the fields a receipt buyer prices: status, deadline,
    /// and the interest terms. `[0; 32]` for unknown ids.
    pub fn state_fingerprint(&self, loan_id: u64) -> [u8; 32] {
        let now = self.deps.clock.now();
        let state = self.state.read();
        let Some(loan) = state.loans.get(&loan_id) else {
            return ZERO_FINGERPRINT;
        };
        fingerprint_digest(&[
            &[loan.status_at(now).discriminant()],
            &loan.default_timestamp.timestamp().to_be_bytes(),
            &loan.fixed_interest_amount.to_be_bytes(),
            &loan.accruing_interest_apr_bps.to_be_bytes(),
        ])
    }

    pub(super) fn require_tag(&self, address: &str, tag: &str) -> Result<(), LoanError> {
        if self.deps.access.has_tag(address, tag) {
            Ok(())
        } else {
            Err(LoanError::MissingTag {
                address: address.to_string(),
                tag: tag.to_string(),
            })
        }
    }

    fn credit_asset(address: &str, amount: u64) -> Asset {
        Asset::fungible(address, amount)
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Accepts a proposal and starts a loan.
    ///
    /// The caller must be the proposal's counter-party. Collateral moves
    /// into the vault; the credit, minus the protocol fee, goes straight
    /// from lender to borrower without touching the vault. The receipt is
    /// minted to the lender and the loan id is the receipt id.
    pub fn create_loan(&self, caller: &str, spec: &ProposalSpec) -> Result<u64, LoanError> {
        let now = self.deps.clock.now();
        self.require_tag(&self.vault_address, TAG_ACTIVE_LOAN)?;
        self.require_tag(self.deps.validator.address(), TAG_LOAN_PROPOSAL)?;

        let (hash, terms) = self.deps.validator.accept(caller, None, spec, now)?;
        if !terms.can_create {
            return Err(LoanError::TermsForbidCreation);
        }
        validate_terms(self.deps.config.as_ref(), &terms)?;

        let split = apply_fee(terms.credit_amount, self.deps.config.fee_bps())?;
        let default_timestamp = deadline_after(now, terms.duration_secs)?;

        let loan_id = self.deps.receipts.mint(&terms.lender);
        let loan = Loan {
            credit_address: terms.credit_address.clone(),
            original_lender: terms.lender.clone(),
            borrower: terms.borrower.clone(),
            start_timestamp: now,
            default_timestamp,
            accruing_interest_apr_bps: terms.accruing_interest_apr_bps,
            fixed_interest_amount: terms.fixed_interest_amount,
            principal_amount: terms.credit_amount,
            collateral: terms.collateral.clone(),
            paid_back: false,
        };
        self.state.write().loans.insert(loan_id, loan);

        if let Err(err) = self.disburse(&terms, &split) {
            warn!(loan_id, %err, "loan creation rolled back");
            self.state.write().loans.remove(&loan_id);
            let _ = self.deps.receipts.burn(loan_id);
            return Err(err);
        }

        info!(
            loan_id,
            lender = %terms.lender,
            borrower = %terms.borrower,
            principal = terms.credit_amount,
            fee = split.fee,
            "loan created"
        );
        self.state.write().events.push(LoanEvent::Created {
            loan_id,
            proposal_hash: hex::encode(hash),
            lender: terms.lender,
            borrower: terms.borrower,
            principal_amount: terms.credit_amount,
            fixed_interest_amount: terms.fixed_interest_amount,
            accruing_interest_apr_bps: terms.accruing_interest_apr_bps,
            default_timestamp,
        });
        Ok(loan_id)
    }

    fn disburse(&self, terms: &Terms, split: &FeeSplit) -> Result<(), LoanError> {
        self.deps
            .gateway
            .transfer(&terms.collateral, &terms.borrower, &self.vault_address)?;

        let collector = self.deps.config.fee_collector();
        let mut legs: Vec<CreditLeg<'_>> = Vec::new();
        if split.fee > 0 {
            legs.push((split.fee, terms.lender.as_str(), collector.as_str()));
        }
        if split.net > 0 {
            legs.push((split.net, terms.lender.as_str(), terms.borrower.as_str()));
        }

        if let Err(err) =
            settle_credit_legs(self.deps.gateway.as_ref(), &terms.credit_address, &legs)
        {
            // Collateral already moved; send it back before failing.
            let _ = self
                .deps
                .gateway
                .transfer(&terms.collateral, &self.vault_address, &terms.borrower);
            return Err(err);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Repay
    // -----------------------------------------------------------------------

    /// Settles the full debt of a running loan.
    ///
    /// Anyone may repay; collateral always returns to the borrower. If the
    /// original lender still holds the receipt the repayment goes to them
    /// directly and the loan is deleted on the spot. Otherwise the funds
    /// sit in the vault, the loan turns `Repaid` with its interest
    /// crystallized, and the current holder claims later.
    pub fn repay_loan(
        &self,
        caller: &str,
        loan_id: u64,
        permit: Option<&Permit>,
    ) -> Result<(), LoanError> {
        let now = self.deps.clock.now();
        let snapshot = self
            .get_loan(loan_id)
            .ok_or(LoanError::UnknownLoan(loan_id))?;
        match snapshot.status_at(now) {
            LoanStatus::Running => {}
            LoanStatus::Defaulted => {
                return Err(LoanError::LoanDefaulted {
                    default_timestamp: snapshot.default_timestamp,
                });
            }
            status => return Err(LoanError::InvalidLoanStatus { status }),
        }

        let amount = snapshot.repayment_amount(now)?;
        let holder = self
            .deps
            .receipts
            .owner_of(loan_id)
            .ok_or(LoanError::UnknownLoan(loan_id))?;
        let direct = holder == snapshot.original_lender;

        {
            let mut state = self.state.write();
            if direct {
                state.loans.remove(&loan_id);
            } else if let Some(loan) = state.loans.get_mut(&loan_id) {
                // Crystallize: the claimable amount must stop accruing.
                loan.fixed_interest_amount = amount - loan.principal_amount;
                loan.accruing_interest_apr_bps = 0;
                loan.paid_back = true;
            }
        }

        let restore = |err: LoanError| -> LoanError {
            warn!(loan_id, %err, "repayment rolled back");
            self.state
                .write()
                .loans
                .insert(loan_id, snapshot.clone());
            err
        };

        if let Some(permit) = permit {
            if let Err(err) = self.deps.gateway.apply_permit(permit, now) {
                return Err(restore(err.into()));
            }
        }

        let credit = Self::credit_asset(&snapshot.credit_address, amount);
        let destination = if direct {
            snapshot.original_lender.as_str()
        } else {
            self.vault_address.as_str()
        };
        if let Err(err) = self.deps.gateway.transfer(&credit, caller, destination) {
            return Err(restore(err.into()));
        }
        if let Err(err) =
            self.deps
                .gateway
                .transfer(&snapshot.collateral, &self.vault_address, &snapshot.borrower)
        {
            let _ = self.deps.gateway.transfer(&credit, destination, caller);
            return Err(restore(err.into()));
        }

        info!(loan_id, amount, direct, "loan repaid");
        let mut state = self.state.write();
        state.events.push(LoanEvent::PaidBack { loan_id });
        drop(state);

        if direct {
            self.deps.receipts.burn(loan_id)?;
            self.state.write().events.push(LoanEvent::Claimed {
                loan_id,
                defaulted: false,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Claim
    // -----------------------------------------------------------------------

    /// Collects what a settled loan owes its receipt holder.
    ///
    /// `Repaid` pays out the escrowed credit; `Defaulted` hands over the
    /// collateral instead. Either way the record is deleted and the
    /// receipt burned, so a second claim fails as `UnknownLoan`.
    pub fn claim_loan(&self, caller: &str, loan_id: u64) -> Result<(), LoanError> {
        let now = self.deps.clock.now();
        let snapshot = self
            .get_loan(loan_id)
            .ok_or(LoanError::UnknownLoan(loan_id))?;
        let holder = self
            .deps
            .receipts
            .owner_of(loan_id)
            .ok_or(LoanError::UnknownLoan(loan_id))?;
        if caller != holder {
            return Err(LoanError::CallerNotReceiptHolder {
                caller: caller.to_string(),
                holder,
            });
        }

        let defaulted = match snapshot.status_at(now) {
            LoanStatus::Repaid => false,
            LoanStatus::Defaulted => true,
            status => return Err(LoanError::InvalidLoanStatus { status }),
        };

        self.state.write().loans.remove(&loan_id);

        let payout = if defaulted {
            snapshot.collateral.clone()
        } else {
            Self::credit_asset(
                &snapshot.credit_address,
                snapshot
                    .principal_amount
                    .saturating_add(snapshot.fixed_interest_amount),
            )
        };
        if let Err(err) = self
            .deps
            .gateway
            .transfer(&payout, &self.vault_address, caller)
        {
            warn!(loan_id, %err, "claim rolled back");
            self.state.write().loans.insert(loan_id, snapshot);
            return Err(err.into());
        }

        self.deps.receipts.burn(loan_id)?;
        info!(loan_id, defaulted, "loan claimed");
        self.state
            .write()
            .events
            .push(LoanEvent::Claimed { loan_id, defaulted });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Refinance
    // -----------------------------------------------------------------------

    /// Replaces a running loan's debt with a fresh loan under new terms.
    ///
    /// The new terms must keep the borrower, credit asset, and exact
    /// collateral descriptor; the collateral never leaves the vault. The
    /// new lender's credit is split against the old debt: the overlap
    /// settles the old loan, any surplus goes to the borrower, any
    /// shortfall is pulled from the borrower. Where the settlement lands
    /// follows the same routing rule as repayment — directly to the old
    /// lender while they hold the receipt, into the vault otherwise, and
    /// netted away entirely when the new lender *is* the current holder.
    pub fn refinance_loan(
        &self,
        caller: &str,
        loan_id: u64,
        spec: &ProposalSpec,
    ) -> Result<u64, LoanError> {
        let now = self.deps.clock.now();
        self.require_tag(&self.vault_address, TAG_ACTIVE_LOAN)?;
        self.require_tag(self.deps.validator.address(), TAG_LOAN_PROPOSAL)?;

        let old = self
            .get_loan(loan_id)
            .ok_or(LoanError::UnknownLoan(loan_id))?;
        match old.status_at(now) {
            LoanStatus::Running => {}
            status => return Err(LoanError::InvalidLoanStatus { status }),
        }

        let (hash, terms) = self
            .deps
            .validator
            .accept(caller, Some(loan_id), spec, now)?;
        if !terms.can_refinance {
            return Err(LoanError::TermsForbidRefinance);
        }
        validate_terms(self.deps.config.as_ref(), &terms)?;

        if terms.borrower != old.borrower {
            return Err(LoanError::RefinanceBorrowerMismatch {
                expected: old.borrower,
                found: terms.borrower,
            });
        }
        if terms.credit_address != old.credit_address {
            return Err(LoanError::RefinanceCreditMismatch {
                expected: old.credit_address,
                found: terms.credit_address,
            });
        }
        if let Some(field) = old.collateral.mismatch_against(&terms.collateral) {
            return Err(LoanError::RefinanceCollateralMismatch { field });
        }

        let repayment = old.repayment_amount(now)?;
        let holder = self
            .deps
            .receipts
            .owner_of(loan_id)
            .ok_or(LoanError::UnknownLoan(loan_id))?;
        let split = apply_fee(terms.credit_amount, self.deps.config.fee_bps())?;
        let repay_leg = split.net.min(repayment);
        let surplus = split.net - repay_leg;
        let shortfall = repayment - repay_leg;

        let netted = terms.lender == holder;
        let direct = holder == old.original_lender;
        let settled_now = direct || netted;
        let default_timestamp = deadline_after(now, terms.duration_secs)?;

        let new_id = self.deps.receipts.mint(&terms.lender);
        let new_loan = Loan {
            credit_address: terms.credit_address.clone(),
            original_lender: terms.lender.clone(),
            borrower: terms.borrower.clone(),
            start_timestamp: now,
            default_timestamp,
            accruing_interest_apr_bps: terms.accruing_interest_apr_bps,
            fixed_interest_amount: terms.fixed_interest_amount,
            principal_amount: terms.credit_amount,
            collateral: old.collateral.clone(),
            paid_back: false,
        };
        {
            let mut state = self.state.write();
            if settled_now {
                state.loans.remove(&loan_id);
            } else if let Some(loan) = state.loans.get_mut(&loan_id) {
                loan.fixed_interest_amount = repayment - loan.principal_amount;
                loan.accruing_interest_apr_bps = 0;
                loan.paid_back = true;
            }
            state.loans.insert(new_id, new_loan);
        }

        let collector = self.deps.config.fee_collector();
        let settlement_target = if direct {
            old.original_lender.clone()
        } else {
            self.vault_address.clone()
        };
        let mut legs: Vec<CreditLeg<'_>> = Vec::new();
        if split.fee > 0 {
            legs.push((split.fee, terms.lender.as_str(), collector.as_str()));
        }
        if netted {
            // The new lender already holds the old claim; the repay leg
            // cancels out.
            if surplus > 0 {
                legs.push((surplus, terms.lender.as_str(), terms.borrower.as_str()));
            }
            if shortfall > 0 {
                legs.push((shortfall, terms.borrower.as_str(), holder.as_str()));
            }
        } else {
            if repay_leg > 0 {
                legs.push((repay_leg, terms.lender.as_str(), settlement_target.as_str()));
            }
            if shortfall > 0 {
                legs.push((shortfall, terms.borrower.as_str(), settlement_target.as_str()));
            }
            if surplus > 0 {
                legs.push((surplus, terms.lender.as_str(), terms.borrower.as_str()));
            }
        }

        if let Err(err) =
            settle_credit_legs(self.deps.gateway.as_ref(), &terms.credit_address, &legs)
        {
            warn!(loan_id, new_id, %err, "refinancing rolled back");
            let mut state = self.state.write();
            state.loans.remove(&new_id);
            state.loans.insert(loan_id, old);
            drop(state);
            let _ = self.deps.receipts.burn(new_id);
            return Err(err);
        }

        if settled_now {
            self.deps.receipts.burn(loan_id)?;
        }

        info!(
            old_loan_id = loan_id,
            new_loan_id = new_id,
            repayment,
            surplus,
            shortfall,
            "loan refinanced"
        );
        let mut state = self.state.write();
        state.events.push(LoanEvent::PaidBack { loan_id });
        if settled_now {
            state.events.push(LoanEvent::Claimed {
                loan_id,
                defaulted: false,
            });
        }
        state.events.push(LoanEvent::Refinanced {
            old_loan_id: loan_id,
            new_loan_id: new_id,
        });
        state.events.push(LoanEvent::Created {
            loan_id: new_id,
            proposal_hash: hex::encode(hash),
            lender: terms.lender,
            borrower: terms.borrower,
            principal_amount: terms.credit_amount,
            fixed_interest_amount: terms.fixed_interest_amount,
            accruing_interest_apr_bps: terms.accruing_interest_apr_bps,
            default_timestamp,
        });
        Ok(new_id)
    }
}
