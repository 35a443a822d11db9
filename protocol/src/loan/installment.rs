//! # Installment Loans
//!
//! The amortizing variant: the borrower repays in arbitrary partial
//! amounts, interest first, and the receipt holder pulls their settled
//! funds out of the vault whenever they like. Two things replace the
//! simple engine's single-shot settlement:
//!
//! - a `last_update_timestamp` checkpoint — every repayment folds the
//!   interest accrued since the previous checkpoint into the fixed
//!   component, so accrual always runs against the *current* principal;
//! - a linearly decaying debt limit — the limit starts at a multiple of
//!   the initial debt and falls to zero at the deadline, and a loan whose
//!   outstanding debt pokes above the line is in default early, before
//!   unpayable interest can pile up quietly until maturity.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::asset::Asset;
use crate::config::{
    BPS_DENOMINATOR, DEBT_LIMIT_FACTOR_BPS, DEBT_LIMIT_SCALE, TAG_ACTIVE_LOAN, TAG_LOAN_PROPOSAL,
};
use crate::events::LoanEvent;
use crate::fee::apply_fee;
use crate::proposal::{ProposalSpec, Terms};
use crate::vault::Permit;

use super::{
    deadline_after, fingerprint_digest, interest, settle_credit_legs, validate_terms, CreditLeg,
    Dependencies, LoanError, LoanStatus, ZERO_FINGERPRINT,
};

// ---------------------------------------------------------------------------
// Loan record
// ---------------------------------------------------------------------------

/// A stored installment-loan record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentLoan {
    /// Fungible token the credit was denominated in.
    pub credit_address: String,
    /// Lender at creation time.
    pub original_lender: String,
    /// Borrower owing the debt.
    pub borrower: String,
    /// Instant the loan started.
    pub start_timestamp: DateTime<Utc>,
    /// Accrual checkpoint; interest accrues from here, not from the start.
    pub last_update_timestamp: DateTime<Utc>,
    /// Deadline; in default from this instant on, inclusive.
    pub default_timestamp: DateTime<Utc>,
    /// Accruing interest APR in basis points.
    pub accruing_interest_apr_bps: u32,
    /// Interest accrued up to the checkpoint but not yet repaid.
    pub fixed_interest_amount: u64,
    /// Outstanding principal. Zero means the loan is repaid.
    pub principal_amount: u64,
    /// Repaid funds sitting in the vault awaiting the holder's claim.
    pub unclaimed_amount: u64,
    /// Precomputed debt-limit slope, scaled by [`DEBT_LIMIT_SCALE`].
    pub debt_limit_tangent: u128,
    /// Collateral held by the vault for this loan.
    pub collateral: Asset,
}

impl InstallmentLoan {
    /// Outstanding debt at `now`: principal, checkpointed interest, and
    /// accrual since the checkpoint. Saturating.
    pub fn total_debt(&self, now: DateTime<Utc>) -> u64 {
        interest::total_debt(
            self.principal_amount,
            self.fixed_interest_amount,
            self.accruing_interest_apr_bps,
            self.elapsed(now),
        )
    }

    /// The debt ceiling at `now`: `tangent * remaining_minutes / SCALE`,
    /// decaying linearly from a multiple of the initial debt to zero at
    /// the deadline.
    pub fn debt_limit(&self, now: DateTime<Utc>) -> u64 {
        let remaining = (self.default_timestamp - now).num_minutes().max(0) as u128;
        let limit = self.debt_limit_tangent * remaining / DEBT_LIMIT_SCALE;
        u64::try_from(limit).unwrap_or(u64::MAX)
    }

    /// Derives the lifecycle status at `now`.
    pub fn status_at(&self, now: DateTime<Utc>) -> LoanStatus {
        if self.principal_amount == 0 {
            LoanStatus::Repaid
        } else if now >= self.default_timestamp || self.total_debt(now) > self.debt_limit(now) {
            LoanStatus::Defaulted
        } else {
            LoanStatus::Running
        }
    }

    fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_update_timestamp
    }
}

/// The debt-limit slope for a loan of `initial_debt` over
/// `duration_minutes`, fixed-point scaled.
fn debt_limit_tangent(initial_debt: u128, duration_minutes: u128) -> u128 {
    initial_debt * u128::from(DEBT_LIMIT_FACTOR_BPS) * DEBT_LIMIT_SCALE
        / (u128::from(BPS_DENOMINATOR) * duration_minutes)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct InstallmentState {
    loans: HashMap<u64, InstallmentLoan>,
    events: Vec<LoanEvent>,
}

/// The installment-loan engine.
pub struct InstallmentLoanEngine {
    deps: Dependencies,
    vault_address: String,
    state: RwLock<InstallmentState>,
}

impl InstallmentLoanEngine {
    /// Creates an engine whose escrow identity is `vault_address`.
    pub fn new(deps: Dependencies, vault_address: &str) -> Self {
        Self {
            deps,
            vault_address: vault_address.to_string(),
            state: RwLock::new(InstallmentState::default()),
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
    pub fn get_loan(&self, loan_id: u64) -> Option<InstallmentLoan> {
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

    /// Outstanding debt of a loan right now.
    pub fn loan_total_debt(&self, loan_id: u64) -> Result<u64, LoanError> {
        let now = self.deps.clock.now();
        self.get_loan(loan_id)
            .map(|loan| loan.total_debt(now))
            .ok_or(LoanError::UnknownLoan(loan_id))
    }

    /// Current debt ceiling of a loan.
    pub fn loan_debt_limit(&self, loan_id: u64) -> Result<u64, LoanError> {
        let now = self.deps.clock.now();
        self.get_loan(loan_id)
            .map(|loan| loan.debt_limit(now))
            .ok_or(LoanError::UnknownLoan(loan_id))
    }

    /// Commitment to the fields a receipt buyer prices. `[0; 32]` for
    /// unknown ids.
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
            &loan.principal_amount.to_be_bytes(),
            &loan.unclaimed_amount.to_be_bytes(),
            &loan.last_update_timestamp.timestamp().to_be_bytes(),
        ])
    }

    fn require_tag(&self, address: &str, tag: &str) -> Result<(), LoanError> {
        if self.deps.access.has_tag(address, tag) {
            Ok(())
        } else {
            Err(LoanError::MissingTag {
                address: address.to_string(),
                tag: tag.to_string(),
            })
        }
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Accepts a proposal and starts an installment loan.
    ///
    /// Disbursement works exactly like the simple engine's; additionally
    /// the debt-limit slope is fixed here, from the initial debt and the
    /// duration, and never changes again.
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
        let initial_debt =
            u128::from(terms.credit_amount) + u128::from(terms.fixed_interest_amount);
        let tangent = debt_limit_tangent(initial_debt, u128::from(terms.duration_secs / 60));

        let loan_id = self.deps.receipts.mint(&terms.lender);
        let loan = InstallmentLoan {
            credit_address: terms.credit_address.clone(),
            original_lender: terms.lender.clone(),
            borrower: terms.borrower.clone(),
            start_timestamp: now,
            last_update_timestamp: now,
            default_timestamp,
            accruing_interest_apr_bps: terms.accruing_interest_apr_bps,
            fixed_interest_amount: terms.fixed_interest_amount,
            principal_amount: terms.credit_amount,
            unclaimed_amount: 0,
            debt_limit_tangent: tangent,
            collateral: terms.collateral.clone(),
        };
        self.state.write().loans.insert(loan_id, loan);

        if let Err(err) = self.disburse(&terms, split.fee, split.net) {
            warn!(loan_id, %err, "installment loan creation rolled back");
            self.state.write().loans.remove(&loan_id);
            let _ = self.deps.receipts.burn(loan_id);
            return Err(err);
        }

        info!(
            loan_id,
            lender = %terms.lender,
            borrower = %terms.borrower,
            principal = terms.credit_amount,
            "installment loan created"
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

    fn disburse(&self, terms: &Terms, fee: u64, net: u64) -> Result<(), LoanError> {
        self.deps
            .gateway
            .transfer(&terms.collateral, &terms.borrower, &self.vault_address)?;

        let collector = self.deps.config.fee_collector();
        let mut legs: Vec<CreditLeg<'_>> = Vec::new();
        if fee > 0 {
            legs.push((fee, terms.lender.as_str(), collector.as_str()));
        }
        if net > 0 {
            legs.push((net, terms.lender.as_str(), terms.borrower.as_str()));
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

    /// Repays part (or all) of the outstanding debt.
    ///
    /// Interest settles first; only the remainder reduces principal. The
    /// funds accumulate in the vault under `unclaimed_amount` until the
    /// receipt holder pulls them. When principal reaches zero the
    /// collateral returns to the borrower immediately.
    pub fn repay_loan(
        &self,
        caller: &str,
        loan_id: u64,
        amount: u64,
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
        if amount == 0 {
            return Err(LoanError::ZeroRepayment);
        }

        let accrued = interest::accrued_interest(
            snapshot.principal_amount,
            snapshot.fixed_interest_amount,
            snapshot.accruing_interest_apr_bps,
            snapshot.elapsed(now),
        );
        let outstanding = interest::repayment_amount(
            snapshot.principal_amount,
            snapshot.fixed_interest_amount,
            snapshot.accruing_interest_apr_bps,
            snapshot.elapsed(now),
        )?;
        if amount > outstanding {
            return Err(LoanError::RepaymentExceedsDebt {
                attempted: amount,
                outstanding,
            });
        }

        let interest_part = amount.min(accrued);
        let principal_part = amount - interest_part;
        let fully_repaid = principal_part == snapshot.principal_amount;

        {
            let mut state = self.state.write();
            if let Some(loan) = state.loans.get_mut(&loan_id) {
                loan.fixed_interest_amount = accrued - interest_part;
                loan.last_update_timestamp = now;
                loan.principal_amount -= principal_part;
                loan.unclaimed_amount = loan.unclaimed_amount.saturating_add(amount);
            }
        }

        let restore = |err: LoanError| -> LoanError {
            warn!(loan_id, %err, "installment repayment rolled back");
            self.state.write().loans.insert(loan_id, snapshot.clone());
            err
        };

        if let Some(permit) = permit {
            if let Err(err) = self.deps.gateway.apply_permit(permit, now) {
                return Err(restore(err.into()));
            }
        }

        let credit = Asset::fungible(&snapshot.credit_address, amount);
        if let Err(err) = self
            .deps
            .gateway
            .transfer(&credit, caller, &self.vault_address)
        {
            return Err(restore(err.into()));
        }
        if fully_repaid {
            if let Err(err) =
                self.deps
                    .gateway
                    .transfer(&snapshot.collateral, &self.vault_address, &snapshot.borrower)
            {
                let _ = self.deps.gateway.transfer(&credit, &self.vault_address, caller);
                return Err(restore(err.into()));
            }
        }

        info!(
            loan_id,
            amount, interest_part, principal_part, fully_repaid, "installment repaid"
        );
        if fully_repaid {
            self.state
                .write()
                .events
                .push(LoanEvent::PaidBack { loan_id });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Claim
    // -----------------------------------------------------------------------

    /// Pulls whatever the loan currently owes its receipt holder.
    ///
    /// On a running loan this pays out the accumulated `unclaimed_amount`
    /// and leaves the loan alive — partial claims are the point of the
    /// variant. On a repaid loan it pays out and deletes; on a defaulted
    /// loan it hands over any unclaimed funds plus the collateral.
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

        let credit = Asset::fungible(&snapshot.credit_address, snapshot.unclaimed_amount);
        match snapshot.status_at(now) {
            LoanStatus::Running => {
                if snapshot.unclaimed_amount == 0 {
                    return Err(LoanError::NothingToClaim { loan_id });
                }
                if let Some(loan) = self.state.write().loans.get_mut(&loan_id) {
                    loan.unclaimed_amount = 0;
                }
                if let Err(err) = self
                    .deps
                    .gateway
                    .transfer(&credit, &self.vault_address, caller)
                {
                    warn!(loan_id, %err, "installment claim rolled back");
                    if let Some(loan) = self.state.write().loans.get_mut(&loan_id) {
                        loan.unclaimed_amount = snapshot.unclaimed_amount;
                    }
                    return Err(err.into());
                }
                info!(loan_id, amount = snapshot.unclaimed_amount, "installment claimed");
                self.state.write().events.push(LoanEvent::Claimed {
                    loan_id,
                    defaulted: false,
                });
                Ok(())
            }
            LoanStatus::Repaid => {
                self.state.write().loans.remove(&loan_id);
                if snapshot.unclaimed_amount > 0 {
                    if let Err(err) = self
                        .deps
                        .gateway
                        .transfer(&credit, &self.vault_address, caller)
                    {
                        warn!(loan_id, %err, "installment claim rolled back");
                        self.state.write().loans.insert(loan_id, snapshot);
                        return Err(err.into());
                    }
                }
                self.deps.receipts.burn(loan_id)?;
                info!(loan_id, "repaid installment loan claimed and closed");
                self.state.write().events.push(LoanEvent::Claimed {
                    loan_id,
                    defaulted: false,
                });
                Ok(())
            }
            LoanStatus::Defaulted => {
                self.state.write().loans.remove(&loan_id);
                if snapshot.unclaimed_amount > 0 {
                    if let Err(err) = self
                        .deps
                        .gateway
                        .transfer(&credit, &self.vault_address, caller)
                    {
                        warn!(loan_id, %err, "installment claim rolled back");
                        self.state.write().loans.insert(loan_id, snapshot);
                        return Err(err.into());
                    }
                }
                if let Err(err) =
                    self.deps
                        .gateway
                        .transfer(&snapshot.collateral, &self.vault_address, caller)
                {
                    warn!(loan_id, %err, "installment claim rolled back");
                    if snapshot.unclaimed_amount > 0 {
                        let _ = self.deps.gateway.transfer(&credit, caller, &self.vault_address);
                    }
                    self.state.write().loans.insert(loan_id, snapshot);
                    return Err(err.into());
                }
                self.deps.receipts.burn(loan_id)?;
                info!(loan_id, "defaulted installment loan claimed");
                self.state.write().events.push(LoanEvent::Claimed {
                    loan_id,
                    defaulted: true,
                });
                Ok(())
            }
            LoanStatus::NonExistent => Err(LoanError::UnknownLoan(loan_id)),
        }
    }
}
