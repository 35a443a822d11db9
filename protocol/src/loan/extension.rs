//! # Loan Extensions
//!
//! A running (or already defaulted) simple loan's deadline can be pushed
//! out by mutual consent: one party makes an [`ExtensionOffer`], the other
//! accepts it. The offer is authorized either by declaring it on-chain
//! first or by shipping an Ed25519 signature over its canonical hash —
//! both roads end in the same acceptance path.
//!
//! Extending a defaulted loan is deliberately legal: as long as the new
//! deadline lands in the future, the extension revives the loan. That is
//! the whole point of a workout agreement.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::asset::Asset;
use crate::config::{MAX_EXTENSION_DURATION_SECS, MIN_EXTENSION_DURATION_SECS};
use crate::events::LoanEvent;

use super::simple::SimpleLoanEngine;
use super::{deadline_after, fingerprint_digest, LoanError, LoanStatus};

// ---------------------------------------------------------------------------
// Offer
// ---------------------------------------------------------------------------

/// A standing offer to push a loan's default deadline out.
///
/// `price` is what the borrower pays the current receipt holder for the
/// extra time, in the loan's credit asset. Zero means the extension is
/// free and no transfer happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionOffer {
    /// Loan being extended.
    pub loan_id: u64,
    /// Seconds added to the current default deadline.
    pub duration_secs: u64,
    /// Instant after which the offer is void.
    pub expiration: DateTime<Utc>,
    /// Party making the offer: the borrower or the current receipt holder.
    pub proposer: String,
    /// Credit-asset amount the borrower pays the holder.
    pub price: u64,
    /// Proposer-scoped replay nonce, revoked on acceptance.
    pub nonce: u64,
}

impl ExtensionOffer {
    /// Canonical content hash the offer is declared or signed under.
    pub fn hash(&self) -> [u8; 32] {
        fingerprint_digest(&[
            &self.loan_id.to_be_bytes(),
            &self.duration_secs.to_be_bytes(),
            &self.expiration.timestamp().to_be_bytes(),
            self.proposer.as_bytes(),
            &self.price.to_be_bytes(),
            &self.nonce.to_be_bytes(),
        ])
    }
}

/// How an offer proves it came from its proposer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferAuthorization {
    /// The proposer declared the offer on-chain beforehand.
    Declared,
    /// Ed25519 signature by the proposer over the offer hash.
    Signed(Vec<u8>),
}

fn signature_authorizes(proposer: &str, hash: &[u8; 32], signature: &[u8]) -> bool {
    let Ok(key_bytes) = hex::decode(proposer) else {
        return false;
    };
    let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(hash, &signature).is_ok()
}

// ---------------------------------------------------------------------------
// Engine entry points
// ---------------------------------------------------------------------------

impl SimpleLoanEngine {
    /// Declares an extension offer on-chain.
    ///
    /// Only the offer's proposer may declare it, and the proposer must be
    /// a party to the loan: the borrower or the current receipt holder.
    pub fn make_extension_offer(
        &self,
        caller: &str,
        offer: &ExtensionOffer,
    ) -> Result<(), LoanError> {
        if caller != offer.proposer {
            return Err(LoanError::InvalidExtensionCaller {
                caller: caller.to_string(),
            });
        }
        let loan = self
            .get_loan(offer.loan_id)
            .ok_or(LoanError::UnknownLoan(offer.loan_id))?;
        let holder = self
            .deps
            .receipts
            .owner_of(offer.loan_id)
            .ok_or(LoanError::UnknownLoan(offer.loan_id))?;
        if caller != loan.borrower && caller != holder {
            return Err(LoanError::InvalidExtensionCaller {
                caller: caller.to_string(),
            });
        }
        if self.deps.nonces.is_revoked(&offer.proposer, offer.nonce) {
            return Err(LoanError::OfferNonceRevoked {
                owner: offer.proposer.clone(),
                nonce: offer.nonce,
            });
        }

        let hash = offer.hash();
        let mut state = self.state.write();
        state.made_offers.insert(hash);
        state.events.push(LoanEvent::ExtensionOfferMade {
            offer_hash: hex::encode(hash),
            loan_id: offer.loan_id,
            proposer: offer.proposer.clone(),
        });
        drop(state);

        info!(
            loan_id = offer.loan_id,
            proposer = %offer.proposer,
            duration_secs = offer.duration_secs,
            "extension offer declared"
        );
        Ok(())
    }

    /// Accepts an extension offer, pushing the default deadline out.
    ///
    /// The caller must be the offer's counter-party: the holder accepts a
    /// borrower's offer, the borrower accepts a holder's. Works on running
    /// and defaulted loans alike — an already-repaid loan has nothing left
    /// to extend. The nonce is consumed even if the price transfer fails,
    /// so a broken acceptance cannot be replayed.
    pub fn extend_loan(
        &self,
        caller: &str,
        offer: &ExtensionOffer,
        auth: &OfferAuthorization,
    ) -> Result<(), LoanError> {
        let now = self.deps.clock.now();
        let snapshot = self
            .get_loan(offer.loan_id)
            .ok_or(LoanError::UnknownLoan(offer.loan_id))?;
        if snapshot.status_at(now) == LoanStatus::Repaid {
            return Err(LoanError::InvalidLoanStatus {
                status: LoanStatus::Repaid,
            });
        }

        if now >= offer.expiration {
            return Err(LoanError::OfferExpired {
                expiration: offer.expiration,
                now,
            });
        }
        if self.deps.nonces.is_revoked(&offer.proposer, offer.nonce) {
            return Err(LoanError::OfferNonceRevoked {
                owner: offer.proposer.clone(),
                nonce: offer.nonce,
            });
        }
        if offer.duration_secs < MIN_EXTENSION_DURATION_SECS
            || offer.duration_secs > MAX_EXTENSION_DURATION_SECS
        {
            return Err(LoanError::ExtensionDurationOutOfBounds {
                duration_secs: offer.duration_secs,
                min_secs: MIN_EXTENSION_DURATION_SECS,
                max_secs: MAX_EXTENSION_DURATION_SECS,
            });
        }

        let holder = self
            .deps
            .receipts
            .owner_of(offer.loan_id)
            .ok_or(LoanError::UnknownLoan(offer.loan_id))?;
        let counterparty = if offer.proposer == holder {
            snapshot.borrower.as_str()
        } else if offer.proposer == snapshot.borrower {
            holder.as_str()
        } else {
            return Err(LoanError::InvalidExtensionCaller {
                caller: offer.proposer.clone(),
            });
        };
        if caller != counterparty {
            return Err(LoanError::InvalidExtensionCaller {
                caller: caller.to_string(),
            });
        }

        let hash = offer.hash();
        let authorized = match auth {
            OfferAuthorization::Declared => self.state.read().made_offers.contains(&hash),
            OfferAuthorization::Signed(signature) => {
                signature_authorizes(&offer.proposer, &hash, signature)
            }
        };
        if !authorized {
            return Err(LoanError::UnauthorizedOffer);
        }

        let new_default = deadline_after(snapshot.default_timestamp, offer.duration_secs)?;
        if new_default <= now {
            return Err(LoanError::InvalidNewDefaultTimestamp {
                current: snapshot.default_timestamp,
                proposed: new_default,
            });
        }

        // Consume before mutating; a failed price transfer must not leave
        // the offer replayable.
        self.deps.nonces.revoke(&offer.proposer, offer.nonce);
        {
            let mut state = self.state.write();
            state.made_offers.remove(&hash);
            if let Some(loan) = state.loans.get_mut(&offer.loan_id) {
                loan.default_timestamp = new_default;
            }
        }

        if offer.price > 0 {
            let price = Asset::fungible(&snapshot.credit_address, offer.price);
            if let Err(err) = self
                .deps
                .gateway
                .transfer(&price, &snapshot.borrower, &holder)
            {
                warn!(loan_id = offer.loan_id, %err, "extension rolled back");
                if let Some(loan) = self.state.write().loans.get_mut(&offer.loan_id) {
                    loan.default_timestamp = snapshot.default_timestamp;
                }
                return Err(err.into());
            }
        }

        info!(
            loan_id = offer.loan_id,
            new_default_timestamp = %new_default,
            price = offer.price,
            "loan extended"
        );
        self.state.write().events.push(LoanEvent::Extended {
            loan_id: offer.loan_id,
            new_default_timestamp: new_default,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetCategory;
    use crate::clock::{Clock, ManualClock};
    use crate::loan::Dependencies;
    use crate::proposal::{Proposal, ProposalSpec, SignedProposalValidator, Terms};
    use crate::registry::{
        InMemoryAccessControl, InMemoryNonceRegistry, InMemoryReceiptRegistry, StaticConfig,
    };
    use crate::vault::LedgerGateway;
    use chrono::{Duration, TimeZone};
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use std::sync::Arc;

    const VAULT: &str = "vault";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    struct Setup {
        engine: SimpleLoanEngine,
        ledger: Arc<LedgerGateway>,
        clock: Arc<ManualClock>,
        lender_key: SigningKey,
        lender: String,
        loan_id: u64,
    }

    fn setup() -> Setup {
        let ledger = Arc::new(LedgerGateway::new());
        let receipts = Arc::new(InMemoryReceiptRegistry::new());
        let access = Arc::new(InMemoryAccessControl::new());
        let nonces = Arc::new(InMemoryNonceRegistry::new());
        let config = Arc::new(StaticConfig::new(0, "collector"));
        config.register_asset("usdc", AssetCategory::Fungible);
        config.register_asset("deeds", AssetCategory::NonFungible);
        let clock = Arc::new(ManualClock::new(t0()));
        let validator = Arc::new(SignedProposalValidator::new("validator", nonces.clone()));
        access.grant(VAULT, crate::config::TAG_ACTIVE_LOAN);
        access.grant("validator", crate::config::TAG_LOAN_PROPOSAL);

        let engine = SimpleLoanEngine::new(
            Dependencies {
                gateway: ledger.clone(),
                validator,
                receipts,
                access,
                config,
                nonces,
                clock: clock.clone(),
            },
            VAULT,
        );

        let lender_key = SigningKey::generate(&mut OsRng);
        let lender = hex::encode(lender_key.verifying_key().as_bytes());
        ledger.deposit(&lender, &Asset::fungible("usdc", 5_000_000));
        ledger.deposit("borrower", &Asset::fungible("usdc", 5_000_000));
        ledger.deposit("borrower", &Asset::non_fungible("deeds", 7));

        let terms = Terms {
            lender: lender.clone(),
            borrower: "borrower".into(),
            duration_secs: 30 * 86_400,
            collateral: Asset::non_fungible("deeds", 7),
            credit_address: "usdc".into(),
            credit_amount: 1_000_000,
            fixed_interest_amount: 10_000,
            accruing_interest_apr_bps: 0,
            can_create: true,
            can_refinance: false,
        };
        let proposal = Proposal {
            proposer: lender.clone(),
            terms,
            allowed_acceptor: None,
            expiration: t0() + Duration::days(3_650),
            nonce: 1,
            refinancing_loan_id: None,
        };
        let spec = ProposalSpec::signed(&proposal, &lender_key);
        let loan_id = engine.create_loan("borrower", &spec).unwrap();

        Setup {
            engine,
            ledger,
            clock,
            lender_key,
            lender,
            loan_id,
        }
    }

    fn borrower_offer(s: &Setup, duration_secs: u64, price: u64) -> ExtensionOffer {
        ExtensionOffer {
            loan_id: s.loan_id,
            duration_secs,
            expiration: s.clock.now() + Duration::days(7),
            proposer: "borrower".into(),
            price,
            nonce: 10,
        }
    }

    fn holder_offer(s: &Setup, duration_secs: u64) -> ExtensionOffer {
        ExtensionOffer {
            loan_id: s.loan_id,
            duration_secs,
            expiration: s.clock.now() + Duration::days(7),
            proposer: s.lender.clone(),
            price: 0,
            nonce: 11,
        }
    }

    #[test]
    fn declared_offer_extends_and_charges_the_price() {
        let s = setup();
        let before = s.engine.get_loan(s.loan_id).unwrap().default_timestamp;

        let offer = borrower_offer(&s, 14 * 86_400, 5_000);
        s.engine.make_extension_offer("borrower", &offer).unwrap();
        s.engine
            .extend_loan(&s.lender, &offer, &OfferAuthorization::Declared)
            .unwrap();

        let after = s.engine.get_loan(s.loan_id).unwrap().default_timestamp;
        assert_eq!(after, before + Duration::days(14));
        assert_eq!(
            s.ledger.balance_of(&s.lender, &Asset::fungible("usdc", 0)),
            4_000_000 + 5_000
        );
    }

    #[test]
    fn signed_offer_skips_the_declaration() {
        let s = setup();
        let offer = holder_offer(&s, 30 * 86_400);
        let signature = s.lender_key.sign(&offer.hash()).to_vec();

        s.engine
            .extend_loan("borrower", &offer, &OfferAuthorization::Signed(signature))
            .unwrap();
        let loan = s.engine.get_loan(s.loan_id).unwrap();
        assert_eq!(loan.default_timestamp, t0() + Duration::days(60));
    }

    #[test]
    fn tampered_signed_offer_rejected() {
        let s = setup();
        let offer = holder_offer(&s, 30 * 86_400);
        let signature = s.lender_key.sign(&offer.hash()).to_vec();

        let mut sweeter = offer.clone();
        sweeter.duration_secs = 90 * 86_400;
        let err = s
            .engine
            .extend_loan("borrower", &sweeter, &OfferAuthorization::Signed(signature))
            .unwrap_err();
        assert!(matches!(err, LoanError::UnauthorizedOffer));
    }

    #[test]
    fn undeclared_offer_rejected() {
        let s = setup();
        let offer = borrower_offer(&s, 14 * 86_400, 0);
        let err = s
            .engine
            .extend_loan(&s.lender, &offer, &OfferAuthorization::Declared)
            .unwrap_err();
        assert!(matches!(err, LoanError::UnauthorizedOffer));
    }

    #[test]
    fn duration_bounds_are_enforced_and_echoed() {
        let s = setup();
        let offer = borrower_offer(&s, MIN_EXTENSION_DURATION_SECS - 1, 0);
        s.engine.make_extension_offer("borrower", &offer).unwrap();
        match s
            .engine
            .extend_loan(&s.lender, &offer, &OfferAuthorization::Declared)
        {
            Err(LoanError::ExtensionDurationOutOfBounds {
                duration_secs,
                min_secs,
                max_secs,
            }) => {
                assert_eq!(duration_secs, MIN_EXTENSION_DURATION_SECS - 1);
                assert_eq!(min_secs, MIN_EXTENSION_DURATION_SECS);
                assert_eq!(max_secs, MAX_EXTENSION_DURATION_SECS);
            }
            other => panic!("expected ExtensionDurationOutOfBounds, got {other:?}"),
        }

        // Exactly the minimum extends by exactly the minimum.
        let before = s.engine.get_loan(s.loan_id).unwrap().default_timestamp;
        let mut minimal = borrower_offer(&s, MIN_EXTENSION_DURATION_SECS, 0);
        minimal.nonce = 12;
        s.engine.make_extension_offer("borrower", &minimal).unwrap();
        s.engine
            .extend_loan(&s.lender, &minimal, &OfferAuthorization::Declared)
            .unwrap();
        assert_eq!(
            s.engine.get_loan(s.loan_id).unwrap().default_timestamp,
            before + Duration::seconds(MIN_EXTENSION_DURATION_SECS as i64)
        );
    }

    #[test]
    fn accepted_offer_cannot_be_replayed() {
        let s = setup();
        let offer = borrower_offer(&s, 14 * 86_400, 0);
        s.engine.make_extension_offer("borrower", &offer).unwrap();
        s.engine
            .extend_loan(&s.lender, &offer, &OfferAuthorization::Declared)
            .unwrap();

        let err = s
            .engine
            .extend_loan(&s.lender, &offer, &OfferAuthorization::Declared)
            .unwrap_err();
        assert!(matches!(err, LoanError::OfferNonceRevoked { nonce: 10, .. }));
    }

    #[test]
    fn expired_offer_rejected() {
        let s = setup();
        let offer = borrower_offer(&s, 14 * 86_400, 0);
        s.engine.make_extension_offer("borrower", &offer).unwrap();
        s.clock.advance(Duration::days(8));

        let err = s
            .engine
            .extend_loan(&s.lender, &offer, &OfferAuthorization::Declared)
            .unwrap_err();
        assert!(matches!(err, LoanError::OfferExpired { .. }));
    }

    #[test]
    fn proposer_cannot_accept_own_offer() {
        let s = setup();
        let offer = borrower_offer(&s, 14 * 86_400, 0);
        s.engine.make_extension_offer("borrower", &offer).unwrap();

        let err = s
            .engine
            .extend_loan("borrower", &offer, &OfferAuthorization::Declared)
            .unwrap_err();
        assert!(matches!(err, LoanError::InvalidExtensionCaller { .. }));
    }

    #[test]
    fn third_party_cannot_propose() {
        let s = setup();
        let mut offer = borrower_offer(&s, 14 * 86_400, 0);
        offer.proposer = "mallory".into();
        let err = s.engine.make_extension_offer("mallory", &offer).unwrap_err();
        assert!(matches!(err, LoanError::InvalidExtensionCaller { .. }));
    }

    #[test]
    fn extension_revives_a_defaulted_loan() {
        let s = setup();
        s.clock.advance(Duration::days(35));
        assert_eq!(s.engine.loan_status(s.loan_id), LoanStatus::Defaulted);

        let offer = borrower_offer(&s, 30 * 86_400, 0);
        s.engine.make_extension_offer("borrower", &offer).unwrap();
        s.engine
            .extend_loan(&s.lender, &offer, &OfferAuthorization::Declared)
            .unwrap();

        assert_eq!(s.engine.loan_status(s.loan_id), LoanStatus::Running);
    }

    #[test]
    fn extension_that_stays_in_the_past_rejected() {
        let s = setup();
        s.clock.advance(Duration::days(35));

        // 30 days past deadline; +1 day of extension still lands behind now.
        let offer = borrower_offer(&s, 86_400, 0);
        s.engine.make_extension_offer("borrower", &offer).unwrap();
        let err = s
            .engine
            .extend_loan(&s.lender, &offer, &OfferAuthorization::Declared)
            .unwrap_err();
        assert!(matches!(err, LoanError::InvalidNewDefaultTimestamp { .. }));
    }

    #[test]
    fn repaid_loan_cannot_be_extended() {
        let s = setup();
        s.engine.repay_loan("borrower", s.loan_id, None).unwrap();

        let offer = borrower_offer(&s, 14 * 86_400, 0);
        let err = s.engine.make_extension_offer("borrower", &offer).unwrap_err();
        // Direct repayment deleted the loan outright.
        assert!(matches!(err, LoanError::UnknownLoan(_)));
    }
}
