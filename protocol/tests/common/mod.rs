//! Shared end-to-end scaffolding: one world with both engines wired to the
//! same ledger, receipt registry, and clock, plus proposal plumbing.

#![allow(dead_code)]

use std::cell::Cell;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use covenant_protocol::asset::{Asset, AssetCategory};
use covenant_protocol::clock::{Clock, ManualClock};
use covenant_protocol::config::{TAG_ACTIVE_LOAN, TAG_LOAN_PROPOSAL};
use covenant_protocol::loan::{Dependencies, InstallmentLoanEngine, SimpleLoanEngine};
use covenant_protocol::proposal::{Proposal, ProposalSpec, SignedProposalValidator, Terms};
use covenant_protocol::registry::{
    InMemoryAccessControl, InMemoryNonceRegistry, InMemoryReceiptRegistry, StaticConfig,
};
use covenant_protocol::vault::LedgerGateway;

pub const SIMPLE_VAULT: &str = "simple-vault";
pub const INSTALLMENT_VAULT: &str = "installment-vault";
pub const VALIDATOR: &str = "validator";
pub const BORROWER: &str = "borrower";
pub const COLLECTOR: &str = "collector";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

/// Run scenarios with `RUST_LOG=covenant_protocol=debug` to watch the
/// engines narrate.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A signing identity whose address is its hex-encoded public key.
pub struct Party {
    pub key: SigningKey,
    pub address: String,
}

impl Party {
    pub fn generate() -> Self {
        let key = SigningKey::generate(&mut OsRng);
        let address = hex::encode(key.verifying_key().as_bytes());
        Self { key, address }
    }
}

pub struct World {
    pub simple: SimpleLoanEngine,
    pub installment: InstallmentLoanEngine,
    pub ledger: Arc<LedgerGateway>,
    pub receipts: Arc<InMemoryReceiptRegistry>,
    pub access: Arc<InMemoryAccessControl>,
    pub config: Arc<StaticConfig>,
    pub clock: Arc<ManualClock>,
    pub lender: Party,
    nonce: Cell<u64>,
}

impl World {
    pub fn new(fee_bps: u16) -> Self {
        init_tracing();
        let ledger = Arc::new(LedgerGateway::new());
        let receipts = Arc::new(InMemoryReceiptRegistry::new());
        let access = Arc::new(InMemoryAccessControl::new());
        let nonces = Arc::new(InMemoryNonceRegistry::new());
        let config = Arc::new(StaticConfig::new(fee_bps, COLLECTOR));
        config.register_asset("usdc", AssetCategory::Fungible);
        config.register_asset("deeds", AssetCategory::NonFungible);
        let clock = Arc::new(ManualClock::new(t0()));
        let validator = Arc::new(SignedProposalValidator::new(VALIDATOR, nonces.clone()));

        access.grant(SIMPLE_VAULT, TAG_ACTIVE_LOAN);
        access.grant(INSTALLMENT_VAULT, TAG_ACTIVE_LOAN);
        access.grant(VALIDATOR, TAG_LOAN_PROPOSAL);

        let deps = Dependencies {
            gateway: ledger.clone(),
            validator,
            receipts: receipts.clone(),
            access: access.clone(),
            config: config.clone(),
            nonces,
            clock: clock.clone(),
        };
        let simple = SimpleLoanEngine::new(deps.clone(), SIMPLE_VAULT);
        let installment = InstallmentLoanEngine::new(deps, INSTALLMENT_VAULT);

        let lender = Party::generate();
        ledger.deposit(&lender.address, &Asset::fungible("usdc", 50_000_000));
        ledger.deposit(BORROWER, &Asset::fungible("usdc", 50_000_000));
        ledger.deposit(BORROWER, &Asset::non_fungible("deeds", 7));
        ledger.deposit(BORROWER, &Asset::non_fungible("deeds", 8));

        Self {
            simple,
            installment,
            ledger,
            receipts,
            access,
            config,
            clock,
            lender,
            nonce: Cell::new(1),
        }
    }

    /// 30-day bullet loan: 1,000,000 principal, flat 10,000 interest.
    pub fn standard_terms(&self) -> Terms {
        Terms {
            lender: self.lender.address.clone(),
            borrower: BORROWER.into(),
            duration_secs: 30 * 86_400,
            collateral: Asset::non_fungible("deeds", 7),
            credit_address: "usdc".into(),
            credit_amount: 1_000_000,
            fixed_interest_amount: 10_000,
            accruing_interest_apr_bps: 0,
            can_create: true,
            can_refinance: false,
        }
    }

    /// Signs `terms` as a proposal by `proposer`, with a fresh nonce.
    pub fn spec(
        &self,
        terms: Terms,
        proposer: &Party,
        refinancing_loan_id: Option<u64>,
    ) -> ProposalSpec {
        let nonce = self.nonce.get();
        self.nonce.set(nonce + 1);
        let proposal = Proposal {
            proposer: proposer.address.clone(),
            terms,
            allowed_acceptor: None,
            expiration: self.clock.now() + Duration::days(3_650),
            nonce,
            refinancing_loan_id,
        };
        ProposalSpec::signed(&proposal, &proposer.key)
    }

    pub fn create_standard_loan(&self) -> u64 {
        let spec = self.spec(self.standard_terms(), &self.lender, None);
        self.simple.create_loan(BORROWER, &spec).unwrap()
    }

    pub fn fund(&self, holder: &str, amount: u64) {
        self.ledger.deposit(holder, &Asset::fungible("usdc", amount));
    }

    pub fn usdc(&self, holder: &str) -> u64 {
        self.ledger.balance_of(holder, &Asset::fungible("usdc", 0))
    }

    pub fn holds_deed(&self, holder: &str, id: u64) -> bool {
        self.ledger
            .balance_of(holder, &Asset::non_fungible("deeds", id))
            == 1
    }

    /// Sum of usdc across the given holders; the conservation check.
    pub fn total_usdc(&self, holders: &[&str]) -> u64 {
        holders.iter().map(|holder| self.usdc(holder)).sum()
    }
}
