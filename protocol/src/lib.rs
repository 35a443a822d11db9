//! # Covenant Protocol
//!
//! Peer-to-peer collateralized lending as a library. A lender and a
//! borrower agree on signed terms off-chain, one of them submits the
//! proposal, and the engine takes custody of the collateral, disburses
//! the credit, and tracks the debt until it is repaid, refinanced,
//! extended, or defaults and the collateral is seized.
//!
//! Two loan flavours share the same custody and proposal machinery:
//!
//! - [`loan::SimpleLoanEngine`] — bullet loans, settled by a single
//!   repayment of principal plus all interest;
//! - [`loan::InstallmentLoanEngine`] — amortizing loans with interest-first
//!   partial repayments, pull-based settlement, and a decaying debt limit
//!   that defaults runaway loans early.
//!
//! Every loan is mirrored by a transferable receipt whose holder owns the
//! claim on its proceeds; receipt ids and loan ids are the same number.
//! All external collaborators — asset custody, proposal validation,
//! receipts, access tags, configuration, nonces, and the clock — are
//! injected as capabilities (see [`loan::Dependencies`]), so the engines
//! run identically against the bundled in-memory implementations or a
//! real deployment's backends.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use covenant_protocol::asset::{Asset, AssetCategory};
//! use covenant_protocol::clock::SystemClock;
//! use covenant_protocol::config::{TAG_ACTIVE_LOAN, TAG_LOAN_PROPOSAL};
//! use covenant_protocol::loan::{Dependencies, SimpleLoanEngine};
//! use covenant_protocol::proposal::SignedProposalValidator;
//! use covenant_protocol::registry::{
//!     InMemoryAccessControl, InMemoryNonceRegistry, InMemoryReceiptRegistry, StaticConfig,
//! };
//! use covenant_protocol::vault::LedgerGateway;
//!
//! let nonces = Arc::new(InMemoryNonceRegistry::new());
//! let access = Arc::new(InMemoryAccessControl::new());
//! let config = Arc::new(StaticConfig::new(30, "fee-collector"));
//! config.register_asset("usdc", AssetCategory::Fungible);
//! access.grant("vault", TAG_ACTIVE_LOAN);
//! access.grant("validator", TAG_LOAN_PROPOSAL);
//!
//! let engine = SimpleLoanEngine::new(
//!     Dependencies {
//!         gateway: Arc::new(LedgerGateway::new()),
//!         validator: Arc::new(SignedProposalValidator::new("validator", nonces.clone())),
//!         receipts: Arc::new(InMemoryReceiptRegistry::new()),
//!         access,
//!         config,
//!         nonces,
//!         clock: Arc::new(SystemClock),
//!     },
//!     "vault",
//! );
//! # let _ = engine;
//! ```

pub mod asset;
pub mod clock;
pub mod config;
pub mod events;
pub mod fee;
pub mod loan;
pub mod proposal;
pub mod registry;
pub mod vault;
