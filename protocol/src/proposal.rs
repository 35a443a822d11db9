//! # Proposals & Terms
//!
//! A proposal is an off-chain agreement: one party signs the terms they
//! are willing to lend or borrow under, the counter-party submits it to a
//! loan engine. The engine forwards the opaque blob to its injected
//! [`ProposalValidator`] and gets back a canonical [`Terms`] record — or a
//! structured failure. The engine never parses proposal encodings itself.
//!
//! [`SignedProposalValidator`] is the reference validator: payload is the
//! canonical JSON encoding of a [`Proposal`], the proposal hash is the
//! BLAKE3 digest of those exact bytes, and the signature is Ed25519 over
//! the digest, verified against the proposer's hex-encoded public key.
//! Real deployments can swap in any scheme behind the same trait.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::asset::Asset;
use crate::registry::NonceRegistry;

/// 32-byte content hash identifying an accepted proposal or offer.
pub type ProposalHash = [u8; 32];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures surfaced by proposal validation.
#[derive(Debug, Error)]
pub enum ProposalError {
    /// The payload did not decode as a proposal.
    #[error("malformed proposal payload: {0}")]
    Malformed(String),

    /// The proposal's stated expiration has lapsed.
    #[error("proposal expired at {expiration}, now is {now}")]
    Expired {
        expiration: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// The proposer's nonce was revoked (offer withdrawn or already spent).
    #[error("nonce {nonce} of {owner} has been revoked")]
    NonceRevoked { owner: String, nonce: u64 },

    /// The proposer is neither the lender nor the borrower of the terms.
    #[error("proposer {proposer} is not a party to the proposed terms")]
    ProposerNotParty { proposer: String },

    /// A proposal cannot be accepted by the party that made it.
    #[error("{address} cannot accept their own proposal")]
    AcceptorIsProposer { address: String },

    /// The caller is not the party this proposal is addressed to.
    #[error("proposal must be accepted by {expected}, not {caller}")]
    UnauthorizedAcceptor { caller: String, expected: String },

    /// The proposal is bound to a specific refinanced loan and the call
    /// context named a different one (or none).
    #[error("proposal is bound to refinancing loan {bound}, call context was {context:?}")]
    RefinancingLoanMismatch { bound: u64, context: Option<u64> },

    /// Each proposal is single-use; this one was accepted before.
    #[error("proposal {hash} has already been accepted")]
    AlreadyAccepted { hash: String },

    /// The proposer address is not a decodable verification key.
    #[error("proposer address is not a valid signer key: {0}")]
    MalformedSigner(String),

    /// The signature does not verify against the proposer's key.
    #[error("proposal signature does not verify against the proposer key")]
    InvalidSignature,
}

// ---------------------------------------------------------------------------
// Terms
// ---------------------------------------------------------------------------

/// Canonical, validated terms of a loan — the only thing a loan engine
/// ever learns about a proposal. Ephemeral: passed through one call,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terms {
    /// Address funding the loan.
    pub lender: String,
    /// Address pledging collateral and owing repayment.
    pub borrower: String,
    /// Loan duration in seconds; `default_timestamp = start + duration`.
    pub duration_secs: u64,
    /// Collateral pledged by the borrower.
    pub collateral: Asset,
    /// Fungible token address of the credit asset.
    pub credit_address: String,
    /// Credit amount lent, in smallest units.
    pub credit_amount: u64,
    /// Interest amount owed regardless of elapsed time.
    pub fixed_interest_amount: u64,
    /// Accruing interest rate, APR in basis points. 0 disables accrual.
    pub accruing_interest_apr_bps: u32,
    /// Whether these terms may create a fresh loan.
    pub can_create: bool,
    /// Whether these terms may refinance an existing loan.
    pub can_refinance: bool,
}

// ---------------------------------------------------------------------------
// Proposal wire format (reference validator)
// ---------------------------------------------------------------------------

/// The reference validator's proposal body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// The terms being offered.
    pub terms: Terms,
    /// Hex-encoded Ed25519 public key of the party making the offer.
    /// Must equal either `terms.lender` or `terms.borrower`.
    pub proposer: String,
    /// If set, only this address may accept.
    pub allowed_acceptor: Option<String>,
    /// Instant after which the proposal is void.
    pub expiration: DateTime<Utc>,
    /// Proposer-scoped replay nonce, revoked on acceptance.
    pub nonce: u64,
    /// If set, the proposal may only refinance this specific loan.
    pub refinancing_loan_id: Option<u64>,
}

impl Proposal {
    /// Canonical payload bytes — the exact bytes that get hashed and signed.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("proposal serialization is infallible")
    }
}

/// An opaque proposal blob plus its authorization, as submitted by a
/// caller. The engine forwards it untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalSpec {
    /// Validator-defined proposal encoding.
    pub payload: Vec<u8>,
    /// Signature over the validator-defined digest of `payload`.
    pub signature: Vec<u8>,
}

impl ProposalSpec {
    /// Signs `proposal` with the proposer's key, producing a submittable
    /// spec. Client-side convenience; the core only ever verifies.
    pub fn signed(proposal: &Proposal, key: &ed25519_dalek::SigningKey) -> Self {
        use ed25519_dalek::Signer;
        let payload = proposal.encode();
        let digest = blake3::hash(&payload);
        let signature = key.sign(digest.as_bytes()).to_vec();
        Self { payload, signature }
    }
}

// ---------------------------------------------------------------------------
// Validator capability
// ---------------------------------------------------------------------------

/// Turns opaque proposal blobs into validated [`Terms`].
///
/// The engine forwards its caller identity and any refinancing-loan
/// context so the validator can enforce acceptor rules and loan binding
/// independently of the engine.
pub trait ProposalValidator: Send + Sync {
    /// The validator's own address, checked against the capability-tag
    /// registry before any proposal from it is trusted.
    fn address(&self) -> &str;

    /// Validates a proposal and returns its hash and canonical terms.
    fn accept(
        &self,
        caller: &str,
        refinancing_loan_id: Option<u64>,
        spec: &ProposalSpec,
        now: DateTime<Utc>,
    ) -> Result<(ProposalHash, Terms), ProposalError>;
}

// ---------------------------------------------------------------------------
// Reference implementation
// ---------------------------------------------------------------------------

/// Ed25519-over-BLAKE3 reference validator.
///
/// Consumes the proposer's nonce on acceptance and additionally keeps a
/// single-use set keyed by proposal hash, so the same blob can never mint
/// two loans even across distinct nonces.
pub struct SignedProposalValidator {
    address: String,
    nonces: Arc<dyn NonceRegistry>,
    accepted: RwLock<HashSet<ProposalHash>>,
}

impl SignedProposalValidator {
    /// Creates a validator identified by `address`, consuming nonces from
    /// the shared registry.
    pub fn new(address: &str, nonces: Arc<dyn NonceRegistry>) -> Self {
        Self {
            address: address.to_string(),
            nonces,
            accepted: RwLock::new(HashSet::new()),
        }
    }

    fn verify_signature(
        proposer: &str,
        digest: &ProposalHash,
        signature: &[u8],
    ) -> Result<(), ProposalError> {
        let key_bytes = hex::decode(proposer)
            .map_err(|e| ProposalError::MalformedSigner(e.to_string()))?;
        let key_bytes: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| ProposalError::MalformedSigner("key must be 32 bytes".into()))?;
        let key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| ProposalError::MalformedSigner(e.to_string()))?;
        let signature = Signature::from_slice(signature)
            .map_err(|_| ProposalError::InvalidSignature)?;
        key.verify(digest, &signature)
            .map_err(|_| ProposalError::InvalidSignature)
    }
}

impl ProposalValidator for SignedProposalValidator {
    fn address(&self) -> &str {
        &self.address
    }

    fn accept(
        &self,
        caller: &str,
        refinancing_loan_id: Option<u64>,
        spec: &ProposalSpec,
        now: DateTime<Utc>,
    ) -> Result<(ProposalHash, Terms), ProposalError> {
        let proposal: Proposal = serde_json::from_slice(&spec.payload)
            .map_err(|e| ProposalError::Malformed(e.to_string()))?;
        let digest = *blake3::hash(&spec.payload).as_bytes();

        if self.accepted.read().contains(&digest) {
            return Err(ProposalError::AlreadyAccepted {
                hash: hex::encode(digest),
            });
        }

        if now >= proposal.expiration {
            return Err(ProposalError::Expired {
                expiration: proposal.expiration,
                now,
            });
        }

        if self.nonces.is_revoked(&proposal.proposer, proposal.nonce) {
            return Err(ProposalError::NonceRevoked {
                owner: proposal.proposer.clone(),
                nonce: proposal.nonce,
            });
        }

        let terms = &proposal.terms;
        let counterparty = if proposal.proposer == terms.lender {
            terms.borrower.clone()
        } else if proposal.proposer == terms.borrower {
            terms.lender.clone()
        } else {
            return Err(ProposalError::ProposerNotParty {
                proposer: proposal.proposer.clone(),
            });
        };

        if caller == proposal.proposer {
            return Err(ProposalError::AcceptorIsProposer {
                address: caller.to_string(),
            });
        }
        if caller != counterparty {
            return Err(ProposalError::UnauthorizedAcceptor {
                caller: caller.to_string(),
                expected: counterparty,
            });
        }
        if let Some(allowed) = &proposal.allowed_acceptor {
            if caller != allowed {
                return Err(ProposalError::UnauthorizedAcceptor {
                    caller: caller.to_string(),
                    expected: allowed.clone(),
                });
            }
        }

        if let Some(bound) = proposal.refinancing_loan_id {
            if refinancing_loan_id != Some(bound) {
                return Err(ProposalError::RefinancingLoanMismatch {
                    bound,
                    context: refinancing_loan_id,
                });
            }
        }

        Self::verify_signature(&proposal.proposer, &digest, &spec.signature)?;

        // Consume before returning: single-use hash plus nonce revocation.
        self.accepted.write().insert(digest);
        self.nonces.revoke(&proposal.proposer, proposal.nonce);

        Ok((digest, proposal.terms))
    }
}
