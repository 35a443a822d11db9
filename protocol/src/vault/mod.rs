//! # Vault — Asset Custody Gateway
//!
//! The loan engines never touch balances directly; every movement of value
//! goes through the [`AssetGateway`] capability. The gateway executes
//! conditional transfers for all three asset shapes and optionally applies
//! an off-chain-authorized allowance grant ([`Permit`]) first.
//!
//! [`LedgerGateway`] is the in-memory reference implementation: a
//! multi-asset double-entry ledger keyed by `(holder, ledger_key)`. It is
//! what tests settle against and what an embedding application can use
//! until it wires a real token backend into the seam.
//!
//! ## Trust model
//!
//! The engines are the custodian. `LedgerGateway` enforces balances and
//! permit deadlines; it records permit grants for audit but does not
//! re-check allowances on transfer — allowance enforcement belongs to the
//! token backend of an on-chain deployment, behind this same trait.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::asset::Asset;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from asset custody operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// A transfer of zero units was attempted. Zero-value transfers are
    /// banned protocol-wide; a caller hitting this has a fee-suppression
    /// bug.
    #[error("zero-value transfer of {asset} is not permitted")]
    ZeroValueTransfer {
        /// Display form of the offending asset.
        asset: String,
    },

    /// The sender does not hold enough of the asset.
    #[error("insufficient balance: {holder} holds {available} of {asset}, transfer needs {requested}")]
    InsufficientBalance {
        holder: String,
        asset: String,
        available: u64,
        requested: u64,
    },

    /// The permit's deadline has already lapsed.
    #[error("permit expired at {deadline}, now is {now}")]
    PermitExpired {
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// Crediting the recipient would overflow its balance.
    #[error("balance overflow crediting {holder} with {amount} of {asset}")]
    BalanceOverflow {
        holder: String,
        asset: String,
        amount: u64,
    },
}

// ---------------------------------------------------------------------------
// Permit
// ---------------------------------------------------------------------------

/// An off-chain-authorized allowance grant, applied before a pull transfer.
///
/// The signature blob is opaque to the core — verification is the token
/// backend's job. The reference ledger checks only the deadline and books
/// the grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permit {
    /// Token contract the allowance applies to.
    pub asset_address: String,
    /// Address granting the allowance.
    pub owner: String,
    /// Address allowed to spend — for loan flows, the engine's vault.
    pub spender: String,
    /// Maximum amount spendable under this permit.
    pub amount: u64,
    /// Instant after which the permit is void.
    pub deadline: DateTime<Utc>,
    /// Opaque authorization blob (signature parts).
    pub signature: Vec<u8>,
}

// ---------------------------------------------------------------------------
// AssetGateway
// ---------------------------------------------------------------------------

/// Capability for executing conditional value transfers.
pub trait AssetGateway: Send + Sync {
    /// Moves `asset` from `from` to `to`.
    ///
    /// Fails on zero-value transfers and insufficient balance. Must be
    /// all-or-nothing: a failed transfer leaves both parties untouched.
    fn transfer(&self, asset: &Asset, from: &str, to: &str) -> Result<(), VaultError>;

    /// Applies an off-chain-authorized allowance grant.
    ///
    /// Skipped entirely by callers when no permit was supplied.
    fn apply_permit(&self, permit: &Permit, now: DateTime<Utc>) -> Result<(), VaultError>;
}

// ---------------------------------------------------------------------------
// LedgerGateway
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LedgerInner {
    /// Balance per (holder, canonical asset key).
    balances: HashMap<(String, String), u64>,
    /// Outstanding permit grants per (owner, spender, asset address).
    allowances: HashMap<(String, String, String), u64>,
}

/// In-memory multi-asset ledger implementing [`AssetGateway`].
///
/// Interior mutability so the engines can hold it behind `Arc` while tests
/// keep their own handle for seeding and assertions.
#[derive(Debug, Default)]
pub struct LedgerGateway {
    inner: RwLock<LedgerInner>,
}

impl LedgerGateway {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Credits `holder` with `asset` out of thin air.
    ///
    /// Seeding primitive for tests and genesis state; not part of the
    /// gateway capability.
    pub fn deposit(&self, holder: &str, asset: &Asset) {
        let mut inner = self.inner.write();
        let entry = inner
            .balances
            .entry((holder.to_string(), asset.ledger_key()))
            .or_insert(0);
        *entry = entry.saturating_add(asset.transfer_units());
    }

    /// Current balance of `holder` in `asset`'s ledger bucket.
    pub fn balance_of(&self, holder: &str, asset: &Asset) -> u64 {
        self.inner
            .read()
            .balances
            .get(&(holder.to_string(), asset.ledger_key()))
            .copied()
            .unwrap_or(0)
    }

    /// Outstanding allowance granted by `owner` to `spender` for a token.
    pub fn allowance_of(&self, owner: &str, spender: &str, asset_address: &str) -> u64 {
        self.inner
            .read()
            .allowances
            .get(&(
                owner.to_string(),
                spender.to_string(),
                asset_address.to_string(),
            ))
            .copied()
            .unwrap_or(0)
    }
}

impl AssetGateway for LedgerGateway {
    fn transfer(&self, asset: &Asset, from: &str, to: &str) -> Result<(), VaultError> {
        let units = asset.transfer_units();
        if units == 0 {
            return Err(VaultError::ZeroValueTransfer {
                asset: asset.to_string(),
            });
        }

        let key = asset.ledger_key();
        let mut inner = self.inner.write();

        let available = inner
            .balances
            .get(&(from.to_string(), key.clone()))
            .copied()
            .unwrap_or(0);
        if available < units {
            return Err(VaultError::InsufficientBalance {
                holder: from.to_string(),
                asset: asset.to_string(),
                available,
                requested: units,
            });
        }

        // Self-transfer: funded, but nothing moves.
        if from == to {
            return Ok(());
        }

        let recipient = inner
            .balances
            .get(&(to.to_string(), key.clone()))
            .copied()
            .unwrap_or(0);
        let credited = recipient
            .checked_add(units)
            .ok_or_else(|| VaultError::BalanceOverflow {
                holder: to.to_string(),
                asset: asset.to_string(),
                amount: units,
            })?;

        inner
            .balances
            .insert((from.to_string(), key.clone()), available - units);
        inner.balances.insert((to.to_string(), key), credited);
        Ok(())
    }

    fn apply_permit(&self, permit: &Permit, now: DateTime<Utc>) -> Result<(), VaultError> {
        if now > permit.deadline {
            return Err(VaultError::PermitExpired {
                deadline: permit.deadline,
                now,
            });
        }

        let mut inner = self.inner.write();
        let entry = inner
            .allowances
            .entry((
                permit.owner.clone(),
                permit.spender.clone(),
                permit.asset_address.clone(),
            ))
            .or_insert(0);
        *entry = entry.saturating_add(permit.amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn deposit_then_transfer_moves_balance() {
        let ledger = LedgerGateway::new();
        let usdc = Asset::fungible("usdc", 1_000);
        ledger.deposit("alice", &usdc);

        ledger.transfer(&usdc.with_amount(400), "alice", "bob").unwrap();

        assert_eq!(ledger.balance_of("alice", &usdc), 600);
        assert_eq!(ledger.balance_of("bob", &usdc), 400);
    }

    #[test]
    fn transfer_of_nft_moves_single_unit() {
        let ledger = LedgerGateway::new();
        let deed = Asset::non_fungible("deeds", 42);
        ledger.deposit("alice", &deed);

        ledger.transfer(&deed, "alice", "vault").unwrap();

        assert_eq!(ledger.balance_of("alice", &deed), 0);
        assert_eq!(ledger.balance_of("vault", &deed), 1);
    }

    #[test]
    fn insufficient_balance_is_all_or_nothing() {
        let ledger = LedgerGateway::new();
        let usdc = Asset::fungible("usdc", 100);
        ledger.deposit("alice", &usdc);

        let err = ledger
            .transfer(&usdc.with_amount(150), "alice", "bob")
            .unwrap_err();
        assert!(matches!(
            err,
            VaultError::InsufficientBalance {
                available: 100,
                requested: 150,
                ..
            }
        ));
        assert_eq!(ledger.balance_of("alice", &usdc), 100);
        assert_eq!(ledger.balance_of("bob", &usdc), 0);
    }

    #[test]
    fn self_transfer_is_a_funded_noop() {
        let ledger = LedgerGateway::new();
        let usdc = Asset::fungible("usdc", 100);
        ledger.deposit("alice", &usdc);

        ledger.transfer(&usdc.with_amount(60), "alice", "alice").unwrap();
        assert_eq!(ledger.balance_of("alice", &usdc), 100);

        let err = ledger
            .transfer(&usdc.with_amount(150), "alice", "alice")
            .unwrap_err();
        assert!(matches!(err, VaultError::InsufficientBalance { .. }));
    }

    #[test]
    fn zero_value_transfer_rejected() {
        let ledger = LedgerGateway::new();
        let err = ledger
            .transfer(&Asset::fungible("usdc", 0), "alice", "bob")
            .unwrap_err();
        assert!(matches!(err, VaultError::ZeroValueTransfer { .. }));
    }

    #[test]
    fn permit_before_deadline_books_allowance() {
        let ledger = LedgerGateway::new();
        let permit = Permit {
            asset_address: "usdc".into(),
            owner: "alice".into(),
            spender: "vault".into(),
            amount: 500,
            deadline: t0() + Duration::hours(1),
            signature: vec![1, 2, 3],
        };
        ledger.apply_permit(&permit, t0()).unwrap();
        assert_eq!(ledger.allowance_of("alice", "vault", "usdc"), 500);
    }

    #[test]
    fn expired_permit_rejected() {
        let ledger = LedgerGateway::new();
        let permit = Permit {
            asset_address: "usdc".into(),
            owner: "alice".into(),
            spender: "vault".into(),
            amount: 500,
            deadline: t0(),
            signature: vec![],
        };
        let err = ledger
            .apply_permit(&permit, t0() + Duration::seconds(1))
            .unwrap_err();
        assert!(matches!(err, VaultError::PermitExpired { .. }));
        assert_eq!(ledger.allowance_of("alice", "vault", "usdc"), 0);
    }

    #[test]
    fn semi_fungible_ids_are_isolated() {
        let ledger = LedgerGateway::new();
        let gold = Asset::semi_fungible("shards", 1, 100);
        let silver = Asset::semi_fungible("shards", 2, 100);
        ledger.deposit("alice", &gold);

        assert_eq!(ledger.balance_of("alice", &gold), 100);
        assert_eq!(ledger.balance_of("alice", &silver), 0);
        assert!(ledger.transfer(&silver, "alice", "bob").is_err());
    }
}
