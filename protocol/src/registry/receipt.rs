//! Loan receipt registry.
//!
//! Every loan is mirrored by a transferable receipt: the token giving its
//! holder the right to collect the loan's proceeds or seize its
//! collateral. The registry mints ids from an append-only counter, so a
//! loan id and its receipt id are the same number — and ids are never
//! reused, which is what makes "claim twice" fail loudly instead of
//! double-paying.

use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

/// Errors from receipt bookkeeping.
#[derive(Debug, Error)]
pub enum ReceiptError {
    /// No receipt with this id exists (never minted, or already burned).
    #[error("unknown receipt id {0}")]
    UnknownReceipt(u64),

    /// A transfer was attempted by someone other than the holder.
    #[error("receipt {id} is held by {holder}, not {from}")]
    NotHolder {
        id: u64,
        holder: String,
        from: String,
    },
}

/// Mint/burn/ownership capability for loan receipts.
pub trait ReceiptRegistry: Send + Sync {
    /// Mints a fresh receipt to `owner` and returns its id.
    fn mint(&self, owner: &str) -> u64;

    /// Burns a receipt, ending its claim.
    fn burn(&self, id: u64) -> Result<(), ReceiptError>;

    /// Current holder of a receipt, or `None` if it does not exist.
    fn owner_of(&self, id: u64) -> Option<String>;

    /// Moves a receipt between holders.
    fn transfer(&self, id: u64, from: &str, to: &str) -> Result<(), ReceiptError>;
}

#[derive(Debug, Default)]
struct ReceiptInner {
    next_id: u64,
    holders: HashMap<u64, String>,
}

/// In-memory receipt registry with a monotonically increasing id counter.
///
/// Ids start at 1; 0 is never a valid loan id.
#[derive(Debug, Default)]
pub struct InMemoryReceiptRegistry {
    inner: RwLock<ReceiptInner>,
}

impl InMemoryReceiptRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReceiptRegistry for InMemoryReceiptRegistry {
    fn mint(&self, owner: &str) -> u64 {
        let mut inner = self.inner.write();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.holders.insert(id, owner.to_string());
        id
    }

    fn burn(&self, id: u64) -> Result<(), ReceiptError> {
        self.inner
            .write()
            .holders
            .remove(&id)
            .map(|_| ())
            .ok_or(ReceiptError::UnknownReceipt(id))
    }

    fn owner_of(&self, id: u64) -> Option<String> {
        self.inner.read().holders.get(&id).cloned()
    }

    fn transfer(&self, id: u64, from: &str, to: &str) -> Result<(), ReceiptError> {
        let mut inner = self.inner.write();
        let holder = inner
            .holders
            .get(&id)
            .cloned()
            .ok_or(ReceiptError::UnknownReceipt(id))?;
        if holder != from {
            return Err(ReceiptError::NotHolder {
                id,
                holder,
                from: from.to_string(),
            });
        }
        inner.holders.insert(id, to.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential_from_one() {
        let registry = InMemoryReceiptRegistry::new();
        assert_eq!(registry.mint("alice"), 1);
        assert_eq!(registry.mint("bob"), 2);
        assert_eq!(registry.owner_of(1).as_deref(), Some("alice"));
        assert_eq!(registry.owner_of(2).as_deref(), Some("bob"));
    }

    #[test]
    fn burn_ends_the_claim_and_never_reuses_the_id() {
        let registry = InMemoryReceiptRegistry::new();
        let id = registry.mint("alice");
        registry.burn(id).unwrap();

        assert_eq!(registry.owner_of(id), None);
        assert!(matches!(
            registry.burn(id),
            Err(ReceiptError::UnknownReceipt(_))
        ));
        assert_eq!(registry.mint("bob"), id + 1);
    }

    #[test]
    fn transfer_requires_current_holder() {
        let registry = InMemoryReceiptRegistry::new();
        let id = registry.mint("alice");

        let err = registry.transfer(id, "mallory", "eve").unwrap_err();
        assert!(matches!(err, ReceiptError::NotHolder { .. }));

        registry.transfer(id, "alice", "carol").unwrap();
        assert_eq!(registry.owner_of(id).as_deref(), Some("carol"));
    }
}
