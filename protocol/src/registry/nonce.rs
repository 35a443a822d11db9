//! Nonce revocation registry.
//!
//! Signed proposals and extension offers carry a per-owner nonce. Once an
//! offer is consumed (or explicitly cancelled by its proposer) its nonce is
//! revoked here, and any later attempt to use an artifact with the same
//! (owner, nonce) pair fails. Revocation is one-way.

use parking_lot::RwLock;
use std::collections::HashSet;

/// Replay-protection bookkeeping for signed artifacts.
pub trait NonceRegistry: Send + Sync {
    /// Returns `true` if `owner`'s `nonce` has been revoked.
    fn is_revoked(&self, owner: &str, nonce: u64) -> bool;

    /// Revokes `owner`'s `nonce`. Idempotent.
    fn revoke(&self, owner: &str, nonce: u64);
}

/// In-memory revocation set.
#[derive(Debug, Default)]
pub struct InMemoryNonceRegistry {
    revoked: RwLock<HashSet<(String, u64)>>,
}

impl InMemoryNonceRegistry {
    /// Creates a registry with nothing revoked.
    pub fn new() -> Self {
        Self::default()
    }
}

impl NonceRegistry for InMemoryNonceRegistry {
    fn is_revoked(&self, owner: &str, nonce: u64) -> bool {
        self.revoked.read().contains(&(owner.to_string(), nonce))
    }

    fn revoke(&self, owner: &str, nonce: u64) {
        self.revoked.write().insert((owner.to_string(), nonce));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revocation_is_one_way_and_scoped() {
        let registry = InMemoryNonceRegistry::new();
        assert!(!registry.is_revoked("alice", 1));

        registry.revoke("alice", 1);
        assert!(registry.is_revoked("alice", 1));
        assert!(!registry.is_revoked("alice", 2));
        assert!(!registry.is_revoked("bob", 1));

        // Idempotent.
        registry.revoke("alice", 1);
        assert!(registry.is_revoked("alice", 1));
    }
}
