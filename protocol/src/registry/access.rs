//! Capability-tag registry.
//!
//! Privileged entry points are gated on tags rather than hardcoded
//! addresses: a proposal validator must hold [`TAG_LOAN_PROPOSAL`] before
//! an engine will accept proposals from it, and an engine's vault must
//! hold [`TAG_ACTIVE_LOAN`] before it may take custody at all. Which
//! addresses hold which tags is a deployment concern, not a core concern.
//!
//! [`TAG_LOAN_PROPOSAL`]: crate::config::TAG_LOAN_PROPOSAL
//! [`TAG_ACTIVE_LOAN`]: crate::config::TAG_ACTIVE_LOAN

use parking_lot::RwLock;
use std::collections::HashSet;

/// Answers "does this address hold this capability tag".
pub trait AccessControlRegistry: Send + Sync {
    /// Returns `true` if `address` currently holds `tag`.
    fn has_tag(&self, address: &str, tag: &str) -> bool;
}

/// In-memory tag registry for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryAccessControl {
    tags: RwLock<HashSet<(String, String)>>,
}

impl InMemoryAccessControl {
    /// Creates an empty registry; nobody holds anything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `tag` to `address`.
    pub fn grant(&self, address: &str, tag: &str) {
        self.tags
            .write()
            .insert((address.to_string(), tag.to_string()));
    }

    /// Revokes `tag` from `address`. No-op if it was never granted.
    pub fn revoke(&self, address: &str, tag: &str) {
        self.tags
            .write()
            .remove(&(address.to_string(), tag.to_string()));
    }
}

impl AccessControlRegistry for InMemoryAccessControl {
    fn has_tag(&self, address: &str, tag: &str) -> bool {
        self.tags
            .read()
            .contains(&(address.to_string(), tag.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TAG_LOAN_PROPOSAL;

    #[test]
    fn grant_and_revoke() {
        let registry = InMemoryAccessControl::new();
        assert!(!registry.has_tag("validator", TAG_LOAN_PROPOSAL));

        registry.grant("validator", TAG_LOAN_PROPOSAL);
        assert!(registry.has_tag("validator", TAG_LOAN_PROPOSAL));

        registry.revoke("validator", TAG_LOAN_PROPOSAL);
        assert!(!registry.has_tag("validator", TAG_LOAN_PROPOSAL));
    }

    #[test]
    fn tags_are_scoped_per_address() {
        let registry = InMemoryAccessControl::new();
        registry.grant("a", "X");
        assert!(!registry.has_tag("b", "X"));
        assert!(!registry.has_tag("a", "Y"));
    }
}
