//! # Asset Descriptors
//!
//! Every piece of value the protocol touches — credit, collateral, fees —
//! is described by an [`Asset`]: a category, a token address, and an id /
//! amount pair. The descriptor is deliberately dumb: it names value, it
//! does not hold it. Custody lives in the vault gateway.
//!
//! Three categories are supported, mirroring the three transfer shapes the
//! asset gateway understands: fungible (amount only), non-fungible (unique
//! id), and semi-fungible (id + amount).

use serde::{Deserialize, Serialize};
use std::fmt;

/// The transfer shape of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetCategory {
    /// Divisible token identified by address alone; moved by amount.
    Fungible,
    /// Unique token identified by (address, id); moved whole.
    NonFungible,
    /// Id-scoped divisible token; moved by (id, amount).
    SemiFungible,
}

impl fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetCategory::Fungible => write!(f, "Fungible"),
            AssetCategory::NonFungible => write!(f, "NonFungible"),
            AssetCategory::SemiFungible => write!(f, "SemiFungible"),
        }
    }
}

/// A full description of an asset position: what it is and how much of it.
///
/// For [`AssetCategory::Fungible`] the `id` is always 0. For
/// [`AssetCategory::NonFungible`] the `amount` is always 0 — the unit is
/// implied by uniqueness, and a nonzero amount on an NFT descriptor is a
/// malformed proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Transfer shape.
    pub category: AssetCategory,
    /// Token contract address.
    pub address: String,
    /// Token id within the contract. 0 for fungible assets.
    pub id: u64,
    /// Amount in smallest units. 0 for non-fungible assets.
    pub amount: u64,
}

impl Asset {
    /// Builds a fungible asset descriptor.
    pub fn fungible(address: &str, amount: u64) -> Self {
        Self {
            category: AssetCategory::Fungible,
            address: address.to_string(),
            id: 0,
            amount,
        }
    }

    /// Builds a non-fungible asset descriptor.
    pub fn non_fungible(address: &str, id: u64) -> Self {
        Self {
            category: AssetCategory::NonFungible,
            address: address.to_string(),
            id,
            amount: 0,
        }
    }

    /// Builds a semi-fungible asset descriptor.
    pub fn semi_fungible(address: &str, id: u64, amount: u64) -> Self {
        Self {
            category: AssetCategory::SemiFungible,
            address: address.to_string(),
            id,
            amount,
        }
    }

    /// The canonical ledger key this asset is booked under.
    ///
    /// Fungible assets are keyed by address alone; id-scoped assets get an
    /// `address#id` key so distinct ids never share a balance bucket.
    pub fn ledger_key(&self) -> String {
        match self.category {
            AssetCategory::Fungible => self.address.clone(),
            AssetCategory::NonFungible | AssetCategory::SemiFungible => {
                format!("{}#{}", self.address, self.id)
            }
        }
    }

    /// The number of ledger units a transfer of this asset moves.
    ///
    /// An NFT moves as a single unit regardless of its `amount` field.
    pub fn transfer_units(&self) -> u64 {
        match self.category {
            AssetCategory::NonFungible => 1,
            AssetCategory::Fungible | AssetCategory::SemiFungible => self.amount,
        }
    }

    /// Returns a copy of this asset with a different amount.
    ///
    /// Used when splitting a credit position into fee and net legs.
    pub fn with_amount(&self, amount: u64) -> Self {
        Self {
            amount,
            ..self.clone()
        }
    }

    /// Structural equality across every field.
    ///
    /// Refinancing requires the new collateral descriptor to match the old
    /// one exactly; the first differing field is reported so the caller
    /// knows what to fix.
    pub fn mismatch_against(&self, other: &Asset) -> Option<&'static str> {
        if self.category != other.category {
            return Some("category");
        }
        if self.address != other.address {
            return Some("address");
        }
        if self.id != other.id {
            return Some("id");
        }
        if self.amount != other.amount {
            return Some("amount");
        }
        None
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.category {
            AssetCategory::Fungible => write!(f, "{} x{}", self.address, self.amount),
            AssetCategory::NonFungible => write!(f, "{}#{}", self.address, self.id),
            AssetCategory::SemiFungible => {
                write!(f, "{}#{} x{}", self.address, self.id, self.amount)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fungible_ledger_key_is_address() {
        let asset = Asset::fungible("usdc", 1_000);
        assert_eq!(asset.ledger_key(), "usdc");
        assert_eq!(asset.transfer_units(), 1_000);
    }

    #[test]
    fn nft_ledger_key_includes_id() {
        let asset = Asset::non_fungible("deeds", 42);
        assert_eq!(asset.ledger_key(), "deeds#42");
        assert_eq!(asset.transfer_units(), 1);
        assert_eq!(asset.amount, 0);
    }

    #[test]
    fn semi_fungible_moves_by_amount() {
        let asset = Asset::semi_fungible("shards", 7, 250);
        assert_eq!(asset.ledger_key(), "shards#7");
        assert_eq!(asset.transfer_units(), 250);
    }

    #[test]
    fn distinct_nft_ids_do_not_share_keys() {
        let a = Asset::non_fungible("deeds", 1);
        let b = Asset::non_fungible("deeds", 2);
        assert_ne!(a.ledger_key(), b.ledger_key());
    }

    #[test]
    fn mismatch_reports_first_differing_field() {
        let base = Asset::semi_fungible("shards", 7, 250);
        assert_eq!(base.mismatch_against(&base.clone()), None);

        let wrong_addr = Asset::semi_fungible("other", 7, 250);
        assert_eq!(base.mismatch_against(&wrong_addr), Some("address"));

        let wrong_id = Asset::semi_fungible("shards", 8, 250);
        assert_eq!(base.mismatch_against(&wrong_id), Some("id"));

        let wrong_amount = Asset::semi_fungible("shards", 7, 300);
        assert_eq!(base.mismatch_against(&wrong_amount), Some("amount"));

        let wrong_category = Asset::fungible("shards", 250);
        assert_eq!(base.mismatch_against(&wrong_category), Some("category"));
    }

    #[test]
    fn with_amount_keeps_identity() {
        let asset = Asset::fungible("usdc", 1_000);
        let fee_leg = asset.with_amount(30);
        assert_eq!(fee_leg.address, "usdc");
        assert_eq!(fee_leg.amount, 30);
        assert_eq!(fee_leg.ledger_key(), asset.ledger_key());
    }

    #[test]
    fn serialization_roundtrip() {
        let asset = Asset::semi_fungible("shards", 7, 250);
        let json = serde_json::to_string(&asset).expect("serialize");
        let back: Asset = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(asset, back);
    }
}
