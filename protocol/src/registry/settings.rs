//! Protocol settings registry.
//!
//! The engines fetch the fee rate, fee collector, metadata URI, and the
//! registered category of every asset they are asked to touch from this
//! capability. An asset whose registered category disagrees with (or is
//! absent from) a proposal's descriptor is rejected — that is the
//! `InvalidAsset` class of failure.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::asset::AssetCategory;

/// Read access to deployment-wide protocol parameters.
pub trait ConfigRegistry: Send + Sync {
    /// Protocol fee in basis points of each freshly supplied credit amount.
    fn fee_bps(&self) -> u16;

    /// Address receiving the protocol fee leg.
    fn fee_collector(&self) -> String;

    /// Metadata URI served for loan receipts of the given engine.
    fn loan_metadata_uri(&self, loan_address: &str) -> String;

    /// Registered category of a token address, if the token is known.
    fn asset_category(&self, address: &str) -> Option<AssetCategory>;
}

#[derive(Debug)]
struct StaticConfigInner {
    fee_bps: u16,
    fee_collector: String,
    metadata_uris: HashMap<String, String>,
    categories: HashMap<String, AssetCategory>,
}

/// In-memory settings registry with explicit setters.
#[derive(Debug)]
pub struct StaticConfig {
    inner: RwLock<StaticConfigInner>,
}

impl StaticConfig {
    /// Creates a registry with the given fee parameters and no known assets.
    pub fn new(fee_bps: u16, fee_collector: &str) -> Self {
        Self {
            inner: RwLock::new(StaticConfigInner {
                fee_bps,
                fee_collector: fee_collector.to_string(),
                metadata_uris: HashMap::new(),
                categories: HashMap::new(),
            }),
        }
    }

    /// Updates the protocol fee rate.
    pub fn set_fee_bps(&self, fee_bps: u16) {
        self.inner.write().fee_bps = fee_bps;
    }

    /// Registers a token address under a category.
    pub fn register_asset(&self, address: &str, category: AssetCategory) {
        self.inner
            .write()
            .categories
            .insert(address.to_string(), category);
    }

    /// Sets the metadata URI served for a loan engine's receipts.
    pub fn set_loan_metadata_uri(&self, loan_address: &str, uri: &str) {
        self.inner
            .write()
            .metadata_uris
            .insert(loan_address.to_string(), uri.to_string());
    }
}

impl ConfigRegistry for StaticConfig {
    fn fee_bps(&self) -> u16 {
        self.inner.read().fee_bps
    }

    fn fee_collector(&self) -> String {
        self.inner.read().fee_collector.clone()
    }

    fn loan_metadata_uri(&self, loan_address: &str) -> String {
        self.inner
            .read()
            .metadata_uris
            .get(loan_address)
            .cloned()
            .unwrap_or_default()
    }

    fn asset_category(&self, address: &str) -> Option<AssetCategory> {
        self.inner.read().categories.get(address).copied()
    }
}
