//! # External Registries
//!
//! The loan engines consume four registry capabilities, injected at
//! construction as trait objects. The core never learns concrete types —
//! only the contracted call signatures:
//!
//! ```text
//! access.rs    — capability-tag registry gating privileged entry points
//! settings.rs  — protocol fee, fee collector, metadata URI, asset categories
//! receipt.rs   — transferable loan receipts: mint, burn, owner queries
//! nonce.rs     — replay-revocation bookkeeping for signed offers
//! ```
//!
//! Each file pairs the trait with an in-memory reference implementation
//! (interior `parking_lot` locks, `&self` methods) so tests and embedders
//! can share one instance between an engine and their own assertions.

pub mod access;
pub mod nonce;
pub mod receipt;
pub mod settings;

pub use access::{AccessControlRegistry, InMemoryAccessControl};
pub use nonce::{InMemoryNonceRegistry, NonceRegistry};
pub use receipt::{InMemoryReceiptRegistry, ReceiptError, ReceiptRegistry};
pub use settings::{ConfigRegistry, StaticConfig};
