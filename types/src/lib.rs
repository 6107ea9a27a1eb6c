//! Fundamental types for the Tessera wallet client.
//!
//! This crate defines the value types shared across the workspace:
//! ledger addresses, fixed-point amounts and timestamps.

pub mod address;
pub mod amount;
pub mod error;
pub mod time;

pub use address::WalletAddress;
pub use amount::Amount;
pub use error::AmountError;
pub use time::Timestamp;
