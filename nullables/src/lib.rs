//! Nullable infrastructure for deterministic testing.
//!
//! Inspired by the "A-frame architecture" pattern from RsNano.
//! The ledger authority is abstracted behind `LedgerAuthority`; this crate
//! provides a test-friendly implementation that:
//! - Keeps all ledger and escrow state in memory
//! - Replays scripted mining progress and outcomes
//! - Records every call so tests can assert on traffic
//! - Never touches the filesystem or network
//!
//! Usage: hand an `Arc<NullAuthority>` to the wallet in place of the HTTP client.

pub mod authority;
pub mod clock;

pub use authority::{Call, NullAuthority};
pub use clock::NullClock;
