//! Ledger address type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An address on the ledger.
///
/// The authority derives addresses from public keys and treats them as opaque
/// strings, so the client does too. Leading and trailing whitespace is never
/// part of an address, including addresses decoded from authority payloads.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn new(raw: impl Into<String>) -> Self {
        let s: String = raw.into();
        Self(s.trim().to_string())
    }

    /// Return the raw address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Shortened form for log lines and tables: `abcdef...wxyz`.
    pub fn short(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 10 {
            return self.0.clone();
        }
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WalletAddress {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for WalletAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_is_trimmed() {
        let addr = WalletAddress::new("  abc123\n");
        assert_eq!(addr.as_str(), "abc123");
    }

    #[test]
    fn blank_address_is_empty() {
        assert!(WalletAddress::new("   ").is_empty());
    }

    #[test]
    fn short_form_keeps_head_and_tail() {
        let addr = WalletAddress::new("30819f300d06092a864886f70d010101");
        assert_eq!(addr.short(), "30819f...0101");
        assert_eq!(WalletAddress::new("miner").short(), "miner");
    }

    #[test]
    fn serializes_as_plain_string() {
        let addr = WalletAddress::new("seller-1");
        assert_eq!(serde_json::to_string(&addr).unwrap(), "\"seller-1\"");
    }

    #[test]
    fn decoding_trims_whitespace() {
        let addr: WalletAddress = serde_json::from_str("\"  seller-1\\n\"").unwrap();
        assert_eq!(addr, WalletAddress::new("seller-1"));
        assert_eq!(addr.as_str(), "seller-1");
    }
}
