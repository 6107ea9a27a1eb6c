use std::fmt;
use tessera_types::WalletAddress;

use crate::authority::Authorization;

/// The wallet acting on the authority: an address and, for operations that
/// spend from it, the secret the authority signs with.
#[derive(Clone)]
pub struct Identity {
    address: WalletAddress,
    authorization: Option<Authorization>,
}

impl Identity {
    /// An identity that can only read and take unsigned escrow steps.
    pub fn watch_only(address: WalletAddress) -> Self {
        Self {
            address,
            authorization: None,
        }
    }

    pub fn with_authorization(address: WalletAddress, authorization: Authorization) -> Self {
        Self {
            address,
            authorization: Some(authorization),
        }
    }

    pub fn address(&self) -> &WalletAddress {
        &self.address
    }

    pub fn authorization(&self) -> Option<&Authorization> {
        self.authorization.as_ref().filter(|a| !a.is_empty())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .field("can_sign", &self.authorization().is_some())
            .finish()
    }
}
