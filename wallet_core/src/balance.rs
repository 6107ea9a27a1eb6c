//! Balance and chain views.
//!
//! Both are plain caches of authority state, re-read on a timer and whenever
//! another component reports that funds moved. The chain view also asks the
//! authority whether a transaction is recorded in a given block.

use std::sync::Arc;
use tessera_types::{Amount, WalletAddress};
use tokio::sync::RwLock;

use crate::authority::{Block, LedgerAuthority, Verification, VerificationRequest};
use crate::error::WalletError;

/// Cached balance of one address.
pub struct BalanceView {
    authority: Arc<dyn LedgerAuthority>,
    address: WalletAddress,
    balance: RwLock<Option<Amount>>,
}

impl BalanceView {
    pub fn new(authority: Arc<dyn LedgerAuthority>, address: WalletAddress) -> Self {
        Self {
            authority,
            address,
            balance: RwLock::new(None),
        }
    }

    pub fn address(&self) -> &WalletAddress {
        &self.address
    }

    pub async fn refresh(&self) -> Result<Amount, WalletError> {
        let balance = self.authority.balance(&self.address).await?;
        *self.balance.write().await = Some(balance);
        tracing::debug!(address = %self.address.short(), %balance, "balance refreshed");
        Ok(balance)
    }

    /// Last fetched balance; `None` before the first successful refresh.
    pub async fn current(&self) -> Option<Amount> {
        *self.balance.read().await
    }
}

/// Cached copy of the authority's chain.
pub struct ChainView {
    authority: Arc<dyn LedgerAuthority>,
    blocks: RwLock<Vec<Block>>,
}

impl ChainView {
    pub fn new(authority: Arc<dyn LedgerAuthority>) -> Self {
        Self {
            authority,
            blocks: RwLock::new(Vec::new()),
        }
    }

    /// Re-fetch the chain, returning its height.
    pub async fn refresh(&self) -> Result<usize, WalletError> {
        let blocks = self.authority.chain().await?;
        let height = blocks.len();
        *self.blocks.write().await = blocks;
        tracing::debug!(height, "chain refreshed");
        Ok(height)
    }

    pub async fn height(&self) -> usize {
        self.blocks.read().await.len()
    }

    pub async fn blocks(&self) -> Vec<Block> {
        self.blocks.read().await.clone()
    }

    /// Ask the authority whether the claimed transaction is in block
    /// `request.block_index` with a matching signature.
    pub async fn verify(&self, request: &VerificationRequest) -> Result<Verification, WalletError> {
        let claimed = &request.transaction;
        if claimed.sender.is_empty() || claimed.recipient.is_empty() {
            return Err(WalletError::Validation(
                "sender and recipient are required".into(),
            ));
        }
        if !request.is_contract_transfer()
            && (request.signature.trim().is_empty() || request.public_key.trim().is_empty())
        {
            return Err(WalletError::Validation(
                "a signature and public key are required".into(),
            ));
        }

        let verification = self.authority.verify_transaction(request).await?;
        tracing::info!(
            block = request.block_index,
            sender = %claimed.sender.short(),
            recipient = %claimed.recipient.short(),
            ?verification,
            "transaction verification"
        );
        Ok(verification)
    }
}
