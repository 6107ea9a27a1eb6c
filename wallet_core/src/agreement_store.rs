//! Local cache of the agreements one wallet takes part in.
//!
//! The store is never edited in place. Every change comes from the
//! authority: a full re-fetch replaces the list, and an agreement missing
//! from it can be looked up on its own and added.

use std::sync::Arc;
use tessera_types::WalletAddress;
use tokio::sync::RwLock;

use crate::agreement::{available_actions, Agreement, AgreementId, EscrowAction};
use crate::authority::LedgerAuthority;
use crate::error::WalletError;

pub struct AgreementStore {
    authority: Arc<dyn LedgerAuthority>,
    address: WalletAddress,
    agreements: RwLock<Vec<Agreement>>,
}

impl AgreementStore {
    pub fn new(authority: Arc<dyn LedgerAuthority>, address: WalletAddress) -> Self {
        Self {
            authority,
            address,
            agreements: RwLock::new(Vec::new()),
        }
    }

    pub fn address(&self) -> &WalletAddress {
        &self.address
    }

    /// Replace the cache with the authority's current list. On failure the
    /// previous contents stay untouched.
    pub async fn refresh(&self) -> Result<usize, WalletError> {
        let agreements = self.authority.list_agreements(&self.address).await?;
        let count = agreements.len();
        *self.agreements.write().await = agreements;
        tracing::debug!(address = %self.address.short(), count, "agreements refreshed");
        Ok(count)
    }

    pub async fn get(&self, id: &AgreementId) -> Option<Agreement> {
        self.agreements
            .read()
            .await
            .iter()
            .find(|a| &a.id == id)
            .cloned()
    }

    /// All cached agreements in the authority's order.
    pub async fn all(&self) -> Vec<Agreement> {
        self.agreements.read().await.clone()
    }

    /// Cached agreement, or the authority's copy when the cache has none.
    /// Agreements this wallet takes no part in are not kept.
    pub async fn lookup(&self, id: &AgreementId) -> Result<Option<Agreement>, WalletError> {
        if let Some(agreement) = self.get(id).await {
            return Ok(Some(agreement));
        }
        let Some(agreement) = self.authority.get_agreement(id).await? else {
            return Ok(None);
        };
        if agreement.roles_of(&self.address).is_empty() {
            return Ok(None);
        }

        let mut agreements = self.agreements.write().await;
        if !agreements.iter().any(|a| &a.id == id) {
            agreements.push(agreement.clone());
        }
        tracing::debug!(id = %id, status = %agreement.status, "agreement fetched on cache miss");
        Ok(Some(agreement))
    }

    /// Agreements where this wallet has at least one action to take.
    pub async fn actionable(&self) -> Vec<(Agreement, Vec<EscrowAction>)> {
        self.agreements
            .read()
            .await
            .iter()
            .filter_map(|a| {
                let actions = available_actions(a, &self.address);
                (!actions.is_empty()).then(|| (a.clone(), actions))
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.agreements.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agreements.read().await.is_empty()
    }
}
