//! Mempool snapshot cache and the user's pending selection.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tessera_types::{Amount, Timestamp, WalletAddress};
use tokio::sync::RwLock;

use crate::authority::LedgerAuthority;
use crate::error::WalletError;
use crate::selection::{Toggle, TransactionSelection};

/// A ledger transaction as reported by the authority.
///
/// Mempool entries are pending ones; mined blocks carry the same shape
/// (coinbase entries have no fee).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub sender: WalletAddress,
    pub recipient: WalletAddress,
    pub amount: Amount,
    #[serde(default)]
    pub fee: Amount,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

/// Point-in-time read of the authority's mempool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MempoolSnapshot {
    #[serde(rename = "pending_transactions")]
    pub transactions: Vec<PendingTransaction>,
    #[serde(rename = "current_block_reward")]
    pub block_reward: Amount,
}

impl MempoolSnapshot {
    pub fn new(transactions: Vec<PendingTransaction>, block_reward: Amount) -> Self {
        Self {
            transactions,
            block_reward,
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Identifies the ordered transaction list. Two snapshots with the same
    /// fingerprint address the same transaction at every index.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.transactions.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Default)]
struct MempoolState {
    snapshot: Option<MempoolSnapshot>,
    selection: TransactionSelection,
}

/// Cached mempool plus the selection drawn from it.
///
/// The selection is local state only; it reaches the authority solely as
/// the index list of a mining submission.
pub struct MempoolView {
    authority: Arc<dyn LedgerAuthority>,
    state: RwLock<MempoolState>,
}

impl MempoolView {
    pub fn new(authority: Arc<dyn LedgerAuthority>) -> Self {
        Self {
            authority,
            state: RwLock::new(MempoolState::default()),
        }
    }

    /// Re-fetch the snapshot.
    ///
    /// If the transaction list changed, the selection no longer addresses
    /// what the user picked and is cleared.
    pub async fn refresh(&self) -> Result<MempoolSnapshot, WalletError> {
        let snapshot = self.authority.mempool().await?;

        let mut state = self.state.write().await;
        let changed = state
            .snapshot
            .as_ref()
            .map(|old| old.fingerprint() != snapshot.fingerprint())
            .unwrap_or(true);
        if changed && !state.selection.is_empty() {
            tracing::debug!(
                dropped = ?state.selection.indices(),
                "mempool changed; clearing stale selection"
            );
            state.selection.clear();
        }
        tracing::debug!(
            pending = snapshot.len(),
            block_reward = %snapshot.block_reward,
            "mempool refreshed"
        );
        state.snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub async fn snapshot(&self) -> Option<MempoolSnapshot> {
        self.state.read().await.snapshot.clone()
    }

    /// Toggle `index` of the current snapshot. Indices outside the snapshot
    /// are ignored.
    pub async fn toggle(&self, index: usize) -> Toggle {
        let mut state = self.state.write().await;
        let len = state.snapshot.as_ref().map(|s| s.len()).unwrap_or(0);
        if index >= len {
            return Toggle::Ignored;
        }
        state.selection.toggle(index)
    }

    pub async fn selected(&self) -> Vec<usize> {
        self.state.read().await.selection.indices().to_vec()
    }

    pub async fn clear_selection(&self) {
        self.state.write().await.selection.clear();
    }

    /// Reward for mining the current selection; zero before the first refresh.
    pub async fn total_reward(&self) -> Amount {
        let state = self.state.read().await;
        match &state.snapshot {
            Some(snapshot) => state
                .selection
                .total_reward(snapshot.block_reward, &snapshot.transactions),
            None => Amount::ZERO,
        }
    }
}
