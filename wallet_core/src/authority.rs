//! The remote ledger authority as seen by the wallet.
//!
//! The authority owns canonical chain, mempool, balance and agreement state,
//! signs with the keys it is handed and runs proof-of-work. The wallet only
//! proposes changes through [`LedgerAuthority`] and re-reads the results.
//! [`crate::http::HttpAuthority`] is the production implementation; tests use
//! the in-memory authority from `tessera-nullables`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use tessera_types::{Amount, Timestamp, WalletAddress};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::agreement::{Agreement, AgreementId, AgreementStatus};
use crate::mempool::{MempoolSnapshot, PendingTransaction};
use crate::mining::MiningStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorityError {
    /// Refused on business rules. Carries the authority's reason verbatim.
    #[error("{0}")]
    Rejected(String),

    /// The request did not complete (connect, timeout, undecodable body).
    #[error("{0}")]
    Transport(String),
}

/// The secret the authority signs with on the wallet's behalf.
///
/// Never printed; zeroed on drop.
#[derive(Clone)]
pub struct Authorization(Zeroizing<String>);

impl Authorization {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Authorization(<redacted>)")
    }
}

impl Serialize for Authorization {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateAgreementRequest {
    pub buyer: WalletAddress,
    pub seller: WalletAddress,
    pub amount: Amount,
    pub description: String,
    #[serde(rename = "privateKey")]
    pub authorization: Authorization,
}

/// Acknowledgement of an accepted escrow transition.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransitionReceipt {
    #[serde(default)]
    pub message: Option<String>,
    /// Some authorities echo the new status; the wallet re-fetches regardless.
    #[serde(default)]
    pub status: Option<AgreementStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MiningRequest {
    pub miner_address: WalletAddress,
    #[serde(rename = "selected_transactions")]
    pub selected_indices: Vec<usize>,
}

/// Response to a mining submission.
///
/// An authority that mines synchronously answers with the found block; one
/// that mines in the background only acknowledges, and the result arrives
/// through progress polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiningOutcome {
    Accepted,
    Mined(MinedBlock),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MinedBlock {
    #[serde(default)]
    pub index: Option<u64>,
    pub nonce: u64,
    pub hash: String,
}

/// One read of the authority's mining progress.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProgressReport {
    pub status: MiningStatus,
    #[serde(default)]
    pub nonce: Option<u64>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub final_nonce: Option<u64>,
    #[serde(default)]
    pub final_hash: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ProgressReport {
    pub fn with_status(status: MiningStatus) -> Self {
        Self {
            status,
            nonce: None,
            hash: None,
            final_nonce: None,
            final_hash: None,
            error: None,
        }
    }

    pub fn mining(nonce: u64, hash: impl Into<String>) -> Self {
        Self {
            nonce: Some(nonce),
            hash: Some(hash.into()),
            ..Self::with_status(MiningStatus::Mining)
        }
    }

    pub fn completed(final_nonce: u64, final_hash: impl Into<String>) -> Self {
        let final_hash = final_hash.into();
        Self {
            nonce: Some(final_nonce),
            hash: Some(final_hash.clone()),
            final_nonce: Some(final_nonce),
            final_hash: Some(final_hash),
            ..Self::with_status(MiningStatus::Completed)
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::with_status(MiningStatus::Error)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferRequest {
    pub sender: WalletAddress,
    pub recipient: WalletAddress,
    pub amount: Amount,
    pub fee: Amount,
    #[serde(rename = "privateKey")]
    pub authorization: Authorization,
}

/// A block of the authority's chain.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Block {
    pub index: u64,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub transactions: Vec<PendingTransaction>,
    #[serde(default)]
    pub previous_hash: Option<String>,
    #[serde(default)]
    pub merkle_root: Option<String>,
    #[serde(default)]
    pub nonce: Option<u64>,
    #[serde(default)]
    pub hash: Option<String>,
}

/// Key material freshly issued by the authority.
#[derive(Clone, Deserialize)]
pub struct GeneratedWallet {
    pub address: WalletAddress,
    #[serde(default)]
    pub public_key: Option<String>,
    pub private_key: String,
}

impl fmt::Debug for GeneratedWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedWallet")
            .field("address", &self.address)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Counterparty the authority records for escrow deposits and payouts.
pub const ESCROW_CONTRACT: &str = "escrow_contract";

/// Signature the authority stores on transactions it issues itself.
pub const CONTRACT_SIGNATURE: &str = "VALID";

/// Transaction fields to look for in a block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimedTransaction {
    pub sender: WalletAddress,
    pub recipient: WalletAddress,
    pub amount: Amount,
    pub fee: Amount,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Asks whether a transaction was included in a block, signed by the
/// holder of `public_key`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationRequest {
    pub block_index: u64,
    pub transaction: ClaimedTransaction,
    pub signature: String,
    pub public_key: String,
}

impl VerificationRequest {
    pub fn transfer(
        block_index: u64,
        sender: WalletAddress,
        recipient: WalletAddress,
        amount: Amount,
        fee: Amount,
        signature: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            block_index,
            transaction: ClaimedTransaction {
                sender,
                recipient,
                amount,
                fee,
                kind: "normal".into(),
            },
            signature: signature.into(),
            public_key: public_key.into(),
        }
    }

    /// A payout from the escrow contract. It carries no user signature.
    pub fn contract_transfer(
        block_index: u64,
        recipient: WalletAddress,
        amount: Amount,
        fee: Amount,
    ) -> Self {
        Self {
            block_index,
            transaction: ClaimedTransaction {
                sender: WalletAddress::new(ESCROW_CONTRACT),
                recipient,
                amount,
                fee,
                kind: "contract_transfer".into(),
            },
            signature: CONTRACT_SIGNATURE.into(),
            public_key: String::new(),
        }
    }

    pub fn is_contract_transfer(&self) -> bool {
        self.transaction.sender.as_str() == ESCROW_CONTRACT
    }
}

/// The authority's verdict on a [`VerificationRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Valid,
    Invalid,
}

/// Everything the wallet asks of the remote authority.
#[async_trait]
pub trait LedgerAuthority: Send + Sync {
    // ── escrow ──────────────────────────────────────────────────────────

    async fn create_agreement(
        &self,
        request: &CreateAgreementRequest,
    ) -> Result<AgreementId, AuthorityError>;

    async fn confirm_seller(
        &self,
        agreement_id: &AgreementId,
        seller: &WalletAddress,
    ) -> Result<TransitionReceipt, AuthorityError>;

    async fn confirm_shipment(
        &self,
        agreement_id: &AgreementId,
        seller: &WalletAddress,
        tracking_info: &str,
    ) -> Result<TransitionReceipt, AuthorityError>;

    async fn confirm_delivery(
        &self,
        agreement_id: &AgreementId,
        buyer: &WalletAddress,
    ) -> Result<TransitionReceipt, AuthorityError>;

    async fn open_dispute(
        &self,
        agreement_id: &AgreementId,
        buyer: &WalletAddress,
        reason: &str,
    ) -> Result<TransitionReceipt, AuthorityError>;

    /// One agreement by id; `None` when the authority does not know it.
    async fn get_agreement(
        &self,
        agreement_id: &AgreementId,
    ) -> Result<Option<Agreement>, AuthorityError>;

    /// Agreements where `address` is buyer or seller, in the authority's order.
    async fn list_agreements(
        &self,
        address: &WalletAddress,
    ) -> Result<Vec<Agreement>, AuthorityError>;

    // ── mining ──────────────────────────────────────────────────────────

    async fn submit_mining_job(
        &self,
        request: &MiningRequest,
    ) -> Result<MiningOutcome, AuthorityError>;

    async fn mining_progress(&self) -> Result<ProgressReport, AuthorityError>;

    async fn mempool(&self) -> Result<MempoolSnapshot, AuthorityError>;

    // ── ledger ──────────────────────────────────────────────────────────

    async fn balance(&self, address: &WalletAddress) -> Result<Amount, AuthorityError>;

    async fn chain(&self) -> Result<Vec<Block>, AuthorityError>;

    /// Returns the authority's acknowledgement message.
    async fn submit_transaction(&self, request: &TransferRequest)
        -> Result<String, AuthorityError>;

    async fn generate_wallet(&self) -> Result<GeneratedWallet, AuthorityError>;

    async fn verify_transaction(
        &self,
        request: &VerificationRequest,
    ) -> Result<Verification, AuthorityError>;

    async fn difficulty(&self) -> Result<u32, AuthorityError>;

    async fn set_difficulty(&self, difficulty: u32) -> Result<(), AuthorityError>;
}
