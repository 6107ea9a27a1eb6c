//! Wallet core library for Tessera.
//!
//! A thin, observable client of a remote ledger authority. The authority
//! owns the chain, mempool, balances and escrow agreements; the wallet
//! proposes changes and re-reads the results:
//! - Escrow protocol client with role/state gated transitions
//! - Transaction selection (at most three per block) and reward preview
//! - Mining orchestration with monotonic progress reconciliation
//! - Balance, chain and mempool views refreshed on fixed periods
//! - Encrypted local wallet records

pub mod agreement;
pub mod agreement_store;
pub mod authority;
pub mod balance;
pub mod config;
pub mod error;
pub mod escrow;
pub mod http;
pub mod identity;
pub mod keystore;
pub mod mempool;
pub mod mining;
pub mod scheduler;
pub mod selection;
pub mod session;
pub mod wallet_store;

pub use agreement::{
    allowed_actions, available_actions, is_offered, Agreement, AgreementId, AgreementStatus,
    CancellationDetails, EscrowAction, Role,
};
pub use agreement_store::AgreementStore;
pub use authority::{
    Authorization, AuthorityError, Block, ClaimedTransaction, CreateAgreementRequest,
    GeneratedWallet, LedgerAuthority, MinedBlock, MiningOutcome, MiningRequest, ProgressReport,
    TransferRequest, TransitionReceipt, Verification, VerificationRequest, CONTRACT_SIGNATURE,
    ESCROW_CONTRACT,
};
pub use balance::{BalanceView, ChainView};
pub use config::ClientConfig;
pub use error::{ErrorKind, WalletError};
pub use escrow::EscrowClient;
pub use http::HttpAuthority;
pub use identity::Identity;
pub use keystore::{decrypt_secret, encrypt_secret, encrypt_secret_with, KdfParams, Keystore};
pub use mempool::{MempoolSnapshot, MempoolView, PendingTransaction};
pub use mining::{
    FailureOrigin, JobError, MiningConfig, MiningJob, MiningOrchestrator, MiningStatus,
};
pub use scheduler::{PeriodicTask, Tick};
pub use selection::{Toggle, TransactionSelection, MAX_SELECTED};
pub use session::{RefreshPeriods, WalletSession};
pub use wallet_store::{FileWalletStore, WalletRecord, WalletStore};
