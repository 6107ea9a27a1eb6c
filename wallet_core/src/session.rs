//! One open wallet: an identity plus every view and client acting for it.
//!
//! A session is built once per identity. [`WalletSession::start`] spawns its
//! refresh loops; they end on [`WalletSession::logout`] or when the session
//! is dropped.

use std::sync::Arc;
use std::time::Duration;
use tessera_types::{Amount, WalletAddress};

use crate::agreement_store::AgreementStore;
use crate::authority::{LedgerAuthority, TransferRequest};
use crate::balance::{BalanceView, ChainView};
use crate::config::ClientConfig;
use crate::error::WalletError;
use crate::escrow::EscrowClient;
use crate::identity::Identity;
use crate::mempool::MempoolView;
use crate::mining::MiningOrchestrator;
use crate::scheduler::{PeriodicTask, Tick};

/// Refresh periods of the session loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPeriods {
    pub balance: Duration,
    pub mempool: Duration,
}

impl Default for RefreshPeriods {
    fn default() -> Self {
        Self {
            balance: Duration::from_secs(10),
            mempool: Duration::from_secs(5),
        }
    }
}

impl From<&ClientConfig> for RefreshPeriods {
    fn from(config: &ClientConfig) -> Self {
        Self {
            balance: config.balance_refresh(),
            mempool: config.mempool_refresh(),
        }
    }
}

pub struct WalletSession {
    identity: Identity,
    authority: Arc<dyn LedgerAuthority>,
    balance: Arc<BalanceView>,
    chain: Arc<ChainView>,
    mempool: Arc<MempoolView>,
    agreements: Arc<AgreementStore>,
    escrow: EscrowClient,
    mining: MiningOrchestrator,
    periods: RefreshPeriods,
    tasks: Vec<PeriodicTask>,
}

impl WalletSession {
    pub fn new(
        authority: Arc<dyn LedgerAuthority>,
        identity: Identity,
        config: &ClientConfig,
    ) -> Self {
        let address = identity.address().clone();
        let balance = Arc::new(BalanceView::new(Arc::clone(&authority), address.clone()));
        let chain = Arc::new(ChainView::new(Arc::clone(&authority)));
        let mempool = Arc::new(MempoolView::new(Arc::clone(&authority)));
        let agreements = Arc::new(AgreementStore::new(Arc::clone(&authority), address));
        let escrow = EscrowClient::new(
            Arc::clone(&authority),
            Arc::clone(&agreements),
            Arc::clone(&balance),
        );
        let mining = MiningOrchestrator::new(
            Arc::clone(&authority),
            Arc::clone(&mempool),
            Arc::clone(&balance),
            config.mining(),
        );
        Self {
            identity,
            authority,
            balance,
            chain,
            mempool,
            agreements,
            escrow,
            mining,
            periods: RefreshPeriods::from(config),
            tasks: Vec::new(),
        }
    }

    /// Spawn the refresh loops. Both tick immediately, then on their period.
    /// Calling again while running does nothing.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }

        let balance = Arc::clone(&self.balance);
        let chain = Arc::clone(&self.chain);
        let agreements = Arc::clone(&self.agreements);
        self.tasks.push(PeriodicTask::spawn(
            "balance-refresh",
            self.periods.balance,
            move || {
                let balance = Arc::clone(&balance);
                let chain = Arc::clone(&chain);
                let agreements = Arc::clone(&agreements);
                async move {
                    if let Err(e) = balance.refresh().await {
                        tracing::warn!(error = %e, "balance refresh failed");
                    }
                    if let Err(e) = chain.refresh().await {
                        tracing::warn!(error = %e, "chain refresh failed");
                    }
                    if let Err(e) = agreements.refresh().await {
                        tracing::warn!(error = %e, "agreement refresh failed");
                    }
                    Tick::Continue
                }
            },
        ));

        let mempool = Arc::clone(&self.mempool);
        self.tasks.push(PeriodicTask::spawn(
            "mempool-refresh",
            self.periods.mempool,
            move || {
                let mempool = Arc::clone(&mempool);
                async move {
                    if let Err(e) = mempool.refresh().await {
                        tracing::warn!(error = %e, "mempool refresh failed");
                    }
                    Tick::Continue
                }
            },
        ));

        tracing::info!(address = %self.identity.address().short(), "wallet session started");
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|t| !t.is_finished())
    }

    /// Stop the refresh loops and wait for them to exit.
    pub async fn logout(mut self) {
        for task in self.tasks.drain(..) {
            task.shutdown().await;
        }
        tracing::info!(address = %self.identity.address().short(), "wallet session closed");
    }

    /// Re-read everything once, outside the loops.
    pub async fn refresh_all(&self) -> Result<(), WalletError> {
        self.balance.refresh().await?;
        self.chain.refresh().await?;
        self.mempool.refresh().await?;
        self.agreements.refresh().await?;
        Ok(())
    }

    /// Queue a plain transfer from this wallet.
    pub async fn send(
        &self,
        recipient: &WalletAddress,
        amount: Amount,
        fee: Amount,
    ) -> Result<String, WalletError> {
        if recipient.is_empty() {
            return Err(WalletError::Validation("recipient address is required".into()));
        }
        if amount.is_zero() {
            return Err(WalletError::Validation("amount must be positive".into()));
        }
        let authorization = self.identity.authorization().ok_or_else(|| {
            WalletError::Validation("sending requires the wallet's private key".into())
        })?;

        let request = TransferRequest {
            sender: self.identity.address().clone(),
            recipient: recipient.clone(),
            amount,
            fee,
            authorization: authorization.clone(),
        };
        let message = self.authority.submit_transaction(&request).await?;
        tracing::info!(recipient = %recipient.short(), %amount, %fee, "transaction submitted");

        if let Err(e) = self.mempool.refresh().await {
            tracing::warn!(error = %e, "mempool refresh after transfer failed");
        }
        Ok(message)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn address(&self) -> &WalletAddress {
        self.identity.address()
    }

    pub fn authority(&self) -> &Arc<dyn LedgerAuthority> {
        &self.authority
    }

    pub fn balance(&self) -> &Arc<BalanceView> {
        &self.balance
    }

    pub fn chain(&self) -> &Arc<ChainView> {
        &self.chain
    }

    pub fn mempool(&self) -> &Arc<MempoolView> {
        &self.mempool
    }

    pub fn agreements(&self) -> &Arc<AgreementStore> {
        &self.agreements
    }

    pub fn escrow(&self) -> &EscrowClient {
        &self.escrow
    }

    pub fn mining(&self) -> &MiningOrchestrator {
        &self.mining
    }
}
