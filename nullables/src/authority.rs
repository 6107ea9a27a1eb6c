//! Nullable ledger authority: in-memory, scripted, recording.
//!
//! Escrow rules mirror the production authority, including its rejection
//! texts, so wallet code sees the same answers it would over HTTP. Mining is
//! scripted: tests queue the progress reports to hand out and choose what the
//! mining request itself returns.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tessera_types::{Amount, WalletAddress};
use tessera_wallet_core::{
    Agreement, AgreementId, AgreementStatus, AuthorityError, Block, CancellationDetails,
    CreateAgreementRequest, GeneratedWallet, LedgerAuthority, MempoolSnapshot, MinedBlock,
    MiningOutcome, MiningRequest, MiningStatus, PendingTransaction, ProgressReport,
    TransferRequest, TransitionReceipt, Verification, VerificationRequest, CONTRACT_SIGNATURE,
};
use tokio::sync::Notify;

use crate::clock::NullClock;

/// Every operation of [`LedgerAuthority`], for call accounting and failure
/// injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Call {
    CreateAgreement,
    ConfirmSeller,
    ConfirmShipment,
    ConfirmDelivery,
    OpenDispute,
    GetAgreement,
    ListAgreements,
    SubmitMiningJob,
    MiningProgress,
    Mempool,
    Balance,
    Chain,
    SubmitTransaction,
    GenerateWallet,
    VerifyTransaction,
    Difficulty,
    SetDifficulty,
}

/// Highest difficulty the authority accepts.
pub const MAX_DIFFICULTY: u32 = 4;

/// Share of the agreement amount kept as mediator fee (1%).
const MEDIATOR_FEE_DIVISOR: u128 = 100;

struct State {
    agreements: Vec<Agreement>,
    balances: HashMap<WalletAddress, Amount>,
    mempool: Vec<PendingTransaction>,
    block_reward: Amount,
    chain: Vec<Block>,
    difficulty: u32,
    next_id: u64,

    progress: VecDeque<ProgressReport>,
    last_progress: ProgressReport,
    mining_outcome: Result<MiningOutcome, AuthorityError>,
    /// Request of the job the authority is working on, settled when a
    /// scripted `completed` report is handed out.
    running_job: Option<MiningRequest>,
    gates: HashMap<Call, Arc<Notify>>,

    calls: HashMap<Call, usize>,
    transient_failures: HashMap<Call, VecDeque<AuthorityError>>,
    persistent_failures: HashMap<Call, AuthorityError>,
}

/// An in-memory [`LedgerAuthority`] for testing.
/// Thread-safe for use with tokio's multi-threaded runtime.
pub struct NullAuthority {
    state: Mutex<State>,
    clock: NullClock,
}

impl NullAuthority {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                agreements: Vec::new(),
                balances: HashMap::new(),
                mempool: Vec::new(),
                block_reward: Amount::from_units(10),
                chain: Vec::new(),
                difficulty: 2,
                next_id: 1,
                progress: VecDeque::new(),
                last_progress: ProgressReport::with_status(MiningStatus::NotStarted),
                mining_outcome: Ok(MiningOutcome::Accepted),
                running_job: None,
                gates: HashMap::new(),
                calls: HashMap::new(),
                transient_failures: HashMap::new(),
                persistent_failures: HashMap::new(),
            }),
            clock: NullClock::default(),
        }
    }

    // ── Seeding ─────────────────────────────────────────────────────────

    pub fn set_balance(&self, address: &WalletAddress, amount: Amount) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(address.clone(), amount);
    }

    pub fn set_block_reward(&self, reward: Amount) {
        self.state.lock().unwrap().block_reward = reward;
    }

    /// Append a transaction to the mempool.
    pub fn push_pending(&self, tx: PendingTransaction) {
        self.state.lock().unwrap().mempool.push(tx);
    }

    /// Insert an agreement as-is, replacing one with the same id.
    pub fn seed_agreement(&self, agreement: Agreement) {
        let mut state = self.state.lock().unwrap();
        state.agreements.retain(|a| a.id != agreement.id);
        state.agreements.push(agreement);
    }

    pub fn agreement(&self, id: &AgreementId) -> Option<Agreement> {
        self.state
            .lock()
            .unwrap()
            .agreements
            .iter()
            .find(|a| &a.id == id)
            .cloned()
    }

    pub fn pending(&self) -> Vec<PendingTransaction> {
        self.state.lock().unwrap().mempool.clone()
    }

    pub fn chain_height(&self) -> usize {
        self.state.lock().unwrap().chain.len()
    }

    // ── Mining script ───────────────────────────────────────────────────

    /// Queue progress reports, handed out one per poll. Once the queue is
    /// empty the last report is repeated, as the production authority does.
    pub fn script_progress(&self, reports: impl IntoIterator<Item = ProgressReport>) {
        self.state.lock().unwrap().progress.extend(reports);
    }

    /// What the next mining requests return.
    pub fn set_mining_outcome(&self, outcome: Result<MiningOutcome, AuthorityError>) {
        self.state.lock().unwrap().mining_outcome = outcome;
    }

    /// Hold every later `call` until the returned handle is notified, once
    /// per call. Only mining requests and mempool reads can be held.
    pub fn hold(&self, call: Call) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state
            .lock()
            .unwrap()
            .gates
            .insert(call, Arc::clone(&gate));
        gate
    }

    // ── Call accounting and failure injection ───────────────────────────

    pub fn calls(&self, call: Call) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&call)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().sum()
    }

    pub fn reset_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Fail the next `call` only.
    pub fn fail_next(&self, call: Call, error: AuthorityError) {
        self.state
            .lock()
            .unwrap()
            .transient_failures
            .entry(call)
            .or_default()
            .push_back(error);
    }

    /// Fail every `call` until [`Self::heal`].
    pub fn fail_always(&self, call: Call, error: AuthorityError) {
        self.state
            .lock()
            .unwrap()
            .persistent_failures
            .insert(call, error);
    }

    pub fn heal(&self, call: Call) {
        let mut state = self.state.lock().unwrap();
        state.persistent_failures.remove(&call);
        state.transient_failures.remove(&call);
    }

    /// Count the call and return its injected failure, if any.
    fn enter(state: &mut State, call: Call) -> Result<(), AuthorityError> {
        *state.calls.entry(call).or_insert(0) += 1;
        if let Some(error) = state
            .transient_failures
            .get_mut(&call)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        match state.persistent_failures.get(&call) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn next_id(state: &mut State, prefix: &str) -> String {
        let id = format!("{prefix}-{:04}", state.next_id);
        state.next_id += 1;
        id
    }

    // ── Ledger effects ──────────────────────────────────────────────────

    fn credit(state: &mut State, address: &WalletAddress, amount: Amount) {
        let balance = state.balances.entry(address.clone()).or_default();
        *balance = *balance + amount;
    }

    fn debit(state: &mut State, address: &WalletAddress, amount: Amount) -> Result<(), AuthorityError> {
        let balance = state.balances.entry(address.clone()).or_default();
        if *balance < amount {
            return Err(AuthorityError::Rejected(format!(
                "Fondos insuficientes. Se requiere {amount} BBC"
            )));
        }
        *balance = balance.saturating_sub(amount);
        Ok(())
    }

    /// Forge a block from `request`: the selected transactions leave the
    /// mempool and the miner earns the reward plus their fees.
    fn forge(&self, state: &mut State, request: &MiningRequest, nonce: u64, hash: &str) -> u64 {
        let mut selected = Vec::new();
        let mut remaining = Vec::new();
        for (i, tx) in std::mem::take(&mut state.mempool).into_iter().enumerate() {
            if request.selected_indices.contains(&i) {
                selected.push(tx);
            } else {
                remaining.push(tx);
            }
        }
        state.mempool = remaining;

        let fees: Amount = selected.iter().map(|tx| tx.fee).sum();
        let reward = state.block_reward + fees;
        for tx in &selected {
            Self::credit(state, &tx.recipient, tx.amount);
        }
        Self::credit(state, &request.miner_address, reward);

        let index = state.chain.len() as u64;
        let previous_hash = state.chain.last().and_then(|b| b.hash.clone());
        state.chain.push(Block {
            index,
            timestamp: Some(self.clock.now()),
            transactions: selected,
            previous_hash,
            merkle_root: None,
            nonce: Some(nonce),
            hash: Some(hash.to_string()),
        });
        index
    }

    fn find<'a>(state: &'a mut State, id: &AgreementId) -> Result<&'a mut Agreement, AuthorityError> {
        state
            .agreements
            .iter_mut()
            .find(|a| &a.id == id)
            .ok_or_else(|| AuthorityError::Rejected("Acuerdo no encontrado".into()))
    }
}

impl Default for NullAuthority {
    fn default() -> Self {
        Self::new()
    }
}

fn rejected(reason: &str) -> AuthorityError {
    AuthorityError::Rejected(reason.to_string())
}

#[async_trait]
impl LedgerAuthority for NullAuthority {
    async fn create_agreement(
        &self,
        request: &CreateAgreementRequest,
    ) -> Result<AgreementId, AuthorityError> {
        let mut state = self.state.lock().unwrap();
        Self::enter(&mut state, Call::CreateAgreement)?;
        if request.authorization.is_empty() || request.seller.is_empty() {
            return Err(rejected("Missing values"));
        }

        let mediator_fee = Amount::from_raw(request.amount.raw() / MEDIATOR_FEE_DIVISOR);
        Self::debit(&mut state, &request.buyer, request.amount + mediator_fee)?;

        let id = AgreementId::new(Self::next_id(&mut state, "agr"));
        state.agreements.push(Agreement {
            id: id.clone(),
            buyer: request.buyer.clone(),
            seller: request.seller.clone(),
            amount: request.amount,
            description: request.description.clone(),
            status: AgreementStatus::PendingSellerConfirmation,
            tracking_info: None,
            cancellation_details: None,
            mediator_fee: Some(mediator_fee),
            timestamp: Some(self.clock.now()),
            shipping_timestamp: None,
        });
        Ok(id)
    }

    async fn confirm_seller(
        &self,
        agreement_id: &AgreementId,
        seller: &WalletAddress,
    ) -> Result<TransitionReceipt, AuthorityError> {
        let mut state = self.state.lock().unwrap();
        Self::enter(&mut state, Call::ConfirmSeller)?;
        let agreement = Self::find(&mut state, agreement_id)?;
        if &agreement.seller != seller {
            return Err(rejected("Solo el vendedor puede confirmar participación"));
        }
        if agreement.status != AgreementStatus::PendingSellerConfirmation {
            return Err(rejected("Estado inválido para confirmar participación"));
        }
        agreement.status = AgreementStatus::AwaitingShipment;
        Ok(TransitionReceipt {
            message: Some("Seller participation confirmed".into()),
            status: None,
        })
    }

    async fn confirm_shipment(
        &self,
        agreement_id: &AgreementId,
        seller: &WalletAddress,
        tracking_info: &str,
    ) -> Result<TransitionReceipt, AuthorityError> {
        let mut state = self.state.lock().unwrap();
        Self::enter(&mut state, Call::ConfirmShipment)?;
        let now = self.clock.now();
        let agreement = Self::find(&mut state, agreement_id)?;
        if &agreement.seller != seller {
            return Err(rejected("Solo el vendedor puede confirmar envío"));
        }
        if agreement.status != AgreementStatus::AwaitingShipment {
            return Err(rejected("Estado inválido para confirmar envío"));
        }
        agreement.tracking_info = Some(tracking_info.to_string());
        agreement.shipping_timestamp = Some(now);
        agreement.status = AgreementStatus::Shipped;
        Ok(TransitionReceipt {
            message: Some("Shipment confirmed".into()),
            status: Some(AgreementStatus::Shipped),
        })
    }

    async fn confirm_delivery(
        &self,
        agreement_id: &AgreementId,
        buyer: &WalletAddress,
    ) -> Result<TransitionReceipt, AuthorityError> {
        let mut state = self.state.lock().unwrap();
        Self::enter(&mut state, Call::ConfirmDelivery)?;
        let agreement = Self::find(&mut state, agreement_id)?;
        if &agreement.buyer != buyer {
            return Err(rejected("Solo el comprador puede confirmar entrega"));
        }
        if agreement.status != AgreementStatus::Shipped {
            return Err(rejected("Estado inválido para confirmar entrega"));
        }
        agreement.status = AgreementStatus::Delivered;
        let (seller, amount) = (agreement.seller.clone(), agreement.amount);
        Self::credit(&mut state, &seller, amount);
        Ok(TransitionReceipt {
            message: Some("Delivery confirmed and payment transactions added to mempool".into()),
            status: None,
        })
    }

    async fn open_dispute(
        &self,
        agreement_id: &AgreementId,
        buyer: &WalletAddress,
        reason: &str,
    ) -> Result<TransitionReceipt, AuthorityError> {
        let mut state = self.state.lock().unwrap();
        Self::enter(&mut state, Call::OpenDispute)?;
        let now = self.clock.now();
        let agreement = Self::find(&mut state, agreement_id)?;
        if &agreement.buyer != buyer {
            return Err(rejected("Solo el comprador puede abrir disputas"));
        }
        let current = agreement.status;
        if !matches!(
            current,
            AgreementStatus::PendingSellerConfirmation
                | AgreementStatus::AwaitingShipment
                | AgreementStatus::Shipped
        ) {
            return Err(AuthorityError::Rejected(format!(
                "No se puede abrir disputa en estado: {current}"
            )));
        }
        let reason = if reason.trim().is_empty() {
            "No se proporcionó razón".to_string()
        } else {
            reason.to_string()
        };
        agreement.cancellation_details = Some(CancellationDetails {
            cancelled_from_state: current,
            reason,
            cancelled_by: buyer.clone(),
            cancelled_at: now,
        });
        agreement.status = AgreementStatus::Disputed;
        let refund = agreement.amount + agreement.mediator_fee.unwrap_or_default();
        let buyer = agreement.buyer.clone();
        Self::credit(&mut state, &buyer, refund);
        Ok(TransitionReceipt {
            message: Some("Disputa abierta y reembolso iniciado".into()),
            status: None,
        })
    }

    async fn get_agreement(
        &self,
        agreement_id: &AgreementId,
    ) -> Result<Option<Agreement>, AuthorityError> {
        let mut state = self.state.lock().unwrap();
        Self::enter(&mut state, Call::GetAgreement)?;
        Ok(state.agreements.iter().find(|a| &a.id == agreement_id).cloned())
    }

    async fn list_agreements(
        &self,
        address: &WalletAddress,
    ) -> Result<Vec<Agreement>, AuthorityError> {
        let mut state = self.state.lock().unwrap();
        Self::enter(&mut state, Call::ListAgreements)?;
        // Open agreements first, then released, then the rest; newest first
        // within each group.
        let group = |a: &Agreement| match a.status {
            AgreementStatus::Delivered => 1,
            AgreementStatus::Disputed | AgreementStatus::Cancelled => 2,
            _ => 0,
        };
        let mut mine: Vec<Agreement> = state
            .agreements
            .iter()
            .rev()
            .filter(|a| &a.buyer == address || &a.seller == address)
            .cloned()
            .collect();
        mine.sort_by_key(|a| group(a));
        Ok(mine)
    }

    async fn submit_mining_job(
        &self,
        request: &MiningRequest,
    ) -> Result<MiningOutcome, AuthorityError> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            Self::enter(&mut state, Call::SubmitMiningJob)?;
            state.running_job = Some(request.clone());
            state.last_progress = ProgressReport::with_status(MiningStatus::Starting);
            state.gates.get(&Call::SubmitMiningJob).cloned()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        let outcome = state.mining_outcome.clone()?;
        if let MiningOutcome::Mined(block) = &outcome {
            if let Some(job) = state.running_job.take() {
                let index = self.forge(&mut state, &job, block.nonce, &block.hash);
                state.last_progress = ProgressReport::completed(block.nonce, block.hash.clone());
                return Ok(MiningOutcome::Mined(MinedBlock {
                    index: Some(index),
                    ..block.clone()
                }));
            }
        }
        Ok(outcome)
    }

    async fn mining_progress(&self) -> Result<ProgressReport, AuthorityError> {
        let mut state = self.state.lock().unwrap();
        Self::enter(&mut state, Call::MiningProgress)?;
        if let Some(report) = state.progress.pop_front() {
            if report.status == MiningStatus::Completed {
                if let (Some(job), Some(nonce), Some(hash)) = (
                    state.running_job.take(),
                    report.final_nonce.or(report.nonce),
                    report.final_hash.clone().or_else(|| report.hash.clone()),
                ) {
                    self.forge(&mut state, &job, nonce, &hash);
                }
            }
            state.last_progress = report;
        }
        Ok(state.last_progress.clone())
    }

    async fn mempool(&self) -> Result<MempoolSnapshot, AuthorityError> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            Self::enter(&mut state, Call::Mempool)?;
            state.gates.get(&Call::Mempool).cloned()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let state = self.state.lock().unwrap();
        Ok(MempoolSnapshot::new(state.mempool.clone(), state.block_reward))
    }

    async fn balance(&self, address: &WalletAddress) -> Result<Amount, AuthorityError> {
        let mut state = self.state.lock().unwrap();
        Self::enter(&mut state, Call::Balance)?;
        Ok(state.balances.get(address).copied().unwrap_or_default())
    }

    async fn chain(&self) -> Result<Vec<Block>, AuthorityError> {
        let mut state = self.state.lock().unwrap();
        Self::enter(&mut state, Call::Chain)?;
        Ok(state.chain.clone())
    }

    async fn submit_transaction(
        &self,
        request: &TransferRequest,
    ) -> Result<String, AuthorityError> {
        let mut state = self.state.lock().unwrap();
        Self::enter(&mut state, Call::SubmitTransaction)?;
        if request.authorization.is_empty() {
            return Err(rejected("Missing values"));
        }
        let available = state
            .balances
            .get(&request.sender)
            .copied()
            .unwrap_or_default();
        if available < request.amount + request.fee {
            return Err(rejected("Insufficient funds"));
        }
        let timestamp = self.clock.now();
        let signature = Self::next_id(&mut state, "sig");
        state.mempool.push(PendingTransaction {
            sender: request.sender.clone(),
            recipient: request.recipient.clone(),
            amount: request.amount,
            fee: request.fee,
            timestamp: Some(timestamp),
            kind: Some("normal".into()),
            signature: Some(signature),
        });
        Ok("Transaction added to mempool".into())
    }

    async fn generate_wallet(&self) -> Result<GeneratedWallet, AuthorityError> {
        let mut state = self.state.lock().unwrap();
        Self::enter(&mut state, Call::GenerateWallet)?;
        let id = Self::next_id(&mut state, "wallet");
        let wallet = GeneratedWallet {
            address: WalletAddress::new(id.clone()),
            public_key: Some(format!("pub-{id}")),
            private_key: format!("key-{id}"),
        };
        // New wallets start with 10 coins.
        state
            .balances
            .insert(wallet.address.clone(), Amount::from_units(10));
        Ok(wallet)
    }

    async fn verify_transaction(
        &self,
        request: &VerificationRequest,
    ) -> Result<Verification, AuthorityError> {
        let mut state = self.state.lock().unwrap();
        Self::enter(&mut state, Call::VerifyTransaction)?;
        let Some(block) = state.chain.get(request.block_index as usize) else {
            return Ok(Verification::Invalid);
        };
        let claimed = &request.transaction;
        let found = block.transactions.iter().any(|tx| {
            let same = tx.sender == claimed.sender
                && tx.recipient == claimed.recipient
                && tx.amount == claimed.amount
                && tx.fee == claimed.fee;
            if request.is_contract_transfer() {
                same && tx.kind.as_deref() == Some("contract_transfer")
                    && tx.signature.as_deref() == Some(CONTRACT_SIGNATURE)
            } else {
                same && !request.public_key.is_empty()
                    && tx.signature.as_deref() == Some(request.signature.as_str())
            }
        });
        Ok(if found {
            Verification::Valid
        } else {
            Verification::Invalid
        })
    }

    async fn difficulty(&self) -> Result<u32, AuthorityError> {
        let mut state = self.state.lock().unwrap();
        Self::enter(&mut state, Call::Difficulty)?;
        Ok(state.difficulty)
    }

    async fn set_difficulty(&self, difficulty: u32) -> Result<(), AuthorityError> {
        let mut state = self.state.lock().unwrap();
        Self::enter(&mut state, Call::SetDifficulty)?;
        if difficulty > MAX_DIFFICULTY {
            return Err(rejected("Invalid difficulty value"));
        }
        state.difficulty = difficulty;
        Ok(())
    }
}
