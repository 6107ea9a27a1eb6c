//! Escrow protocol client.
//!
//! Each transition is a single request to the authority. Before sending,
//! the client checks the guard table against its cached copy of the
//! agreement, fetching that one agreement when the cache misses it, and
//! refuses locally when the step is not offered. After the
//! authority accepts, the agreement list is re-fetched in full, and the
//! balance as well when the step moved funds. Nothing is changed locally
//! ahead of the authority.

use std::sync::Arc;
use tessera_types::{Amount, WalletAddress};

use crate::agreement::{is_offered, Agreement, AgreementId, EscrowAction};
use crate::agreement_store::AgreementStore;
use crate::authority::{
    AuthorityError, CreateAgreementRequest, LedgerAuthority, TransitionReceipt,
};
use crate::balance::BalanceView;
use crate::error::WalletError;
use crate::identity::Identity;

pub struct EscrowClient {
    authority: Arc<dyn LedgerAuthority>,
    store: Arc<AgreementStore>,
    balance: Arc<BalanceView>,
}

impl EscrowClient {
    pub fn new(
        authority: Arc<dyn LedgerAuthority>,
        store: Arc<AgreementStore>,
        balance: Arc<BalanceView>,
    ) -> Self {
        Self {
            authority,
            store,
            balance,
        }
    }

    pub fn store(&self) -> &Arc<AgreementStore> {
        &self.store
    }

    /// Open an agreement with `identity` as buyer.
    pub async fn create(
        &self,
        identity: &Identity,
        seller: &WalletAddress,
        amount: Amount,
        description: &str,
    ) -> Result<AgreementId, WalletError> {
        if amount.is_zero() {
            return Err(WalletError::Validation("amount must be positive".into()));
        }
        if seller.is_empty() {
            return Err(WalletError::Validation("seller address is required".into()));
        }
        let description = description.trim();
        if description.is_empty() {
            return Err(WalletError::Validation("description is required".into()));
        }
        self.check_identity(identity)?;
        let authorization = identity.authorization().ok_or_else(|| {
            WalletError::Validation("creating an agreement requires the buyer's private key".into())
        })?;

        let request = CreateAgreementRequest {
            buyer: identity.address().clone(),
            seller: seller.clone(),
            amount,
            description: description.to_string(),
            authorization: authorization.clone(),
        };
        let id = self.authority.create_agreement(&request).await.map_err(|e| {
            tracing::warn!(error = %e, "agreement creation rejected");
            WalletError::from(e)
        })?;
        tracing::info!(agreement = %id, seller = %seller.short(), %amount, "agreement created");

        self.after_accepted(EscrowAction::Create).await;
        Ok(id)
    }

    /// Seller accepts the agreement.
    pub async fn confirm_seller(
        &self,
        identity: &Identity,
        id: &AgreementId,
    ) -> Result<TransitionReceipt, WalletError> {
        self.guard(identity, id, EscrowAction::ConfirmSeller).await?;
        let result = self.authority.confirm_seller(id, identity.address()).await;
        self.finish(id, EscrowAction::ConfirmSeller, result).await
    }

    /// Seller reports the goods as shipped.
    pub async fn confirm_shipment(
        &self,
        identity: &Identity,
        id: &AgreementId,
        tracking_info: &str,
    ) -> Result<TransitionReceipt, WalletError> {
        let tracking_info = tracking_info.trim();
        if tracking_info.is_empty() {
            return Err(WalletError::Validation("tracking information is required".into()));
        }
        self.guard(identity, id, EscrowAction::ConfirmShipment).await?;
        let result = self
            .authority
            .confirm_shipment(id, identity.address(), tracking_info)
            .await;
        self.finish(id, EscrowAction::ConfirmShipment, result).await
    }

    /// Buyer confirms receipt, releasing funds to the seller.
    pub async fn confirm_delivery(
        &self,
        identity: &Identity,
        id: &AgreementId,
    ) -> Result<TransitionReceipt, WalletError> {
        self.guard(identity, id, EscrowAction::ConfirmDelivery).await?;
        let result = self.authority.confirm_delivery(id, identity.address()).await;
        self.finish(id, EscrowAction::ConfirmDelivery, result).await
    }

    /// Buyer disputes the agreement and is refunded.
    pub async fn open_dispute(
        &self,
        identity: &Identity,
        id: &AgreementId,
        reason: &str,
    ) -> Result<TransitionReceipt, WalletError> {
        self.guard(identity, id, EscrowAction::OpenDispute).await?;
        let result = self
            .authority
            .open_dispute(id, identity.address(), reason.trim())
            .await;
        self.finish(id, EscrowAction::OpenDispute, result).await
    }

    async fn guard(
        &self,
        identity: &Identity,
        id: &AgreementId,
        action: EscrowAction,
    ) -> Result<Agreement, WalletError> {
        self.check_identity(identity)?;
        let agreement = self
            .store
            .lookup(id)
            .await?
            .ok_or_else(|| WalletError::UnknownAgreement(id.clone()))?;
        if !is_offered(&agreement, identity.address(), action) {
            tracing::debug!(agreement = %id, %action, status = %agreement.status, "transition not offered");
            return Err(WalletError::ActionNotOffered {
                action,
                status: agreement.status,
            });
        }
        Ok(agreement)
    }

    /// The guard reads agreements cached for one address only.
    fn check_identity(&self, identity: &Identity) -> Result<(), WalletError> {
        if identity.address() != self.store.address() {
            return Err(WalletError::Validation(format!(
                "wallet {} does not own this agreement cache ({})",
                identity.address().short(),
                self.store.address().short()
            )));
        }
        Ok(())
    }

    async fn finish(
        &self,
        id: &AgreementId,
        action: EscrowAction,
        result: Result<TransitionReceipt, AuthorityError>,
    ) -> Result<TransitionReceipt, WalletError> {
        match result {
            Ok(receipt) => {
                tracing::info!(agreement = %id, %action, message = ?receipt.message, "escrow transition accepted");
                self.after_accepted(action).await;
                Ok(receipt)
            }
            Err(e) => {
                tracing::warn!(agreement = %id, %action, error = %e, "escrow transition rejected");
                Err(e.into())
            }
        }
    }

    /// The request already succeeded; a failed re-read only leaves the cache
    /// stale until the next periodic refresh.
    async fn after_accepted(&self, action: EscrowAction) {
        if let Err(e) = self.store.refresh().await {
            tracing::warn!(%action, error = %e, "agreement refresh failed");
        }
        if action.moves_funds() {
            if let Err(e) = self.balance.refresh().await {
                tracing::warn!(%action, error = %e, "balance refresh failed");
            }
        }
    }
}
