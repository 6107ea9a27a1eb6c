//! Escrow agreement model and the role/state guard table.
//!
//! ```text
//! PENDING_SELLER_CONFIRMATION
//!   --confirm-seller(seller)--> AWAITING_SHIPMENT
//!   --open-dispute(buyer)-----> DISPUTED
//! AWAITING_SHIPMENT
//!   --confirm-shipment(seller, tracking_info)--> SHIPPED
//!   --open-dispute(buyer)----------------------> DISPUTED
//! SHIPPED
//!   --confirm-delivery(buyer)--> DELIVERED
//!   --open-dispute(buyer)------> DISPUTED
//! DISPUTED / CANCELLED / DELIVERED: terminal
//! ```
//!
//! The guard table is advisory. It keeps the client from offering requests
//! that cannot succeed; the authority remains the only enforcer.

use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_types::{Amount, Timestamp, WalletAddress};

/// Opaque agreement identifier assigned by the authority.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgreementId(String);

impl AgreementId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgreementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgreementId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgreementStatus {
    PendingSellerConfirmation,
    AwaitingShipment,
    Shipped,
    /// Funds released to the seller. Older authorities report `COMPLETED`.
    #[serde(alias = "COMPLETED")]
    Delivered,
    Disputed,
    Cancelled,
}

impl AgreementStatus {
    pub const ALL: [AgreementStatus; 6] = [
        Self::PendingSellerConfirmation,
        Self::AwaitingShipment,
        Self::Shipped,
        Self::Delivered,
        Self::Disputed,
        Self::Cancelled,
    ];

    /// No transition is accepted from a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Disputed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingSellerConfirmation => "PENDING_SELLER_CONFIRMATION",
            Self::AwaitingShipment => "AWAITING_SHIPMENT",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::Disputed => "DISPUTED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for AgreementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded by the authority when an agreement leaves the happy path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CancellationDetails {
    pub cancelled_from_state: AgreementStatus,
    pub reason: String,
    pub cancelled_by: WalletAddress,
    pub cancelled_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Agreement {
    pub id: AgreementId,
    pub buyer: WalletAddress,
    pub seller: WalletAddress,
    pub amount: Amount,
    pub description: String,
    pub status: AgreementStatus,
    #[serde(default)]
    pub tracking_info: Option<String>,
    #[serde(default)]
    pub cancellation_details: Option<CancellationDetails>,
    #[serde(default)]
    pub mediator_fee: Option<Amount>,
    /// Creation time.
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub shipping_timestamp: Option<Timestamp>,
}

impl Agreement {
    /// Roles `address` holds on this agreement (empty for a bystander).
    pub fn roles_of(&self, address: &WalletAddress) -> Vec<Role> {
        let mut roles = Vec::with_capacity(2);
        if &self.buyer == address {
            roles.push(Role::Buyer);
        }
        if &self.seller == address {
            roles.push(Role::Seller);
        }
        roles
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Buyer,
    Seller,
}

/// The five escrow transitions a wallet can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EscrowAction {
    Create,
    ConfirmSeller,
    ConfirmShipment,
    ConfirmDelivery,
    OpenDispute,
}

impl EscrowAction {
    /// Transitions after which the authority moves funds, so dependent
    /// balances are stale.
    pub fn moves_funds(&self) -> bool {
        matches!(self, Self::Create | Self::ConfirmDelivery | Self::OpenDispute)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::ConfirmSeller => "confirm-seller",
            Self::ConfirmShipment => "confirm-shipment",
            Self::ConfirmDelivery => "confirm-delivery",
            Self::OpenDispute => "open-dispute",
        }
    }
}

impl fmt::Display for EscrowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transitions offered to `role` for an agreement in `status`.
pub fn allowed_actions(role: Role, status: AgreementStatus) -> &'static [EscrowAction] {
    use AgreementStatus::*;
    use EscrowAction::*;

    match (role, status) {
        (Role::Seller, PendingSellerConfirmation) => &[ConfirmSeller],
        (Role::Seller, AwaitingShipment) => &[ConfirmShipment],
        (Role::Buyer, PendingSellerConfirmation) | (Role::Buyer, AwaitingShipment) => {
            &[OpenDispute]
        }
        (Role::Buyer, Shipped) => &[ConfirmDelivery, OpenDispute],
        _ => &[],
    }
}

/// Transitions offered to `caller` for `agreement`, across every role the
/// caller holds on it.
pub fn available_actions(agreement: &Agreement, caller: &WalletAddress) -> Vec<EscrowAction> {
    let mut actions = Vec::new();
    for role in agreement.roles_of(caller) {
        for action in allowed_actions(role, agreement.status) {
            if !actions.contains(action) {
                actions.push(*action);
            }
        }
    }
    actions
}

/// Whether `caller` may request `action` on `agreement`.
pub fn is_offered(agreement: &Agreement, caller: &WalletAddress, action: EscrowAction) -> bool {
    available_actions(agreement, caller).contains(&action)
}
