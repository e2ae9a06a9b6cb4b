//! Fulfillment and payment state machines.

use serde::{Deserialize, Serialize};

/// Physical delivery stage of an order.
///
/// Stages only move forward, one step at a time:
/// ```text
/// Received ──► Packed ──► InTransit ──► Delivered
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum FulfillmentStatus {
    /// Order placed and accepted.
    #[default]
    #[serde(alias = "Order Received")]
    Received,

    /// Goods packed for shipping.
    #[serde(alias = "Cargo Packed")]
    Packed,

    /// Goods on the way to the customer.
    #[serde(alias = "Cargo on Route")]
    InTransit,

    /// Goods handed over (terminal state).
    Delivered,
}

impl FulfillmentStatus {
    /// Returns the stage that directly follows this one, if any.
    pub fn next(&self) -> Option<FulfillmentStatus> {
        match self {
            FulfillmentStatus::Received => Some(FulfillmentStatus::Packed),
            FulfillmentStatus::Packed => Some(FulfillmentStatus::InTransit),
            FulfillmentStatus::InTransit => Some(FulfillmentStatus::Delivered),
            FulfillmentStatus::Delivered => None,
        }
    }

    /// Returns true if moving to `target` is allowed: staying put or one step forward.
    pub fn can_advance_to(&self, target: FulfillmentStatus) -> bool {
        *self == target || self.next() == Some(target)
    }

    /// Returns true if this is the terminal stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FulfillmentStatus::Delivered)
    }

    /// Returns the stage name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Received => "Received",
            FulfillmentStatus::Packed => "Packed",
            FulfillmentStatus::InTransit => "InTransit",
            FulfillmentStatus::Delivered => "Delivered",
        }
    }
}

impl std::fmt::Display for FulfillmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Financial settlement state of an order.
///
/// ```text
/// Pending ──┬──► Paid
///           └──► Failed ──(retry)──► Pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    /// Returns true if a new charge attempt may be started from this state.
    pub fn can_initiate_charge(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Failed)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Paid => "Paid",
            PaymentStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the customer pays for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// Cash collected on delivery; settled by an admin.
    #[serde(rename = "cod", alias = "cash_on_delivery")]
    CashOnDelivery,

    /// Card payment through a provider.
    #[serde(rename = "stripe", alias = "card")]
    Card,

    /// Mobile-money payment (M-Pesa) through a provider.
    #[serde(rename = "m-pesa", alias = "mobile_money", alias = "mpesa")]
    MobileMoney,
}

impl PaymentMethod {
    /// Returns true if payment status is driven by provider callbacks.
    pub fn is_provider_mediated(&self) -> bool {
        matches!(self, PaymentMethod::Card | PaymentMethod::MobileMoney)
    }

    /// Returns the wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CashOnDelivery => "cod",
            PaymentMethod::Card => "stripe",
            PaymentMethod::MobileMoney => "m-pesa",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
