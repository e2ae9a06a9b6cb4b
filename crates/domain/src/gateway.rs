//! Payment provider port.
//!
//! The engine starts charges through [`PaymentGateway`] and learns their
//! outcome later through a [`ProviderCallback`].

use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::{Money, PaymentMethod, PaymentReceipt};

/// Correlation id a provider assigns to a charge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderRef(String);

impl ProviderRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ProviderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProviderRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A request to start collecting payment for an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub order_id: OrderId,
    pub method: PaymentMethod,
    pub amount: Money,
    /// Phone number for mobile money, customer reference for card.
    pub payer_contact: String,
}

/// Errors returned by a payment provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The provider could not be reached or answered with garbage.
    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the charge.
    #[error("Payment rejected by provider: {0}")]
    Rejected(String),
}

/// Starts charges with an external payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Asks the provider to start a charge and returns its correlation id.
    ///
    /// The outcome arrives later as a [`ProviderCallback`].
    async fn initiate_charge(&self, request: ChargeRequest) -> Result<ProviderRef, GatewayError>;
}

#[async_trait]
impl<T: PaymentGateway + ?Sized> PaymentGateway for Arc<T> {
    async fn initiate_charge(&self, request: ChargeRequest) -> Result<ProviderRef, GatewayError> {
        (**self).initiate_charge(request).await
    }
}

/// Final result of a charge as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentOutcome {
    Succeeded { receipt: Option<PaymentReceipt> },
    Failed { reason: String },
}

impl PaymentOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PaymentOutcome::Succeeded { .. })
    }

    /// Label used for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Succeeded { .. } => "succeeded",
            PaymentOutcome::Failed { .. } => "failed",
        }
    }
}

/// A provider notification normalized from its wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCallback {
    pub provider_ref: ProviderRef,
    pub outcome: PaymentOutcome,
}

impl ProviderCallback {
    /// A successful payment with an optional receipt.
    pub fn succeeded(provider_ref: impl Into<ProviderRef>, receipt: Option<PaymentReceipt>) -> Self {
        Self {
            provider_ref: provider_ref.into(),
            outcome: PaymentOutcome::Succeeded { receipt },
        }
    }

    /// A failed payment with the provider's reason.
    pub fn failed(provider_ref: impl Into<ProviderRef>, reason: impl Into<String>) -> Self {
        Self {
            provider_ref: provider_ref.into(),
            outcome: PaymentOutcome::Failed {
                reason: reason.into(),
            },
        }
    }
}
