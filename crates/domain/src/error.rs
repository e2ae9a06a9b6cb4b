//! Domain error types.

use common::OrderId;
use order_store::OrderStoreError;
use thiserror::Error;

use crate::access::AuthenticationError;
use crate::gateway::GatewayError;
use crate::order::{OrderError, OrderErrorKind};

/// Errors returned by [`crate::OrderEngine`] operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Input failed validation; nothing was written.
    #[error("Validation failed: {0}")]
    Validation(OrderError),

    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthenticationError),

    /// Caller is authenticated but not allowed to perform the operation.
    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("No order carries provider reference {0}")]
    ProviderRefNotFound(String),

    /// The requested state change is not allowed from the current state.
    #[error("Invalid transition: {0}")]
    InvalidTransition(OrderError),

    /// Concurrent activity prevented the operation.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment provider unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Payment rejected by provider: {0}")]
    GatewayRejected(String),

    /// An error occurred in the order store.
    #[error("Order store error: {0}")]
    Store(#[from] OrderStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Returns true for errors that indicate a not-found order.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DomainError::OrderNotFound(_) | DomainError::ProviderRefNotFound(_)
        )
    }
}

impl From<OrderError> for DomainError {
    fn from(e: OrderError) -> Self {
        match e.kind() {
            OrderErrorKind::Validation => DomainError::Validation(e),
            OrderErrorKind::InvalidTransition => DomainError::InvalidTransition(e),
            OrderErrorKind::Conflict => DomainError::Conflict(e.to_string()),
        }
    }
}

impl From<GatewayError> for DomainError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Unavailable(reason) => DomainError::GatewayUnavailable(reason),
            GatewayError::Rejected(reason) => DomainError::GatewayRejected(reason),
        }
    }
}
