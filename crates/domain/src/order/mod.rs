//! Order entity and related types.

mod aggregate;
mod commands;
mod state;
mod value_objects;

pub use aggregate::{Order, Transition};
pub use commands::NewOrder;
pub use state::{FulfillmentStatus, PaymentMethod, PaymentStatus};
pub use value_objects::{DeliveryInfo, LineItem, Money, PaymentReceipt, ProductRef};

use thiserror::Error;

/// Errors raised by the order's own rules.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderError {
    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    #[error("Item is missing a product reference")]
    MissingProductRef,

    #[error("Item {product_ref} is missing a name")]
    MissingItemName { product_ref: String },

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Invalid price.
    #[error("Invalid price: {price} (must be greater than 0)")]
    InvalidPrice { price: i64 },

    #[error("Invalid delivery fee: {fee} (must not be negative)")]
    InvalidDeliveryFee { fee: i64 },

    #[error("Invalid total: {total} (must be greater than 0)")]
    InvalidTotal { total: i64 },

    #[error("Total mismatch: expected {expected}, computed {computed}")]
    TotalMismatch { expected: Money, computed: Money },

    #[error("Order amount overflows")]
    AmountOverflow,

    #[error("Payer contact is required")]
    PayerContactRequired,

    #[error("Cannot move fulfillment from {from} to {to}")]
    InvalidFulfillmentTransition {
        from: FulfillmentStatus,
        to: FulfillmentStatus,
    },

    #[error("Payment status of {method} orders is set by the payment provider")]
    ManualPaymentNotAllowed { method: PaymentMethod },

    #[error("{method} orders are not paid through a provider")]
    ProviderPaymentNotSupported { method: PaymentMethod },

    #[error("Cannot start a charge while payment is {status}")]
    PaymentNotInitiable { status: PaymentStatus },

    #[error("A charge attempt is already in flight")]
    ChargeInFlight,

    #[error("Charge attempt {attempt} is no longer current")]
    StaleChargeAttempt { attempt: u32 },
}

/// How an [`OrderError`] should be reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderErrorKind {
    Validation,
    InvalidTransition,
    Conflict,
}

impl OrderError {
    pub fn kind(&self) -> OrderErrorKind {
        match self {
            OrderError::NoItems
            | OrderError::MissingProductRef
            | OrderError::MissingItemName { .. }
            | OrderError::InvalidQuantity { .. }
            | OrderError::InvalidPrice { .. }
            | OrderError::InvalidDeliveryFee { .. }
            | OrderError::InvalidTotal { .. }
            | OrderError::TotalMismatch { .. }
            | OrderError::AmountOverflow
            | OrderError::PayerContactRequired => OrderErrorKind::Validation,
            OrderError::InvalidFulfillmentTransition { .. }
            | OrderError::ManualPaymentNotAllowed { .. }
            | OrderError::ProviderPaymentNotSupported { .. }
            | OrderError::PaymentNotInitiable { .. } => OrderErrorKind::InvalidTransition,
            OrderError::ChargeInFlight | OrderError::StaleChargeAttempt { .. } => {
                OrderErrorKind::Conflict
            }
        }
    }
}
