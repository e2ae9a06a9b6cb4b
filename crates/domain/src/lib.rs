//! Domain layer for storefront orders.
//!
//! This crate provides:
//! - the Order entity with its fulfillment and payment state machines
//! - the OrderEngine, which performs every order mutation against an
//!   [`order_store::OrderStore`] with optimistic concurrency
//! - the ports the engine depends on: PaymentGateway and AccessGate

pub mod access;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod order;

pub use access::{AccessGate, AuthenticationError, Identity, Role};
pub use common::{OrderId, SubjectId};
pub use engine::{EngineConfig, OrderEngine, Page};
pub use error::DomainError;
pub use gateway::{
    ChargeRequest, GatewayError, PaymentGateway, PaymentOutcome, ProviderCallback, ProviderRef,
};
pub use order::{
    DeliveryInfo, FulfillmentStatus, LineItem, Money, NewOrder, Order, OrderError,
    OrderErrorKind, PaymentMethod, PaymentReceipt, PaymentStatus, ProductRef, Transition,
};
