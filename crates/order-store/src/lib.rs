//! Durable storage for order documents.
//!
//! Orders are stored as JSON documents indexed by id, owner and payment
//! provider correlation id. Every write carries a [`Version`] so callers can
//! perform optimistic read-modify-write cycles.
//!
//! Provider callbacks that arrive before their correlation id is written to
//! an order are parked next to the orders until the id shows up.

pub mod document;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod retry;
pub mod store;

pub use common::{OrderId, SubjectId};
pub use document::{OrderDocument, ParkedCallback, Version};
pub use error::{OrderStoreError, Result};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use query::OrderQuery;
pub use retry::{RetryPolicy, RetryingOrderStore};
pub use store::OrderStore;
