use async_trait::async_trait;

use chrono::{DateTime, Utc};

use crate::{OrderDocument, OrderId, OrderQuery, ParkedCallback, Result, Version};

/// Core trait for order store implementations.
///
/// The store provides per-order atomicity: `update` only succeeds when the
/// stored version still equals `expected`, so two concurrent read-modify-write
/// cycles against the same order can never both win.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order document.
    ///
    /// The stored document gets [`Version::first`], which is returned.
    /// Fails with `AlreadyExists` if the id is taken.
    async fn insert(&self, document: OrderDocument) -> Result<Version>;

    /// Retrieves an order by id.
    async fn get(&self, id: OrderId) -> Result<Option<OrderDocument>>;

    /// Retrieves the order currently carrying a provider correlation id.
    async fn find_by_provider_ref(&self, provider_ref: &str) -> Result<Option<OrderDocument>>;

    /// Replaces an order document.
    ///
    /// Fails with `ConcurrencyConflict` if the stored version is not
    /// `expected`, and with `NotFound` if the order does not exist.
    /// Returns the new version (`expected.next()`).
    async fn update(&self, document: OrderDocument, expected: Version) -> Result<Version>;

    /// Lists orders matching a query, newest first.
    async fn query(&self, query: OrderQuery) -> Result<Vec<OrderDocument>>;

    /// Holds a callback for a ref no order carries yet.
    ///
    /// Replaces any callback already parked under the same ref.
    async fn park_callback(&self, callback: ParkedCallback) -> Result<()>;

    /// Returns the callback parked under `provider_ref`, if any.
    async fn parked_callback(&self, provider_ref: &str) -> Result<Option<ParkedCallback>>;

    /// Removes the callback parked under `provider_ref`. Missing entries are not an error.
    async fn discard_parked_callback(&self, provider_ref: &str) -> Result<()>;

    /// Removes parked callbacks received before `cutoff` and returns how many went.
    async fn purge_parked_callbacks(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
impl<T: OrderStore + ?Sized> OrderStore for std::sync::Arc<T> {
    async fn insert(&self, document: OrderDocument) -> Result<Version> {
        (**self).insert(document).await
    }

    async fn get(&self, id: OrderId) -> Result<Option<OrderDocument>> {
        (**self).get(id).await
    }

    async fn find_by_provider_ref(&self, provider_ref: &str) -> Result<Option<OrderDocument>> {
        (**self).find_by_provider_ref(provider_ref).await
    }

    async fn update(&self, document: OrderDocument, expected: Version) -> Result<Version> {
        (**self).update(document, expected).await
    }

    async fn query(&self, query: OrderQuery) -> Result<Vec<OrderDocument>> {
        (**self).query(query).await
    }

    async fn park_callback(&self, callback: ParkedCallback) -> Result<()> {
        (**self).park_callback(callback).await
    }

    async fn parked_callback(&self, provider_ref: &str) -> Result<Option<ParkedCallback>> {
        (**self).parked_callback(provider_ref).await
    }

    async fn discard_parked_callback(&self, provider_ref: &str) -> Result<()> {
        (**self).discard_parked_callback(provider_ref).await
    }

    async fn purge_parked_callbacks(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        (**self).purge_parked_callbacks(cutoff).await
    }
}
