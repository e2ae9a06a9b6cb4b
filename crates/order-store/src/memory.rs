use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    OrderDocument, OrderId, OrderQuery, OrderStoreError, ParkedCallback, Result, Version,
    store::OrderStore,
};

/// In-memory order store implementation for testing and local runs.
///
/// Provides the same semantics as the PostgreSQL implementation, including
/// version checks and provider reference uniqueness. A single write lock
/// serializes mutations, so each update is atomic.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, OrderDocument>>>,
    parked: Arc<RwLock<HashMap<String, ParkedCallback>>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Returns the number of parked callbacks.
    pub async fn parked_count(&self) -> usize {
        self.parked.read().await.len()
    }

    /// Clears all orders and parked callbacks.
    pub async fn clear(&self) {
        self.orders.write().await.clear();
        self.parked.write().await.clear();
    }
}

fn ensure_provider_ref_free(
    orders: &HashMap<OrderId, OrderDocument>,
    document: &OrderDocument,
) -> Result<()> {
    if let Some(ref provider_ref) = document.provider_ref {
        let taken = orders.values().any(|other| {
            other.id != document.id && other.provider_ref.as_ref() == Some(provider_ref)
        });
        if taken {
            return Err(OrderStoreError::DuplicateProviderRef(provider_ref.clone()));
        }
    }
    Ok(())
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, mut document: OrderDocument) -> Result<Version> {
        let mut orders = self.orders.write().await;

        if orders.contains_key(&document.id) {
            return Err(OrderStoreError::AlreadyExists(document.id));
        }
        ensure_provider_ref_free(&orders, &document)?;

        document.version = Version::first();
        orders.insert(document.id, document);

        Ok(Version::first())
    }

    async fn get(&self, id: OrderId) -> Result<Option<OrderDocument>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_by_provider_ref(&self, provider_ref: &str) -> Result<Option<OrderDocument>> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .find(|doc| doc.provider_ref.as_deref() == Some(provider_ref))
            .cloned())
    }

    async fn update(&self, mut document: OrderDocument, expected: Version) -> Result<Version> {
        let mut orders = self.orders.write().await;

        let current = orders
            .get(&document.id)
            .ok_or(OrderStoreError::NotFound(document.id))?
            .version;

        if current != expected {
            return Err(OrderStoreError::ConcurrencyConflict {
                order_id: document.id,
                expected,
                actual: current,
            });
        }
        ensure_provider_ref_free(&orders, &document)?;

        let new_version = expected.next();
        document.version = new_version;
        orders.insert(document.id, document);

        Ok(new_version)
    }

    async fn query(&self, query: OrderQuery) -> Result<Vec<OrderDocument>> {
        let orders = self.orders.read().await;
        let mut matching: Vec<_> = orders
            .values()
            .filter(|doc| query.matches(doc))
            .cloned()
            .collect();

        // Newest first
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.as_uuid().cmp(&a.id.as_uuid()))
        });

        let offset = query.offset.unwrap_or(0);
        let matching = matching.into_iter().skip(offset);

        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn park_callback(&self, callback: ParkedCallback) -> Result<()> {
        self.parked
            .write()
            .await
            .insert(callback.provider_ref.clone(), callback);
        Ok(())
    }

    async fn parked_callback(&self, provider_ref: &str) -> Result<Option<ParkedCallback>> {
        Ok(self.parked.read().await.get(provider_ref).cloned())
    }

    async fn discard_parked_callback(&self, provider_ref: &str) -> Result<()> {
        self.parked.write().await.remove(provider_ref);
        Ok(())
    }

    async fn purge_parked_callbacks(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut parked = self.parked.write().await;
        let before = parked.len();
        parked.retain(|_, callback| callback.received_at >= cutoff);
        Ok((before - parked.len()) as u64)
    }
}
