//! Retry of transient store failures.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    OrderDocument, OrderId, OrderQuery, OrderStoreError, ParkedCallback, Result, Version,
    store::OrderStore,
};

/// How often and how patiently transient failures are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the second attempt; grows linearly afterwards.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Wraps a store and retries operations that fail with a transient error.
///
/// Only connectivity-class failures are retried (see
/// [`OrderStoreError::is_transient`]); version conflicts and logical errors
/// are returned immediately.
#[derive(Clone)]
pub struct RetryingOrderStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: OrderStore> RetryingOrderStore<S> {
    /// Wraps a store with the default policy.
    pub fn new(inner: S) -> Self {
        Self::with_policy(inner, RetryPolicy::default())
    }

    /// Wraps a store with a custom policy.
    pub fn with_policy(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn run<T, F, Fut>(&self, operation: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    tracing::warn!(operation, attempt, error = %err, "transient order store failure, retrying");
                    metrics::counter!("order_store_retries_total", "operation" => operation)
                        .increment(1);
                    tokio::time::sleep(self.policy.backoff * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl<S: OrderStore> OrderStore for RetryingOrderStore<S> {
    async fn insert(&self, document: OrderDocument) -> Result<Version> {
        let mut attempts = 0;
        let result = self
            .run("insert", || {
                attempts += 1;
                self.inner.insert(document.clone())
            })
            .await;

        match result {
            // A failed attempt may have committed before the connection dropped.
            Err(OrderStoreError::AlreadyExists(id)) if attempts > 1 => {
                match self.inner.get(id).await? {
                    Some(stored)
                        if stored.owner_id == document.owner_id && stored.body == document.body =>
                    {
                        Ok(stored.version)
                    }
                    _ => Err(OrderStoreError::AlreadyExists(id)),
                }
            }
            other => other,
        }
    }

    async fn get(&self, id: OrderId) -> Result<Option<OrderDocument>> {
        self.run("get", || self.inner.get(id)).await
    }

    async fn find_by_provider_ref(&self, provider_ref: &str) -> Result<Option<OrderDocument>> {
        self.run("find_by_provider_ref", || {
            self.inner.find_by_provider_ref(provider_ref)
        })
        .await
    }

    async fn update(&self, document: OrderDocument, expected: Version) -> Result<Version> {
        self.run("update", || self.inner.update(document.clone(), expected))
            .await
    }

    async fn query(&self, query: OrderQuery) -> Result<Vec<OrderDocument>> {
        self.run("query", || self.inner.query(query.clone())).await
    }

    async fn park_callback(&self, callback: ParkedCallback) -> Result<()> {
        self.run("park_callback", || self.inner.park_callback(callback.clone()))
            .await
    }

    async fn parked_callback(&self, provider_ref: &str) -> Result<Option<ParkedCallback>> {
        self.run("parked_callback", || self.inner.parked_callback(provider_ref))
            .await
    }

    async fn discard_parked_callback(&self, provider_ref: &str) -> Result<()> {
        self.run("discard_parked_callback", || {
            self.inner.discard_parked_callback(provider_ref)
        })
        .await
    }

    async fn purge_parked_callbacks(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.run("purge_parked_callbacks", || {
            self.inner.purge_parked_callbacks(cutoff)
        })
        .await
    }
}
