use thiserror::Error;

use crate::{OrderId, Version};

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum OrderStoreError {
    /// The expected version did not match the stored version.
    #[error(
        "Concurrency conflict for order {order_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        order_id: OrderId,
        expected: Version,
        actual: Version,
    },

    /// The order was not found in the store.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// An order with this id has already been stored.
    #[error("Order already exists: {0}")]
    AlreadyExists(OrderId),

    /// Another order already carries this provider correlation id.
    #[error("Provider reference already in use: {0}")]
    DuplicateProviderRef(String),

    /// The store could not be reached. Safe to retry.
    #[error("Order store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrderStoreError {
    /// Returns true for connectivity failures that may succeed when retried.
    ///
    /// Version conflicts are not transient: the caller must re-read and
    /// re-validate instead of replaying the same write.
    pub fn is_transient(&self) -> bool {
        match self {
            OrderStoreError::Unavailable(_) => true,
            OrderStoreError::Database(err) => match err {
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => {
                    true
                }
                // serialization_failure, deadlock_detected
                sqlx::Error::Database(db) => {
                    matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
                }
                _ => false,
            },
            _ => false,
        }
    }
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, OrderStoreError>;
