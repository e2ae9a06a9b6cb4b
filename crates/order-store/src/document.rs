use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{OrderId, SubjectId};

/// Version number for an order document, used for optimistic concurrency control.
///
/// A freshly inserted document is at version 1 and every successful update
/// increments it by 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of a document that has not been stored.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first version (1) assigned on insert.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// A stored order together with the fields the store indexes on.
///
/// The store treats `body` as opaque JSON. The indexed columns are copied out
/// of the order by the domain layer so the store can filter without
/// understanding the document shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDocument {
    /// Primary key.
    pub id: OrderId,

    /// Subject that owns the order.
    pub owner_id: SubjectId,

    /// Correlation id of the outstanding payment charge, if any.
    ///
    /// Unique across all documents while set.
    pub provider_ref: Option<String>,

    /// Version of the stored document.
    pub version: Version,

    /// When the order was created.
    pub created_at: DateTime<Utc>,

    /// When the order was last written.
    pub updated_at: DateTime<Utc>,

    /// The full order as JSON.
    pub body: serde_json::Value,
}

impl OrderDocument {
    /// Creates a document that has not been stored yet.
    pub fn new(
        id: OrderId,
        owner_id: SubjectId,
        created_at: DateTime<Utc>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            id,
            owner_id,
            provider_ref: None,
            version: Version::initial(),
            created_at,
            updated_at: created_at,
            body,
        }
    }

    /// Sets the provider correlation id.
    pub fn with_provider_ref(mut self, provider_ref: Option<String>) -> Self {
        self.provider_ref = provider_ref;
        self
    }

    /// Sets the last-updated timestamp.
    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }
}

/// A provider callback whose correlation id no order carried yet.
///
/// Held until the charge that owns the ref records it, or until it is purged
/// as stale. The store treats `outcome` as opaque JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkedCallback {
    /// Correlation id the callback was addressed to. One entry per ref.
    pub provider_ref: String,

    /// The normalized outcome as JSON.
    pub outcome: serde_json::Value,

    /// When the callback was received.
    pub received_at: DateTime<Utc>,
}

impl ParkedCallback {
    pub fn new(
        provider_ref: impl Into<String>,
        outcome: serde_json::Value,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            provider_ref: provider_ref.into(),
            outcome,
            received_at,
        }
    }
}
