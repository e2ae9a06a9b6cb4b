use crate::{OrderDocument, SubjectId};

/// Filter for listing orders.
///
/// Results are always returned newest first (by creation time).
#[derive(Debug, Clone, Default)]
pub struct OrderQuery {
    /// Only orders owned by this subject.
    pub owner_id: Option<SubjectId>,

    /// Maximum number of orders to return.
    pub limit: Option<usize>,

    /// Number of orders to skip.
    pub offset: Option<usize>,
}

impl OrderQuery {
    /// Creates a query matching every order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for the orders of one owner.
    pub fn for_owner(owner_id: SubjectId) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Default::default()
        }
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips this many results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the document passes the filters of this query.
    pub fn matches(&self, document: &OrderDocument) -> bool {
        match &self.owner_id {
            Some(owner) => &document.owner_id == owner,
            None => true,
        }
    }
}
