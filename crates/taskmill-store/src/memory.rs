//! In-memory task store.
//!
//! Documents live in a `DashMap` keyed by id. Each write holds the shard lock
//! of its entry, so checking a document's version or claim predicate and
//! mutating it happen as one step. That is enough to make `claim` behave like
//! a conditional update-by-query across any number of scheduler instances
//! sharing the same `MemoryStore`.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace};

use crate::{
    ClaimRequest, ClaimResult, FetchQuery, FetchResult, StoreError, TaskDocument, TaskStatus,
    TaskStore,
};

/// Default namespace for in-memory stores.
const DEFAULT_INDEX: &str = ".taskmill";

/// Thread-safe in-memory [`TaskStore`].
#[derive(Debug)]
pub struct MemoryStore {
    index: String,
    docs: DashMap<String, TaskDocument>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX)
    }
}

impl MemoryStore {
    /// Create an empty store for the given namespace.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            docs: DashMap::new(),
        }
    }

    /// Namespace this store was created for.
    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Copy of every stored document, in no particular order.
    pub fn snapshot(&self) -> Vec<TaskDocument> {
        self.docs.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create(&self, mut doc: TaskDocument) -> Result<TaskDocument, StoreError> {
        match self.docs.entry(doc.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(doc.id)),
            Entry::Vacant(slot) => {
                doc.version = 1;
                slot.insert(doc.clone());
                trace!(id = %doc.id, index = %self.index, "created task document");
                Ok(doc)
            }
        }
    }

    async fn get(&self, id: &str) -> Result<TaskDocument, StoreError> {
        self.docs
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update(&self, mut doc: TaskDocument) -> Result<TaskDocument, StoreError> {
        let mut stored = self
            .docs
            .get_mut(&doc.id)
            .ok_or_else(|| StoreError::NotFound(doc.id.clone()))?;

        if stored.version != doc.version {
            return Err(StoreError::VersionConflict {
                id: doc.id,
                expected: doc.version,
                actual: stored.version,
            });
        }

        doc.version += 1;
        *stored = doc.clone();
        trace!(id = %doc.id, version = doc.version, "updated task document");
        Ok(doc)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.docs
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn search(&self, query: &FetchQuery) -> Result<FetchResult, StoreError> {
        let mut docs: Vec<TaskDocument> = self
            .docs
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        let total = docs.len();

        if let Some(after) = &query.search_after {
            docs.retain(|doc| after.precedes(doc, query.sort));
        }
        docs.sort_by(|a, b| query.sort.compare_docs(a, b));

        if let Some(size) = query.size {
            docs.truncate(size);
        }

        Ok(FetchResult { docs, total })
    }

    async fn claim(&self, request: &ClaimRequest) -> Result<ClaimResult, StoreError> {
        if request.size == 0 {
            return Ok(ClaimResult::default());
        }

        // Collect candidates first; no shard lock may be held while the
        // conditional writes below take entry locks.
        let mut candidates: Vec<(chrono::DateTime<chrono::Utc>, String)> = self
            .docs
            .iter()
            .filter(|entry| {
                let doc = entry.value();
                request.task_types.contains(&doc.task_type) && doc.is_claimable(request.now)
            })
            .map(|entry| (entry.value().run_at, entry.key().clone()))
            .collect();
        candidates.sort();

        let mut claimed = Vec::with_capacity(request.size.min(candidates.len()));
        for (_, id) in candidates {
            if claimed.len() >= request.size {
                break;
            }

            let Some(mut doc) = self.docs.get_mut(&id) else {
                continue;
            };

            // Another owner may have claimed or removed it since the scan.
            if !doc.is_claimable(request.now) {
                debug!(id = %id, "task no longer claimable, skipping");
                continue;
            }

            doc.status = TaskStatus::Claiming;
            doc.owner_id = Some(request.owner_id.clone());
            doc.retry_at = Some(request.claim_ownership_until);
            doc.version += 1;
            claimed.push(doc.clone());
        }

        Ok(ClaimResult { claimed })
    }
}
