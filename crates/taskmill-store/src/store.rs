//! The store adapter contract.

use async_trait::async_trait;

use crate::{ClaimRequest, ClaimResult, FetchQuery, FetchResult, StoreError, TaskDocument};

/// Persistence for task documents.
///
/// The store is the single source of truth for task state; scheduler
/// instances only hold the documents they are currently running.
///
/// # Versioning
///
/// Every document carries a `version`. `create` assigns 1 and every
/// successful write increments it. `update` is a check-and-set: it fails with
/// [`StoreError::VersionConflict`] unless the caller's copy carries the
/// current version.
///
/// # Claiming
///
/// `claim` must behave like a single conditional update-by-query: a document
/// is only modified if it still matches the claim predicate at the moment it
/// is written. Backends without a native primitive emulate this with the
/// version check-and-set above, so two instances racing for the same document
/// can never both succeed.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new document. Fails with `AlreadyExists` if the id is taken.
    async fn create(&self, doc: TaskDocument) -> Result<TaskDocument, StoreError>;

    /// Fetch a single document by id.
    async fn get(&self, id: &str) -> Result<TaskDocument, StoreError>;

    /// Replace a document, guarded by its version. Returns the stored copy.
    async fn update(&self, doc: TaskDocument) -> Result<TaskDocument, StoreError>;

    /// Remove a document.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Search documents.
    async fn search(&self, query: &FetchQuery) -> Result<FetchResult, StoreError>;

    /// Atomically claim up to `request.size` eligible documents.
    ///
    /// Eligible documents have a type in `request.task_types` and satisfy
    /// [`TaskDocument::is_claimable`] at `request.now`. They are taken in
    /// ascending `run_at` order (ties broken by id), moved to `Claiming`,
    /// and stamped with `owner_id` and `retry_at`.
    async fn claim(&self, request: &ClaimRequest) -> Result<ClaimResult, StoreError>;
}
