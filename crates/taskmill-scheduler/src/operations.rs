//! Schedule/remove/fetch executed against the store.

use std::sync::Arc;

use chrono::Utc;
use taskmill_store::{FetchQuery, FetchResult, StoreError, TaskDocument, TaskStore};
use tracing::{debug, info};

use crate::{MiddlewareChain, SaveContext, TaskDefinitionRegistry, TaskManagerError, TaskRequest};

/// Store-facing half of the task manager, shared once it has started.
pub(crate) struct Operations {
    store: Arc<dyn TaskStore>,
    registry: Arc<TaskDefinitionRegistry>,
    middleware: Arc<MiddlewareChain>,
}

impl Operations {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<TaskDefinitionRegistry>,
        middleware: Arc<MiddlewareChain>,
    ) -> Self {
        Self {
            store,
            registry,
            middleware,
        }
    }

    #[tracing::instrument(skip(self, request), fields(task_type = %request.task_type))]
    pub(crate) async fn schedule(
        &self,
        request: TaskRequest,
    ) -> Result<TaskDocument, TaskManagerError> {
        if !self.registry.contains(&request.task_type) {
            return Err(TaskManagerError::UnknownTaskType(request.task_type));
        }

        let ctx = self
            .middleware
            .before_save(SaveContext::new(request))
            .await
            .map_err(|e| TaskManagerError::Middleware(e.to_string()))?;

        // Middleware may rewrite the type; it still has to resolve.
        if !self.registry.contains(&ctx.task.task_type) {
            return Err(TaskManagerError::UnknownTaskType(ctx.task.task_type));
        }

        let doc = ctx.task.into_document(Utc::now());
        let created = self.store.create(doc).await?;
        info!(id = %created.id, run_at = %created.run_at, "scheduled task");
        Ok(created)
    }

    /// Schedule a task with a fixed id unless it already exists.
    pub(crate) async fn ensure_scheduled(
        &self,
        request: TaskRequest,
    ) -> Result<TaskDocument, TaskManagerError> {
        let Some(id) = request.id.clone() else {
            return Err(TaskManagerError::InvalidRequest(
                "ensure_scheduled requires a task id".to_string(),
            ));
        };

        match self.schedule(request).await {
            Err(TaskManagerError::Store(StoreError::AlreadyExists(_))) => {
                debug!(id = %id, "task already scheduled");
                Ok(self.store.get(&id).await?)
            }
            other => other,
        }
    }

    pub(crate) async fn remove(&self, id: &str) -> Result<(), TaskManagerError> {
        self.store.delete(id).await?;
        info!(id, "removed task");
        Ok(())
    }

    pub(crate) async fn fetch(&self, query: &FetchQuery) -> Result<FetchResult, TaskManagerError> {
        let result = self.store.search(query).await?;
        debug!(total = result.total, returned = result.docs.len(), "fetched tasks");
        Ok(result)
    }
}
