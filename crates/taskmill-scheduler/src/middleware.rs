//! Middleware run before a task is saved and before it is run.

use std::sync::Arc;

use async_trait::async_trait;
use taskmill_store::TaskDocument;

use crate::TaskRequest;

/// Error returned by a middleware stage.
pub type MiddlewareError = Box<dyn std::error::Error + Send + Sync>;

/// Input to `before_save`.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveContext {
    pub task: TaskRequest,
}

impl SaveContext {
    pub fn new(task: TaskRequest) -> Self {
        Self { task }
    }
}

/// Input to `before_run` and to runner factories.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub task: TaskDocument,
}

impl RunContext {
    pub fn new(task: TaskDocument) -> Self {
        Self { task }
    }
}

/// Interceptor for scheduled and claimed tasks.
///
/// Both hooks default to passing the context through unchanged, so an
/// implementation only overrides what it needs.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn before_save(&self, ctx: SaveContext) -> Result<SaveContext, MiddlewareError> {
        Ok(ctx)
    }

    async fn before_run(&self, ctx: RunContext) -> Result<RunContext, MiddlewareError> {
        Ok(ctx)
    }
}

/// Middleware stages in registration order.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    stages: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.stages.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every `before_save` in order; the first error aborts.
    pub async fn before_save(&self, mut ctx: SaveContext) -> Result<SaveContext, MiddlewareError> {
        for stage in &self.stages {
            ctx = stage.before_save(ctx).await?;
        }
        Ok(ctx)
    }

    /// Run every `before_run` in order; the first error aborts.
    pub async fn before_run(&self, mut ctx: RunContext) -> Result<RunContext, MiddlewareError> {
        for stage in &self.stages {
            ctx = stage.before_run(ctx).await?;
        }
        Ok(ctx)
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("stages", &self.stages.len())
            .finish()
    }
}
