//! Task document store for taskmill.
//!
//! This crate defines the persisted shape of a task and the adapter contract
//! the scheduler relies on:
//! - Task documents with optimistic concurrency versions
//! - Search queries with filtering, sorting and `search_after` paging
//! - An atomic conditional claim used to hand tasks to exactly one owner
//! - An in-memory adapter backed by `DashMap`

mod error;
mod interval;
mod memory;
mod store;
mod types;

pub use error::StoreError;
pub use interval::{Interval, IntervalUnit, InvalidInterval};
pub use memory::MemoryStore;
pub use store::TaskStore;
pub use types::{
    ClaimRequest, ClaimResult, FetchQuery, FetchResult, FetchSort, SearchAfter, TaskDocument,
    TaskStatus,
};
