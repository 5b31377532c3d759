//! Task document and query types.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Interval;

/// Lifecycle status of a persisted task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for `run_at` to pass.
    #[default]
    Idle,
    /// Claimed by an owner, not yet started.
    Claiming,
    /// Currently executing on its owner.
    Running,
    /// Exhausted its attempts. Never claimed again.
    Failed,
}

impl TaskStatus {
    /// Whether a task in this status is held by an owner.
    pub fn is_owned(self) -> bool {
        matches!(self, TaskStatus::Claiming | TaskStatus::Running)
    }
}

/// A persisted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDocument {
    /// Unique document id.
    pub id: String,
    /// Registered task type this task runs as.
    pub task_type: String,
    /// Caller-supplied parameters, opaque to the scheduler.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Runner-owned state carried between runs.
    #[serde(default)]
    pub state: serde_json::Value,
    /// Current status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Earliest time an idle task may be claimed.
    pub run_at: DateTime<Utc>,
    /// When this task was first scheduled.
    pub scheduled_at: DateTime<Utc>,
    /// When the current (or last) run started.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Time after which a claiming/running task is considered abandoned.
    #[serde(default)]
    pub retry_at: Option<DateTime<Utc>>,
    /// Consecutive failed attempts (reset on success).
    #[serde(default)]
    pub attempts: u32,
    /// Node id of the scheduler instance holding this task.
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Recurrence period, if this task repeats.
    #[serde(default)]
    pub interval: Option<Interval>,
    /// Free-form scope tags used for filtering.
    #[serde(default)]
    pub scope: Vec<String>,
    /// User on whose behalf the task was scheduled.
    #[serde(default)]
    pub user: Option<String>,
    /// Optimistic concurrency token, assigned by the store.
    #[serde(default)]
    pub version: u64,
}

impl TaskDocument {
    /// Create an idle task due at `now`.
    pub fn new(id: impl Into<String>, task_type: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            params: serde_json::Value::Null,
            state: serde_json::Value::Null,
            status: TaskStatus::Idle,
            run_at: now,
            scheduled_at: now,
            started_at: None,
            retry_at: None,
            attempts: 0,
            owner_id: None,
            interval: None,
            scope: Vec::new(),
            user: None,
            version: 0,
        }
    }

    /// Whether the claim predicate matches this task at `now`.
    ///
    /// Idle tasks are claimable once `run_at` has passed. Owned tasks are
    /// claimable once `retry_at` has passed, which is how work held by a
    /// crashed instance gets picked up again.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            TaskStatus::Idle => self.run_at <= now,
            TaskStatus::Claiming | TaskStatus::Running => {
                self.retry_at.is_some_and(|retry_at| retry_at <= now)
            }
            TaskStatus::Failed => false,
        }
    }

    /// Reset ownership fields and return the task to `status`.
    pub fn release(&mut self, status: TaskStatus) {
        self.status = status;
        self.owner_id = None;
        self.retry_at = None;
    }
}

/// Sort order for [`FetchQuery`] results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchSort {
    #[default]
    RunAtAsc,
    RunAtDesc,
    ScheduledAtAsc,
}

impl FetchSort {
    /// Timestamp this order sorts on.
    pub fn key(self, doc: &TaskDocument) -> DateTime<Utc> {
        match self {
            FetchSort::RunAtAsc | FetchSort::RunAtDesc => doc.run_at,
            FetchSort::ScheduledAtAsc => doc.scheduled_at,
        }
    }

    /// Order of two `(key, id)` positions; ids break ties.
    pub fn compare(self, a: (DateTime<Utc>, &str), b: (DateTime<Utc>, &str)) -> Ordering {
        match self {
            FetchSort::RunAtDesc => b.cmp(&a),
            FetchSort::RunAtAsc | FetchSort::ScheduledAtAsc => a.cmp(&b),
        }
    }

    /// Order of two documents.
    pub fn compare_docs(self, a: &TaskDocument, b: &TaskDocument) -> Ordering {
        self.compare((self.key(a), &a.id), (self.key(b), &b.id))
    }
}

/// Keyset paging cursor: the sort position of the last document of a page.
///
/// The next page holds the documents that sort strictly after it, so the
/// cursor stays valid when that document has since been deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchAfter {
    pub sort_key: DateTime<Utc>,
    pub id: String,
}

impl SearchAfter {
    /// Cursor positioned at `doc` under `sort`.
    pub fn new(doc: &TaskDocument, sort: FetchSort) -> Self {
        Self {
            sort_key: sort.key(doc),
            id: doc.id.clone(),
        }
    }

    /// Whether `doc` sorts strictly after this cursor.
    pub fn precedes(&self, doc: &TaskDocument, sort: FetchSort) -> bool {
        sort.compare((self.sort_key, &self.id), (sort.key(doc), &doc.id)) == Ordering::Less
    }
}

/// Filter, sort and paging options for searching tasks.
///
/// Empty lists match everything. Paging is keyset-based: use
/// [`FetchQuery::next_page`] to continue after a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchQuery {
    pub task_types: Vec<String>,
    pub statuses: Vec<TaskStatus>,
    pub scope: Option<String>,
    pub user: Option<String>,
    pub sort: FetchSort,
    pub size: Option<usize>,
    pub search_after: Option<SearchAfter>,
}

impl FetchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_types.push(task_type.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_sort(mut self, sort: FetchSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_search_after(mut self, cursor: SearchAfter) -> Self {
        self.search_after = Some(cursor);
        self
    }

    /// The same query positioned after the last document of `page`.
    ///
    /// `None` when the page is empty.
    pub fn next_page(&self, page: &FetchResult) -> Option<Self> {
        let last = page.docs.last()?;
        Some(self.clone().with_search_after(SearchAfter::new(last, self.sort)))
    }

    /// Whether a document passes this query's filters.
    pub fn matches(&self, doc: &TaskDocument) -> bool {
        (self.task_types.is_empty() || self.task_types.contains(&doc.task_type))
            && (self.statuses.is_empty() || self.statuses.contains(&doc.status))
            && self
                .scope
                .as_ref()
                .is_none_or(|scope| doc.scope.contains(scope))
            && self
                .user
                .as_ref()
                .is_none_or(|user| doc.user.as_ref() == Some(user))
    }
}

/// A page of search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    /// Documents in this page.
    pub docs: Vec<TaskDocument>,
    /// Number of documents matching the filters, ignoring paging.
    pub total: usize,
}

impl FetchResult {
    /// Ids of the documents in this page, in order.
    pub fn ids(&self) -> Vec<&str> {
        self.docs.iter().map(|doc| doc.id.as_str()).collect()
    }
}

/// Parameters of one atomic claim.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRequest {
    /// Node id written into `owner_id` of every claimed task.
    pub owner_id: String,
    /// Maximum number of tasks to claim.
    pub size: usize,
    /// Only tasks of these types are eligible.
    pub task_types: Vec<String>,
    /// Reference time for the claim predicate.
    pub now: DateTime<Utc>,
    /// Written into `retry_at`; the claim expires after this.
    pub claim_ownership_until: DateTime<Utc>,
}

/// Outcome of an atomic claim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimResult {
    /// Tasks now held by the requesting owner, oldest-due first.
    pub claimed: Vec<TaskDocument>,
}

impl ClaimResult {
    pub fn claimed_count(&self) -> usize {
        self.claimed.len()
    }
}
