use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reqwest::{StatusCode, Url};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::FilterMode;
use crate::error::ClientError;
use crate::gateway::{decode, endpoint, HttpGateway};
use crate::models::{FilterState, Task, TaskDraft, TaskId};
use crate::session::SessionState;

pub const LOAD_FAILED: &str = "Failed to load tasks";
pub const SAVE_FAILED: &str = "Save failed";
pub const DELETE_FAILED: &str = "Delete failed";

/// What the task view currently shows.
#[derive(Debug, Clone, Default)]
pub struct TaskView {
    pub tasks: Vec<Task>,
    pub filter: FilterState,
    pub error: Option<String>,
}

/// The view plus the session generation it was filled under.
struct Mirror {
    shown: TaskView,
    generation: u64,
}

/// Mirror of the server's task collection. Every mutation is followed by a
/// fresh list instead of patching the local copy. The mirror is emptied as
/// soon as the session it belongs to ends, whichever request saw the 401.
pub struct TaskSyncController {
    gateway: Arc<HttpGateway>,
    session: SessionState,
    task_url: String,
    mode: FilterMode,
    issued: AtomicU64,
    mirror: Mutex<Mirror>,
}

impl TaskSyncController {
    pub fn new(gateway: Arc<HttpGateway>, task_url: impl Into<String>, mode: FilterMode) -> Self {
        let session = gateway.session().clone();
        let generation = session.generation();
        TaskSyncController {
            gateway,
            session,
            task_url: task_url.into(),
            mode,
            issued: AtomicU64::new(0),
            mirror: Mutex::new(Mirror {
                shown: TaskView::default(),
                generation,
            }),
        }
    }

    pub fn filter_mode(&self) -> FilterMode {
        self.mode
    }

    pub fn snapshot(&self) -> TaskView {
        self.view().shown.clone()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.view().shown.tasks.clone()
    }

    /// Tasks in the current view that are overdue right now.
    pub fn overdue(&self) -> Vec<Task> {
        let now = OffsetDateTime::now_utc();
        self.view()
            .shown
            .tasks
            .iter()
            .filter(|t| t.is_overdue(now))
            .cloned()
            .collect()
    }

    /// Lists tasks matching `filter`. The result always goes back to the
    /// caller, but it only replaces the view if no newer list was issued
    /// while this one was in flight.
    pub async fn list(&self, filter: FilterState) -> Result<Vec<Task>, ClientError> {
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = {
            let mut mirror = self.view();
            mirror.shown.filter = filter;
            mirror.generation
        };

        let result = self.fetch(filter).await;

        let mut mirror = self.view();
        if mirror.generation != generation {
            debug!(seq, "Session changed while listing, dropping result");
            return result;
        }
        if self.issued.load(Ordering::SeqCst) != seq {
            debug!(seq, "Discarding stale task list");
            return result;
        }

        match &result {
            Ok(tasks) => {
                info!(count = tasks.len(), "Listed tasks");
                mirror.shown.tasks = tasks.clone();
                mirror.shown.error = None;
            }
            Err(err) => {
                warn!(error = %err, "Listing tasks failed");
                mirror.shown.error = Some(err.user_message(LOAD_FAILED));
            }
        }
        result
    }

    /// Re-lists with the filter currently in the view.
    pub async fn refresh(&self) -> Result<Vec<Task>, ClientError> {
        let filter = self.view().shown.filter;
        self.list(filter).await
    }

    pub async fn get(&self, id: &TaskId) -> Result<Task, ClientError> {
        let url = self.task_endpoint(id)?;
        decode(self.gateway.get(url).await?)
    }

    pub async fn create(&self, draft: &TaskDraft) -> Result<Task, ClientError> {
        let result: Result<Task, ClientError> = async {
            draft.validate()?;
            let url = endpoint(&self.task_url, "")?;
            decode(self.gateway.post(url, draft).await?)
        }
        .await;

        let task = self.settle(result, SAVE_FAILED)?;
        info!(id = %task.id, title = %task.title, "Created task");
        self.refresh_after_mutation().await;
        Ok(task)
    }

    /// Replaces the whole record; fields missing from `draft` are cleared.
    pub async fn update(&self, id: &TaskId, draft: &TaskDraft) -> Result<Task, ClientError> {
        let result: Result<Task, ClientError> = async {
            draft.validate()?;
            let url = self.task_endpoint(id)?;
            decode(self.gateway.put(url, draft).await?)
        }
        .await;

        let task = self.settle(result, SAVE_FAILED)?;
        info!(id = %task.id, status = %task.status, "Updated task");
        self.refresh_after_mutation().await;
        Ok(task)
    }

    pub async fn remove(&self, id: &TaskId) -> Result<(), ClientError> {
        let result: Result<(), ClientError> = async {
            let url = self.task_endpoint(id)?;
            self.gateway.delete(url).await.map(drop)
        }
        .await;

        self.settle(result, DELETE_FAILED)?;
        info!(%id, "Deleted task");
        self.refresh_after_mutation().await;
        Ok(())
    }

    async fn fetch(&self, filter: FilterState) -> Result<Vec<Task>, ClientError> {
        let mut url = endpoint(&self.task_url, "")?;
        if self.mode == FilterMode::Server {
            append_query(&mut url, &filter);
        }

        let body = match self.gateway.get(url).await {
            Ok(body) => body,
            Err(ClientError::Status {
                status: StatusCode::NOT_FOUND,
                ..
            }) => {
                debug!("Task list answered 404, treating as empty");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        let tasks = decode_task_list(body)?;
        Ok(match self.mode {
            FilterMode::Server => tasks,
            FilterMode::Client => filter.apply(tasks),
        })
    }

    fn task_endpoint(&self, id: &TaskId) -> Result<Url, ClientError> {
        let mut url = endpoint(&self.task_url, "")?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Config(format!("task URL {:?} cannot take a path", self.task_url)))?
            .pop_if_empty()
            .push(id.as_str());
        Ok(url)
    }

    /// Records a failure for the view. A 401 is left out: the session has
    /// already ended and the mirror with it.
    fn settle<T>(&self, result: Result<T, ClientError>, fallback: &str) -> Result<T, ClientError> {
        result.inspect_err(|err| {
            warn!(error = %err, "Task operation failed");
            if !err.is_unauthorized() {
                self.view().shown.error = Some(err.user_message(fallback));
            }
        })
    }

    async fn refresh_after_mutation(&self) {
        if let Err(err) = self.refresh().await {
            debug!(error = %err, "Refresh after mutation failed");
        }
    }

    /// Locks the mirror, emptying it first if the session moved on since it
    /// was filled. The filter survives.
    fn view(&self) -> MutexGuard<'_, Mirror> {
        let mut mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.session.generation();
        if mirror.generation != current {
            if !mirror.shown.tasks.is_empty() {
                info!("Session changed, clearing task view");
            }
            mirror.shown.tasks.clear();
            mirror.shown.error = None;
            mirror.generation = current;
        }
        mirror
    }
}

fn append_query(url: &mut Url, filter: &FilterState) {
    let pairs = filter.query_pairs();
    if pairs.is_empty() {
        return;
    }
    let mut query = url.query_pairs_mut();
    for (key, value) in pairs {
        query.append_pair(key, value);
    }
}

/// Accepts a bare array or a paged `{ "content": [...] }` object. Elements
/// that do not decode (unknown status, missing fields) are logged and left
/// out.
fn decode_task_list(body: Value) -> Result<Vec<Task>, ClientError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        Value::Object(mut page) => match page.remove("content") {
            Some(Value::Array(items)) => items,
            _ => return Err(ClientError::Decode("task list object has no content array".into())),
        },
        other => {
            return Err(ClientError::Decode(format!(
                "expected a task list, got {other}"
            )))
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|item| {
            let id = item.get("id").cloned();
            serde_json::from_value::<Task>(item)
                .inspect_err(|e| warn!(?id, error = %e, "Skipping undecodable task"))
                .ok()
        })
        .collect())
}
