//! Todo data service surface and a live in-memory store.
//!
//! `observe` returns a feed that yields the full current list first and then
//! the full list again after every change. The shell consumes it through a
//! [`TodoSubscription`] that it releases on sign-out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: Uuid,
    pub content: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TodoError {
    #[error("todo {0} not found")]
    NotFound(Uuid),
}

#[async_trait]
pub trait TodoStore: Send + Sync {
    async fn create(&self, content: Option<String>) -> Result<Todo, TodoError>;

    async fn delete(&self, id: Uuid) -> Result<(), TodoError>;

    /// Start a new feed. Each feed is independent and starts from the
    /// current list.
    fn observe(&self) -> TodoFeed;
}

/// Lazy stream of todo snapshots.
pub struct TodoFeed {
    receiver: watch::Receiver<Vec<Todo>>,
    started: bool,
}

impl TodoFeed {
    /// Next snapshot, or `None` once the store is gone.
    pub async fn next(&mut self) -> Option<Vec<Todo>> {
        if self.started {
            self.receiver.changed().await.ok()?;
        } else {
            self.started = true;
        }
        Some(self.receiver.borrow_and_update().clone())
    }
}

pub struct MemoryTodoStore {
    sender: watch::Sender<Vec<Todo>>,
}

impl Default for MemoryTodoStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTodoStore {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Vec::new());
        Self { sender }
    }
}

#[async_trait]
impl TodoStore for MemoryTodoStore {
    async fn create(&self, content: Option<String>) -> Result<Todo, TodoError> {
        let todo = Todo {
            id: Uuid::new_v4(),
            content,
        };
        let created = todo.clone();
        self.sender.send_modify(|todos| todos.push(created));
        debug!(id = %todo.id, "todo created");
        Ok(todo)
    }

    async fn delete(&self, id: Uuid) -> Result<(), TodoError> {
        let mut found = false;
        self.sender.send_if_modified(|todos| {
            let before = todos.len();
            todos.retain(|todo| todo.id != id);
            found = todos.len() != before;
            found
        });

        if found {
            debug!(id = %id, "todo deleted");
            Ok(())
        } else {
            Err(TodoError::NotFound(id))
        }
    }

    fn observe(&self) -> TodoFeed {
        TodoFeed {
            receiver: self.sender.subscribe(),
            started: false,
        }
    }
}

/// Background task pushing every snapshot of a feed into `render`. Dropping
/// the subscription cancels it.
pub struct TodoSubscription {
    handle: JoinHandle<()>,
}

impl TodoSubscription {
    pub fn spawn<F>(mut feed: TodoFeed, mut render: F) -> Self
    where
        F: FnMut(Vec<Todo>) + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            while let Some(todos) = feed.next().await {
                render(todos);
            }
            debug!("todo feed closed");
        });
        Self { handle }
    }

    pub fn cancel(self) {
        drop(self);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for TodoSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
