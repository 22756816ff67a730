//! Task model and the observable task list

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type TaskId = Uuid;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Complete,
    Error,
    Disconnected,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// One background operation as the user sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    pub output: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the task still holds a cancellation handle
    pub cancellable: bool,
    pub hidden: bool,
}

impl Task {
    /// A running, hidden task
    pub fn new(kind: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            label: label.into(),
            status: TaskStatus::Running,
            progress: None,
            output: Vec::new(),
            result: None,
            error: None,
            cancellable: false,
            hidden: true,
        }
    }
}

/// Change notification for task list observers
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Added(Task),
    Updated(Task),
    Removed(TaskId),
}

#[derive(Default)]
struct TaskListState {
    tasks: Vec<Task>,
    cancels: HashMap<TaskId, CancellationToken>,
}

/// Shared, observable list of tasks
///
/// Cheap to clone. Every mutation is broadcast as a [`TaskEvent`]; slow
/// subscribers may miss events but can always re-read [`snapshot`](Self::snapshot).
#[derive(Clone)]
pub struct TaskList {
    state: Arc<Mutex<TaskListState>>,
    events: broadcast::Sender<TaskEvent>,
}

impl Default for TaskList {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskList {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(TaskListState::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: TaskEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Register a task together with the token that cancels it
    pub fn add(&self, mut task: Task, cancel: CancellationToken) -> TaskId {
        let id = task.id;
        task.cancellable = true;
        {
            let mut state = self.state.lock();
            state.cancels.insert(id, cancel);
            state.tasks.push(task.clone());
        }
        self.emit(TaskEvent::Added(task));
        id
    }

    /// Mutate a task in place; returns the updated copy
    pub fn update<F>(&self, id: TaskId, f: F) -> Option<Task>
    where
        F: FnOnce(&mut Task),
    {
        let updated = {
            let mut state = self.state.lock();
            let task = state.tasks.iter_mut().find(|t| t.id == id)?;
            f(task);
            task.clone()
        };
        self.emit(TaskEvent::Updated(updated.clone()));
        Some(updated)
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.state.lock().tasks.iter().find(|t| t.id == id).cloned()
    }

    /// All tasks, oldest first
    pub fn snapshot(&self) -> Vec<Task> {
        self.state.lock().tasks.clone()
    }

    /// Tasks past their visibility delay
    pub fn visible(&self) -> Vec<Task> {
        self.state
            .lock()
            .tasks
            .iter()
            .filter(|t| !t.hidden)
            .cloned()
            .collect()
    }

    /// Fire a running task's cancellation token
    pub fn cancel(&self, id: TaskId) -> bool {
        let token = self.state.lock().cancels.get(&id).cloned();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the cancellation handle once a task is terminal
    pub fn release_cancel(&self, id: TaskId) {
        let released = self.state.lock().cancels.remove(&id).is_some();
        if released {
            self.update(id, |t| t.cancellable = false);
        }
    }

    /// Remove a finished task; running tasks stay
    pub fn dismiss(&self, id: TaskId) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let before = state.tasks.len();
            state
                .tasks
                .retain(|t| t.id != id || !t.status.is_terminal());
            before != state.tasks.len()
        };
        if removed {
            self.emit(TaskEvent::Removed(id));
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_hidden_and_running() {
        let task = Task::new("project-update", "Updating web");
        assert!(task.hidden);
        assert_eq!(task.status, TaskStatus::Running);
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "project-update");
        assert_eq!(json["status"], "running");
    }

    #[test]
    fn test_cancel_fires_token_until_released() {
        let list = TaskList::new();
        let token = CancellationToken::new();
        let id = list.add(Task::new("k", "l"), token.clone());
        assert!(list.get(id).unwrap().cancellable);

        assert!(list.cancel(id));
        assert!(token.is_cancelled());

        list.release_cancel(id);
        assert!(!list.cancel(id));
        assert!(!list.get(id).unwrap().cancellable);
    }

    #[test]
    fn test_dismiss_only_terminal_tasks() {
        let list = TaskList::new();
        let id = list.add(Task::new("k", "l"), CancellationToken::new());
        assert!(!list.dismiss(id));

        list.update(id, |t| t.status = TaskStatus::Complete);
        assert!(list.dismiss(id));
        assert!(list.snapshot().is_empty());
    }

    #[test]
    fn test_updates_are_broadcast() {
        let list = TaskList::new();
        let mut events = list.subscribe();
        let id = list.add(Task::new("k", "l"), CancellationToken::new());
        list.update(id, |t| t.output.push("pulling".to_string()));

        assert!(matches!(events.try_recv().unwrap(), TaskEvent::Added(_)));
        match events.try_recv().unwrap() {
            TaskEvent::Updated(task) => assert_eq!(task.output, vec!["pulling"]),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
