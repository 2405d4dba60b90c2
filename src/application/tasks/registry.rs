use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::types::{TaskFailure, TaskKind};

/// What a handler gets to see of the task it runs.
#[derive(Debug, Clone)]
pub struct TaskInvocation {
    pub task_id: Uuid,
    pub kind: TaskKind,
    pub payload: Value,
    /// Zero on the first run.
    pub retries: u32,
    /// When the worker gives up on this run. Blocking work should stop by then.
    pub deadline: Instant,
}

#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, invocation: &TaskInvocation) -> Result<Value, TaskFailure>;
}

/// Handlers keyed by task kind, populated once at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> impl Iterator<Item = TaskKind> + '_ {
        self.handlers.keys().copied()
    }
}
