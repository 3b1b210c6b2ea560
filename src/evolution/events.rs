//! 阶段事件：每次状态迁移广播给所有监听器，监听器 panic 被吞掉

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::evolution::types::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Started,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseEvent {
    pub task_id: String,
    pub phase: TaskStatus,
    pub status: PhaseStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl PhaseEvent {
    pub fn new(task_id: &str, phase: TaskStatus, status: PhaseStatus, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            phase,
            status,
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

pub type Listener = Arc<dyn Fn(&PhaseEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<BTreeMap<u64, Listener>>,
    next_id: Mutex<u64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Listener) -> u64 {
        let mut next = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
        *next += 1;
        let id = *next;
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, listener);
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn emit(&self, event: PhaseEvent) {
        tracing::debug!(
            task_id = %event.task_id,
            phase = %event.phase,
            status = ?event.status,
            "{}",
            event.message
        );
        // 先复制出监听器，回调里再订阅/退订不会死锁
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                tracing::warn!(task_id = %event.task_id, "event listener panicked");
            }
        }
    }
}
