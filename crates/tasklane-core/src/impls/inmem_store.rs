//! InMemoryTaskStore - BTreeMap ベースの task index
//!
//! # 実装詳細
//! - BTreeMap<TaskKey, TaskRecord> なので走査は常に key 順
//! - lockable / expired_locks は全件走査（store のサイズに比例、I/O なし）

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::domain::{TaskKey, TaskRecord, TaskState, TaskType};
use crate::ports::TaskStore;

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    records: BTreeMap<TaskKey, TaskRecord>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn get(&self, key: TaskKey) -> Option<&TaskRecord> {
        self.records.get(&key)
    }

    fn get_mut(&mut self, key: TaskKey) -> Option<&mut TaskRecord> {
        self.records.get_mut(&key)
    }

    fn insert(&mut self, record: TaskRecord) {
        self.records.insert(record.key, record);
    }

    fn remove(&mut self, key: TaskKey) -> Option<TaskRecord> {
        self.records.remove(&key)
    }

    fn lockable(&self, task_type: &TaskType) -> Vec<TaskKey> {
        self.records
            .values()
            .filter(|record| record.state.is_lockable() && record.task_type() == task_type)
            .map(|record| record.key)
            .collect()
    }

    fn expired_locks(&self, now: DateTime<Utc>) -> Vec<TaskKey> {
        self.records
            .values()
            .filter(|record| record.lock_expired_at(now))
            .map(|record| record.key)
            .collect()
    }

    fn count_in_state(&self, state: TaskState) -> usize {
        self.records.values().filter(|r| r.state == state).count()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
