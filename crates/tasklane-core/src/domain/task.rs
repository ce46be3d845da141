//! Task value and the record kept in the task store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskKey;
use super::payload::Payload;
use super::state::TaskState;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The value carried by every task record in the log.
///
/// Commands fill in only the fields they need; events carry the full task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskValue {
    pub task_type: TaskType,
    pub retries: i32,
    pub lock_owner: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub payload: Option<Payload>,
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
}

impl TaskValue {
    pub fn new(task_type: TaskType, retries: i32) -> Self {
        Self {
            task_type,
            retries,
            lock_owner: None,
            lock_expires_at: None,
            payload: None,
            custom_headers: BTreeMap::new(),
        }
    }

    /// Overlay the fields a request actually set onto this value.
    ///
    /// `task_type` is identity and never overwritten.
    pub fn merge_from(&mut self, request: &TaskValue) {
        if request.payload.is_some() {
            self.payload = request.payload.clone();
        }
        if request.lock_owner.is_some() {
            self.lock_owner = request.lock_owner.clone();
        }
        for (name, value) in &request.custom_headers {
            self.custom_headers.insert(name.clone(), value.clone());
        }
    }
}

/// Store entry: the latest value of a task plus its lifecycle state.
///
/// All state transitions happen through the methods below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub key: TaskKey,
    pub state: TaskState,
    pub value: TaskValue,
}

impl TaskRecord {
    pub fn created(key: TaskKey, value: TaskValue) -> Self {
        let mut value = value;
        value.lock_owner = None;
        value.lock_expires_at = None;
        Self {
            key,
            state: TaskState::Created,
            value,
        }
    }

    pub fn task_type(&self) -> &TaskType {
        &self.value.task_type
    }

    pub fn is_locked_by(&self, owner: Option<&str>) -> bool {
        self.state == TaskState::Locked && self.value.lock_owner.as_deref() == owner
    }

    pub fn lock(&mut self, owner: String, expires_at: DateTime<Utc>) {
        self.state = TaskState::Locked;
        self.value.lock_owner = Some(owner);
        self.value.lock_expires_at = Some(expires_at);
    }

    /// Drop the lease; with retries left the task becomes eligible again, otherwise it parks.
    pub fn fail(&mut self, retries: i32) {
        self.value.retries = retries;
        self.clear_lock();
        self.state = if retries > 0 {
            TaskState::Created
        } else {
            TaskState::Blocked
        };
    }

    pub fn expire_lock(&mut self) {
        self.clear_lock();
        self.state = TaskState::Created;
    }

    pub fn update_retries(&mut self, retries: i32) {
        self.value.retries = retries;
        if self.state == TaskState::Blocked {
            self.state = TaskState::Created;
        }
    }

    pub fn lock_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Locked
            && self
                .value
                .lock_expires_at
                .is_some_and(|expires_at| expires_at <= now)
    }

    fn clear_lock(&mut self) {
        self.value.lock_owner = None;
        self.value.lock_expires_at = None;
    }
}
