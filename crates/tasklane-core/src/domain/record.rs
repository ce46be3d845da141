//! Log records: classification, intents and the typed command surface.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::RejectionReason;
use super::ids::{Position, SubscriberKey, TaskKey};
use super::payload::Payload;
use super::task::{TaskType, TaskValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    Command,
    Event,
    CommandRejection,
}

/// The verb of a record. Commands and their events share one closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Create,
    Created,
    Lock,
    Locked,
    Complete,
    Completed,
    Fail,
    Failed,
    UpdateRetries,
    RetriesUpdated,
    ExpireLock,
    LockExpired,
    Cancel,
    Canceled,
}

impl Intent {
    pub fn is_command(self) -> bool {
        matches!(
            self,
            Intent::Create
                | Intent::Lock
                | Intent::Complete
                | Intent::Fail
                | Intent::UpdateRetries
                | Intent::ExpireLock
                | Intent::Cancel
        )
    }

    /// Past-tense event written when the command is applied.
    pub fn event(self) -> Option<Intent> {
        match self {
            Intent::Create => Some(Intent::Created),
            Intent::Lock => Some(Intent::Locked),
            Intent::Complete => Some(Intent::Completed),
            Intent::Fail => Some(Intent::Failed),
            Intent::UpdateRetries => Some(Intent::RetriesUpdated),
            Intent::ExpireLock => Some(Intent::LockExpired),
            Intent::Cancel => Some(Intent::Canceled),
            Intent::Created
            | Intent::Locked
            | Intent::Completed
            | Intent::Failed
            | Intent::RetriesUpdated
            | Intent::LockExpired
            | Intent::Canceled => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Subscription a LOCK was issued for (and the LOCKED event it produced).
    pub subscriber_key: Option<SubscriberKey>,
    pub rejection_reason: Option<RejectionReason>,
}

/// A record as written to the partition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub position: Position,
    /// Command this record was written in response to.
    pub source_position: Option<Position>,
    pub key: TaskKey,
    pub record_type: RecordType,
    pub intent: Intent,
    pub value: TaskValue,
    pub metadata: RecordMetadata,
}

impl Record {
    pub fn is_rejection(&self) -> bool {
        self.record_type == RecordType::CommandRejection
    }
}

/// A record that has not been given a position yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDraft {
    pub source_position: Option<Position>,
    pub key: TaskKey,
    pub record_type: RecordType,
    pub intent: Intent,
    pub value: TaskValue,
    pub metadata: RecordMetadata,
}

impl RecordDraft {
    pub fn command(key: TaskKey, intent: Intent, value: TaskValue) -> Self {
        Self {
            source_position: None,
            key,
            record_type: RecordType::Command,
            intent,
            value,
            metadata: RecordMetadata::default(),
        }
    }

    pub fn at(self, position: Position) -> Record {
        Record {
            position,
            source_position: self.source_position,
            key: self.key,
            record_type: self.record_type,
            intent: self.intent,
            value: self.value,
            metadata: self.metadata,
        }
    }
}

/// Request to create a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub task_type: TaskType,
    pub retries: i32,
    pub payload: Option<Payload>,
    pub custom_headers: BTreeMap<String, String>,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>, retries: i32) -> Self {
        Self {
            task_type: TaskType::new(task_type),
            retries,
            payload: None,
            custom_headers: BTreeMap::new(),
        }
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(name.into(), value.into());
        self
    }
}

/// Commands accepted by the task processor.
///
/// `Lock` and `ExpireLock` are only issued internally by the dispatcher and the reaper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskCommand {
    Create(NewTask),
    Lock {
        key: TaskKey,
        subscriber_key: SubscriberKey,
        lock_owner: String,
        lock_expires_at: DateTime<Utc>,
    },
    Complete {
        key: TaskKey,
        lock_owner: String,
        payload: Option<Payload>,
    },
    Fail {
        key: TaskKey,
        lock_owner: String,
        retries: i32,
    },
    UpdateRetries {
        key: TaskKey,
        retries: i32,
    },
    ExpireLock {
        key: TaskKey,
    },
    Cancel {
        key: TaskKey,
    },
}

impl TaskCommand {
    pub fn intent(&self) -> Intent {
        match self {
            TaskCommand::Create(_) => Intent::Create,
            TaskCommand::Lock { .. } => Intent::Lock,
            TaskCommand::Complete { .. } => Intent::Complete,
            TaskCommand::Fail { .. } => Intent::Fail,
            TaskCommand::UpdateRetries { .. } => Intent::UpdateRetries,
            TaskCommand::ExpireLock { .. } => Intent::ExpireLock,
            TaskCommand::Cancel { .. } => Intent::Cancel,
        }
    }

    /// `Lock` and `ExpireLock` never come from clients.
    pub fn is_internal(&self) -> bool {
        matches!(self, TaskCommand::Lock { .. } | TaskCommand::ExpireLock { .. })
    }

    /// Task addressed by the command; `None` for `Create`, whose key is not allocated yet.
    pub fn key(&self) -> Option<TaskKey> {
        match self {
            TaskCommand::Create(_) => None,
            TaskCommand::Lock { key, .. }
            | TaskCommand::Complete { key, .. }
            | TaskCommand::Fail { key, .. }
            | TaskCommand::UpdateRetries { key, .. }
            | TaskCommand::ExpireLock { key }
            | TaskCommand::Cancel { key } => Some(*key),
        }
    }

    /// Lower the command to a log draft.
    ///
    /// `Create` has no key yet; the caller passes the one allocated for it.
    /// Commands that only address a task carry an empty type, the processor
    /// never reads it from them.
    pub fn into_draft(self, new_key: TaskKey) -> RecordDraft {
        let intent = self.intent();
        match self {
            TaskCommand::Create(task) => {
                let mut value = TaskValue::new(task.task_type, task.retries);
                value.payload = task.payload;
                value.custom_headers = task.custom_headers;
                RecordDraft::command(new_key, intent, value)
            }
            TaskCommand::Lock {
                key,
                subscriber_key,
                lock_owner,
                lock_expires_at,
            } => {
                let mut value = addressing_value();
                value.lock_owner = Some(lock_owner);
                value.lock_expires_at = Some(lock_expires_at);
                let mut draft = RecordDraft::command(key, intent, value);
                draft.metadata.subscriber_key = Some(subscriber_key);
                draft
            }
            TaskCommand::Complete {
                key,
                lock_owner,
                payload,
            } => {
                let mut value = addressing_value();
                value.lock_owner = Some(lock_owner);
                value.payload = payload;
                RecordDraft::command(key, intent, value)
            }
            TaskCommand::Fail {
                key,
                lock_owner,
                retries,
            } => {
                let mut value = addressing_value();
                value.lock_owner = Some(lock_owner);
                value.retries = retries;
                RecordDraft::command(key, intent, value)
            }
            TaskCommand::UpdateRetries { key, retries } => {
                let mut value = addressing_value();
                value.retries = retries;
                RecordDraft::command(key, intent, value)
            }
            TaskCommand::ExpireLock { key } | TaskCommand::Cancel { key } => {
                RecordDraft::command(key, intent, addressing_value())
            }
        }
    }
}

fn addressing_value() -> TaskValue {
    TaskValue::new(TaskType::new(""), 0)
}
