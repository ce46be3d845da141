//! State - タスクの状態
//!
//! # 状態遷移
//! - Created -> Locked -> Completed（終端、active index から削除）
//! - Locked -> Created: FAIL（retries > 0）または lock の期限切れ
//! - Locked -> Blocked: FAIL（retries == 0）
//! - Blocked -> Created: UPDATE_RETRIES（retries > 0）
//! - 任意の active 状態 -> Canceled（終端）

use serde::{Deserialize, Serialize};

/// TaskState はタスクの状態を表現
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Waiting for a subscription to lock it.
    Created,

    /// Leased by a worker until `lock_expires_at`.
    Locked,

    /// Out of retries; parked until UPDATE_RETRIES.
    Blocked,

    Completed,

    Canceled,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Canceled)
    }

    /// Can the dispatcher offer this task to a subscription?
    pub fn is_lockable(self) -> bool {
        matches!(self, TaskState::Created)
    }
}
