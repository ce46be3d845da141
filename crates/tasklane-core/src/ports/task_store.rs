//! TaskStore port - active なタスクの index
//!
//! partition の processor だけが書き込む。terminal になったタスクは削除されるので、
//! ここにあるのは Created / Locked / Blocked のタスクだけ。

use chrono::{DateTime, Utc};

use crate::domain::{TaskKey, TaskRecord, TaskState, TaskType};

/// TaskStore は task key でタスクを引く in-memory index
///
/// # 設計原則
/// - 走査結果は key 順（= 作成順）で返す。dispatch と reaper の順序を決定的にするため
/// - 単一 writer 前提なので内部にロックを持たない
pub trait TaskStore: Send {
    fn get(&self, key: TaskKey) -> Option<&TaskRecord>;

    fn get_mut(&mut self, key: TaskKey) -> Option<&mut TaskRecord>;

    fn insert(&mut self, record: TaskRecord);

    fn remove(&mut self, key: TaskKey) -> Option<TaskRecord>;

    /// Keys of CREATED tasks of the given type, oldest first.
    fn lockable(&self, task_type: &TaskType) -> Vec<TaskKey>;

    /// Keys of LOCKED tasks whose lease ended at or before `now`, oldest first.
    fn expired_locks(&self, now: DateTime<Utc>) -> Vec<TaskKey>;

    fn count_in_state(&self, state: TaskState) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
