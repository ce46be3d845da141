//! Status - partition の状態集計

use serde::{Deserialize, Serialize};

use crate::domain::{PartitionId, TaskState};
use crate::ports::TaskStore;

/// Active task counts per state plus subscription and log sizes.
///
/// Completed and canceled tasks leave the store, so they are not counted here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStatus {
    pub partition_id: PartitionId,
    pub created: usize,
    pub locked: usize,
    pub blocked: usize,
    pub subscriptions: usize,
    pub records: u64,
}

impl PartitionStatus {
    pub fn collect(
        partition_id: PartitionId,
        store: &dyn TaskStore,
        subscriptions: usize,
        records: u64,
    ) -> Self {
        Self {
            partition_id,
            created: store.count_in_state(TaskState::Created),
            locked: store.count_in_state(TaskState::Locked),
            blocked: store.count_in_state(TaskState::Blocked),
            subscriptions,
            records,
        }
    }

    pub fn active_tasks(&self) -> usize {
        self.created + self.locked + self.blocked
    }
}
