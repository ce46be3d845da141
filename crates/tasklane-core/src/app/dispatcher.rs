//! Dispatcher - eligible なタスクを subscription に割り当てる
//!
//! dispatcher 自身は store も registry も変更しない。割り当てを決めたら
//! 内部 LOCK コマンドを返し、それが log を通って processor に適用される。
//!
//! # 選択ポリシー
//! task_type ごとの round-robin。候補は登録順に並んでおり、前回選んだ subscription の
//! 次から探し始める。credit が残っていない（または channel が閉じている）候補は飛ばす。
//!
//! # 予約
//! LOCK を書いてから適用されるまでの間に同じ credit を二重に使わないよう、
//! 未適用の LOCK の数を subscription ごとに数えておく。credit 自体は LOCKED の
//! 時点でしか減らさない。

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::trace;

use super::subscriptions::SubscriptionRegistry;
use crate::domain::{SubscriberKey, TaskCommand, TaskKey, TaskRecord, TaskType};
use crate::ports::TaskStore;

#[derive(Debug, Default)]
pub struct Dispatcher {
    cursors: HashMap<TaskType, usize>,
    reserved: HashMap<SubscriberKey, u64>,
    in_flight: HashSet<TaskKey>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to hand one eligible task to a subscription.
    pub fn offer(
        &mut self,
        task: &TaskRecord,
        registry: &SubscriptionRegistry,
        now: DateTime<Utc>,
    ) -> Option<TaskCommand> {
        if !task.state.is_lockable() || self.in_flight.contains(&task.key) {
            return None;
        }

        let candidates = registry.candidates(task.task_type());
        if candidates.is_empty() {
            return None;
        }

        let start = self.cursors.get(task.task_type()).copied().unwrap_or(0) % candidates.len();
        for step in 0..candidates.len() {
            let index = (start + step) % candidates.len();
            let subscriber_key = candidates[index];
            let Some(subscription) = registry.get(subscriber_key) else {
                continue;
            };
            if self.available_credits(subscription.subscriber_key, subscription.credits) == 0
                || !subscription.is_open()
            {
                continue;
            }

            self.cursors.insert(task.task_type().clone(), index + 1);
            *self.reserved.entry(subscriber_key).or_default() += 1;
            self.in_flight.insert(task.key);

            let lock_duration = chrono::Duration::from_std(subscription.lock_duration)
                .unwrap_or(chrono::Duration::MAX);
            let lock_expires_at = now
                .checked_add_signed(lock_duration)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);

            trace!(task_key = %task.key, %subscriber_key, "dispatching task");
            return Some(TaskCommand::Lock {
                key: task.key,
                subscriber_key,
                lock_owner: subscription.lock_owner.clone(),
                lock_expires_at,
            });
        }

        None
    }

    /// Offer every waiting task of `task_type`, oldest first, until credits run out.
    pub fn offer_waiting(
        &mut self,
        task_type: &TaskType,
        store: &dyn TaskStore,
        registry: &SubscriptionRegistry,
        now: DateTime<Utc>,
    ) -> Vec<TaskCommand> {
        let mut commands = Vec::new();
        for key in store.lockable(task_type) {
            let Some(task) = store.get(key) else {
                continue;
            };
            match self.offer(task, registry, now) {
                Some(command) => commands.push(command),
                None if self.in_flight.contains(&key) => continue,
                // no credit left anywhere for this type
                None => break,
            }
        }
        commands
    }

    /// A LOCK issued by this dispatcher was applied or rejected.
    pub fn settle(&mut self, key: TaskKey, subscriber_key: Option<SubscriberKey>) {
        self.in_flight.remove(&key);
        if let Some(subscriber_key) = subscriber_key
            && let Some(count) = self.reserved.get_mut(&subscriber_key)
        {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.reserved.remove(&subscriber_key);
            }
        }
    }

    pub fn forget_subscriber(&mut self, subscriber_key: SubscriberKey) {
        self.reserved.remove(&subscriber_key);
    }

    fn available_credits(&self, subscriber_key: SubscriberKey, credits: u64) -> u64 {
        credits.saturating_sub(self.reserved.get(&subscriber_key).copied().unwrap_or(0))
    }
}
