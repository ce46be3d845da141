//! SubscriptionRegistry - worker の subscription 管理
//!
//! # 学習ポイント
//! - subscription ごとの outbound channel（tokio mpsc）で push 配信を I/O から切り離す
//! - credit による flow control（dispatch 1 件につき 1 credit）
//! - task_type ごとの登録順リストで dispatcher の round-robin を決定的にする

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::{ControlError, PartitionId, Position, SubscriberKey, TaskKey, TaskType, TaskValue};
use crate::ports::IdGenerator;

/// A locked task pushed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribedTask {
    pub subscriber_key: SubscriberKey,
    pub key: TaskKey,
    /// Position of the LOCKED event.
    pub position: Position,
    pub value: TaskValue,
}

pub type TaskSender = mpsc::UnboundedSender<SubscribedTask>;
pub type TaskReceiver = mpsc::UnboundedReceiver<SubscribedTask>;

/// ADD_TASK_SUBSCRIPTION control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddSubscription {
    pub topic_name: String,
    pub partition_id: PartitionId,
    pub task_type: TaskType,
    pub lock_duration: Duration,
    pub lock_owner: String,
    pub credits: i64,
}

/// INCREASE_TASK_SUBSCRIPTION_CREDITS control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncreaseCredits {
    pub topic_name: String,
    pub partition_id: PartitionId,
    pub subscriber_key: SubscriberKey,
    pub credits: i64,
}

#[derive(Debug)]
pub struct Subscription {
    pub subscriber_key: SubscriberKey,
    pub task_type: TaskType,
    pub lock_duration: Duration,
    pub lock_owner: String,
    pub credits: u64,
    channel: TaskSender,
}

impl Subscription {
    /// Best-effort: the receiver may be gone before the registry hears about it.
    pub fn is_open(&self) -> bool {
        !self.channel.is_closed()
    }

    /// Non-blocking enqueue. `false` when the receiver is gone.
    pub fn push(&self, task: SubscribedTask) -> bool {
        self.channel.send(task).is_ok()
    }
}

/// SubscriptionRegistry は partition 上の active な subscription を保持
///
/// processor の単一ループからのみ変更される。
pub struct SubscriptionRegistry {
    subscriptions: HashMap<SubscriberKey, Subscription>,
    by_type: HashMap<TaskType, Vec<SubscriberKey>>,
    ids: Arc<dyn IdGenerator>,
}

impl SubscriptionRegistry {
    pub const NON_POSITIVE_LOCK_DURATION: &'static str =
        "Cannot add task subscription. Lock duration must be positive.";
    pub const UNKNOWN_SUBSCRIPTION: &'static str =
        "Cannot increase task subscription credits. Subscription does not exist.";

    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            subscriptions: HashMap::new(),
            by_type: HashMap::new(),
            ids,
        }
    }

    /// Register a subscription. Validation happens before anything is stored.
    pub fn add(
        &mut self,
        request: &AddSubscription,
        channel: TaskSender,
    ) -> Result<SubscriberKey, ControlError> {
        let credits = positive_credits(request.credits)?;
        if request.lock_duration.is_zero() {
            return Err(ControlError::request_processing_failure(
                Self::NON_POSITIVE_LOCK_DURATION,
            ));
        }

        let subscriber_key = self.ids.generate_subscriber_key();
        let subscription = Subscription {
            subscriber_key,
            task_type: request.task_type.clone(),
            lock_duration: request.lock_duration,
            lock_owner: request.lock_owner.clone(),
            credits,
            channel,
        };
        self.subscriptions.insert(subscriber_key, subscription);
        self.by_type
            .entry(request.task_type.clone())
            .or_default()
            .push(subscriber_key);

        debug!(%subscriber_key, task_type = %request.task_type, credits, "subscription added");
        Ok(subscriber_key)
    }

    pub fn increase_credits(
        &mut self,
        subscriber_key: SubscriberKey,
        delta: i64,
    ) -> Result<&Subscription, ControlError> {
        let delta = positive_credits(delta)?;
        let subscription = self
            .subscriptions
            .get_mut(&subscriber_key)
            .ok_or_else(|| ControlError::request_processing_failure(Self::UNKNOWN_SUBSCRIPTION))?;
        subscription.credits = subscription.credits.saturating_add(delta);
        Ok(subscription)
    }

    /// Idempotent; returns the removed subscription if there was one.
    pub fn remove(&mut self, subscriber_key: SubscriberKey) -> Option<Subscription> {
        let subscription = self.subscriptions.remove(&subscriber_key)?;
        if let Some(keys) = self.by_type.get_mut(&subscription.task_type) {
            keys.retain(|key| *key != subscriber_key);
            if keys.is_empty() {
                self.by_type.remove(&subscription.task_type);
            }
        }
        debug!(%subscriber_key, "subscription removed");
        Some(subscription)
    }

    /// Take one credit at a successful LOCK. `false` if the subscription is gone or dry.
    pub fn consume_credit(&mut self, subscriber_key: SubscriberKey) -> bool {
        match self.subscriptions.get_mut(&subscriber_key) {
            Some(subscription) if subscription.credits > 0 => {
                subscription.credits -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, subscriber_key: SubscriberKey) -> Option<&Subscription> {
        self.subscriptions.get(&subscriber_key)
    }

    /// Subscriptions for a task type, in registration order.
    pub fn candidates(&self, task_type: &TaskType) -> &[SubscriberKey] {
        self.by_type
            .get(task_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

fn positive_credits(credits: i64) -> Result<u64, ControlError> {
    if credits <= 0 {
        return Err(ControlError::non_positive_credits());
    }
    Ok(credits as u64)
}
