//! TaskProcessor - partition の状態機械
//!
//! log から読んだ COMMAND record を 1 件ずつ適用し、書き込むべき record
//! （event / rejection / 後続の内部コマンド）を返す。
//!
//! # 設計原則
//! - store と registry を変更するのはここだけ
//! - 前提条件違反は `Err` にせず COMMAND_REJECTION record を返す。状態は一切変えない
//! - event と rejection は processor にとって no-op（replay しても同じ結果になる）

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::dispatcher::Dispatcher;
use super::subscriptions::{AddSubscription, SubscribedTask, SubscriptionRegistry, TaskSender};
use crate::domain::{
    ControlError, Intent, Record, RecordDraft, RecordMetadata, RecordType, RejectionReason,
    SubscriberKey, TaskRecord, TaskState, TaskType,
};
use crate::ports::{Clock, TaskStore};

pub struct TaskProcessor {
    store: Box<dyn TaskStore>,
    subscriptions: SubscriptionRegistry,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
}

impl TaskProcessor {
    pub fn new(
        store: Box<dyn TaskStore>,
        subscriptions: SubscriptionRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            subscriptions,
            dispatcher: Dispatcher::new(),
            clock,
        }
    }

    pub fn store(&self) -> &dyn TaskStore {
        self.store.as_ref()
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Apply one record read from the log.
    pub fn process(&mut self, record: &Record) -> Vec<RecordDraft> {
        if record.record_type != RecordType::Command {
            return Vec::new();
        }

        let now = self.clock.now();
        let writes = match record.intent {
            Intent::Create => self.create(record, now),
            Intent::Lock => self.lock(record, now),
            Intent::Complete => self.complete(record),
            Intent::Fail => self.fail(record, now),
            Intent::UpdateRetries => self.update_retries(record, now),
            Intent::ExpireLock => self.expire_lock(record, now),
            Intent::Cancel => self.cancel(record),
            Intent::Created
            | Intent::Locked
            | Intent::Completed
            | Intent::Failed
            | Intent::RetriesUpdated
            | Intent::LockExpired
            | Intent::Canceled => {
                warn!(position = %record.position, intent = ?record.intent, "event intent written as command, ignoring");
                Vec::new()
            }
        };

        if let Some(rejection) = writes.iter().find(|w| w.record_type == RecordType::CommandRejection) {
            debug!(
                task_key = %record.key,
                intent = ?record.intent,
                reason = ?rejection.metadata.rejection_reason,
                "command rejected"
            );
        }
        writes
    }

    fn create(&mut self, record: &Record, now: DateTime<Utc>) -> Vec<RecordDraft> {
        if record.value.retries < 0 {
            return vec![rejection(record, RejectionReason::InvalidRetries)];
        }
        let task = TaskRecord::created(record.key, record.value.clone());
        let mut writes = vec![event(record, &task)];
        self.store.insert(task);
        writes.extend(self.offer(record, now));
        writes
    }

    fn lock(&mut self, record: &Record, now: DateTime<Utc>) -> Vec<RecordDraft> {
        let subscriber_key = record.metadata.subscriber_key;
        self.dispatcher.settle(record.key, subscriber_key);

        let checked = self.check_lock(record, subscriber_key, now);
        let (subscriber_key, lock_owner, expires_at) = match checked {
            Ok(lock) => lock,
            Err(reason) => {
                let mut writes = vec![rejection(record, reason)];
                // the task did not move; let another subscription have it
                writes.extend(self.offer(record, now));
                return writes;
            }
        };

        let Some(task) = self.store.get_mut(record.key) else {
            return vec![rejection(record, RejectionReason::TaskNotFound)];
        };
        task.lock(lock_owner, expires_at);
        self.subscriptions.consume_credit(subscriber_key);

        let mut locked = event(record, task);
        locked.metadata.subscriber_key = Some(subscriber_key);
        vec![locked]
    }

    fn check_lock(
        &self,
        record: &Record,
        subscriber_key: Option<SubscriberKey>,
        now: DateTime<Utc>,
    ) -> Result<(SubscriberKey, String, DateTime<Utc>), RejectionReason> {
        let task = self
            .store
            .get(record.key)
            .ok_or(RejectionReason::TaskNotFound)?;
        if task.state != TaskState::Created {
            return Err(RejectionReason::InvalidState);
        }
        let expires_at = record
            .value
            .lock_expires_at
            .filter(|expires_at| *expires_at > now)
            .ok_or(RejectionReason::LockTimeNotInFuture)?;
        let subscription = subscriber_key
            .and_then(|key| self.subscriptions.get(key))
            .ok_or(RejectionReason::SubscriptionClosed)?;
        if subscription.task_type != *task.task_type() {
            return Err(RejectionReason::TaskTypeMismatch);
        }
        if subscription.credits == 0 {
            return Err(RejectionReason::NoCredits);
        }
        // the owner is whatever the subscription registered, never what the record claims
        Ok((
            subscription.subscriber_key,
            subscription.lock_owner.clone(),
            expires_at,
        ))
    }

    fn complete(&mut self, record: &Record) -> Vec<RecordDraft> {
        if let Err(reason) = self.check_owned(record) {
            return vec![rejection(record, reason)];
        }
        if let Some(payload) = &record.value.payload
            && let Err(err) = payload.validate()
        {
            return vec![rejection(record, RejectionReason::InvalidPayload(err.to_string()))];
        }

        let Some(mut task) = self.store.remove(record.key) else {
            return vec![rejection(record, RejectionReason::TaskNotFound)];
        };
        task.value.merge_from(&record.value);
        task.state = TaskState::Completed;
        vec![event(record, &task)]
    }

    fn fail(&mut self, record: &Record, now: DateTime<Utc>) -> Vec<RecordDraft> {
        if let Err(reason) = self.check_owned(record) {
            return vec![rejection(record, reason)];
        }
        if record.value.retries < 0 {
            return vec![rejection(record, RejectionReason::InvalidRetries)];
        }

        let Some(task) = self.store.get_mut(record.key) else {
            return vec![rejection(record, RejectionReason::TaskNotFound)];
        };
        task.fail(record.value.retries);
        let mut writes = vec![event(record, task)];
        writes.extend(self.offer(record, now));
        writes
    }

    fn update_retries(&mut self, record: &Record, now: DateTime<Utc>) -> Vec<RecordDraft> {
        let Some(task) = self.store.get_mut(record.key) else {
            return vec![rejection(record, RejectionReason::TaskNotFound)];
        };
        if task.state == TaskState::Locked || task.state.is_terminal() {
            return vec![rejection(record, RejectionReason::InvalidState)];
        }
        if record.value.retries <= 0 {
            return vec![rejection(record, RejectionReason::InvalidRetries)];
        }

        task.update_retries(record.value.retries);
        let mut writes = vec![event(record, task)];
        writes.extend(self.offer(record, now));
        writes
    }

    fn expire_lock(&mut self, record: &Record, now: DateTime<Utc>) -> Vec<RecordDraft> {
        let Some(task) = self.store.get_mut(record.key) else {
            return vec![rejection(record, RejectionReason::TaskNotFound)];
        };
        if task.state != TaskState::Locked {
            return vec![rejection(record, RejectionReason::InvalidState)];
        }
        if !task.lock_expired_at(now) {
            return vec![rejection(record, RejectionReason::LockNotExpired)];
        }

        task.expire_lock();
        let mut writes = vec![event(record, task)];
        writes.extend(self.offer(record, now));
        writes
    }

    fn cancel(&mut self, record: &Record) -> Vec<RecordDraft> {
        let Some(mut task) = self.store.remove(record.key) else {
            return vec![rejection(record, RejectionReason::TaskNotFound)];
        };
        task.state = TaskState::Canceled;
        vec![event(record, &task)]
    }

    /// COMPLETE and FAIL need the task LOCKED by the requesting owner.
    fn check_owned(&self, record: &Record) -> Result<(), RejectionReason> {
        let task = self
            .store
            .get(record.key)
            .ok_or(RejectionReason::TaskNotFound)?;
        if task.state != TaskState::Locked {
            return Err(RejectionReason::InvalidState);
        }
        if !task.is_locked_by(record.value.lock_owner.as_deref()) {
            return Err(RejectionReason::LockOwnerMismatch);
        }
        Ok(())
    }

    /// Follow-up LOCK for the record's task, if it is eligible and someone can take it.
    fn offer(&mut self, record: &Record, now: DateTime<Utc>) -> Option<RecordDraft> {
        let task = self.store.get(record.key)?;
        let command = self.dispatcher.offer(task, &self.subscriptions, now)?;
        Some(follow_up(record, command.into_draft(record.key)))
    }

    /// ADD_TASK_SUBSCRIPTION. Returns the new key and LOCKs for tasks that were waiting.
    pub fn add_subscription(
        &mut self,
        request: &AddSubscription,
        channel: TaskSender,
    ) -> Result<(SubscriberKey, Vec<RecordDraft>), ControlError> {
        let subscriber_key = self.subscriptions.add(request, channel)?;
        let locks = self.offer_waiting(&request.task_type);
        Ok((subscriber_key, locks))
    }

    /// INCREASE_TASK_SUBSCRIPTION_CREDITS. Returns LOCKs for tasks that were waiting.
    pub fn increase_credits(
        &mut self,
        subscriber_key: SubscriberKey,
        credits: i64,
    ) -> Result<Vec<RecordDraft>, ControlError> {
        let task_type = self
            .subscriptions
            .increase_credits(subscriber_key, credits)?
            .task_type
            .clone();
        Ok(self.offer_waiting(&task_type))
    }

    /// Idempotent.
    pub fn remove_subscription(&mut self, subscriber_key: SubscriberKey) -> bool {
        self.dispatcher.forget_subscriber(subscriber_key);
        self.subscriptions.remove(subscriber_key).is_some()
    }

    fn offer_waiting(&mut self, task_type: &TaskType) -> Vec<RecordDraft> {
        let now = self.clock.now();
        self.dispatcher
            .offer_waiting(task_type, self.store.as_ref(), &self.subscriptions, now)
            .into_iter()
            .filter_map(|command| {
                let key = command.key()?;
                Some(command.into_draft(key))
            })
            .collect()
    }

    /// Push a freshly written LOCKED event to its subscriber.
    ///
    /// Returns `false` when the subscriber's channel turned out to be closed.
    pub fn deliver(&self, record: &Record) -> bool {
        if record.record_type != RecordType::Event || record.intent != Intent::Locked {
            return true;
        }
        let Some(subscriber_key) = record.metadata.subscriber_key else {
            return true;
        };
        let Some(subscription) = self.subscriptions.get(subscriber_key) else {
            return false;
        };

        let delivered = subscription.push(SubscribedTask {
            subscriber_key,
            key: record.key,
            position: record.position,
            value: record.value.clone(),
        });
        if !delivered {
            warn!(%subscriber_key, task_key = %record.key, "subscriber channel closed, lock will expire");
        }
        delivered
    }
}

fn event(command: &Record, task: &TaskRecord) -> RecordDraft {
    RecordDraft {
        source_position: Some(command.position),
        key: command.key,
        record_type: RecordType::Event,
        // process() only routes command intents here
        intent: command.intent.event().unwrap_or(command.intent),
        value: task.value.clone(),
        metadata: RecordMetadata::default(),
    }
}

fn rejection(command: &Record, reason: RejectionReason) -> RecordDraft {
    RecordDraft {
        source_position: Some(command.position),
        key: command.key,
        record_type: RecordType::CommandRejection,
        intent: command.intent,
        value: command.value.clone(),
        metadata: RecordMetadata {
            subscriber_key: command.metadata.subscriber_key,
            rejection_reason: Some(reason),
        },
    }
}

fn follow_up(command: &Record, mut draft: RecordDraft) -> RecordDraft {
    draft.source_position = Some(command.position);
    draft
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::subscriptions::TaskReceiver;
    use crate::domain::{NewTask, Position, TaskCommand, TaskKey};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::{Clock, FixedClock, UlidGenerator};
    use chrono::TimeZone;
    use rstest::rstest;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn processor(clock: &FixedClock) -> TaskProcessor {
        TaskProcessor::new(
            Box::new(InMemoryTaskStore::new()),
            SubscriptionRegistry::new(Arc::new(UlidGenerator::new(clock.clone()))),
            Arc::new(clock.clone()),
        )
    }

    fn subscribe(processor: &mut TaskProcessor, owner: &str) -> (SubscriberKey, TaskReceiver) {
        subscribe_to(processor, "foo", owner, 5)
    }

    fn subscribe_to(
        processor: &mut TaskProcessor,
        task_type: &str,
        owner: &str,
        credits: i64,
    ) -> (SubscriberKey, TaskReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let request = AddSubscription {
            topic_name: "test-topic".into(),
            partition_id: 0,
            task_type: TaskType::new(task_type),
            lock_duration: Duration::from_secs(60),
            lock_owner: owner.into(),
            credits,
        };
        let (key, _) = processor.add_subscription(&request, tx).unwrap();
        (key, rx)
    }

    fn lock_for(
        key: u64,
        subscriber_key: SubscriberKey,
        owner: &str,
        clock: &FixedClock,
    ) -> TaskCommand {
        TaskCommand::Lock {
            key: TaskKey::new(key),
            subscriber_key,
            lock_owner: owner.into(),
            lock_expires_at: clock.now() + chrono::Duration::seconds(60),
        }
    }

    fn reason(writes: &[RecordDraft]) -> Option<RejectionReason> {
        writes
            .first()
            .and_then(|w| w.metadata.rejection_reason.clone())
    }

    /// A command record as the log would hand it over; CREATE gets its position as key.
    fn at(position: u64, command: TaskCommand) -> Record {
        command
            .into_draft(TaskKey::new(position))
            .at(Position::new(position))
    }

    fn create(position: u64) -> Record {
        at(position, TaskCommand::Create(NewTask::new("foo", 3)))
    }

    #[test]
    fn non_command_records_are_ignored() {
        let clock = FixedClock::new(start());
        let mut processor = processor(&clock);
        let mut created = create(1);
        created.record_type = RecordType::Event;
        created.intent = Intent::Created;

        assert!(processor.process(&created).is_empty());
        assert!(processor.store().is_empty());
    }

    #[test]
    fn create_without_subscription_only_emits_created() {
        let clock = FixedClock::new(start());
        let mut processor = processor(&clock);

        let writes = processor.process(&create(1));

        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].record_type, RecordType::Event);
        assert_eq!(writes[0].intent, Intent::Created);
        assert_eq!(writes[0].source_position, Some(Position::new(1)));
        let task = processor.store().get(TaskKey::new(1)).unwrap();
        assert_eq!(task.state, TaskState::Created);
    }

    #[test]
    fn create_with_subscription_follows_up_with_lock() {
        let clock = FixedClock::new(start());
        let mut processor = processor(&clock);
        let (sub, _rx) = subscribe(&mut processor, "worker");

        let writes = processor.process(&create(1));

        assert_eq!(writes.len(), 2);
        let lock = &writes[1];
        assert_eq!(lock.record_type, RecordType::Command);
        assert_eq!(lock.intent, Intent::Lock);
        assert_eq!(lock.key, TaskKey::new(1));
        assert_eq!(lock.source_position, Some(Position::new(1)));
        assert_eq!(lock.metadata.subscriber_key, Some(sub));
        assert_eq!(
            lock.value.lock_expires_at,
            Some(start() + chrono::Duration::seconds(60))
        );
    }

    #[test]
    fn applied_lock_consumes_credit_and_is_delivered() {
        let clock = FixedClock::new(start());
        let mut processor = processor(&clock);
        let (sub, mut rx) = subscribe(&mut processor, "worker");
        let writes = processor.process(&create(1));
        let lock = writes[1].clone().at(Position::new(3));

        let writes = processor.process(&lock);

        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].intent, Intent::Locked);
        assert_eq!(writes[0].metadata.subscriber_key, Some(sub));
        assert_eq!(writes[0].value.lock_owner.as_deref(), Some("worker"));
        assert_eq!(processor.subscriptions().get(sub).unwrap().credits, 4);
        assert_eq!(
            processor.store().get(TaskKey::new(1)).unwrap().state,
            TaskState::Locked
        );

        let locked = writes[0].clone().at(Position::new(4));
        assert!(processor.deliver(&locked));
        let pushed = rx.try_recv().unwrap();
        assert_eq!(pushed.subscriber_key, sub);
        assert_eq!(pushed.key, TaskKey::new(1));
        assert_eq!(pushed.position, Position::new(4));
    }

    #[test]
    fn lock_for_removed_subscription_is_rejected_and_reoffered() {
        let clock = FixedClock::new(start());
        let mut processor = processor(&clock);
        let (first, _first_rx) = subscribe(&mut processor, "first");
        let writes = processor.process(&create(1));
        let stale_lock = writes[1].clone().at(Position::new(3));

        assert!(processor.remove_subscription(first));
        let (second, _second_rx) = subscribe(&mut processor, "second");

        let writes = processor.process(&stale_lock);

        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].record_type, RecordType::CommandRejection);
        assert_eq!(writes[0].intent, Intent::Lock);
        assert_eq!(
            writes[0].metadata.rejection_reason,
            Some(RejectionReason::SubscriptionClosed)
        );
        assert_eq!(writes[1].intent, Intent::Lock);
        assert_eq!(writes[1].metadata.subscriber_key, Some(second));
        assert_eq!(
            processor.store().get(TaskKey::new(1)).unwrap().state,
            TaskState::Created
        );
    }

    #[test]
    fn lock_whose_expiry_already_passed_is_rejected() {
        let clock = FixedClock::new(start());
        let mut processor = processor(&clock);
        let (_sub, _rx) = subscribe(&mut processor, "worker");
        let writes = processor.process(&create(1));
        let lock = writes[1].clone().at(Position::new(3));

        clock.advance(Duration::from_secs(61));
        let writes = processor.process(&lock);

        assert_eq!(
            writes[0].metadata.rejection_reason,
            Some(RejectionReason::LockTimeNotInFuture)
        );
        // offered again with a fresh expiry
        assert_eq!(writes[1].intent, Intent::Lock);
        assert!(writes[1].value.lock_expires_at.unwrap() > clock.now());
    }

    #[test]
    fn rejection_echoes_the_command() {
        let clock = FixedClock::new(start());
        let mut processor = processor(&clock);
        let command = at(
            7,
            TaskCommand::Fail {
                key: TaskKey::new(42),
                lock_owner: "worker".into(),
                retries: 1,
            },
        );

        let writes = processor.process(&command);

        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].record_type, RecordType::CommandRejection);
        assert_eq!(writes[0].intent, Intent::Fail);
        assert_eq!(writes[0].key, TaskKey::new(42));
        assert_eq!(writes[0].source_position, Some(Position::new(7)));
        assert_eq!(writes[0].value, command.value);
    }

    #[test]
    fn dropped_channel_is_reported_on_delivery() {
        let clock = FixedClock::new(start());
        let mut processor = processor(&clock);
        let (_sub, rx) = subscribe(&mut processor, "worker");
        let writes = processor.process(&create(1));
        let lock = writes[1].clone().at(Position::new(3));
        let locked = processor.process(&lock)[0].clone().at(Position::new(4));

        drop(rx);
        assert!(!processor.deliver(&locked));
    }

    #[test]
    fn negative_retries_on_create_are_rejected() {
        let clock = FixedClock::new(start());
        let mut processor = processor(&clock);
        let (_sub, _rx) = subscribe(&mut processor, "worker");

        let writes = processor.process(&at(1, TaskCommand::Create(NewTask::new("foo", -5))));

        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].record_type, RecordType::CommandRejection);
        assert_eq!(writes[0].intent, Intent::Create);
        assert_eq!(reason(&writes), Some(RejectionReason::InvalidRetries));
        assert!(processor.store().is_empty());
    }

    #[test]
    fn lock_for_subscription_of_another_type_is_rejected() {
        let clock = FixedClock::new(start());
        let mut processor = processor(&clock);
        let (bar, mut bar_rx) = subscribe_to(&mut processor, "bar", "intruder", 5);
        let writes = processor.process(&create(1));
        assert_eq!(writes.len(), 1);

        let writes = processor.process(&at(3, lock_for(1, bar, "intruder", &clock)));

        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].record_type, RecordType::CommandRejection);
        assert_eq!(reason(&writes), Some(RejectionReason::TaskTypeMismatch));
        assert_eq!(processor.subscriptions().get(bar).unwrap().credits, 5);
        assert_eq!(
            processor.store().get(TaskKey::new(1)).unwrap().state,
            TaskState::Created
        );
        assert!(bar_rx.try_recv().is_err());
    }

    #[test]
    fn lock_owner_comes_from_the_subscription() {
        let clock = FixedClock::new(start());
        let mut processor = processor(&clock);
        let (sub, _rx) = subscribe(&mut processor, "worker");
        processor.process(&create(1));

        let writes = processor.process(&at(3, lock_for(1, sub, "intruder", &clock)));

        assert_eq!(writes[0].intent, Intent::Locked);
        assert_eq!(writes[0].value.lock_owner.as_deref(), Some("worker"));
        let task = processor.store().get(TaskKey::new(1)).unwrap();
        assert!(task.is_locked_by(Some("worker")));
    }

    #[test]
    fn lock_for_subscription_without_credits_is_rejected() {
        let clock = FixedClock::new(start());
        let mut processor = processor(&clock);
        let (sub, _rx) = subscribe_to(&mut processor, "foo", "worker", 1);
        let first_lock = processor.process(&create(1))[1].clone().at(Position::new(3));
        // no credit left to offer the second task
        let second = processor.process(&at(4, TaskCommand::Create(NewTask::new("foo", 3))));
        assert_eq!(second.len(), 1);
        processor.process(&first_lock);
        assert_eq!(processor.subscriptions().get(sub).unwrap().credits, 0);

        let writes = processor.process(&at(7, lock_for(4, sub, "worker", &clock)));

        assert_eq!(writes.len(), 1);
        assert_eq!(reason(&writes), Some(RejectionReason::NoCredits));
        assert_eq!(
            processor.store().get(TaskKey::new(4)).unwrap().state,
            TaskState::Created
        );
    }

    #[derive(Debug, Clone, Copy)]
    enum Before {
        NeverCreated,
        Created,
        LockedInTime,
        AlreadyExpired,
        Completed,
        Failed,
    }

    /// Drive task 1 into `before`. Once a lock was taken the clock ends past its expiry,
    /// except for `LockedInTime`.
    fn task_before_expiry(processor: &mut TaskProcessor, clock: &FixedClock, before: Before) {
        if let Before::NeverCreated = before {
            return;
        }
        let writes = processor.process(&create(1));
        if let Before::Created = before {
            return;
        }
        let lock = writes[1].clone().at(Position::new(3));
        processor.process(&lock);

        match before {
            Before::LockedInTime => return,
            Before::AlreadyExpired => {
                clock.advance(Duration::from_secs(61));
                let expired =
                    processor.process(&at(5, TaskCommand::ExpireLock { key: TaskKey::new(1) }));
                assert_eq!(expired[0].intent, Intent::LockExpired);
            }
            Before::Completed => {
                let completed = processor.process(&at(
                    5,
                    TaskCommand::Complete {
                        key: TaskKey::new(1),
                        lock_owner: "worker".into(),
                        payload: None,
                    },
                ));
                assert_eq!(completed[0].intent, Intent::Completed);
            }
            Before::Failed => {
                let failed = processor.process(&at(
                    5,
                    TaskCommand::Fail {
                        key: TaskKey::new(1),
                        lock_owner: "worker".into(),
                        retries: 2,
                    },
                ));
                assert_eq!(failed[0].intent, Intent::Failed);
            }
            Before::NeverCreated | Before::Created => {}
        }
        clock.advance(Duration::from_secs(61));
    }

    #[rstest]
    #[case::not_exists(Before::NeverCreated, RejectionReason::TaskNotFound)]
    #[case::not_locked(Before::Created, RejectionReason::InvalidState)]
    #[case::lock_still_live(Before::LockedInTime, RejectionReason::LockNotExpired)]
    #[case::already_expired(Before::AlreadyExpired, RejectionReason::InvalidState)]
    #[case::already_completed(Before::Completed, RejectionReason::TaskNotFound)]
    #[case::already_failed(Before::Failed, RejectionReason::InvalidState)]
    fn expire_lock_rejections(#[case] before: Before, #[case] expected: RejectionReason) {
        let clock = FixedClock::new(start());
        let mut processor = processor(&clock);
        let (_sub, _rx) = subscribe(&mut processor, "worker");
        task_before_expiry(&mut processor, &clock, before);
        let state_before = processor.store().get(TaskKey::new(1)).map(|t| t.state);

        let writes =
            processor.process(&at(10, TaskCommand::ExpireLock { key: TaskKey::new(1) }));

        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].record_type, RecordType::CommandRejection);
        assert_eq!(writes[0].intent, Intent::ExpireLock);
        assert_eq!(reason(&writes), Some(expected));
        assert_eq!(
            processor.store().get(TaskKey::new(1)).map(|t| t.state),
            state_before
        );
    }
}
