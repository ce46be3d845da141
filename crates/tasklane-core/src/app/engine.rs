//! PartitionEngine - 1 partition 分の同期パイプライン
//!
//! コマンドを log に追記し、未処理の record を position 順に processor へ流し、
//! processor が返した record を追記する。後続の内部コマンド（LOCK / EXPIRE_LOCK）も
//! 同じ log を通るので、処理順は常に log の順序と一致する。
//!
//! # 学習ポイント
//! - async を持たない。actor（`partition`）が単一タスクからこれを呼ぶ
//! - 書き込まれた LOCKED event はその場で subscriber の channel に push する
//! - client への応答は「source_position がコマンドの position と一致する最初の record」

use tracing::{debug, warn};

use super::processor::TaskProcessor;
use super::reaper_loop::LockExpirationReaper;
use super::status::PartitionStatus;
use super::subscriptions::{AddSubscription, TaskSender};
use crate::domain::{
    PartitionId, Position, Record, RecordDraft, SubscriberKey, TaskCommand, TaskKey,
};
use crate::error::{Result, TasklaneError};
use crate::ports::PartitionLog;

pub struct PartitionEngine {
    partition_id: PartitionId,
    log: Box<dyn PartitionLog>,
    processor: TaskProcessor,
    reaper: LockExpirationReaper,
    /// Next log position the processor has not seen.
    cursor: Position,
}

impl PartitionEngine {
    /// Records already in `log` are treated as processed; the engine does not replay them.
    pub fn new(
        partition_id: PartitionId,
        log: Box<dyn PartitionLog>,
        processor: TaskProcessor,
        reaper: LockExpirationReaper,
    ) -> Self {
        let cursor = log.next_position();
        Self {
            partition_id,
            log,
            processor,
            reaper,
            cursor,
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn reaper(&self) -> &LockExpirationReaper {
        &self.reaper
    }

    /// Append a client command, run the pipeline and return the command's response record.
    ///
    /// LOCK and EXPIRE_LOCK are refused before anything is appended.
    pub fn execute(&mut self, command: TaskCommand) -> Result<Record> {
        if command.is_internal() {
            return Err(TasklaneError::InternalCommand(command.intent()));
        }
        // a CREATE's key is the position its command lands on
        let new_key = TaskKey::from(self.log.next_position());
        let position = self.log.append(command.into_draft(new_key))?;
        self.drain()?;
        self.response_to(position)
            .ok_or(TasklaneError::NoResponse(position))
    }

    pub fn add_subscription(
        &mut self,
        request: &AddSubscription,
        channel: TaskSender,
    ) -> Result<SubscriberKey> {
        let (subscriber_key, locks) = self.processor.add_subscription(request, channel)?;
        self.append_all(locks)?;
        Ok(subscriber_key)
    }

    pub fn increase_credits(&mut self, subscriber_key: SubscriberKey, credits: i64) -> Result<()> {
        let locks = self.processor.increase_credits(subscriber_key, credits)?;
        self.append_all(locks)
    }

    pub fn remove_subscription(&mut self, subscriber_key: SubscriberKey) -> bool {
        self.processor.remove_subscription(subscriber_key)
    }

    /// One reaper pass. Returns how many expired locks were found.
    pub fn expire_locks(&mut self) -> Result<usize> {
        let now = self.processor.now();
        let commands = self.reaper.scan(self.processor.store(), now);
        let count = commands.len();
        let drafts = commands
            .into_iter()
            .filter_map(|command| {
                let key = command.key()?;
                Some(command.into_draft(key))
            })
            .collect();
        self.append_all(drafts)?;
        Ok(count)
    }

    pub fn records(&self) -> Vec<Record> {
        self.log.read_from(Position::FIRST)
    }

    pub fn status(&self) -> PartitionStatus {
        let records = self.log.next_position().value().saturating_sub(1);
        PartitionStatus::collect(
            self.partition_id,
            self.processor.store(),
            self.processor.subscriptions().len(),
            records,
        )
    }

    fn append_all(&mut self, drafts: Vec<RecordDraft>) -> Result<()> {
        for draft in drafts {
            self.log.append(draft)?;
        }
        self.drain()
    }

    /// Process every record the processor has not seen yet, including the ones it writes.
    fn drain(&mut self) -> Result<()> {
        while let Some(record) = self.log.read(self.cursor).cloned() {
            self.cursor = self.cursor.next();
            for draft in self.processor.process(&record) {
                let position = self.log.append(draft)?;
                self.deliver(position);
            }
        }
        Ok(())
    }

    fn deliver(&mut self, position: Position) {
        let Some(record) = self.log.read(position) else {
            return;
        };
        if self.processor.deliver(record) {
            return;
        }
        // the lease still runs out normally; just stop feeding this subscriber
        if let Some(subscriber_key) = record.metadata.subscriber_key {
            warn!(%subscriber_key, partition_id = self.partition_id, "dropping subscription with closed channel");
            self.processor.remove_subscription(subscriber_key);
        }
    }

    fn response_to(&self, command: Position) -> Option<Record> {
        let mut position = command.next();
        while let Some(record) = self.log.read(position) {
            if record.source_position == Some(command) {
                debug!(%command, response = %record.position, intent = ?record.intent, "command answered");
                return Some(record.clone());
            }
            position = position.next();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::builder::BrokerBuilder;
    use crate::app::subscriptions::TaskReceiver;
    use crate::domain::{
        ControlError, Intent, NewTask, Payload, RecordType, RejectionReason, TaskType,
    };
    use crate::ports::{Clock, FixedClock};
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const OWNER: &str = "worker";

    fn engine(clock: &FixedClock) -> PartitionEngine {
        BrokerBuilder::default()
            .clock(clock.clone())
            .build_engine(0)
    }

    fn clock() -> FixedClock {
        FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
    }

    fn subscribe(engine: &mut PartitionEngine, credits: i64) -> (SubscriberKey, TaskReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = engine
            .add_subscription(&subscription_request(credits), tx)
            .unwrap();
        (key, rx)
    }

    fn subscription_request(credits: i64) -> AddSubscription {
        AddSubscription {
            topic_name: "default-topic".into(),
            partition_id: 0,
            task_type: TaskType::new("foo"),
            lock_duration: Duration::from_secs(300),
            lock_owner: OWNER.into(),
            credits,
        }
    }

    fn create(engine: &mut PartitionEngine, retries: i32) -> TaskKey {
        engine
            .execute(TaskCommand::Create(NewTask::new("foo", retries)))
            .unwrap()
            .key
    }

    fn intents(engine: &PartitionEngine) -> Vec<(RecordType, Intent)> {
        engine
            .records()
            .iter()
            .map(|r| (r.record_type, r.intent))
            .collect()
    }

    fn complete(key: TaskKey, owner: &str, payload: Option<Payload>) -> TaskCommand {
        TaskCommand::Complete {
            key,
            lock_owner: owner.into(),
            payload,
        }
    }

    use Intent::*;
    use RecordType::{Command as C, CommandRejection as R, Event as E};

    #[test]
    fn create_key_is_the_command_position() {
        let clock = clock();
        let mut engine = engine(&clock);

        let first = engine
            .execute(TaskCommand::Create(NewTask::new("foo", 3)))
            .unwrap();
        let second = engine
            .execute(TaskCommand::Create(NewTask::new("foo", 3)))
            .unwrap();

        assert_eq!(first.intent, Created);
        assert_eq!(first.key, TaskKey::new(1));
        assert_eq!(first.position, Position::new(2));
        assert_eq!(first.source_position, Some(Position::new(1)));
        assert_eq!(second.key, TaskKey::new(3));
    }

    #[test]
    fn internal_commands_are_refused_without_touching_the_log() {
        let clock = clock();
        let mut engine = engine(&clock);
        let (foreign, _rx) = subscribe(&mut engine, 1);
        let key = engine
            .execute(TaskCommand::Create(NewTask::new("bar", 3)))
            .unwrap()
            .key;
        let before = engine.records().len();

        let lock = engine.execute(TaskCommand::Lock {
            key,
            subscriber_key: foreign,
            lock_owner: "intruder".into(),
            lock_expires_at: clock.now() + chrono::Duration::seconds(60),
        });
        let expire = engine.execute(TaskCommand::ExpireLock { key });

        assert!(matches!(lock, Err(TasklaneError::InternalCommand(Lock))));
        assert!(matches!(expire, Err(TasklaneError::InternalCommand(ExpireLock))));
        assert_eq!(engine.records().len(), before);
        assert_eq!(task_counts(&engine), (1, 0, 0));
    }

    #[test]
    fn negative_retries_on_create_are_rejected() {
        let clock = clock();
        let mut engine = engine(&clock);
        let (_sub, mut rx) = subscribe(&mut engine, 1);

        let response = engine
            .execute(TaskCommand::Create(NewTask::new("foo", -5)))
            .unwrap();

        assert_eq!((response.record_type, response.intent), (R, Create));
        assert_eq!(
            response.metadata.rejection_reason,
            Some(RejectionReason::InvalidRetries)
        );
        assert_eq!(engine.status().active_tasks(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fail_with_retries_left_relocks() {
        let clock = clock();
        let mut engine = engine(&clock);
        let (_sub, mut rx) = subscribe(&mut engine, 10);
        let key = create(&mut engine, 3);

        let failed = engine
            .execute(TaskCommand::Fail {
                key,
                lock_owner: OWNER.into(),
                retries: 2,
            })
            .unwrap();

        assert_eq!(failed.intent, Failed);
        assert_eq!(failed.value.retries, 2);
        assert_eq!(
            intents(&engine),
            vec![
                (C, Create),
                (E, Created),
                (C, Lock),
                (E, Locked),
                (C, Fail),
                (E, Failed),
                (C, Lock),
                (E, Locked),
            ]
        );
        assert_eq!(rx.try_recv().unwrap().key, key);
        assert_eq!(rx.try_recv().unwrap().key, key);
    }

    #[test]
    fn exhausted_task_blocks_until_retries_are_updated() {
        let clock = clock();
        let mut engine = engine(&clock);
        let (_sub, _rx) = subscribe(&mut engine, 10);
        let key = create(&mut engine, 3);

        engine
            .execute(TaskCommand::Fail {
                key,
                lock_owner: OWNER.into(),
                retries: 0,
            })
            .unwrap();
        assert_eq!(engine.status().blocked, 1);

        let updated = engine
            .execute(TaskCommand::UpdateRetries { key, retries: 20 })
            .unwrap();

        assert_eq!(updated.intent, RetriesUpdated);
        assert_eq!(updated.value.retries, 20);
        assert_eq!(
            intents(&engine),
            vec![
                (C, Create),
                (E, Created),
                (C, Lock),
                (E, Locked),
                (C, Fail),
                (E, Failed),
                (C, UpdateRetries),
                (E, RetriesUpdated),
                (C, Lock),
                (E, Locked),
            ]
        );
    }

    #[derive(Debug, Clone, Copy)]
    enum Setup {
        Missing,
        Locked,
        Completed,
        Created,
    }

    /// Bring one task into `setup`. Keep the receiver alive for the test's duration.
    fn prepare(engine: &mut PartitionEngine, setup: Setup) -> (TaskKey, Option<TaskReceiver>) {
        match setup {
            Setup::Missing => (TaskKey::new(999), None),
            Setup::Created => (create(engine, 3), None),
            Setup::Locked | Setup::Completed => {
                let key = create(engine, 3);
                let (_sub, rx) = subscribe(engine, 1);
                if let Setup::Completed = setup {
                    engine.execute(complete(key, OWNER, None)).unwrap();
                }
                (key, Some(rx))
            }
        }
    }

    fn task_counts(engine: &PartitionEngine) -> (usize, usize, usize) {
        let status = engine.status();
        (status.created, status.locked, status.blocked)
    }

    #[rstest]
    #[case::locked(Setup::Locked, 5, RejectionReason::InvalidState)]
    #[case::missing(Setup::Missing, 5, RejectionReason::TaskNotFound)]
    #[case::completed(Setup::Completed, 5, RejectionReason::TaskNotFound)]
    #[case::zero_retries(Setup::Created, 0, RejectionReason::InvalidRetries)]
    #[case::negative_retries(Setup::Created, -1, RejectionReason::InvalidRetries)]
    fn update_retries_rejections(
        #[case] setup: Setup,
        #[case] retries: i32,
        #[case] reason: RejectionReason,
    ) {
        let clock = clock();
        let mut engine = engine(&clock);
        let (key, _rx) = prepare(&mut engine, setup);
        let before = task_counts(&engine);

        let response = engine
            .execute(TaskCommand::UpdateRetries { key, retries })
            .unwrap();

        assert_eq!(response.record_type, R);
        assert_eq!(response.intent, UpdateRetries);
        assert_eq!(response.metadata.rejection_reason, Some(reason));
        assert_eq!(task_counts(&engine), before);
    }

    #[test]
    fn complete_merges_request_over_stored_task() {
        let clock = clock();
        let mut engine = engine(&clock);
        let (_sub, _rx) = subscribe(&mut engine, 1);
        let key = engine
            .execute(TaskCommand::Create(
                NewTask::new("foo", 3)
                    .payload(Payload::from_value(&json!({"in": 1})))
                    .header("trace", "abc"),
            ))
            .unwrap()
            .key;

        let completed = engine
            .execute(complete(
                key,
                OWNER,
                Some(Payload::from_value(&json!({"out": 2}))),
            ))
            .unwrap();

        assert_eq!(completed.record_type, E);
        assert_eq!(completed.intent, Completed);
        assert_eq!(completed.value.task_type, TaskType::new("foo"));
        assert_eq!(completed.value.retries, 3);
        assert_eq!(completed.value.lock_owner.as_deref(), Some(OWNER));
        assert_eq!(completed.value.custom_headers["trace"], "abc");
        let payload = completed.value.payload.unwrap().to_object().unwrap();
        assert_eq!(payload["out"], json!(2));
        assert_eq!(engine.status().active_tasks(), 0);
    }

    #[rstest]
    #[case::missing(Setup::Missing, OWNER, None, RejectionReason::TaskNotFound)]
    #[case::not_locked(Setup::Created, OWNER, None, RejectionReason::InvalidState)]
    #[case::already_completed(Setup::Completed, OWNER, None, RejectionReason::TaskNotFound)]
    #[case::foreign_owner(Setup::Locked, "intruder", None, RejectionReason::LockOwnerMismatch)]
    #[case::malformed_payload(
        Setup::Locked,
        OWNER,
        Some(&b"{not json"[..]),
        RejectionReason::InvalidPayload(String::new())
    )]
    #[case::payload_not_an_object(
        Setup::Locked,
        OWNER,
        Some(&b"[1, 2]"[..]),
        RejectionReason::InvalidPayload(String::new())
    )]
    fn complete_rejections(
        #[case] setup: Setup,
        #[case] owner: &str,
        #[case] payload: Option<&[u8]>,
        #[case] reason: RejectionReason,
    ) {
        let clock = clock();
        let mut engine = engine(&clock);
        let (key, _rx) = prepare(&mut engine, setup);
        let before = task_counts(&engine);

        let response = engine
            .execute(complete(key, owner, payload.map(Payload::from_bytes)))
            .unwrap();

        assert_eq!(response.record_type, R);
        assert_eq!(response.intent, Complete);
        match (&response.metadata.rejection_reason, &reason) {
            (Some(RejectionReason::InvalidPayload(_)), RejectionReason::InvalidPayload(_)) => {}
            (actual, expected) => assert_eq!(actual.as_ref(), Some(expected)),
        }
        assert_eq!(task_counts(&engine), before);
    }

    #[test]
    fn expired_locks_are_recovered_in_one_pass() {
        let clock = clock();
        let mut engine = engine(&clock);
        let (_sub, _rx) = subscribe(&mut engine, 10);
        let first = create(&mut engine, 3);
        let second = create(&mut engine, 3);
        let relocked_after = engine.records().len();

        assert_eq!(engine.expire_locks().unwrap(), 0);
        clock.advance(Duration::from_secs(301));
        assert_eq!(engine.expire_locks().unwrap(), 2);

        let records = engine.records();
        let expired: Vec<TaskKey> = records
            .iter()
            .filter(|r| r.record_type == E && r.intent == LockExpired)
            .map(|r| r.key)
            .collect();
        let relocked: Vec<TaskKey> = records[relocked_after..]
            .iter()
            .filter(|r| r.record_type == E && r.intent == Locked)
            .map(|r| r.key)
            .collect();
        assert_eq!(expired, vec![first, second]);
        assert_eq!(relocked, vec![first, second]);
        assert!(!records.iter().any(|r| r.intent == Failed));
        assert_eq!(engine.status().locked, 2);
    }

    #[test]
    fn completing_after_expiry_is_rejected() {
        let clock = clock();
        let mut engine = engine(&clock);
        let (_sub, _rx) = subscribe(&mut engine, 1);
        let key = create(&mut engine, 3);

        clock.advance(Duration::from_secs(301));
        engine.expire_locks().unwrap();
        let response = engine.execute(complete(key, OWNER, None)).unwrap();

        assert_eq!(response.record_type, R);
        assert_eq!(
            response.metadata.rejection_reason,
            Some(RejectionReason::InvalidState)
        );
    }

    #[test]
    fn closed_subscriber_is_skipped_for_a_new_one() {
        let clock = clock();
        let mut engine = engine(&clock);
        let (gone, gone_rx) = subscribe(&mut engine, 5);
        drop(gone_rx);

        let key = create(&mut engine, 3);
        assert_eq!(engine.status().created, 1);

        let (fresh, mut fresh_rx) = subscribe(&mut engine, 5);
        let pushed = fresh_rx.try_recv().unwrap();
        assert_eq!(pushed.key, key);
        assert_eq!(pushed.subscriber_key, fresh);
        assert_ne!(fresh, gone);
    }

    #[test]
    fn closed_channel_stops_dispatch() {
        let clock = clock();
        let mut engine = engine(&clock);
        let (_sub, rx) = subscribe(&mut engine, 5);
        create(&mut engine, 3);
        assert_eq!(engine.status().subscriptions, 1);

        drop(rx);
        create(&mut engine, 3);

        assert_eq!(task_counts(&engine), (1, 1, 0));
    }

    #[test]
    fn cancel_removes_an_active_task() {
        let clock = clock();
        let mut engine = engine(&clock);
        let key = create(&mut engine, 3);

        let canceled = engine.execute(TaskCommand::Cancel { key }).unwrap();
        let again = engine.execute(TaskCommand::Cancel { key }).unwrap();

        assert_eq!((canceled.record_type, canceled.intent), (E, Canceled));
        assert_eq!(
            again.metadata.rejection_reason,
            Some(RejectionReason::TaskNotFound)
        );
        assert_eq!(engine.status().active_tasks(), 0);
    }

    #[rstest]
    #[case(0)]
    #[case(-3)]
    fn non_positive_credits_fail_identically(#[case] credits: i64) {
        let clock = clock();
        let mut engine = engine(&clock);
        let (sub, _rx) = subscribe(&mut engine, 1);
        let (tx, _rx2) = mpsc::unbounded_channel();

        let add = engine
            .add_subscription(&subscription_request(credits), tx)
            .unwrap_err();
        let increase = engine.increase_credits(sub, credits).unwrap_err();

        let (TasklaneError::Control(add), TasklaneError::Control(increase)) = (add, increase) else {
            panic!("expected control errors");
        };
        assert_eq!(add, increase);
        assert_eq!(add, ControlError::non_positive_credits());
        assert_eq!(engine.status().subscriptions, 1);
    }

    #[test]
    fn increasing_credits_dispatches_waiting_tasks() {
        let clock = clock();
        let mut engine = engine(&clock);
        let (sub, mut rx) = subscribe(&mut engine, 1);
        let first = create(&mut engine, 3);
        let second = create(&mut engine, 3);
        assert_eq!(rx.try_recv().unwrap().key, first);
        assert!(rx.try_recv().is_err());

        engine.increase_credits(sub, 1).unwrap();

        assert_eq!(rx.try_recv().unwrap().key, second);
    }
}
