//! Partition actor - partition 状態の唯一の所有者
//!
//! `PartitionEngine` を 1 つの tokio タスクに閉じ込め、外部からは `PartitionHandle`
//! 経由の request（mpsc + oneshot 応答）でしか触れないようにする。
//!
//! # 学習ポイント
//! - request channel で全操作を直列化（processor は常に単一 writer）
//! - reaper は同じループ内の `interval` tick として走る
//! - shutdown は watch channel で通知
//! - subscriber の channel が閉じたことは watcher タスクが検知し、remove request を送り返す
//! - 明示的な close では watcher を oneshot で止め、channel の送信側を全部手放す

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::engine::PartitionEngine;
use super::status::PartitionStatus;
use super::subscriptions::{AddSubscription, IncreaseCredits, TaskReceiver, TaskSender};
use crate::domain::{
    ControlError, NewTask, PartitionId, Payload, Record, SubscriberKey, TaskCommand, TaskKey,
};
use crate::error::{Result, TasklaneError};

type Responder<T> = oneshot::Sender<Result<T>>;

/// Answer to ADD_TASK_SUBSCRIPTION: the key plus the stream of locked tasks.
///
/// Dropping `tasks` closes the subscription.
#[derive(Debug)]
pub struct Subscribed {
    pub subscriber_key: SubscriberKey,
    pub tasks: TaskReceiver,
}

#[derive(Debug)]
enum PartitionRequest {
    Execute {
        command: TaskCommand,
        resp: Responder<Record>,
    },
    AddSubscription {
        request: AddSubscription,
        resp: oneshot::Sender<std::result::Result<Subscribed, ControlError>>,
    },
    IncreaseCredits {
        subscriber_key: SubscriberKey,
        credits: i64,
        resp: oneshot::Sender<std::result::Result<(), ControlError>>,
    },
    CloseSubscription {
        subscriber_key: SubscriberKey,
        /// `None` when sent by a closure watcher.
        resp: Option<oneshot::Sender<bool>>,
    },
    CheckLockExpiration {
        resp: Responder<usize>,
    },
    Records {
        resp: oneshot::Sender<Vec<Record>>,
    },
    Status {
        resp: oneshot::Sender<PartitionStatus>,
    },
}

/// Cloneable async entry point to one partition.
#[derive(Debug, Clone)]
pub struct PartitionHandle {
    topic_name: Arc<str>,
    partition_id: PartitionId,
    requests: mpsc::Sender<PartitionRequest>,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Start the actor for `engine` on the current tokio runtime.
pub fn spawn_partition(
    topic_name: &str,
    engine: PartitionEngine,
    request_capacity: usize,
) -> (PartitionHandle, JoinHandle<()>) {
    let (requests_tx, requests_rx) = mpsc::channel(request_capacity.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let partition_id = engine.partition_id();

    let actor = PartitionActor {
        engine,
        requests: requests_rx,
        watcher_requests: requests_tx.downgrade(),
        watchers: HashMap::new(),
        shutdown: shutdown_rx,
    };
    let join = tokio::spawn(actor.run());

    let handle = PartitionHandle {
        topic_name: Arc::from(topic_name),
        partition_id,
        requests: requests_tx,
        shutdown: Arc::new(shutdown_tx),
    };
    (handle, join)
}

impl PartitionHandle {
    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Returns the CREATED event; its key is the new task's key.
    pub async fn create_task(&self, task: NewTask) -> Result<Record> {
        self.execute(TaskCommand::Create(task)).await
    }

    pub async fn complete_task(
        &self,
        key: TaskKey,
        lock_owner: impl Into<String>,
        payload: Option<Payload>,
    ) -> Result<Record> {
        self.execute(TaskCommand::Complete {
            key,
            lock_owner: lock_owner.into(),
            payload,
        })
        .await
    }

    pub async fn fail_task(
        &self,
        key: TaskKey,
        lock_owner: impl Into<String>,
        retries: i32,
    ) -> Result<Record> {
        self.execute(TaskCommand::Fail {
            key,
            lock_owner: lock_owner.into(),
            retries,
        })
        .await
    }

    pub async fn update_retries(&self, key: TaskKey, retries: i32) -> Result<Record> {
        self.execute(TaskCommand::UpdateRetries { key, retries })
            .await
    }

    pub async fn cancel_task(&self, key: TaskKey) -> Result<Record> {
        self.execute(TaskCommand::Cancel { key }).await
    }

    /// Submit a client command and wait for its response record (event or rejection).
    ///
    /// Fails with `InternalCommand` for LOCK and EXPIRE_LOCK.
    pub async fn execute(&self, command: TaskCommand) -> Result<Record> {
        let (resp, rx) = oneshot::channel();
        self.send(PartitionRequest::Execute { command, resp }).await?;
        rx.await.map_err(|_| self.stopped())?
    }

    pub async fn add_subscription(
        &self,
        request: AddSubscription,
    ) -> std::result::Result<Subscribed, ControlError> {
        self.check_address(&request.topic_name, request.partition_id)
            .map_err(TasklaneError::into_control)?;
        let (resp, rx) = oneshot::channel();
        self.send(PartitionRequest::AddSubscription { request, resp })
            .await
            .map_err(TasklaneError::into_control)?;
        rx.await.map_err(|_| self.stopped().into_control())?
    }

    pub async fn increase_credits(
        &self,
        request: IncreaseCredits,
    ) -> std::result::Result<(), ControlError> {
        self.check_address(&request.topic_name, request.partition_id)
            .map_err(TasklaneError::into_control)?;
        let (resp, rx) = oneshot::channel();
        self.send(PartitionRequest::IncreaseCredits {
            subscriber_key: request.subscriber_key,
            credits: request.credits,
            resp,
        })
        .await
        .map_err(TasklaneError::into_control)?;
        rx.await.map_err(|_| self.stopped().into_control())?
    }

    /// Idempotent. Returns whether the subscription was still active.
    pub async fn close_subscription(&self, subscriber_key: SubscriberKey) -> Result<bool> {
        let (resp, rx) = oneshot::channel();
        self.send(PartitionRequest::CloseSubscription {
            subscriber_key,
            resp: Some(resp),
        })
        .await?;
        rx.await.map_err(|_| self.stopped())
    }

    /// Run one reaper pass now instead of waiting for the next tick.
    pub async fn check_lock_expiration(&self) -> Result<usize> {
        let (resp, rx) = oneshot::channel();
        self.send(PartitionRequest::CheckLockExpiration { resp })
            .await?;
        rx.await.map_err(|_| self.stopped())?
    }

    /// Snapshot of the partition log.
    pub async fn records(&self) -> Result<Vec<Record>> {
        let (resp, rx) = oneshot::channel();
        self.send(PartitionRequest::Records { resp }).await?;
        rx.await.map_err(|_| self.stopped())
    }

    pub async fn status(&self) -> Result<PartitionStatus> {
        let (resp, rx) = oneshot::channel();
        self.send(PartitionRequest::Status { resp }).await?;
        rx.await.map_err(|_| self.stopped())
    }

    /// Ask the actor to stop. Requests already queued are dropped.
    pub fn shutdown(&self) {
        // ignore send error: the actor may already be gone
        let _ = self.shutdown.send(true);
    }

    fn check_address(&self, topic_name: &str, partition_id: PartitionId) -> Result<()> {
        if topic_name != &*self.topic_name || partition_id != self.partition_id {
            return Err(TasklaneError::UnknownPartition {
                topic: topic_name.to_string(),
                partition_id,
            });
        }
        Ok(())
    }

    async fn send(&self, request: PartitionRequest) -> Result<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| self.stopped())
    }

    fn stopped(&self) -> TasklaneError {
        TasklaneError::PartitionStopped(self.partition_id)
    }
}

struct PartitionActor {
    engine: PartitionEngine,
    requests: mpsc::Receiver<PartitionRequest>,
    /// Closure watchers report through this without keeping the actor alive.
    watcher_requests: mpsc::WeakSender<PartitionRequest>,
    /// Dropping an entry stops that subscription's watcher.
    watchers: HashMap<SubscriberKey, oneshot::Sender<()>>,
    shutdown: watch::Receiver<bool>,
}

impl PartitionActor {
    async fn run(mut self) {
        let partition_id = self.engine.partition_id();
        let mut reaper = tokio::time::interval(self.engine.reaper().interval());
        reaper.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        reaper.tick().await;
        info!(partition_id, "partition started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = reaper.tick() => self.expire_locks(),
                request = self.requests.recv() => match request {
                    Some(request) => self.handle(request),
                    None => break,
                },
            }
        }

        info!(partition_id, "partition stopped");
    }

    fn handle(&mut self, request: PartitionRequest) {
        match request {
            PartitionRequest::Execute { command, resp } => {
                let _ = resp.send(self.engine.execute(command));
            }
            PartitionRequest::AddSubscription { request, resp } => {
                let _ = resp.send(self.add_subscription(&request));
            }
            PartitionRequest::IncreaseCredits {
                subscriber_key,
                credits,
                resp,
            } => {
                let result = self
                    .engine
                    .increase_credits(subscriber_key, credits)
                    .map_err(TasklaneError::into_control);
                let _ = resp.send(result);
            }
            PartitionRequest::CloseSubscription {
                subscriber_key,
                resp,
            } => {
                let removed = self.engine.remove_subscription(subscriber_key);
                // the watcher holds the last sender; the subscriber sees end of stream once it exits
                self.watchers.remove(&subscriber_key);
                if let Some(resp) = resp {
                    let _ = resp.send(removed);
                } else if removed {
                    debug!(%subscriber_key, "subscriber went away");
                }
            }
            PartitionRequest::CheckLockExpiration { resp } => {
                let _ = resp.send(self.engine.expire_locks());
            }
            PartitionRequest::Records { resp } => {
                let _ = resp.send(self.engine.records());
            }
            PartitionRequest::Status { resp } => {
                let _ = resp.send(self.engine.status());
            }
        }
    }

    fn add_subscription(
        &mut self,
        request: &AddSubscription,
    ) -> std::result::Result<Subscribed, ControlError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber_key = self
            .engine
            .add_subscription(request, tx.clone())
            .map_err(TasklaneError::into_control)?;
        self.watch_closure(subscriber_key, tx);
        Ok(Subscribed {
            subscriber_key,
            tasks: rx,
        })
    }

    fn watch_closure(&mut self, subscriber_key: SubscriberKey, channel: TaskSender) {
        let requests = self.watcher_requests.clone();
        let mut shutdown = self.shutdown.clone();
        let (cancel_tx, cancel) = oneshot::channel::<()>();
        self.watchers.insert(subscriber_key, cancel_tx);
        tokio::spawn(async move {
            tokio::select! {
                _ = channel.closed() => {}
                _ = cancel => return,
                _ = shutdown.changed() => return,
            }
            if let Some(requests) = requests.upgrade() {
                let _ = requests
                    .send(PartitionRequest::CloseSubscription {
                        subscriber_key,
                        resp: None,
                    })
                    .await;
            }
        });
    }

    fn expire_locks(&mut self) {
        match self.engine.expire_locks() {
            Ok(0) => {}
            Ok(count) => debug!(count, "reaper recovered expired locks"),
            Err(err) => warn!(error = %err, "reaper pass failed"),
        }
    }
}
