//! Broker - topic / partition ごとのルーティング
//!
//! 1 topic 分の partition actor を束ね、コマンドと control message を
//! `(topic_name, partition_id)` で振り分ける。partition 間の協調はしない。

use tokio::task::JoinHandle;
use tracing::info;

use super::partition::{PartitionHandle, Subscribed};
use super::status::PartitionStatus;
use super::subscriptions::{AddSubscription, IncreaseCredits};
use crate::domain::{ControlError, NewTask, PartitionId, Record};
use crate::error::{Result, TasklaneError};

pub struct Broker {
    topic_name: String,
    partitions: Vec<PartitionHandle>,
    joins: Vec<JoinHandle<()>>,
}

impl Broker {
    pub(crate) fn new(
        topic_name: String,
        partitions: Vec<PartitionHandle>,
        joins: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            topic_name,
            partitions,
            joins,
        }
    }

    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    pub fn partitions(&self) -> &[PartitionHandle] {
        &self.partitions
    }

    pub fn partition(&self, topic_name: &str, partition_id: PartitionId) -> Result<&PartitionHandle> {
        if topic_name != self.topic_name {
            return Err(unknown(topic_name, partition_id));
        }
        self.partitions
            .get(usize::from(partition_id))
            .ok_or_else(|| unknown(topic_name, partition_id))
    }

    pub async fn create_task(
        &self,
        topic_name: &str,
        partition_id: PartitionId,
        task: NewTask,
    ) -> Result<Record> {
        self.partition(topic_name, partition_id)?
            .create_task(task)
            .await
    }

    /// ADD_TASK_SUBSCRIPTION, routed by the request's topic and partition.
    pub async fn add_subscription(
        &self,
        request: AddSubscription,
    ) -> std::result::Result<Subscribed, ControlError> {
        let partition = self
            .partition(&request.topic_name, request.partition_id)
            .map_err(TasklaneError::into_control)?;
        partition.add_subscription(request).await
    }

    /// INCREASE_TASK_SUBSCRIPTION_CREDITS, routed by the request's topic and partition.
    pub async fn increase_credits(
        &self,
        request: IncreaseCredits,
    ) -> std::result::Result<(), ControlError> {
        let partition = self
            .partition(&request.topic_name, request.partition_id)
            .map_err(TasklaneError::into_control)?;
        partition.increase_credits(request).await
    }

    pub async fn status(&self) -> Result<Vec<PartitionStatus>> {
        let mut statuses = Vec::with_capacity(self.partitions.len());
        for partition in &self.partitions {
            statuses.push(partition.status().await?);
        }
        Ok(statuses)
    }

    /// Stop every partition and wait for the actors to exit.
    pub async fn shutdown(self) {
        for partition in &self.partitions {
            partition.shutdown();
        }
        for join in self.joins {
            let _ = join.await;
        }
        info!(topic = %self.topic_name, "broker stopped");
    }
}

fn unknown(topic_name: &str, partition_id: PartitionId) -> TasklaneError {
    TasklaneError::UnknownPartition {
        topic: topic_name.to_string(),
        partition_id,
    }
}
