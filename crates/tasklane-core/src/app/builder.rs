//! BrokerBuilder - broker の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: 設定が不正なら partition を 1 つも起動しない
//! - Clock / IdGenerator の差し替え（テストでは FixedClock を注入する）

use std::sync::Arc;

use super::broker::Broker;
use super::engine::PartitionEngine;
use super::partition::spawn_partition;
use super::processor::TaskProcessor;
use super::reaper_loop::LockExpirationReaper;
use super::subscriptions::SubscriptionRegistry;
use crate::config::{BrokerConfig, ConfigError};
use crate::domain::PartitionId;
use crate::impls::{InMemoryPartitionLog, InMemoryTaskStore};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};

/// BrokerBuilder は 1 topic 分の broker を構築
///
/// # 使用例
/// ```ignore
/// let broker = BrokerBuilder::new(config)
///     .clock(FixedClock::new(start))
///     .build()?;
/// ```
pub struct BrokerBuilder {
    config: BrokerConfig,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError は broker 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("partitions must be started from within a tokio runtime")]
    NoRuntime,
}

impl BrokerBuilder {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            ids: None,
        }
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Defaults to ULIDs stamped by the builder's clock.
    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Wire a single partition without starting an actor for it.
    pub fn build_engine(&self, partition_id: PartitionId) -> PartitionEngine {
        let ids: Arc<dyn IdGenerator> = match &self.ids {
            Some(ids) => Arc::clone(ids),
            None => Arc::new(UlidGenerator::new(Arc::clone(&self.clock))),
        };
        let processor = TaskProcessor::new(
            Box::new(InMemoryTaskStore::new()),
            SubscriptionRegistry::new(ids),
            Arc::clone(&self.clock),
        );
        PartitionEngine::new(
            partition_id,
            Box::new(InMemoryPartitionLog::new()),
            processor,
            LockExpirationReaper::new(self.config.lock_expiration_interval()),
        )
    }

    /// Validate the configuration and start one actor per partition.
    pub fn build(self) -> Result<Broker, BuildError> {
        self.config.validate()?;
        tokio::runtime::Handle::try_current().map_err(|_| BuildError::NoRuntime)?;

        let mut partitions = Vec::with_capacity(usize::from(self.config.partition_count));
        let mut joins = Vec::with_capacity(partitions.capacity());
        for partition_id in 0..self.config.partition_count {
            let engine = self.build_engine(partition_id);
            let (handle, join) = spawn_partition(
                &self.config.topic_name,
                engine,
                self.config.request_channel_capacity,
            );
            partitions.push(handle);
            joins.push(join);
        }

        Ok(Broker::new(self.config.topic_name, partitions, joins))
    }
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_starts_one_partition_per_id() {
        let config = BrokerConfig {
            partition_count: 3,
            ..BrokerConfig::default()
        };
        let broker = BrokerBuilder::new(config).build().unwrap();

        let ids: Vec<PartitionId> = broker.partitions().iter().map(|p| p.partition_id()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        broker.shutdown().await;
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let config = BrokerConfig {
            partition_count: 0,
            ..BrokerConfig::default()
        };
        let result = BrokerBuilder::new(config).build();
        assert!(matches!(
            result,
            Err(BuildError::InvalidConfig(ConfigError::Invalid { field: "partition_count", .. }))
        ));
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = BrokerBuilder::default().build();
        assert!(matches!(result, Err(BuildError::NoRuntime)));
    }
}
