//! App - アプリケーション層
//!
//! ports を組み合わせて partition のパイプラインを組み立てる。
//!
//! # 主要コンポーネント
//! - **SubscriptionRegistry**: worker の subscription と credit
//! - **Dispatcher**: eligible なタスクへの内部 LOCK 発行
//! - **TaskProcessor**: log 順にコマンドを適用する状態機械
//! - **LockExpirationReaper**: 期限切れ lock の回収
//! - **PartitionEngine**: log と processor をつなぐ同期パイプライン
//! - **PartitionHandle**: engine を所有する actor への async 入口
//! - **Broker / BrokerBuilder**: topic 内の partition ルーティングと起動

pub mod broker;
pub mod builder;
pub mod dispatcher;
pub mod engine;
pub mod partition;
pub mod processor;
pub mod reaper_loop;
pub mod status;
pub mod subscriptions;

// 主要な型を再エクスポート
pub use self::broker::Broker;
pub use self::builder::{BrokerBuilder, BuildError};
pub use self::dispatcher::Dispatcher;
pub use self::engine::PartitionEngine;
pub use self::partition::{PartitionHandle, Subscribed, spawn_partition};
pub use self::processor::TaskProcessor;
pub use self::reaper_loop::LockExpirationReaper;
pub use self::status::PartitionStatus;
pub use self::subscriptions::{
    AddSubscription, IncreaseCredits, SubscribedTask, Subscription, SubscriptionRegistry,
    TaskReceiver, TaskSender,
};
