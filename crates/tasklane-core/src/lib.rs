//! tasklane-core
//!
//! Per-partition task queue engine: an event-sourced task state machine fed from an
//! ordered log, with credit-based push dispatch to worker subscriptions and lock
//! expiration recovery.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, state, payload, record, errors）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, TaskStore, PartitionLog）
//! - **impls**: 開発用の in-memory 実装
//! - **app**: processor / dispatcher / reaper と partition actor、broker
//! - **config**: 起動時設定
//! - **error**: インフラ層のエラー型

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;

pub use self::app::{Broker, BrokerBuilder, PartitionHandle, Subscribed};
pub use self::config::BrokerConfig;
pub use self::error::TasklaneError;
