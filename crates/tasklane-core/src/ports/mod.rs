//! Ports - 抽象化レイヤー
//!
//! engine が外部に依存する箇所（時刻、ID 生成、log、task index）を trait として切り出す。
//! 開発・テスト用の実装は `impls` にある。

pub mod clock;
pub mod id_generator;
pub mod partition_log;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::partition_log::{LogError, PartitionLog};
pub use self::task_store::TaskStore;
