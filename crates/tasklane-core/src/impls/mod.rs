//! Impls - ports の開発用実装
//!
//! - InMemoryTaskStore: BTreeMap ベースの task index
//! - InMemoryPartitionLog: Vec ベースの append-only log

pub mod inmem_log;
pub mod inmem_store;

pub use self::inmem_log::InMemoryPartitionLog;
pub use self::inmem_store::InMemoryTaskStore;
