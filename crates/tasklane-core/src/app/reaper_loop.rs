//! LockExpirationReaper - 期限切れ lock の回収
//!
//! 一定間隔で store を走査し、`lock_expires_at <= now` の LOCKED タスクごとに
//! 内部 EXPIRE_LOCK コマンドを作る。コマンドは log を通って processor に適用され、
//! LOCK_EXPIRED のあと dispatcher に再提示される。
//!
//! # 設計原則
//! - reaper 自身は状態を変えない（走査してコマンドを返すだけ）
//! - 1 回の走査で見つかった期限切れは全部まとめて返す
//! - 時刻は注入された Clock から取る

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::TaskCommand;
use crate::ports::TaskStore;

#[derive(Debug, Clone)]
pub struct LockExpirationReaper {
    interval: Duration,
}

impl LockExpirationReaper {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// EXPIRE_LOCK for every lock that ended at or before `now`, oldest task first.
    pub fn scan(&self, store: &dyn TaskStore, now: DateTime<Utc>) -> Vec<TaskCommand> {
        let expired: Vec<TaskCommand> = store
            .expired_locks(now)
            .into_iter()
            .map(|key| TaskCommand::ExpireLock { key })
            .collect();
        if !expired.is_empty() {
            debug!(count = expired.len(), %now, "expired locks found");
        }
        expired
    }
}
