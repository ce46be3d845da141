//! PartitionLog port - partition ごとの append-only log
//!
//! 本番ではレプリケーションされた log が実装になる（このクレートの範囲外）。
//! engine が必要とするのは「順序付きで追記できる」「位置で読める」の 2 つだけ。

use crate::domain::{Position, Record, RecordDraft};

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("log append failed: {0}")]
    AppendFailed(String),
}

/// PartitionLog は record を書き込み順に保持する
pub trait PartitionLog: Send {
    /// Position the next appended record will get.
    fn next_position(&self) -> Position;

    fn append(&mut self, draft: RecordDraft) -> Result<Position, LogError>;

    fn read(&self, position: Position) -> Option<&Record>;

    /// All records from `position` on, in order.
    fn read_from(&self, position: Position) -> Vec<Record>;
}
