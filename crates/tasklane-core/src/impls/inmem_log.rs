//! InMemoryPartitionLog - 開発用の partition log
//!
//! レプリケーションも永続化もしない。position は 1 から連番で振る。

use crate::domain::{Position, Record, RecordDraft};
use crate::ports::{LogError, PartitionLog};

#[derive(Debug, Default)]
pub struct InMemoryPartitionLog {
    records: Vec<Record>,
}

impl InMemoryPartitionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn index_of(position: Position) -> Option<usize> {
        usize::try_from(position.value()).ok()?.checked_sub(1)
    }
}

impl PartitionLog for InMemoryPartitionLog {
    fn next_position(&self) -> Position {
        Position::new(self.records.len() as u64 + 1)
    }

    fn append(&mut self, draft: RecordDraft) -> Result<Position, LogError> {
        let position = self.next_position();
        self.records.push(draft.at(position));
        Ok(position)
    }

    fn read(&self, position: Position) -> Option<&Record> {
        Self::index_of(position).and_then(|index| self.records.get(index))
    }

    fn read_from(&self, position: Position) -> Vec<Record> {
        match Self::index_of(position) {
            Some(index) if index < self.records.len() => self.records[index..].to_vec(),
            _ => Vec::new(),
        }
    }
}
