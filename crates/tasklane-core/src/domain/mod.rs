//! Domain model (IDs, task values, states, log records, errors).

pub mod errors;
pub mod ids;
pub mod payload;
pub mod record;
pub mod state;
pub mod task;

pub use self::errors::{ControlError, ErrorCode, RejectionReason};
pub use self::ids::{PartitionId, Position, SubscriberKey, TaskKey};
pub use self::payload::{Payload, PayloadError};
pub use self::record::{
    Intent, NewTask, Record, RecordDraft, RecordMetadata, RecordType, TaskCommand,
};
pub use self::state::TaskState;
pub use self::task::{TaskRecord, TaskType, TaskValue};
