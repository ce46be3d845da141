use thiserror::Error;

use crate::app::BuildError;
use crate::domain::{ControlError, Intent, PartitionId, Position};
use crate::ports::LogError;

/// Infrastructure failures. Command rejections are records, not errors.
#[derive(Debug, Error)]
pub enum TasklaneError {
    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("{0:?} commands are issued by the broker, not by clients")]
    InternalCommand(Intent),

    #[error("no response record for command at position {0}")]
    NoResponse(Position),

    #[error("topic={topic} partition={partition_id} is not served here")]
    UnknownPartition {
        topic: String,
        partition_id: PartitionId,
    },

    #[error("partition {0} has stopped")]
    PartitionStopped(PartitionId),
}

impl TasklaneError {
    /// Control messages only ever answer with a `ControlError`.
    pub fn into_control(self) -> ControlError {
        match self {
            TasklaneError::Control(err) => err,
            other => ControlError::request_processing_failure(other.to_string()),
        }
    }
}

pub type Result<T, E = TasklaneError> = std::result::Result<T, E>;
