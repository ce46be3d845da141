//! Errors - ドメインエラー
//!
//! 2 種類のエラーを区別する:
//! - **RejectionReason**: コマンドの前提条件違反。`Err` ではなく COMMAND_REJECTION record として log に書く
//! - **ControlError**: subscription 管理メッセージの検証エラー。呼び出し元へ同期的に返す

use serde::{Deserialize, Serialize};

/// Why a command was rejected. Recorded on the rejection record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RejectionReason {
    #[error("task does not exist")]
    TaskNotFound,

    #[error("task is not in a state that accepts this command")]
    InvalidState,

    #[error("task is locked by another owner")]
    LockOwnerMismatch,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("retries out of range for this command")]
    InvalidRetries,

    #[error("lock expiration time is not in the future")]
    LockTimeNotInFuture,

    #[error("lock has not expired yet")]
    LockNotExpired,

    #[error("subscription is no longer active")]
    SubscriptionClosed,

    #[error("subscription has no credits left")]
    NoCredits,

    #[error("subscription does not handle this task type")]
    TaskTypeMismatch,
}

/// Error codes returned on control messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RequestProcessingFailure,
}

/// Validation failure of a subscription control message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct ControlError {
    pub code: ErrorCode,
    pub message: String,
}

impl ControlError {
    pub const NON_POSITIVE_CREDITS: &'static str =
        "Cannot increase task subscription credits. Credits must be positive.";

    pub fn request_processing_failure(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::RequestProcessingFailure,
            message: message.into(),
        }
    }

    pub fn non_positive_credits() -> Self {
        Self::request_processing_failure(Self::NON_POSITIVE_CREDITS)
    }
}
