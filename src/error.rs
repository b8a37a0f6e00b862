use std::net::IpAddr;

use thiserror::Error;

/// Custom error types for the quiz realtime server
#[derive(Debug, Error)]
pub enum QuizError {
    /// Room and participant lookup errors
    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Participant {0} not found in room")]
    ParticipantNotFound(String),

    /// Stale-client errors; swallowed by the dispatcher rather than surfaced
    #[error("Operation not valid in phase {phase} for room {room_code}")]
    InvalidPhase { room_code: String, phase: String },

    #[error("Participant already answered question {0}")]
    DuplicateAnswer(usize),

    #[error("Question index {index} out of range for room {room_code}")]
    QuestionOutOfRange { room_code: String, index: usize },

    /// Authorization errors
    #[error("Connection is not the host of room {0}")]
    NotHost(String),

    /// Registry errors
    #[error("Connection limit exceeded for origin {0}")]
    CapacityExceeded(IpAddr),

    /// Wire format errors
    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Generic errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using QuizError
pub type Result<T> = std::result::Result<T, QuizError>;

impl QuizError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        QuizError::Internal(msg.into())
    }

    /// Whether the error should reach the acting connection as an `error`
    /// event. Stale-client errors are logged and dropped instead, so a late
    /// or duplicate action never produces user-visible noise.
    pub fn is_reportable(&self) -> bool {
        matches!(
            self,
            QuizError::RoomNotFound(_)
                | QuizError::NotHost(_)
                | QuizError::CapacityExceeded(_)
                | QuizError::SerializationFailed(_)
                | QuizError::Internal(_)
        )
    }
}
