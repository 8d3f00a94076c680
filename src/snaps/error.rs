use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::database::{ConflictKind, StoreError};
use crate::models::InstanceState;

/// Why a request was refused without touching the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenReason {
    AlreadyJoined,
    AlreadyCaptured,
    PositionTaken,
    NotJoined,
    TimerNotStarted,
    DeadlineNotReached,
    TimerAlreadyStarted,
    NotOwner,
    NotComplete,
    AlreadyPublished,
    InstanceClosed,
}

impl fmt::Display for ForbiddenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ForbiddenReason::AlreadyJoined => "You have already joined this snap",
            ForbiddenReason::AlreadyCaptured => "You have already taken your snap",
            ForbiddenReason::PositionTaken => "This position is already taken",
            ForbiddenReason::NotJoined => "You have not joined this snap",
            ForbiddenReason::TimerNotStarted => "The countdown has not started",
            ForbiddenReason::DeadlineNotReached => "The countdown has not finished yet",
            ForbiddenReason::TimerAlreadyStarted => "The countdown has already started",
            ForbiddenReason::NotOwner => "Only the snap owner can do this",
            ForbiddenReason::NotComplete => "The snap is not complete",
            ForbiddenReason::AlreadyPublished => "The snap has already been published",
            ForbiddenReason::InstanceClosed => "This snap is closed",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnapError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Forbidden(ForbiddenReason),
    #[error("{0}")]
    BadRequest(String),
    /// The instance cannot finish and must be abandoned.
    #[error("snap aborted: {0}")]
    AbortRequired(String),
    #[error("realtime relay rejected the snap")]
    RelayRejected,
    #[error("internal error: {0}")]
    Internal(String),
}

impl SnapError {
    pub fn is_abort(&self) -> bool {
        matches!(self, SnapError::AbortRequired(_))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            SnapError::NotFound(_) => StatusCode::NOT_FOUND,
            SnapError::Forbidden(_) => StatusCode::FORBIDDEN,
            SnapError::BadRequest(_) => StatusCode::BAD_REQUEST,
            SnapError::AbortRequired(_) | SnapError::RelayRejected | SnapError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// What the client is told; server-side details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            SnapError::AbortRequired(_) => "Snap failed, please start a new one".to_string(),
            SnapError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for SnapError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(kind) => SnapError::Forbidden(match kind {
                ConflictKind::AlreadyJoined => ForbiddenReason::AlreadyJoined,
                ConflictKind::PositionTaken => ForbiddenReason::PositionTaken,
                ConflictKind::AlreadyCaptured => ForbiddenReason::AlreadyCaptured,
                ConflictKind::AlreadyPublished => ForbiddenReason::AlreadyPublished,
                ConflictKind::DuplicateKey => return SnapError::Internal("instance key collision".into()),
            }),
            StoreError::StaleState { expected, actual } => SnapError::Forbidden(match (expected, actual) {
                (_, InstanceState::Open) => ForbiddenReason::TimerNotStarted,
                (InstanceState::Open, InstanceState::TimerRunning) => ForbiddenReason::TimerAlreadyStarted,
                _ => ForbiddenReason::InstanceClosed,
            }),
            StoreError::NotFound => SnapError::NotFound("instance"),
            other => SnapError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for SnapError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("request failed: {}", self);
        } else {
            log::debug!("request rejected: {}", self);
        }
        (status, Json(json!({ "message": self.public_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_become_distinct_forbidden_reasons() {
        let joined: SnapError = StoreError::Conflict(ConflictKind::AlreadyJoined).into();
        let taken: SnapError = StoreError::Conflict(ConflictKind::PositionTaken).into();
        assert!(matches!(joined, SnapError::Forbidden(ForbiddenReason::AlreadyJoined)));
        assert!(matches!(taken, SnapError::Forbidden(ForbiddenReason::PositionTaken)));
    }

    #[test]
    fn stale_states_explain_the_timer() {
        let not_started: SnapError = StoreError::StaleState {
            expected: InstanceState::TimerRunning,
            actual: InstanceState::Open,
        }
        .into();
        assert!(matches!(not_started, SnapError::Forbidden(ForbiddenReason::TimerNotStarted)));

        let restarted: SnapError = StoreError::StaleState {
            expected: InstanceState::Open,
            actual: InstanceState::TimerRunning,
        }
        .into();
        assert!(matches!(restarted, SnapError::Forbidden(ForbiddenReason::TimerAlreadyStarted)));
    }

    #[test]
    fn server_errors_hide_their_details() {
        let err = SnapError::AbortRequired("bucket snaps unavailable".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.public_message().contains("bucket"));
        assert_eq!(SnapError::RelayRejected.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
