use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Referenced entity does not exist. The str names the entity kind.
    NotFound(&'static str, Ulid),
    InvalidRequest(String),
    Conflict(String),
    Forbidden(&'static str),
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    Storage(String),
}

impl SchedulerError {
    /// Stable machine-readable category.
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulerError::NotFound(..) => "not_found",
            SchedulerError::InvalidRequest(_) => "invalid_request",
            SchedulerError::Conflict(_) => "conflict",
            SchedulerError::Forbidden(_) => "forbidden",
            SchedulerError::InvalidTransition { .. } => "invalid_transition",
            SchedulerError::Storage(_) => "internal",
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SchedulerError::InvalidRequest(msg.into())
    }
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::NotFound(what, id) => write!(f, "{what} not found: {id}"),
            SchedulerError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            SchedulerError::Conflict(msg) => write!(f, "conflict: {msg}"),
            SchedulerError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            SchedulerError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            SchedulerError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for SchedulerError {}
