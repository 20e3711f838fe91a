use tracing::Level;

use crate::engine::EngineError;
use crate::notify::MailError;

/// What happened to reservations taken before a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollback {
    /// Nothing had been reserved yet.
    NotNeeded,
    /// Every reservation was released.
    Completed,
    /// At least one release failed; counters may be inconsistent.
    Failed(String),
}

impl Rollback {
    pub fn failed(&self) -> bool {
        matches!(self, Rollback::Failed(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("forbidden")]
    Forbidden,

    #[error("{internal}")]
    InvalidRequest {
        message: &'static str,
        internal: String,
    },

    #[error("{internal}")]
    QuotaExceeded {
        message: String,
        internal: String,
        rollback: Rollback,
    },

    #[error("{internal}")]
    Conflict {
        message: &'static str,
        internal: String,
        rollback: Rollback,
    },

    #[error("booking not found: {0}")]
    NotFound(String),

    /// The booking is durable; only the email failed.
    #[error("notification failed after booking {booking_id}: {source}")]
    Notification {
        booking_id: String,
        #[source]
        source: MailError,
    },

    #[error("misconfigured: {0}")]
    Misconfigured(String),

    #[error("store error: {source}")]
    Store {
        #[source]
        source: EngineError,
        rollback: Rollback,
    },
}

impl BookingError {
    pub(crate) fn invalid(message: &'static str, internal: impl Into<String>) -> Self {
        BookingError::InvalidRequest {
            message,
            internal: internal.into(),
        }
    }

    pub(crate) fn store(source: EngineError) -> Self {
        BookingError::Store {
            source,
            rollback: Rollback::NotNeeded,
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            BookingError::Forbidden => 403,
            BookingError::InvalidRequest { .. } => 400,
            BookingError::NotFound(_) => 404,
            BookingError::QuotaExceeded { .. } | BookingError::Conflict { .. } => 409,
            BookingError::Notification { .. }
            | BookingError::Misconfigured(_)
            | BookingError::Store { .. } => 500,
        }
    }

    /// Caller-facing text. Internal detail stays in `Display`.
    pub fn http_message(&self) -> String {
        match self {
            BookingError::Forbidden => "Forbidden".into(),
            BookingError::InvalidRequest { message, .. } => (*message).into(),
            BookingError::QuotaExceeded { message, .. } => message.clone(),
            BookingError::Conflict { message, .. } => (*message).into(),
            BookingError::NotFound(_) => "Booking not found".into(),
            BookingError::Notification { .. }
            | BookingError::Misconfigured(_)
            | BookingError::Store { .. } => "Internal Server Error".into(),
        }
    }

    pub fn rollback(&self) -> &Rollback {
        match self {
            BookingError::QuotaExceeded { rollback, .. }
            | BookingError::Conflict { rollback, .. }
            | BookingError::Store { rollback, .. } => rollback,
            _ => &Rollback::NotNeeded,
        }
    }

    /// Expected rejections log at WARN. A failed rollback escalates to ERROR
    /// even though the caller still sees the original 409.
    pub fn level(&self) -> Level {
        match self {
            BookingError::Forbidden
            | BookingError::InvalidRequest { .. }
            | BookingError::NotFound(_) => Level::WARN,
            BookingError::QuotaExceeded { rollback, .. } | BookingError::Conflict { rollback, .. } => {
                if rollback.failed() {
                    Level::ERROR
                } else {
                    Level::WARN
                }
            }
            BookingError::Notification { .. }
            | BookingError::Misconfigured(_)
            | BookingError::Store { .. } => Level::ERROR,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::Forbidden => "forbidden",
            BookingError::InvalidRequest { .. } => "invalid_request",
            BookingError::QuotaExceeded { .. } => "quota_exceeded",
            BookingError::Conflict { .. } => "conflict",
            BookingError::NotFound(_) => "not_found",
            BookingError::Notification { .. } => "notification",
            BookingError::Misconfigured(_) => "misconfigured",
            BookingError::Store { .. } => "store",
        }
    }
}
