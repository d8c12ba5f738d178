use thiserror::Error;

/// Why a single channel produced no manifest URL
///
/// Every variant is recovered at the per-channel boundary and recorded as a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("browser failed to start: {0}")]
    SessionStartError(String),
    #[error("navigation timed out")]
    Timeout,
    #[error("no manifest URL found")]
    NotFound,
    #[error("browser session error: {0}")]
    SessionError(String),
    #[error("cancelled before completion")]
    Cancelled,
}

impl FailureReason {
    /// Short label used when grouping failures in the run summary
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SessionStartError(_) => "session-start",
            Self::Timeout => "timeout",
            Self::NotFound => "not-found",
            Self::SessionError(_) => "session-error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Faults raised by a live browser session
#[derive(Debug, Error)]
pub enum SessionFault {
    #[error("timed out")]
    Timeout,
    #[error("{0}")]
    Browser(String),
}

impl From<chromiumoxide::error::CdpError> for SessionFault {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        match e {
            chromiumoxide::error::CdpError::Timeout => Self::Timeout,
            e => Self::Browser(e.to_string()),
        }
    }
}

impl From<SessionFault> for FailureReason {
    fn from(fault: SessionFault) -> Self {
        match fault {
            SessionFault::Timeout => Self::Timeout,
            SessionFault::Browser(detail) => Self::SessionError(detail),
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("writing local playlist: {0}")]
    Io(#[from] std::io::Error),
    #[error("remote request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no access token provided (set GITHUB_TOKEN)")]
    MissingToken,
    #[error("remote rejected the credentials")]
    Unauthorized,
    #[error("remote revision conflict for {0}")]
    Conflict(String),
    #[error("remote returned {status}: {body}")]
    Remote { status: u16, body: String },
}
