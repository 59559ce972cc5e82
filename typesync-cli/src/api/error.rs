//! Remote service errors
//!
//! Classifies failures at the remote boundary so the retry policy can tell
//! transient conditions (rate limiting, 5xx, transport) from permanent ones.
//! A mutation whose outcome is unknown is never transient: resending it could
//! apply it twice.

use std::fmt;
use std::time::Duration;

/// Category of a remote failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// 429 Too Many Requests
    RateLimited { retry_after: Option<Duration> },
    /// 5xx response
    Server { status: u16 },
    /// The request could not be delivered, or was safe to replay
    Transport,
    /// A non-idempotent request was sent but its response was lost
    Interrupted,
    /// The call succeeded but the response body could not be decoded
    InvalidResponse,
    /// 404 - the resource or field does not exist
    NotFound,
    /// Any other 4xx - the service refused the request
    Rejected { status: u16 },
}

/// Error returned by a remote service call
#[derive(Debug, Clone)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(retry_after: Option<Duration>, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::RateLimited { retry_after }, message)
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Server { status }, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transport, message)
    }

    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Interrupted, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::InvalidResponse, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message)
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Rejected { status }, message)
    }

    /// Map an HTTP status to an error kind
    pub fn from_status(status: u16, retry_after: Option<Duration>, message: impl Into<String>) -> Self {
        match status {
            429 => Self::rate_limited(retry_after, message),
            404 => Self::not_found(message),
            500..=599 => Self::server(status, message),
            _ => Self::rejected(status, message),
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            RemoteErrorKind::RateLimited { .. }
                | RemoteErrorKind::Server { .. }
                | RemoteErrorKind::Transport
        )
    }

    /// Server-provided wait before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self.kind {
            RemoteErrorKind::RateLimited { retry_after } => retry_after,
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == RemoteErrorKind::NotFound
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RemoteErrorKind::RateLimited { .. } => write!(f, "rate limited: {}", self.message),
            RemoteErrorKind::Server { status } => write!(f, "server error ({}): {}", status, self.message),
            RemoteErrorKind::Transport => write!(f, "transport error: {}", self.message),
            RemoteErrorKind::Interrupted => {
                write!(f, "request interrupted, outcome unknown: {}", self.message)
            }
            RemoteErrorKind::InvalidResponse => write!(f, "invalid response: {}", self.message),
            RemoteErrorKind::NotFound => write!(f, "not found: {}", self.message),
            RemoteErrorKind::Rejected { status } => write!(f, "rejected ({}): {}", status, self.message),
        }
    }
}

impl std::error::Error for RemoteError {}
