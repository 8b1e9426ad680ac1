//! Error taxonomy for negotiation sessions with retry classification.
//!
//! Every failure an agent call can produce is an [`AgentError`]. The
//! coordinator asks [`AgentError::kind`] how to react instead of matching on
//! message text.
//!
//! | Kind      | Variants                              | Coordinator reaction                  |
//! |-----------|---------------------------------------|---------------------------------------|
//! | Transient | `Transient`, `RateLimited`, `Timeout` | retry with backoff up to the budget   |
//! | Permanent | `Permanent`                           | fail the session immediately          |
//! | Content   | `Empty`, `Malformed`                  | one corrective retry, then fail       |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::{Role, SessionStatus, TransitionError};

/// Classification used by the coordinator to pick a recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, rate limit or timeout. Safe to retry after backing off.
    Transient,
    /// Authorization or configuration problem. Never retried.
    Permanent,
    /// The agent answered, but the answer is unusable.
    Content,
}

impl ErrorKind {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::Content => write!(f, "content"),
        }
    }
}

/// Failure of a single agent call (or a model-backed consensus check).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    // ── Provider, transient ───────────────────────────────────────────────
    /// Network or backend failure.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Provider rate limit. `retry_after` overrides the backoff schedule when
    /// it is longer.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The call did not finish within the per-call timeout.
    #[error("agent call timed out after {0:?}")]
    Timeout(Duration),

    // ── Provider, permanent ───────────────────────────────────────────────
    /// Authorization, unknown model, malformed request.
    #[error("permanent provider failure: {0}")]
    Permanent(String),

    // ── Content ───────────────────────────────────────────────────────────
    /// The agent produced no usable text.
    #[error("agent returned empty content")]
    Empty,

    /// The text violates the session constraints or cannot be parsed.
    #[error("malformed content: {0}")]
    Malformed(String),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_) | Self::RateLimited { .. } | Self::Timeout(_) => {
                ErrorKind::Transient
            }
            Self::Permanent(_) => ErrorKind::Permanent,
            Self::Empty | Self::Malformed(_) => ErrorKind::Content,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind().is_retriable()
    }

    /// Server-requested delay, if the provider sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }
}

/// Why a session ended in `Failed`. Stored on the session, returned with the
/// full history so nothing is silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFailure {
    /// Round in which the failure happened (0-indexed).
    pub round_index: u32,
    /// Role whose turn (or whose proposal's evaluation) failed.
    pub role: Role,
    /// Recovery class of the final error.
    pub kind: ErrorKind,
    /// Human-readable description of the final error.
    pub message: String,
    /// Number of calls made for this turn before giving up.
    pub attempts: u32,
}

impl SessionFailure {
    pub fn new(round_index: u32, role: Role, error: &AgentError, attempts: u32) -> Self {
        Self {
            round_index,
            role,
            kind: error.kind(),
            message: error.to_string(),
            attempts,
        }
    }
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "round {} ({}) failed after {} attempt(s): [{}] {}",
            self.round_index + 1,
            self.role,
            self.attempts,
            self.kind,
            self.message
        )
    }
}

/// Misuse of the coordinator or session manager. Expected outcomes (forced
/// consensus, provider failure) are never reported through this type.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("session {id} already finished with status {status}")]
    AlreadyTerminal { id: String, status: SessionStatus },

    #[error("session {0} is already running")]
    AlreadyRunning(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("history capacity of {capacity} proposals exhausted")]
    HistoryFull { capacity: usize },

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds_are_retriable() {
        assert!(AgentError::Transient("connection reset".into()).is_retriable());
        assert!(AgentError::rate_limited("429").is_retriable());
        assert!(AgentError::Timeout(Duration::from_secs(30)).is_retriable());
    }

    #[test]
    fn test_permanent_and_content_not_retriable() {
        assert_eq!(
            AgentError::Permanent("401".into()).kind(),
            ErrorKind::Permanent
        );
        assert_eq!(AgentError::Empty.kind(), ErrorKind::Content);
        assert!(!AgentError::Malformed("too short".into()).is_retriable());
    }

    #[test]
    fn test_retry_after_only_on_rate_limit() {
        let err = AgentError::RateLimited {
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(AgentError::Transient("x".into()).retry_after(), None);
    }

    #[test]
    fn test_session_failure_carries_round_and_role() {
        let failure = SessionFailure::new(2, Role::Editor, &AgentError::Permanent("bad key".into()), 1);
        assert_eq!(failure.round_index, 2);
        assert_eq!(failure.role, Role::Editor);
        assert_eq!(failure.kind, ErrorKind::Permanent);
        let line = failure.to_string();
        assert!(line.contains("round 3"));
        assert!(line.contains("editor"));
        assert!(line.contains("bad key"));
    }
}
