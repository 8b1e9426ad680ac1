//! Iteration and time guardrails for negotiation sessions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::state::Session;

/// Outcome of a guardrail check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardrailOutcome {
    /// Keep negotiating.
    Continue,
    /// Round counter reached `max_rounds`; consensus must be forced.
    RoundLimitReached { rounds: u32 },
    /// Session-level budget spent; the session is cancelled.
    TimeoutExceeded { elapsed_ms: u64, budget_ms: u64 },
}

impl GuardrailOutcome {
    pub fn should_stop(&self) -> bool {
        !matches!(self, Self::Continue)
    }
}

impl std::fmt::Display for GuardrailOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::RoundLimitReached { rounds } => write!(f, "round_limit_reached ({})", rounds),
            Self::TimeoutExceeded {
                elapsed_ms,
                budget_ms,
            } => write!(f, "timeout_exceeded ({}ms / {}ms)", elapsed_ms, budget_ms),
        }
    }
}

/// Evaluates guardrails against session state.
#[derive(Debug, Clone, Default)]
pub struct Guardrails {
    session_timeout: Option<Duration>,
}

impl Guardrails {
    pub fn new(session_timeout: Option<Duration>) -> Self {
        Self { session_timeout }
    }

    /// Time budget only. Checked before every agent call.
    pub fn check_timeout(&self, elapsed: Duration) -> GuardrailOutcome {
        match self.session_timeout {
            Some(budget) if elapsed >= budget => GuardrailOutcome::TimeoutExceeded {
                elapsed_ms: elapsed.as_millis() as u64,
                budget_ms: budget.as_millis() as u64,
            },
            _ => GuardrailOutcome::Continue,
        }
    }

    /// Time budget, then round limit. Checked after a non-converging evaluation.
    pub fn evaluate(&self, session: &Session, elapsed: Duration) -> GuardrailOutcome {
        let timeout = self.check_timeout(elapsed);
        if timeout.should_stop() {
            return timeout;
        }
        let rounds = session.completed_rounds();
        if session.at_round_boundary() && rounds >= session.max_rounds {
            return GuardrailOutcome::RoundLimitReached { rounds };
        }
        GuardrailOutcome::Continue
    }
}
