//! Progress sink injected into the coordinator.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::consensus::ConsensusResult;
use super::error::{AgentError, SessionFailure};
use super::state::{Proposal, Role, Session, SessionStatus};

/// Receives negotiation events. Every hook defaults to a no-op.
///
/// Hooks are called synchronously from the round loop and must not block.
pub trait SessionObserver: Send + Sync {
    fn on_start(&self, _session: &Session) {}

    fn on_transition(&self, _session_id: &str, _from: SessionStatus, _to: SessionStatus, _reason: &str) {}

    /// A turn is about to call its agent.
    fn on_turn(&self, _session_id: &str, _role: Role, _agent_id: &str, _round_index: u32) {}

    fn on_proposal(&self, _session_id: &str, _proposal: &Proposal) {}

    fn on_consensus(&self, _session_id: &str, _result: &ConsensusResult) {}

    fn on_retry(&self, _session_id: &str, _role: Role, _attempt: u32, _error: &AgentError, _delay: Duration) {}

    fn on_failure(&self, _session_id: &str, _failure: &SessionFailure) {}

    fn on_finish(&self, _session: &Session) {}
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Emits structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_start(&self, session: &Session) {
        info!(
            session = %session.id,
            kind = %session.kind,
            roles = ?session.roles,
            max_rounds = session.max_rounds,
            "Negotiation started"
        );
    }

    fn on_transition(&self, session_id: &str, from: SessionStatus, to: SessionStatus, reason: &str) {
        debug!(session = %session_id, %from, %to, reason, "Status transition");
    }

    fn on_turn(&self, session_id: &str, role: Role, agent_id: &str, round_index: u32) {
        debug!(session = %session_id, %role, agent = agent_id, round = round_index + 1, "Turn");
    }

    fn on_proposal(&self, session_id: &str, proposal: &Proposal) {
        info!(
            session = %session_id,
            role = %proposal.role,
            agent = %proposal.agent_id,
            round = proposal.round_index + 1,
            chars = proposal.content.len(),
            "Proposal accepted"
        );
    }

    fn on_consensus(&self, session_id: &str, result: &ConsensusResult) {
        debug!(
            session = %session_id,
            reached = result.reached,
            confidence = result.confidence,
            method = %result.method,
            reason = %result.reason,
            "Consensus evaluated"
        );
    }

    fn on_retry(&self, session_id: &str, role: Role, attempt: u32, error: &AgentError, delay: Duration) {
        warn!(
            session = %session_id,
            %role,
            attempt,
            kind = %error.kind(),
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Agent call failed, retrying"
        );
    }

    fn on_failure(&self, session_id: &str, failure: &SessionFailure) {
        warn!(session = %session_id, failure = %failure, "Negotiation failed");
    }

    fn on_finish(&self, session: &Session) {
        info!(
            session = %session.id,
            status = %session.status(),
            proposals = session.history().len(),
            "Negotiation finished"
        );
    }
}

/// Forwards each event to several observers in order.
#[derive(Clone, Default)]
pub struct FanOut {
    observers: Vec<Arc<dyn SessionObserver>>,
}

impl FanOut {
    pub fn new(observers: Vec<Arc<dyn SessionObserver>>) -> Self {
        Self { observers }
    }

    pub fn push(&mut self, observer: Arc<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl SessionObserver for FanOut {
    fn on_start(&self, session: &Session) {
        self.observers.iter().for_each(|o| o.on_start(session));
    }

    fn on_transition(&self, session_id: &str, from: SessionStatus, to: SessionStatus, reason: &str) {
        self.observers
            .iter()
            .for_each(|o| o.on_transition(session_id, from, to, reason));
    }

    fn on_turn(&self, session_id: &str, role: Role, agent_id: &str, round_index: u32) {
        self.observers
            .iter()
            .for_each(|o| o.on_turn(session_id, role, agent_id, round_index));
    }

    fn on_proposal(&self, session_id: &str, proposal: &Proposal) {
        self.observers
            .iter()
            .for_each(|o| o.on_proposal(session_id, proposal));
    }

    fn on_consensus(&self, session_id: &str, result: &ConsensusResult) {
        self.observers
            .iter()
            .for_each(|o| o.on_consensus(session_id, result));
    }

    fn on_retry(&self, session_id: &str, role: Role, attempt: u32, error: &AgentError, delay: Duration) {
        self.observers
            .iter()
            .for_each(|o| o.on_retry(session_id, role, attempt, error, delay));
    }

    fn on_failure(&self, session_id: &str, failure: &SessionFailure) {
        self.observers
            .iter()
            .for_each(|o| o.on_failure(session_id, failure));
    }

    fn on_finish(&self, session: &Session) {
        self.observers.iter().for_each(|o| o.on_finish(session));
    }
}
