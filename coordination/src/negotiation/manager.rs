//! Session registry and the `start` / `run` / `status` surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::coordinator::{Coordinator, SessionOutcome};
use super::error::CoordinatorError;
use super::state::{Constraints, ContentKind, Proposal, Role, Session, SessionStatus};

/// Shared reference to one session. Cheap to clone.
///
/// Readers take snapshots; only the coordinator running the session writes.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: String,
    session: Arc<RwLock<Session>>,
    cancel: CancellationToken,
    claimed: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            id: session.id.clone(),
            session: Arc::new(RwLock::new(session)),
            cancel: CancellationToken::new(),
            claimed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Ask the round loop to stop before its next agent call.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Clone of the current session state.
    pub async fn snapshot(&self) -> Session {
        self.session.read().await.clone()
    }

    /// Progress for monitors.
    pub async fn status(&self) -> StatusSnapshot {
        let session = self.session.read().await;
        StatusSnapshot::of(&session)
    }

    pub(crate) fn shared(&self) -> &Arc<RwLock<Session>> {
        &self.session
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Mark the session as driven by a coordinator. False if already claimed.
    pub(crate) fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Point-in-time progress of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub session_id: String,
    pub kind: ContentKind,
    pub status: SessionStatus,
    /// Round currently in progress (0-indexed).
    pub round_index: u32,
    pub max_rounds: u32,
    pub proposals: usize,
    pub last_proposal: Option<Proposal>,
}

impl StatusSnapshot {
    fn of(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            kind: session.kind,
            status: session.status(),
            round_index: session.round_index().min(session.max_rounds.saturating_sub(1)),
            max_rounds: session.max_rounds,
            proposals: session.history().len(),
            last_proposal: session.history().last().cloned(),
        }
    }
}

/// Creates, runs and tracks sessions. Sessions share nothing but the
/// coordinator's injected collaborators.
pub struct SessionManager {
    coordinator: Coordinator,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionManager {
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Create and register a session in `Init`.
    pub async fn start_session(
        &self,
        kind: ContentKind,
        topic: impl Into<String>,
        constraints: Constraints,
        roles: Vec<Role>,
        max_rounds: u32,
    ) -> Result<SessionHandle, CoordinatorError> {
        let session = Session::new(kind, topic, constraints, roles, max_rounds)?;
        let handle = SessionHandle::new(session);
        info!(session = %handle.id(), %kind, max_rounds, "Session registered");
        self.sessions
            .write()
            .await
            .insert(handle.id().to_string(), handle.clone());
        Ok(handle)
    }

    /// Drive a session to a terminal status.
    pub async fn run_session(&self, handle: &SessionHandle) -> Result<SessionOutcome, CoordinatorError> {
        self.coordinator.run(handle).await
    }

    pub async fn get_status(&self, handle: &SessionHandle) -> StatusSnapshot {
        handle.status().await
    }

    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Request cancellation of a registered session.
    pub async fn cancel(&self, id: &str) -> Result<(), CoordinatorError> {
        let handle = self
            .get(id)
            .await
            .ok_or_else(|| CoordinatorError::SessionNotFound(id.to_string()))?;
        handle.cancel();
        Ok(())
    }

    /// Status of every registered session.
    pub async fn list(&self) -> Vec<StatusSnapshot> {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        join_all(handles.iter().map(|h| h.status())).await
    }

    pub async fn remove(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.write().await.remove(id)
    }

    /// Drop every terminal session from the registry. Returns how many were removed.
    pub async fn prune_finished(&self) -> usize {
        let finished: Vec<String> = self
            .list()
            .await
            .into_iter()
            .filter(|s| s.status.is_terminal())
            .map(|s| s.session_id)
            .collect();
        let mut sessions = self.sessions.write().await;
        for id in &finished {
            sessions.remove(id);
        }
        finished.len()
    }
}
