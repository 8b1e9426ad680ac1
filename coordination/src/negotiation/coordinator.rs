//! Coordinator: drives the propose → evaluate loop of one session.
//!
//! Each turn asks the [`HandoffPolicy`] who speaks, calls the [`AgentClient`]
//! through the [`RateGate`] under a per-call timeout, appends the accepted
//! proposal and asks the [`ConsensusDetector`] whether the session is done.
//! When the round limit is reached without agreement the latest proposal of
//! the authority role is taken as the artifact.
//!
//! Within a session turns are strictly sequential. The session lock is never
//! held across an await point, so monitors can read status at any time.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::client::{AgentClient, AgentRequest, Roster};
use super::consensus::{ConsensusDetector, ConsensusResult};
use super::error::{AgentError, CoordinatorError, ErrorKind, SessionFailure};
use super::gate::{RateGate, Unbounded};
use super::guardrails::{GuardrailOutcome, Guardrails};
use super::handoff::{HandoffPolicy, RoundRobin};
use super::manager::SessionHandle;
use super::observer::{SessionObserver, TracingObserver};
use super::retry::RetryPolicy;
use super::state::{Proposal, Role, Session, SessionStatus, TransitionError};

/// Knobs of the round loop. Nothing here is a hidden constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub retry: RetryPolicy,
    /// Budget for one agent (or judge) call.
    pub call_timeout: Duration,
    /// Corrective retries after empty or constraint-violating content.
    pub content_retries: u32,
    /// Role whose latest proposal wins on forced consensus.
    pub forcing_role: Option<Role>,
    /// Wall-clock budget for the whole session. `None` = unlimited.
    pub session_timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(120),
            content_retries: 1,
            forcing_role: Some(Role::Editor),
            session_timeout: None,
        }
    }
}

/// What `run` hands back. Failed and cancelled sessions still carry the full history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub status: SessionStatus,
    pub final_content: Option<String>,
    pub history: Vec<Proposal>,
    pub rounds_completed: u32,
    /// Present iff status is `Failed`.
    pub failure: Option<SessionFailure>,
    /// Last consensus verdict, if any evaluation ran.
    pub consensus: Option<ConsensusResult>,
    /// Authority role used when consensus was forced.
    pub forced_role: Option<Role>,
}

impl SessionOutcome {
    fn from_session(
        session: &Session,
        consensus: Option<ConsensusResult>,
        forced_role: Option<Role>,
    ) -> Self {
        Self {
            session_id: session.id.clone(),
            status: session.status(),
            final_content: session.final_content().map(str::to_string),
            history: session.history().to_vec(),
            rounds_completed: session.completed_rounds(),
            failure: session.failure().cloned(),
            consensus,
            forced_role,
        }
    }

    /// Whether the session produced an artifact.
    pub fn is_success(&self) -> bool {
        self.status.has_artifact()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "[{}] {} rounds | {} proposals | session={}",
            self.status.to_string().to_uppercase(),
            self.rounds_completed,
            self.history.len(),
            self.session_id
        )
    }
}

enum Attempt<T> {
    Done { value: T, attempts: u32 },
    Failed { error: AgentError, attempts: u32 },
    Stopped(String),
}

struct RunContext {
    session_id: String,
    cancel: CancellationToken,
    started: Instant,
}

impl RunContext {
    fn stop_reason(&self, guardrails: &Guardrails) -> Option<String> {
        if self.cancel.is_cancelled() {
            return Some("cancelled by caller".to_string());
        }
        match guardrails.check_timeout(self.started.elapsed()) {
            GuardrailOutcome::Continue => None,
            outcome => Some(format!("session {}", outcome)),
        }
    }

    /// Backoff sleep that wakes early on cancellation. Returns false if cancelled.
    async fn sleep(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.cancel.cancelled() => false,
        }
    }
}

/// Drives sessions to a terminal status.
#[derive(Clone)]
pub struct Coordinator {
    client: Arc<dyn AgentClient>,
    handoff: Arc<dyn HandoffPolicy>,
    detector: ConsensusDetector,
    gate: Arc<dyn RateGate>,
    observer: Arc<dyn SessionObserver>,
    roster: Roster,
    config: CoordinatorConfig,
    guardrails: Guardrails,
}

impl Coordinator {
    /// Round-robin handoff, Jaccard consensus at 0.8, no rate limit, tracing observer.
    pub fn new(client: Arc<dyn AgentClient>) -> Self {
        let config = CoordinatorConfig::default();
        Self {
            client,
            handoff: Arc::new(RoundRobin::new()),
            detector: ConsensusDetector::default(),
            gate: Arc::new(Unbounded),
            observer: Arc::new(TracingObserver),
            roster: Roster::new(),
            guardrails: Guardrails::new(config.session_timeout),
            config,
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.guardrails = Guardrails::new(config.session_timeout);
        self.config = config;
        self
    }

    pub fn with_handoff(mut self, handoff: Arc<dyn HandoffPolicy>) -> Self {
        self.handoff = handoff;
        self
    }

    pub fn with_detector(mut self, detector: ConsensusDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn RateGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_roster(mut self, roster: Roster) -> Self {
        self.roster = roster;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Run a freshly created session to completion.
    pub async fn run_session(&self, session: Session) -> Result<SessionOutcome, CoordinatorError> {
        self.run(&SessionHandle::new(session)).await
    }

    /// Run the session behind `handle` until it converges, is forced, fails
    /// or is cancelled.
    ///
    /// Expected endings (including provider failure) are reported through
    /// [`SessionOutcome::status`]; `Err` means the coordinator was misused.
    pub async fn run(&self, handle: &SessionHandle) -> Result<SessionOutcome, CoordinatorError> {
        let ctx = RunContext {
            session_id: handle.id().to_string(),
            cancel: handle.cancel_token().clone(),
            started: Instant::now(),
        };

        {
            let session = handle.shared().read().await;
            match session.status() {
                status if status.is_terminal() => {
                    return Err(CoordinatorError::AlreadyTerminal {
                        id: session.id.clone(),
                        status,
                    })
                }
                SessionStatus::Init if handle.try_claim() => {}
                _ => return Err(CoordinatorError::AlreadyRunning(session.id.clone())),
            }
            self.observer.on_start(&session);
        }

        let mut last_consensus: Option<ConsensusResult> = None;

        loop {
            if let Some(reason) = ctx.stop_reason(&self.guardrails) {
                return self.finish_cancelled(handle, &reason, last_consensus).await;
            }

            // Pick the speaker and snapshot the context for this turn.
            let request = {
                let mut session = handle.shared().write().await;
                let turn = session.history().len();
                let role = self.handoff.next_role(&session.roles, turn).ok_or_else(|| {
                    CoordinatorError::InvalidConfig("handoff policy returned no role".to_string())
                })?;
                self.step(&mut session, SessionStatus::Proposing, &format!("{} to propose", role))?;
                let profile = self.roster.profile(role);
                AgentRequest {
                    session_id: session.id.clone(),
                    kind: session.kind,
                    topic: session.topic.clone(),
                    role,
                    agent_id: profile.agent_id,
                    persona: profile.persona,
                    history: session.history().to_vec(),
                    constraints: session.constraints.clone(),
                    correction_hint: None,
                    round_index: session.round_index(),
                }
            };
            self.observer
                .on_turn(&ctx.session_id, request.role, &request.agent_id, request.round_index);

            let content = match self.propose(&ctx, request.clone()).await {
                Attempt::Done { value, .. } => value,
                Attempt::Failed { error, attempts } => {
                    return self
                        .finish_failed(handle, request.round_index, request.role, &error, attempts, last_consensus)
                        .await;
                }
                Attempt::Stopped(reason) => {
                    return self.finish_cancelled(handle, &reason, last_consensus).await;
                }
            };

            // Append and collect the consensus window.
            let (window, role_count) = {
                let mut session = handle.shared().write().await;
                if ctx.cancel.is_cancelled() {
                    drop(session);
                    return self
                        .finish_cancelled(handle, "cancelled by caller", last_consensus)
                        .await;
                }
                let proposal = Proposal::new(
                    request.agent_id.clone(),
                    request.role,
                    content,
                    request.round_index,
                );
                session.append(proposal.clone())?;
                self.observer.on_proposal(&ctx.session_id, &proposal);
                self.step(&mut session, SessionStatus::Evaluating, "proposal appended")?;
                let window = self
                    .detector
                    .window(session.history().as_slice(), session.roles.len())
                    .to_vec();
                (window, session.roles.len())
            };

            if window.len() >= 2 {
                let latest_role = request.role;
                let result = match self.evaluate(&ctx, &window).await {
                    Attempt::Done { value, .. } => value,
                    Attempt::Failed { error, attempts } => {
                        return self
                            .finish_failed(handle, request.round_index, latest_role, &error, attempts, last_consensus)
                            .await;
                    }
                    Attempt::Stopped(reason) => {
                        return self.finish_cancelled(handle, &reason, last_consensus).await;
                    }
                };
                self.observer.on_consensus(&ctx.session_id, &result);
                let reached = result.reached;
                let reason = result.reason.clone();
                last_consensus = Some(result);

                if reached {
                    let mut session = handle.shared().write().await;
                    self.finish(&mut session, SessionStatus::Converged, &reason, |s, r| s.converge(r))?;
                    return Ok(SessionOutcome::from_session(&session, last_consensus, None));
                }
            }

            let outcome = {
                let session = handle.shared().read().await;
                self.guardrails.evaluate(&session, ctx.started.elapsed())
            };
            debug!(session = %ctx.session_id, window = role_count, guardrail = %outcome, "Turn complete");

            match outcome {
                GuardrailOutcome::Continue => continue,
                GuardrailOutcome::RoundLimitReached { rounds } => {
                    return self.finish_forced(handle, rounds, last_consensus).await;
                }
                GuardrailOutcome::TimeoutExceeded { .. } => {
                    let reason = format!("session {}", outcome);
                    return self.finish_cancelled(handle, &reason, last_consensus).await;
                }
            }
        }
    }

    /// One turn's agent call with transient retries and one corrective retry
    /// for content errors.
    async fn propose(&self, ctx: &RunContext, mut request: AgentRequest) -> Attempt<String> {
        let mut corrections = 0;
        let mut total_attempts = 0;
        loop {
            let client = &self.client;
            let req = &request;
            let attempt = self
                .retrying(ctx, request.role, move || async move {
                    let text = client.invoke(req).await?;
                    let text = text.trim().to_string();
                    req.constraints.check(&text)?;
                    Ok::<String, AgentError>(text)
                })
                .await;

            match attempt {
                Attempt::Done { value, attempts } => {
                    return Attempt::Done {
                        value,
                        attempts: total_attempts + attempts,
                    }
                }
                Attempt::Failed { error, attempts }
                    if error.kind() == ErrorKind::Content
                        && corrections < self.config.content_retries =>
                {
                    corrections += 1;
                    total_attempts += attempts;
                    self.observer.on_retry(
                        &ctx.session_id,
                        request.role,
                        total_attempts,
                        &error,
                        Duration::ZERO,
                    );
                    request.correction_hint = Some(request.constraints.correction_hint(&error));
                }
                Attempt::Failed { error, attempts } => {
                    return Attempt::Failed {
                        error,
                        attempts: total_attempts + attempts,
                    }
                }
                Attempt::Stopped(reason) => return Attempt::Stopped(reason),
            }
        }
    }

    /// Consensus evaluation. Remote strategies go through the gate, timeout and
    /// retry budget. An unusable judge answer counts as "not reached".
    async fn evaluate(&self, ctx: &RunContext, window: &[Proposal]) -> Attempt<ConsensusResult> {
        if let Some(result) = self.detector.precheck(window) {
            return Attempt::Done {
                value: result,
                attempts: 0,
            };
        }
        let strategy = self.detector.strategy();
        let role = window.last().map(|p| p.role).unwrap_or(Role::Editor);

        let scored = if strategy.is_remote() {
            self.retrying(ctx, role, || strategy.score(window)).await
        } else {
            match strategy.score(window).await {
                Ok(value) => Attempt::Done { value, attempts: 1 },
                Err(error) => Attempt::Failed { error, attempts: 1 },
            }
        };

        match scored {
            Attempt::Done { value, attempts } => Attempt::Done {
                value: self.detector.judge(value),
                attempts,
            },
            Attempt::Failed { error, attempts } if error.kind() == ErrorKind::Content => {
                let mut result = self.detector.judge(0.0);
                result.reason = format!("judge answer unusable: {}", error);
                Attempt::Done {
                    value: result,
                    attempts,
                }
            }
            other => other.map_failed(),
        }
    }

    /// Admit, time-box and retry an operation on transient failures.
    async fn retrying<T, F, Fut>(&self, ctx: &RunContext, role: Role, mut op: F) -> Attempt<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let mut attempts = 0;
        let mut retries = 0;
        loop {
            if let Some(reason) = ctx.stop_reason(&self.guardrails) {
                return Attempt::Stopped(reason);
            }
            let permit = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    return Attempt::Stopped("cancelled by caller".to_string());
                }
                permit = self.gate.acquire() => permit,
            };
            // Cancellation or timeout may have landed while queued at the gate.
            if let Some(reason) = ctx.stop_reason(&self.guardrails) {
                return Attempt::Stopped(reason);
            }
            attempts += 1;
            let result = match permit {
                Ok(_permit) => self.timed(op()).await,
                Err(error) => Err(error),
            };

            // Results of calls that finished after cancellation are dropped.
            if let Some(reason) = ctx.stop_reason(&self.guardrails) {
                return Attempt::Stopped(reason);
            }

            match result {
                Ok(value) => return Attempt::Done { value, attempts },
                Err(error) if error.is_retriable() && self.config.retry.should_retry(retries) => {
                    retries += 1;
                    let delay = self.config.retry.delay_for(retries, error.retry_after());
                    self.observer
                        .on_retry(&ctx.session_id, role, attempts, &error, delay);
                    if !ctx.sleep(delay).await {
                        return Attempt::Stopped("cancelled by caller".to_string());
                    }
                }
                Err(error) => return Attempt::Failed { error, attempts },
            }
        }
    }

    async fn timed<T, Fut>(&self, call: Fut) -> Result<T, AgentError>
    where
        Fut: Future<Output = Result<T, AgentError>>,
    {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout(self.config.call_timeout)),
        }
    }

    fn step(
        &self,
        session: &mut Session,
        to: SessionStatus,
        reason: &str,
    ) -> Result<(), CoordinatorError> {
        let from = session.status();
        session.transition(to, reason)?;
        self.observer.on_transition(&session.id, from, to, reason);
        Ok(())
    }

    fn finish<F>(
        &self,
        session: &mut Session,
        to: SessionStatus,
        reason: &str,
        apply: F,
    ) -> Result<(), CoordinatorError>
    where
        F: FnOnce(&mut Session, &str) -> Result<(), TransitionError>,
    {
        let from = session.status();
        apply(session, reason)?;
        self.observer.on_transition(&session.id, from, to, reason);
        self.observer.on_finish(session);
        Ok(())
    }

    async fn finish_forced(
        &self,
        handle: &SessionHandle,
        rounds: u32,
        consensus: Option<ConsensusResult>,
    ) -> Result<SessionOutcome, CoordinatorError> {
        let mut session = handle.shared().write().await;
        let authority = self
            .handoff
            .authority_role(&session.roles, self.config.forcing_role)
            .ok_or_else(|| CoordinatorError::InvalidConfig("no authority role".to_string()))?;
        let content = session
            .history()
            .last_by_role(authority)
            .or_else(|| session.history().last())
            .map(|p| p.content.clone())
            .unwrap_or_default();
        let reason = format!(
            "no consensus after {} rounds, {} has the final word",
            rounds, authority
        );
        self.finish(&mut session, SessionStatus::Forced, &reason, |s, r| {
            s.force(content, r)
        })?;
        Ok(SessionOutcome::from_session(&session, consensus, Some(authority)))
    }

    async fn finish_failed(
        &self,
        handle: &SessionHandle,
        round_index: u32,
        role: Role,
        error: &AgentError,
        attempts: u32,
        consensus: Option<ConsensusResult>,
    ) -> Result<SessionOutcome, CoordinatorError> {
        let failure = SessionFailure::new(round_index, role, error, attempts);
        self.observer.on_failure(handle.id(), &failure);
        let mut session = handle.shared().write().await;
        let reason = failure.to_string();
        self.finish(&mut session, SessionStatus::Failed, &reason, |s, _| {
            s.fail(failure)
        })?;
        Ok(SessionOutcome::from_session(&session, consensus, None))
    }

    async fn finish_cancelled(
        &self,
        handle: &SessionHandle,
        reason: &str,
        consensus: Option<ConsensusResult>,
    ) -> Result<SessionOutcome, CoordinatorError> {
        let mut session = handle.shared().write().await;
        self.finish(&mut session, SessionStatus::Cancelled, reason, |s, r| s.cancel(r))?;
        Ok(SessionOutcome::from_session(&session, consensus, None))
    }
}

impl<T> Attempt<T> {
    /// Re-type a non-`Done` attempt.
    fn map_failed<U>(self) -> Attempt<U> {
        match self {
            Attempt::Failed { error, attempts } => Attempt::Failed { error, attempts },
            Attempt::Stopped(reason) => Attempt::Stopped(reason),
            Attempt::Done { attempts, .. } => Attempt::Failed {
                error: AgentError::Malformed("unexpected result".to_string()),
                attempts,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::state::{Constraints, ContentKind};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Script(Mutex<VecDeque<Result<String, AgentError>>>);

    impl Script {
        fn new(replies: Vec<Result<&str, AgentError>>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(
                replies.into_iter().map(|r| r.map(str::to_string)).collect(),
            )))
        }
    }

    #[async_trait]
    impl AgentClient for Script {
        async fn invoke(&self, _request: &AgentRequest) -> Result<String, AgentError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AgentError::Permanent("script exhausted".into())))
        }
    }

    fn duo(max_rounds: u32) -> Session {
        Session::new(
            ContentKind::Title,
            "time travel",
            Constraints::default(),
            vec![Role::Creative, Role::Editor],
            max_rounds,
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_on_identical_titles() {
        let client = Script::new(vec![Ok("Echoes of Tomorrow"), Ok("Echoes of Tomorrow")]);
        let outcome = Coordinator::new(client).run_session(duo(3)).await.unwrap();
        assert_eq!(outcome.status, SessionStatus::Converged);
        assert_eq!(outcome.final_content.as_deref(), Some("Echoes of Tomorrow"));
        assert_eq!(outcome.history.len(), 2);
        assert!(outcome.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let client = Script::new(vec![Err(AgentError::Permanent("401".into()))]);
        let outcome = Coordinator::new(client).run_session(duo(3)).await.unwrap();
        assert_eq!(outcome.status, SessionStatus::Failed);
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.attempts, 1);
        assert_eq!(failure.role, Role::Creative);
        assert!(outcome.final_content.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_twice_is_rejected() {
        let client = Script::new(vec![Ok("A"), Ok("A")]);
        let coordinator = Coordinator::new(client);
        let handle = SessionHandle::new(duo(2));
        coordinator.run(&handle).await.unwrap();
        let err = coordinator.run(&handle).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyTerminal { .. }));
    }

    #[test]
    fn test_summary_line() {
        let outcome = SessionOutcome {
            session_id: "abc".into(),
            status: SessionStatus::Forced,
            final_content: Some("x".into()),
            history: vec![],
            rounds_completed: 3,
            failure: None,
            consensus: None,
            forced_role: Some(Role::Editor),
        };
        assert!(outcome.summary_line().starts_with("[FORCED] 3 rounds"));
    }
}
