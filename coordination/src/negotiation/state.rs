//! Negotiation state machine: statuses, proposals, history and sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::consensus::substance;
use super::error::{AgentError, CoordinatorError, SessionFailure};

/// Lifecycle status of a negotiation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session created but not started.
    Init,
    /// Waiting on the agent whose turn it is.
    Proposing,
    /// Checking the latest proposals for consensus.
    Evaluating,
    /// Agents agreed organically.
    Converged,
    /// Round limit reached; artifact chosen by the forcing policy.
    Forced,
    /// Unrecoverable provider or content failure.
    Failed,
    /// Stopped by the caller or by the session timeout.
    Cancelled,
}

impl SessionStatus {
    /// Whether this is a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Converged | Self::Forced | Self::Failed | Self::Cancelled
        )
    }

    /// Whether a session in this status carries a final artifact.
    pub fn has_artifact(self) -> bool {
        matches!(self, Self::Converged | Self::Forced)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(self) -> &'static [SessionStatus] {
        match self {
            Self::Init => &[Self::Proposing, Self::Cancelled],
            Self::Proposing => &[Self::Evaluating, Self::Failed, Self::Cancelled],
            Self::Evaluating => &[
                Self::Proposing,
                Self::Converged,
                Self::Forced,
                Self::Failed,
                Self::Cancelled,
            ],
            Self::Converged | Self::Forced | Self::Failed | Self::Cancelled => &[],
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Proposing => write!(f, "proposing"),
            Self::Evaluating => write!(f, "evaluating"),
            Self::Converged => write!(f, "converged"),
            Self::Forced => write!(f, "forced"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Role an agent plays in the rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Proposes fresh content.
    Creative,
    /// Critiques and balances proposals.
    Reviewer,
    /// Refines and polishes; final authority when consensus is forced.
    Editor,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Creative, Role::Reviewer, Role::Editor];
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creative => write!(f, "creative"),
            Self::Reviewer => write!(f, "reviewer"),
            Self::Editor => write!(f, "editor"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "creative" => Ok(Self::Creative),
            "reviewer" => Ok(Self::Reviewer),
            "editor" => Ok(Self::Editor),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Kind of artifact a session negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Title,
    Toc,
    Section,
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Title => write!(f, "title"),
            Self::Toc => write!(f, "toc"),
            Self::Section => write!(f, "section"),
        }
    }
}

/// Bounds every accepted proposal must satisfy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    /// Minimum word count (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_words: Option<u32>,
    /// Maximum word count (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_words: Option<u32>,
    /// Free-form requirements forwarded to the agents (never enforced here).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Constraints {
    pub fn words(min_words: u32, max_words: u32) -> Self {
        Self {
            min_words: Some(min_words),
            max_words: Some(max_words),
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Reject empty or out-of-bounds content. Agreement marker lines do not
    /// count toward the word bounds.
    pub fn check(&self, content: &str) -> Result<(), AgentError> {
        let body = substance(content);
        if body.is_empty() {
            return Err(AgentError::Empty);
        }
        let words = word_count(&body) as u32;
        if let Some(min) = self.min_words {
            if words < min {
                return Err(AgentError::Malformed(format!(
                    "{} words is below the minimum of {}",
                    words, min
                )));
            }
        }
        if let Some(max) = self.max_words {
            if words > max {
                return Err(AgentError::Malformed(format!(
                    "{} words exceeds the maximum of {}",
                    words, max
                )));
            }
        }
        Ok(())
    }

    /// Correction hint sent along with the retry after a content failure.
    pub fn correction_hint(&self, error: &AgentError) -> String {
        let mut hint = format!("Your previous answer was rejected: {}.", error);
        match (self.min_words, self.max_words) {
            (Some(min), Some(max)) => {
                hint.push_str(&format!(" Produce between {} and {} words.", min, max))
            }
            (Some(min), None) => hint.push_str(&format!(" Produce at least {} words.", min)),
            (None, Some(max)) => hint.push_str(&format!(" Produce at most {} words.", max)),
            (None, None) => hint.push_str(" Produce a complete, non-empty proposal."),
        }
        hint
    }
}

/// Whitespace-delimited word count.
pub fn word_count(content: &str) -> usize {
    content.split_whitespace().count()
}

/// One agent's candidate content. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub agent_id: String,
    pub role: Role,
    pub content: String,
    /// Round this proposal belongs to (0-indexed).
    pub round_index: u32,
    pub created_at: DateTime<Utc>,
}

impl Proposal {
    pub fn new(
        agent_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        round_index: u32,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            role,
            content: content.into(),
            round_index,
            created_at: Utc::now(),
        }
    }
}

/// Append-only negotiation transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    proposals: Vec<Proposal>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, proposal: Proposal) {
        self.proposals.push(proposal);
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }

    pub fn as_slice(&self) -> &[Proposal] {
        &self.proposals
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Proposal> {
        self.proposals.iter()
    }

    pub fn last(&self) -> Option<&Proposal> {
        self.proposals.last()
    }

    /// The last `n` proposals in insertion order (fewer if history is short).
    pub fn recent(&self, n: usize) -> &[Proposal] {
        let start = self.proposals.len().saturating_sub(n);
        &self.proposals[start..]
    }

    /// Most recent proposal made by `role`.
    pub fn last_by_role(&self, role: Role) -> Option<&Proposal> {
        self.proposals.iter().rev().find(|p| p.role == role)
    }

    pub fn to_vec(&self) -> Vec<Proposal> {
        self.proposals.clone()
    }
}

impl<'a> IntoIterator for &'a ConversationHistory {
    type Item = &'a Proposal;
    type IntoIter = std::slice::Iter<'a, Proposal>;

    fn into_iter(self) -> Self::IntoIter {
        self.proposals.iter()
    }
}

/// A status transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: SessionStatus,
    pub to: SessionStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error for invalid status transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: SessionStatus,
    pub to: SessionStatus,
    pub reason: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} → {}: {}",
            self.from, self.to, self.reason
        )
    }
}

impl std::error::Error for TransitionError {}

/// Complete negotiation state for one artifact.
///
/// Only the coordinator driving the session mutates it; everything else reads
/// snapshots. Invariants kept here:
/// - `history.len() <= max_rounds * roles.len()`
/// - status only moves forward along [`SessionStatus::valid_transitions`]
/// - `final_content` is `Some` iff status is `Converged` or `Forced`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub kind: ContentKind,
    /// What the artifact is about (book topic, section title, ...).
    pub topic: String,
    pub constraints: Constraints,
    /// Rotation order.
    pub roles: Vec<Role>,
    pub max_rounds: u32,
    pub created_at: DateTime<Utc>,
    history: ConversationHistory,
    status: SessionStatus,
    final_content: Option<String>,
    failure: Option<SessionFailure>,
    transitions: Vec<StatusTransition>,
}

impl Session {
    /// Create a session in `Init`. Needs at least two distinct roles and one round.
    pub fn new(
        kind: ContentKind,
        topic: impl Into<String>,
        constraints: Constraints,
        roles: Vec<Role>,
        max_rounds: u32,
    ) -> Result<Self, CoordinatorError> {
        if roles.len() < 2 {
            return Err(CoordinatorError::InvalidConfig(format!(
                "at least two roles are required, got {}",
                roles.len()
            )));
        }
        for (i, role) in roles.iter().enumerate() {
            if roles[..i].contains(role) {
                return Err(CoordinatorError::InvalidConfig(format!(
                    "role {} appears more than once in the rotation",
                    role
                )));
            }
        }
        if max_rounds == 0 {
            return Err(CoordinatorError::InvalidConfig(
                "max_rounds must be > 0".to_string(),
            ));
        }
        if let (Some(min), Some(max)) = (constraints.min_words, constraints.max_words) {
            if min > max {
                return Err(CoordinatorError::InvalidConfig(format!(
                    "min_words ({}) exceeds max_words ({})",
                    min, max
                )));
            }
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            kind,
            topic: topic.into(),
            constraints,
            roles,
            max_rounds,
            created_at: Utc::now(),
            history: ConversationHistory::new(),
            status: SessionStatus::Init,
            final_content: None,
            failure: None,
            transitions: Vec::new(),
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn final_content(&self) -> Option<&str> {
        self.final_content.as_deref()
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        self.failure.as_ref()
    }

    pub fn transitions(&self) -> &[StatusTransition] {
        &self.transitions
    }

    /// Upper bound on the history length.
    pub fn capacity(&self) -> usize {
        self.max_rounds as usize * self.roles.len()
    }

    /// Rounds in which every role has spoken.
    pub fn completed_rounds(&self) -> u32 {
        (self.history.len() / self.roles.len()) as u32
    }

    /// Round the next proposal belongs to (0-indexed).
    pub fn round_index(&self) -> u32 {
        self.completed_rounds()
    }

    /// Whether the latest proposal closed a full rotation.
    pub fn at_round_boundary(&self) -> bool {
        !self.history.is_empty() && self.history.len() % self.roles.len() == 0
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }

    /// Transition to a new status with a reason.
    pub fn transition(&mut self, to: SessionStatus, reason: &str) -> Result<(), TransitionError> {
        if !self.status.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.status,
                to,
                reason: format!(
                    "not a valid transition (allowed: {:?})",
                    self.status.valid_transitions()
                ),
            });
        }
        if to.has_artifact() && self.final_content.is_none() {
            return Err(TransitionError {
                from: self.status,
                to,
                reason: "no final content selected".to_string(),
            });
        }

        self.transitions.push(StatusTransition {
            from: self.status,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.status = to;
        Ok(())
    }

    /// Append an accepted proposal. Only legal while `Proposing`.
    pub fn append(&mut self, proposal: Proposal) -> Result<(), CoordinatorError> {
        if self.status != SessionStatus::Proposing {
            return Err(TransitionError {
                from: self.status,
                to: SessionStatus::Evaluating,
                reason: "proposals are only accepted while proposing".to_string(),
            }
            .into());
        }
        if self.history.len() >= self.capacity() {
            return Err(CoordinatorError::HistoryFull {
                capacity: self.capacity(),
            });
        }
        self.history.push(proposal);
        Ok(())
    }

    /// Terminate as `Converged` on the latest proposal's content.
    pub fn converge(&mut self, reason: &str) -> Result<(), TransitionError> {
        let content = self.history.last().map(|p| p.content.clone());
        self.finish_with(SessionStatus::Converged, content, reason)
    }

    /// Terminate as `Forced` with the content chosen by the forcing policy.
    pub fn force(&mut self, content: String, reason: &str) -> Result<(), TransitionError> {
        self.finish_with(SessionStatus::Forced, Some(content), reason)
    }

    /// Terminate as `Failed`, keeping the history intact.
    pub fn fail(&mut self, failure: SessionFailure) -> Result<(), TransitionError> {
        let reason = failure.to_string();
        self.transition(SessionStatus::Failed, &reason)?;
        self.failure = Some(failure);
        Ok(())
    }

    /// Terminate as `Cancelled`.
    pub fn cancel(&mut self, reason: &str) -> Result<(), TransitionError> {
        self.transition(SessionStatus::Cancelled, reason)
    }

    fn finish_with(
        &mut self,
        to: SessionStatus,
        content: Option<String>,
        reason: &str,
    ) -> Result<(), TransitionError> {
        let Some(content) = content else {
            return Err(TransitionError {
                from: self.status,
                to,
                reason: "history is empty".to_string(),
            });
        };
        if !self.status.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.status,
                to,
                reason: format!(
                    "not a valid transition (allowed: {:?})",
                    self.status.valid_transitions()
                ),
            });
        }
        self.final_content = Some(content);
        self.transition(to, reason)
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] {} round {}/{} | {} proposals | {}",
            self.status,
            self.kind,
            (self.round_index() + 1).min(self.max_rounds),
            self.max_rounds,
            self.history.len(),
            self.topic
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_role_session(max_rounds: u32) -> Session {
        Session::new(
            ContentKind::Title,
            "time travel",
            Constraints::default(),
            vec![Role::Creative, Role::Editor],
            max_rounds,
        )
        .unwrap()
    }

    fn propose(session: &mut Session, role: Role, content: &str) {
        if session.status() != SessionStatus::Proposing {
            session
                .transition(SessionStatus::Proposing, "next turn")
                .unwrap();
        }
        let round = session.round_index();
        session
            .append(Proposal::new(role.to_string(), role, content, round))
            .unwrap();
        session
            .transition(SessionStatus::Evaluating, "proposal appended")
            .unwrap();
    }

    #[test]
    fn test_new_session() {
        let session = two_role_session(3);
        assert_eq!(session.status(), SessionStatus::Init);
        assert_eq!(session.capacity(), 6);
        assert!(session.history().is_empty());
        assert!(session.final_content().is_none());
        assert!(!session.is_complete());
    }

    #[test]
    fn test_rejects_single_role() {
        let err = Session::new(
            ContentKind::Title,
            "t",
            Constraints::default(),
            vec![Role::Creative],
            3,
        )
        .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_duplicate_roles_and_zero_rounds() {
        assert!(Session::new(
            ContentKind::Toc,
            "t",
            Constraints::default(),
            vec![Role::Editor, Role::Editor],
            3,
        )
        .is_err());
        assert!(Session::new(
            ContentKind::Toc,
            "t",
            Constraints::default(),
            vec![Role::Creative, Role::Editor],
            0,
        )
        .is_err());
    }

    #[test]
    fn test_rejects_inverted_word_bounds() {
        let err = Session::new(
            ContentKind::Section,
            "t",
            Constraints::words(900, 100),
            vec![Role::Creative, Role::Editor],
            3,
        )
        .unwrap_err();
        assert!(err.to_string().contains("min_words"));
    }

    #[test]
    fn test_round_accounting() {
        let mut session = two_role_session(3);
        propose(&mut session, Role::Creative, "A");
        assert_eq!(session.round_index(), 0);
        assert!(!session.at_round_boundary());
        propose(&mut session, Role::Editor, "B");
        assert_eq!(session.completed_rounds(), 1);
        assert!(session.at_round_boundary());
        assert_eq!(session.history().recent(2)[0].content, "A");
    }

    #[test]
    fn test_append_only_while_proposing() {
        let mut session = two_role_session(3);
        let err = session
            .append(Proposal::new("zero", Role::Creative, "x", 0))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Transition(_)));
    }

    #[test]
    fn test_history_capacity_enforced() {
        let mut session = two_role_session(1);
        propose(&mut session, Role::Creative, "A");
        propose(&mut session, Role::Editor, "B");
        session
            .transition(SessionStatus::Proposing, "extra turn")
            .unwrap();
        let err = session
            .append(Proposal::new("zero", Role::Creative, "C", 1))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::HistoryFull { capacity: 2 }));
        assert_eq!(session.history().len(), 2);
    }

    #[test]
    fn test_converge_sets_final_content() {
        let mut session = two_role_session(3);
        propose(&mut session, Role::Creative, "Echoes of Tomorrow");
        propose(&mut session, Role::Editor, "Echoes of Tomorrow");
        session.converge("identical proposals").unwrap();
        assert_eq!(session.status(), SessionStatus::Converged);
        assert_eq!(session.final_content(), Some("Echoes of Tomorrow"));
    }

    #[test]
    fn test_cannot_mark_artifact_status_without_content() {
        let mut session = two_role_session(3);
        session.transition(SessionStatus::Proposing, "start").unwrap();
        propose(&mut session, Role::Creative, "A");
        let err = session
            .transition(SessionStatus::Forced, "skip")
            .unwrap_err();
        assert_eq!(err.to, SessionStatus::Forced);
        assert!(session.final_content().is_none());
    }

    #[test]
    fn test_fail_keeps_history_and_no_content() {
        let mut session = two_role_session(3);
        propose(&mut session, Role::Creative, "A");
        session.transition(SessionStatus::Proposing, "next").unwrap();
        let failure = SessionFailure::new(0, Role::Editor, &AgentError::Permanent("401".into()), 1);
        session.fail(failure).unwrap();
        assert_eq!(session.status(), SessionStatus::Failed);
        assert_eq!(session.history().len(), 1);
        assert!(session.final_content().is_none());
        assert_eq!(session.failure().unwrap().role, Role::Editor);
    }

    #[test]
    fn test_terminal_no_transitions() {
        let mut session = two_role_session(3);
        session.cancel("caller request").unwrap();
        let err = session
            .transition(SessionStatus::Proposing, "restart")
            .unwrap_err();
        assert_eq!(err.from, SessionStatus::Cancelled);
    }

    #[test]
    fn test_invalid_transition() {
        let mut session = two_role_session(3);
        let err = session
            .transition(SessionStatus::Evaluating, "skip")
            .unwrap_err();
        assert_eq!(err.from, SessionStatus::Init);
        assert_eq!(err.to, SessionStatus::Evaluating);
    }

    #[test]
    fn test_transition_history() {
        let mut session = two_role_session(3);
        propose(&mut session, Role::Creative, "A");
        assert_eq!(session.transitions().len(), 2);
        assert_eq!(session.transitions()[0].from, SessionStatus::Init);
        assert_eq!(session.transitions()[1].to, SessionStatus::Evaluating);
    }

    #[test]
    fn test_last_by_role() {
        let mut session = Session::new(
            ContentKind::Section,
            "intro",
            Constraints::default(),
            vec![Role::Creative, Role::Reviewer, Role::Editor],
            2,
        )
        .unwrap();
        propose(&mut session, Role::Creative, "c1");
        propose(&mut session, Role::Reviewer, "r1");
        propose(&mut session, Role::Editor, "e1");
        propose(&mut session, Role::Creative, "c2");
        assert_eq!(session.history().last_by_role(Role::Editor).unwrap().content, "e1");
        assert_eq!(session.history().last_by_role(Role::Creative).unwrap().content, "c2");
    }

    #[test]
    fn test_constraints_check() {
        let c = Constraints::words(3, 5);
        assert_eq!(c.check("   "), Err(AgentError::Empty));
        assert!(matches!(c.check("too short"), Err(AgentError::Malformed(_))));
        assert!(c.check("just the right length").is_ok());
        assert!(matches!(
            c.check("one two three four five six"),
            Err(AgentError::Malformed(_))
        ));
        assert!(Constraints::default().check("x").is_ok());
    }

    #[test]
    fn test_constraints_ignore_marker_lines() {
        let c = Constraints::words(3, 5);
        assert!(c.check("just the right length\nConsensus: True").is_ok());
        assert_eq!(c.check("Consensus: True"), Err(AgentError::Empty));
    }

    #[test]
    fn test_correction_hint_mentions_bounds() {
        let c = Constraints::words(500, 2000);
        let hint = c.correction_hint(&AgentError::Malformed("12 words is below the minimum of 500".into()));
        assert!(hint.contains("between 500 and 2000 words"));
    }

    #[test]
    fn test_status_line() {
        let session = two_role_session(5);
        let line = session.status_line();
        assert!(line.contains("[init]"));
        assert!(line.contains("round 1/5"));
        assert!(line.contains("time travel"));
    }

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("Editor".parse::<Role>().unwrap(), Role::Editor);
        assert!("narrator".parse::<Role>().is_err());
        for role in Role::ALL {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SessionStatus::Init.to_string(), "init");
        assert_eq!(SessionStatus::Converged.to_string(), "converged");
        assert_eq!(SessionStatus::Forced.to_string(), "forced");
        assert_eq!(SessionStatus::Cancelled.to_string(), "cancelled");
    }
}
