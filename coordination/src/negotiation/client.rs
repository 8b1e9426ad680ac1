//! The agent capability the coordinator consumes.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::AgentError;
use super::state::{Constraints, ContentKind, Proposal, Role};

/// Identity and persona of the agent holding a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_id: String,
    /// Persona description handed to the prompt builder.
    #[serde(default)]
    pub persona: String,
}

impl AgentProfile {
    pub fn new(agent_id: impl Into<String>, persona: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            persona: persona.into(),
        }
    }
}

/// Which agent plays each role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Roster {
    members: HashMap<Role, AgentProfile>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, role: Role, profile: AgentProfile) -> Self {
        self.members.insert(role, profile);
        self
    }

    pub fn insert(&mut self, role: Role, profile: AgentProfile) {
        self.members.insert(role, profile);
    }

    /// Profile for `role`; unassigned roles get an anonymous profile named after the role.
    pub fn profile(&self, role: Role) -> AgentProfile {
        self.members
            .get(&role)
            .cloned()
            .unwrap_or_else(|| AgentProfile::new(role.to_string(), String::new()))
    }

    pub fn contains(&self, role: Role) -> bool {
        self.members.contains_key(&role)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Role, &AgentProfile)> {
        self.members.iter()
    }
}

/// Everything an agent sees for one turn.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub session_id: String,
    pub kind: ContentKind,
    pub topic: String,
    pub role: Role,
    pub agent_id: String,
    pub persona: String,
    /// Snapshot of the history before this turn.
    pub history: Vec<Proposal>,
    pub constraints: Constraints,
    /// Set on the corrective retry after a content failure.
    pub correction_hint: Option<String>,
    pub round_index: u32,
}

impl AgentRequest {
    pub fn is_correction(&self) -> bool {
        self.correction_hint.is_some()
    }

    /// Latest proposal from anyone other than the requesting role.
    pub fn last_from_others(&self) -> Option<&Proposal> {
        self.history.iter().rev().find(|p| p.role != self.role)
    }
}

/// Produces one proposal per call. Implementations own a single provider
/// interaction; retries, timeouts and admission are the coordinator's job.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn invoke(&self, request: &AgentRequest) -> Result<String, AgentError>;
}
