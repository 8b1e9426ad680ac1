//! Turn order: which role speaks next, and who has the final word.

use super::state::Role;

/// Decides turn order inside a session.
///
/// Implementations must be pure: the same `(roles, turn)` always yields the
/// same role. `turn` counts proposals, not rounds, so one round spans
/// `roles.len()` turns.
pub trait HandoffPolicy: Send + Sync {
    /// Role that acts at `turn`. `None` only when `roles` is empty.
    fn next_role(&self, roles: &[Role], turn: usize) -> Option<Role>;

    /// Role whose latest proposal becomes the artifact on forced consensus.
    fn authority_role(&self, roles: &[Role], preferred: Option<Role>) -> Option<Role> {
        match preferred {
            Some(role) if roles.contains(&role) => Some(role),
            _ if roles.contains(&Role::Editor) => Some(Role::Editor),
            _ => roles.last().copied(),
        }
    }

    fn name(&self) -> &str;
}

/// Fixed rotation over the configured roles, optionally starting mid-list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundRobin {
    offset: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the rotation at `offset` instead of the first role.
    pub fn starting_at(offset: usize) -> Self {
        Self { offset }
    }
}

impl HandoffPolicy for RoundRobin {
    fn next_role(&self, roles: &[Role], turn: usize) -> Option<Role> {
        if roles.is_empty() {
            return None;
        }
        Some(roles[(turn + self.offset) % roles.len()])
    }

    fn name(&self) -> &str {
        "round_robin"
    }
}
