//! Agent Saloon Coordination Library
//!
//! The collaboration engine behind Agent Saloon: several independent
//! text-generating agents take turns proposing content until they converge
//! on one artifact.
//!
//! # Features
//!
//! ## Negotiation
//! - `Session`: append-only proposal history with a monotonic status machine
//! - `Coordinator`: the round loop, with retry, timeout, rate gating and forcing
//! - `ConsensusDetector`: identical-content fast path, agreement markers, pluggable scoring
//! - `HandoffPolicy`: deterministic turn order over 2- or N-role rotations
//! - `SessionManager`: `start_session` / `run_session` / `get_status`
//!
//! # Usage
//!
//! ```rust,ignore
//! use saloon_coordination::negotiation::*;
//!
//! let manager = SessionManager::new(Coordinator::new(client));
//! let handle = manager
//!     .start_session(ContentKind::Title, "time travel", Constraints::default(),
//!                    vec![Role::Creative, Role::Editor], 3)
//!     .await?;
//! let outcome = manager.run_session(&handle).await?;
//! ```
//!
//! Provider plumbing, prompts and persistence live in the `saloon-agents` crate.

#![allow(clippy::uninlined_format_args)]

pub mod negotiation;

pub use negotiation::{
    AgentClient, AgentError, ConsensusDetector, ConsensusStrategy, Coordinator, CoordinatorConfig,
    CoordinatorError, Role, Session, SessionManager, SessionOutcome, SessionStatus,
};
