//! Negotiation Engine: Multi-Agent Consensus Loop
//!
//! Drives several text-generating agents through a bounded, turn-based
//! negotiation until they agree on one artifact (title, table of contents or
//! section body), or until the round limit forces a decision.
//!
//! # Session Flow
//!
//! ```text
//! Init → Proposing → Evaluating → [consensus?]
//!          ▲             │              │
//!          └─────────────┘              ├─ Yes → Converged
//!        (next role / round)            ├─ No, rounds left → Proposing
//!                                       └─ No, max rounds → Forced
//!
//! provider or content failure → Failed
//! caller cancel / session timeout → Cancelled
//! ```

pub mod client;
pub mod consensus;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod guardrails;
pub mod handoff;
pub mod manager;
pub mod observer;
pub mod retry;
pub mod state;

pub use client::{AgentClient, AgentProfile, AgentRequest, Roster};
pub use consensus::{
    ConsensusDetector, ConsensusMethod, ConsensusResult, ConsensusStrategy, JaccardSimilarity,
};
pub use coordinator::{Coordinator, CoordinatorConfig, SessionOutcome};
pub use error::{AgentError, CoordinatorError, ErrorKind, SessionFailure};
pub use gate::{GatePermit, RateGate, SemaphoreGate, Unbounded};
pub use guardrails::{GuardrailOutcome, Guardrails};
pub use handoff::{HandoffPolicy, RoundRobin};
pub use manager::{SessionHandle, SessionManager, StatusSnapshot};
pub use observer::{FanOut, NoopObserver, SessionObserver, TracingObserver};
pub use retry::{BackoffSchedule, RetryPolicy};
pub use state::{
    Constraints, ContentKind, ConversationHistory, Proposal, Role, Session, SessionStatus,
    StatusTransition, TransitionError,
};
