//! Agent Saloon: collaborative book writing on top of the negotiation engine.
//!
//! The engine in `saloon_coordination::negotiation` decides when a group of
//! agents agrees. This crate supplies everything around it:
//!
//! - [`config`]: layered `SaloonConfig` (defaults, `saloon.toml`, environment)
//! - [`prompts`]: personas and prompt text per role and content kind
//! - [`providers`]: OpenAI / Anthropic clients, role routing and the model judge
//! - [`extract`]: reply shaping, title / outline / section extraction
//! - [`generators`]: title, outline and section pipelines
//! - [`book`], [`store`], [`archive`]: book model, persistence, export, transcripts
//! - [`irc_log`]: chat-style conversation log

pub mod archive;
pub mod book;
pub mod config;
pub mod extract;
pub mod generators;
pub mod irc_log;
pub mod prompts;
pub mod providers;
pub mod store;
