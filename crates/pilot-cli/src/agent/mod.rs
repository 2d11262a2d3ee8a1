//! Agent framework for goal-driven browser automation
//!
//! Implements a resolve-act-observe loop that executes exactly one action per
//! model reply.

pub mod agent_loop;
pub mod backend;
pub mod extract;
pub mod guard;
pub mod resolver;
pub mod state;

pub use agent_loop::AgentLoop;
pub use backend::OllamaBackend;
pub use state::{AgentConfig, AgentState, RunOutcome, Step};
