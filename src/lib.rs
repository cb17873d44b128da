//! Multi-agent coordination core: a runtime that, given a fixed collection
//! of named agents and a declarative strategy, orchestrates their
//! interaction to produce a single final output.
//!
//! The crate is organized leaf-first: communication primitives
//! ([`events`], [`message_bus`], [`blackboard`]) and resource/failure
//! guards ([`resource`], [`circuit_breaker`]) are consumed by the
//! [`coordinator`], which is in turn driven by one of the six [`strategy`]
//! implementations, all fronted by the [`swarm`] facade.

pub mod agent_runner;
pub mod blackboard;
pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod logging;
pub mod message_bus;
pub mod resource;
pub mod strategy;
pub mod swarm;
pub mod types;

pub use agent_runner::{AgentRunner, RunContext, ScriptedAgentRunner};
pub use coordinator::Coordinator;
pub use error::{SwarmError, SwarmResult};
pub use swarm::{DryRunReport, Swarm};
pub use types::{Agent, AgentMetadata, AgentRole, RunResult, SwarmAgent, Usage};
