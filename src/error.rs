//! Error taxonomy for the swarm coordination core.
//!
//! Each enum corresponds to one error category from the coordinator's
//! error handling design: configuration errors raised synchronously at
//! construction, runtime precondition errors that short-circuit a single
//! `run_agent` call, and strategy-specific errors surfaced mid-execution.

use thiserror::Error;

/// Errors raised synchronously when a strategy or swarm is misconfigured.
///
/// These never reach `execute` — they are raised before anything runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown strategy: {0}")]
    InvalidStrategy(String),

    #[error("missing required role agent: {0}")]
    MissingRoleAgent(#[from] MissingRoleKind),

    #[error("pipeline has no stages")]
    EmptyStages,

    #[error("missing required strategy configuration: {0}")]
    MissingStrategyConfig(&'static str),
}

/// Which required-role precondition was not met.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MissingRoleKind {
    #[error("no agent with role `supervisor` is registered")]
    NoSupervisor,
    #[error("fewer than two debaters are registered")]
    NoDebaters,
    #[error("fewer than two voting agents are registered")]
    NoVoters,
}

/// Errors raised by `Coordinator::run_agent`'s precondition chain.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("resource budget exceeded")]
    BudgetExceeded,

    #[error("coordinator has been aborted")]
    Aborted,
}

/// Errors specific to one of the six strategies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error("no valid bids were received (minimum bid not met by any agent)")]
    NoValidBids,

    #[error("pipeline aborted at stage `{stage}`: {reason}")]
    PipelineAborted { stage: String, reason: String },

    #[error("stage `{stage}` exceeded its maximum retry count")]
    MaxRetriesExceeded { stage: String },

    #[error("goto target stage not found: {0}")]
    TargetStageNotFound(String),

    #[error("consensus not reached after the configured maximum rounds")]
    ConsensusNotReached,
}

/// Error surfaced by the external agent runner collaborator.
#[derive(Debug, Error, Clone)]
#[error("agent `{agent_name}` failed: {message}")]
pub struct AgentRunError {
    pub agent_name: String,
    pub message: String,
}

impl AgentRunError {
    pub fn new(agent_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { agent_name: agent_name.into(), message: message.into() }
    }
}

/// Top-level error type returned by coordinator and strategy operations.
#[derive(Debug, Error, Clone)]
pub enum SwarmError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    AgentRun(#[from] AgentRunError),
}

pub type SwarmResult<T> = Result<T, SwarmError>;
