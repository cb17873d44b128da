//! Core data model: agents, run results, and the swarm-wide runtime wrapping
//! of an `Agent` into a `SwarmAgent` the coordinator can schedule.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An opaque collaborator: given text input and context, produces text
/// output plus usage metrics. The coordinator never inspects `instructions`
/// itself — it is handed to the external `AgentRunner`.
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub instructions: String,
    pub description: Option<String>,
    /// Declared side-effect categories (e.g. "writes-files", "sends-email").
    pub side_effects: Vec<String>,
    /// Names of tools this agent may invoke. Tool execution itself is a
    /// collaborator outside this crate's scope.
    pub tools: Vec<String>,
}

impl Agent {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            instructions: instructions.into(),
            description: None,
            side_effects: Vec::new(),
            tools: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }
}

/// Role a `SwarmAgent` plays within a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Supervisor,
    Worker,
    Moderator,
    Router,
    Advocate,
    Critic,
    Unspecified,
}

impl Default for AgentRole {
    fn default() -> Self {
        Self::Unspecified
    }
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Supervisor => "supervisor",
            Self::Worker => "worker",
            Self::Moderator => "moderator",
            Self::Router => "router",
            Self::Advocate => "advocate",
            Self::Critic => "critic",
            Self::Unspecified => "unspecified",
        }
    }
}

/// Lifecycle state of a `SwarmAgent` under coordinator management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Strategy-facing metadata layered on top of the opaque `Agent`.
#[derive(Debug, Clone, Default)]
pub struct AgentMetadata {
    pub role: AgentRole,
    pub expertise: Vec<String>,
    pub weight: Option<f64>,
    pub priority: Option<u32>,
    pub locked: bool,
}

/// A single tool invocation trace captured during an agent run. The tool
/// itself is executed by a collaborator outside this crate; this is only a
/// record that one occurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallTrace {
    pub name: String,
    pub args: serde_json::Value,
    pub result: Option<serde_json::Value>,
}

/// Usage metrics produced by a single agent invocation.
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    pub duration: Duration,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64, cost: f64, duration: Duration) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            cost,
            duration,
        }
    }
}

/// The result of one agent invocation.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub output: String,
    pub structured: Option<serde_json::Value>,
    pub usage: Usage,
    pub tool_calls: Vec<ToolCallTrace>,
}

impl RunResult {
    pub fn new(output: impl Into<String>) -> Self {
        Self { output: output.into(), ..Default::default() }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }
}

/// Runtime wrapping of an `Agent`: the unit the coordinator actually
/// schedules. Created once at coordinator construction and never dropped
/// for the lifetime of the run; only `state`, `token_count`, and
/// `last_result` mutate during normal operation.
#[derive(Debug)]
pub struct SwarmAgent {
    pub agent: Agent,
    pub metadata: AgentMetadata,
    state: RwLock<AgentState>,
    token_count: AtomicU64,
    last_result: RwLock<Option<RunResult>>,
}

impl SwarmAgent {
    pub fn new(agent: Agent, metadata: AgentMetadata) -> Self {
        Self {
            agent,
            metadata,
            state: RwLock::new(AgentState::Idle),
            token_count: AtomicU64::new(0),
            last_result: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.agent.name
    }

    pub fn state(&self) -> AgentState {
        *self.state.read().expect("swarm agent state lock poisoned")
    }

    pub fn set_state(&self, state: AgentState) {
        *self.state.write().expect("swarm agent state lock poisoned") = state;
    }

    pub fn token_count(&self) -> u64 {
        self.token_count.load(Ordering::SeqCst)
    }

    pub fn record_result(&self, result: RunResult) {
        self.token_count.fetch_add(result.usage.total_tokens, Ordering::SeqCst);
        *self.last_result.write().expect("swarm agent result lock poisoned") = Some(result);
    }

    pub fn last_result(&self) -> Option<RunResult> {
        self.last_result.read().expect("swarm agent result lock poisoned").clone()
    }
}
