//! The external agent-runner collaborator (§6) and a scripted test double.
//!
//! `AgentRunner` is the single seam through which this crate calls out to
//! whatever actually produces agent text — an LM client, a subprocess, a
//! remote service. The core never inspects that implementation; it only
//! calls `run` and expects a `RunResult` or an error.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::AgentRunError;
use crate::types::{Agent, RunResult};

/// Per-invocation context merged from caller-supplied keys and the
/// coordinator's `swarmContext` (§4.6).
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub values: HashMap<String, Value>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// The opaque collaborator the coordinator delegates each invocation to.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run `agent` against `input` with `context`, returning its output and
    /// usage, or an error describing the failure.
    async fn run(&self, agent: &Agent, input: &str, context: &RunContext) -> Result<RunResult, AgentRunError>;
}

/// Test double: returns queued results per agent name, in FIFO order,
/// looping once exhausted so long strategy runs don't starve. Mirrors the
/// teacher's mock-client queue-and-pop test-double shape.
#[derive(Default)]
pub struct ScriptedAgentRunner {
    queues: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
    calls: Mutex<Vec<(String, String)>>,
}

/// One scripted response: either a successful output or a failure message.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Output(String),
    Failure(String),
}

impl ScriptedAgentRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `output` as the next response for `agent_name`.
    pub fn push(&self, agent_name: impl Into<String>, output: impl Into<String>) -> &Self {
        self.queues
            .lock()
            .expect("scripted runner lock poisoned")
            .entry(agent_name.into())
            .or_default()
            .push_back(ScriptedResponse::Output(output.into()));
        self
    }

    /// Queue a failure as the next response for `agent_name`.
    pub fn push_failure(&self, agent_name: impl Into<String>, message: impl Into<String>) -> &Self {
        self.queues
            .lock()
            .expect("scripted runner lock poisoned")
            .entry(agent_name.into())
            .or_default()
            .push_back(ScriptedResponse::Failure(message.into()));
        self
    }

    /// Every `(agent_name, input)` pair passed to `run`, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("scripted runner lock poisoned").clone()
    }
}

#[async_trait]
impl AgentRunner for ScriptedAgentRunner {
    async fn run(&self, agent: &Agent, input: &str, _context: &RunContext) -> Result<RunResult, AgentRunError> {
        self.calls.lock().expect("scripted runner lock poisoned").push((agent.name.clone(), input.to_string()));

        let mut queues = self.queues.lock().expect("scripted runner lock poisoned");
        let queue = queues.entry(agent.name.clone()).or_default();
        let response = queue.pop_front().unwrap_or_else(|| {
            ScriptedResponse::Output(format!("[{}] no scripted response queued for: {input}", agent.name))
        });

        match response {
            ScriptedResponse::Output(output) => Ok(RunResult::new(output)),
            ScriptedResponse::Failure(message) => Err(AgentRunError::new(agent.name.clone(), message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_runner_returns_queued_outputs_in_order() {
        let runner = ScriptedAgentRunner::new();
        runner.push("a1", "first").push("a1", "second");
        let agent = Agent::new("a1", "do things");

        let r1 = runner.run(&agent, "in", &RunContext::new()).await.unwrap();
        let r2 = runner.run(&agent, "in", &RunContext::new()).await.unwrap();
        assert_eq!(r1.output, "first");
        assert_eq!(r2.output, "second");
    }

    #[tokio::test]
    async fn scripted_runner_surfaces_queued_failure() {
        let runner = ScriptedAgentRunner::new();
        runner.push_failure("a1", "boom");
        let agent = Agent::new("a1", "do things");

        let err = runner.run(&agent, "in", &RunContext::new()).await.unwrap_err();
        assert_eq!(err.agent_name, "a1");
    }
}
