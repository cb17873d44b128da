//! Owns the agent registry and the four communication primitives; mediates
//! every agent invocation with retries/failover, resource accounting, and
//! circuit-breaker gating.
//!
//! Failure policy (retry/failover/skip/abort with constant/linear/
//! exponential backoff) follows `RetryPolicy`'s `calculate_backoff`
//! doubling-with-cap shape and `tokio::time::sleep` retry loop,
//! generalized from "retry only" to the four-way policy this spec
//! specifies. Context threading (`swarmContext` merged into caller
//! context) builds a request context record once and passes it by value
//! into the collaborator call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use crate::agent_runner::{AgentRunner, RunContext};
use crate::blackboard::Blackboard;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::{PreconditionError, SwarmError};
use crate::events::{names, EventEmitter};
use crate::message_bus::MessageBus;
use crate::resource::{Budget, ResourceTracker};
use crate::types::{Agent, AgentMetadata, AgentState, RunResult, SwarmAgent};

/// Backoff shape for the `Retry` failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Constant,
    Linear,
    Exponential,
}

/// How `run_agent` should react when the underlying agent invocation
/// fails.
#[derive(Debug, Clone)]
pub enum FailurePolicy {
    /// Retry up to `max_retries` times with the configured backoff shape.
    Retry { max_retries: u32, backoff: Backoff, initial_delay: Duration, max_delay: Duration },
    /// Redirect to `backup_agent` once; if that also fails, surface the
    /// backup's error.
    Failover { backup_agent: String },
    /// Swallow the failure and return an empty, zero-usage `RunResult`.
    Skip,
    /// Re-raise the failure to the caller.
    Abort,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Abort
    }
}

impl FailurePolicy {
    fn delay_for_attempt(backoff: Backoff, attempt: u32, initial_delay: Duration, max_delay: Duration) -> Duration {
        match backoff {
            Backoff::Constant => initial_delay.min(max_delay),
            Backoff::Linear => initial_delay.saturating_mul(attempt.max(1)).min(max_delay),
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial_delay.saturating_mul(factor).min(max_delay)
            }
        }
    }
}

/// Policy applied to a single item's failure inside `run_agents_parallel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParallelFailurePolicy {
    /// Omit the failed item from the result map; keep processing the rest.
    #[default]
    Skip,
    /// Propagate the first encountered failure, aborting the batch.
    Abort,
}

/// Default window size for `run_agents_parallel` when the caller doesn't
/// override it.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

struct Flags {
    paused: AtomicBool,
    aborted: AtomicBool,
}

/// Owns the agent registry and all four communication primitives; the
/// single mediator of every agent invocation.
pub struct Coordinator {
    pub swarm_id: Uuid,
    pub swarm_name: String,
    agent_order: Vec<String>,
    agents: HashMap<String, Arc<SwarmAgent>>,
    runner: Arc<dyn AgentRunner>,
    pub bus: MessageBus,
    pub blackboard: Blackboard,
    pub events: EventEmitter,
    pub resources: ResourceTracker,
    circuit: Option<CircuitBreaker>,
    failure_policy: FailurePolicy,
    flags: Flags,
}

impl Coordinator {
    pub fn new(
        swarm_name: impl Into<String>,
        agents: Vec<(Agent, AgentMetadata)>,
        runner: Arc<dyn AgentRunner>,
    ) -> Self {
        Self::with_options(swarm_name, agents, runner, Budget::default(), None, FailurePolicy::default())
    }

    pub fn with_options(
        swarm_name: impl Into<String>,
        agents: Vec<(Agent, AgentMetadata)>,
        runner: Arc<dyn AgentRunner>,
        budget: Budget,
        circuit_config: Option<CircuitBreakerConfig>,
        failure_policy: FailurePolicy,
    ) -> Self {
        let bus = MessageBus::new();
        let mut agent_order = Vec::with_capacity(agents.len());
        let mut map = HashMap::with_capacity(agents.len());
        for (agent, metadata) in agents {
            bus.register_agent(agent.name.clone());
            agent_order.push(agent.name.clone());
            map.insert(agent.name.clone(), Arc::new(SwarmAgent::new(agent, metadata)));
        }

        Self {
            swarm_id: Uuid::new_v4(),
            swarm_name: swarm_name.into(),
            agent_order,
            agents: map,
            runner,
            bus,
            blackboard: Blackboard::new(true),
            events: EventEmitter::new(),
            resources: ResourceTracker::new(budget),
            circuit: circuit_config.map(CircuitBreaker::new),
            failure_policy,
            flags: Flags { paused: AtomicBool::new(false), aborted: AtomicBool::new(false) },
        }
    }

    /// O(1) lookup by name.
    pub fn agent(&self, name: &str) -> Option<&Arc<SwarmAgent>> {
        self.agents.get(name)
    }

    /// Registered agent names, in registration order.
    pub fn agent_names(&self) -> &[String] {
        &self.agent_order
    }

    /// Every registered `SwarmAgent` with the given role.
    pub fn agents_with_role(&self, role: crate::types::AgentRole) -> Vec<&Arc<SwarmAgent>> {
        self.agent_order.iter().filter_map(|name| self.agents.get(name)).filter(|a| a.metadata.role == role).collect()
    }

    pub fn is_paused(&self) -> bool {
        self.flags.paused.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.flags.aborted.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.flags.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.flags.paused.store(false, Ordering::SeqCst);
    }

    /// Sticky: once set, every subsequent `run_agent` fails immediately
    /// with `Aborted`.
    pub fn abort(&self) {
        self.flags.aborted.store(true, Ordering::SeqCst);
    }

    /// Clears agent state, the resource tracker, the circuit breaker, and
    /// all communication primitives. Flags are also cleared.
    pub fn reset(&self) {
        self.flags.paused.store(false, Ordering::SeqCst);
        self.flags.aborted.store(false, Ordering::SeqCst);
        for agent in self.agents.values() {
            agent.set_state(AgentState::Idle);
        }
        self.resources.reset();
        if let Some(circuit) = &self.circuit {
            circuit.reset();
        }
        self.bus.clear();
        self.blackboard.clear();
        self.events.clear_events();
    }

    fn build_context(&self, caller_context: Option<RunContext>, invoking: &str) -> RunContext {
        let other_agents: Vec<&str> =
            self.agent_order.iter().filter(|n| n.as_str() != invoking).map(String::as_str).collect();
        let role = self.agents.get(invoking).map(|a| a.metadata.role);

        let swarm_context = json!({
            "swarmId": self.swarm_id.to_string(),
            "swarmName": self.swarm_name,
            "invokingRole": role.map(crate::types::AgentRole::as_str),
            "otherAgents": other_agents,
        });

        caller_context.unwrap_or_default().with("swarmContext", swarm_context)
    }

    async fn wait_while_paused(&self) {
        while self.is_paused() && !self.is_aborted() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Run one invocation with the configured failure policy applied on
    /// top of raw runner failures. Does not perform coordinator
    /// preconditions, state transitions, or event emission — callers do
    /// that around this.
    async fn invoke_with_policy(
        &self,
        swarm_agent: &Arc<SwarmAgent>,
        input: &str,
        context: &RunContext,
    ) -> Result<RunResult, crate::error::AgentRunError> {
        let first = self.runner.run(&swarm_agent.agent, input, context).await;
        let Err(first_err) = first else {
            return first;
        };

        match &self.failure_policy {
            FailurePolicy::Abort => Err(first_err),
            FailurePolicy::Skip => Ok(RunResult::default()),
            FailurePolicy::Failover { backup_agent } => match self.agents.get(backup_agent) {
                Some(backup) => self.runner.run(&backup.agent, input, context).await,
                None => Err(first_err),
            },
            FailurePolicy::Retry { max_retries, backoff, initial_delay, max_delay } => {
                let mut last_err = first_err;
                for attempt in 1..=*max_retries {
                    let delay = FailurePolicy::delay_for_attempt(*backoff, attempt, *initial_delay, *max_delay);
                    tokio::time::sleep(delay).await;
                    match self.runner.run(&swarm_agent.agent, input, context).await {
                        Ok(result) => return Ok(result),
                        Err(err) => last_err = err,
                    }
                }
                Err(last_err)
            }
        }
    }

    /// Invoke `name` with `input`, threading `context` merged with the
    /// coordinator-supplied `swarmContext`. Preconditions, in order: agent
    /// exists, circuit closed/half-open, within budget, not aborted; then
    /// waits while paused.
    pub async fn run_agent(
        &self,
        name: &str,
        input: &str,
        context: Option<RunContext>,
    ) -> Result<RunResult, SwarmError> {
        let swarm_agent = self
            .agents
            .get(name)
            .ok_or_else(|| PreconditionError::AgentNotFound(name.to_string()))?
            .clone();

        if let Some(circuit) = &self.circuit {
            if !circuit.can_execute() {
                return Err(PreconditionError::CircuitOpen.into());
            }
        }
        if !self.resources.is_within_budget() {
            return Err(PreconditionError::BudgetExceeded.into());
        }
        if self.is_aborted() {
            return Err(PreconditionError::Aborted.into());
        }

        self.wait_while_paused().await;
        if self.is_aborted() {
            return Err(PreconditionError::Aborted.into());
        }

        let merged_context = self.build_context(context, name);

        swarm_agent.set_state(AgentState::Running);
        self.events.emit(names::AGENT_START, json!({"agent": name}), Some(name.to_string()));

        match self.invoke_with_policy(&swarm_agent, input, &merged_context).await {
            Ok(result) => {
                swarm_agent.set_state(AgentState::Completed);
                swarm_agent.record_result(result.clone());
                self.resources.track_agent_run(name, &result.usage);
                if let Some(circuit) = &self.circuit {
                    circuit.record_success();
                }
                self.events.emit(
                    names::AGENT_COMPLETE,
                    json!({"agent": name, "tokens": result.usage.total_tokens}),
                    Some(name.to_string()),
                );
                Ok(result)
            }
            Err(err) => {
                swarm_agent.set_state(AgentState::Failed);
                if let Some(circuit) = &self.circuit {
                    circuit.record_failure();
                }
                self.events.emit(
                    names::AGENT_ERROR,
                    json!({"agent": name, "error": err.to_string()}),
                    Some(name.to_string()),
                );
                Err(err.into())
            }
        }
    }

    /// Run `items` (`(agent_name, input)` pairs) in consecutive windows of
    /// size `max_concurrency` (default [`DEFAULT_MAX_CONCURRENCY`]); within
    /// a window every invocation is issued concurrently. Under
    /// [`ParallelFailurePolicy::Skip`] a failed item is simply absent from
    /// the result map; under [`ParallelFailurePolicy::Abort`] the first
    /// failure is propagated and later windows are not started.
    pub async fn run_agents_parallel(
        &self,
        items: Vec<(String, String)>,
        max_concurrency: Option<usize>,
        on_failure: ParallelFailurePolicy,
    ) -> Result<HashMap<String, RunResult>, SwarmError> {
        let window_size = max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY).max(1);
        let mut results = HashMap::with_capacity(items.len());

        for window in items.chunks(window_size) {
            let futures = window.iter().map(|(name, input)| self.run_agent(name, input, None));
            let outcomes = futures::future::join_all(futures).await;

            for ((name, _), outcome) in window.iter().zip(outcomes) {
                match outcome {
                    Ok(result) => {
                        results.insert(name.clone(), result);
                    }
                    Err(err) => match on_failure {
                        ParallelFailurePolicy::Skip => {}
                        ParallelFailurePolicy::Abort => return Err(err),
                    },
                }
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runner::ScriptedAgentRunner;
    use crate::types::{Agent, AgentMetadata};

    fn make_coordinator(names: &[&str]) -> (Coordinator, Arc<ScriptedAgentRunner>) {
        let runner = Arc::new(ScriptedAgentRunner::new());
        let agents =
            names.iter().map(|n| (Agent::new(*n, "do stuff"), AgentMetadata::default())).collect::<Vec<_>>();
        (Coordinator::new("swarm-1", agents, runner.clone()), runner)
    }

    #[tokio::test]
    async fn run_agent_missing_returns_agent_not_found() {
        let (coordinator, _runner) = make_coordinator(&["a1"]);
        let err = coordinator.run_agent("ghost", "hi", None).await.unwrap_err();
        assert!(matches!(err, SwarmError::Precondition(PreconditionError::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn run_agent_success_updates_state_and_resources() {
        let (coordinator, runner) = make_coordinator(&["a1"]);
        runner.push("a1", "hello");
        let result = coordinator.run_agent("a1", "hi", None).await.unwrap();
        assert_eq!(result.output, "hello");
        assert_eq!(coordinator.agent("a1").unwrap().state(), AgentState::Completed);
    }

    #[tokio::test]
    async fn abort_short_circuits_every_subsequent_call() {
        let (coordinator, _runner) = make_coordinator(&["a1"]);
        coordinator.abort();
        let err = coordinator.run_agent("a1", "hi", None).await.unwrap_err();
        assert!(matches!(err, SwarmError::Precondition(PreconditionError::Aborted)));
    }

    #[tokio::test]
    async fn budget_exceeded_blocks_further_calls() {
        let runner = Arc::new(ScriptedAgentRunner::new());
        let coordinator = Coordinator::with_options(
            "swarm-1",
            vec![(Agent::new("a1", "x"), AgentMetadata::default())],
            runner.clone(),
            Budget { max_tokens: Some(5), ..Default::default() },
            None,
            FailurePolicy::default(),
        );
        runner.push("a1", "hello");
        coordinator.run_agent("a1", "hi", None).await.unwrap();
        coordinator.resources.track_agent_run("a1", &crate::types::Usage::new(10, 0, 0.0, Duration::ZERO));
        let err = coordinator.run_agent("a1", "hi", None).await.unwrap_err();
        assert!(matches!(err, SwarmError::Precondition(PreconditionError::BudgetExceeded)));
    }

    #[tokio::test]
    async fn skip_policy_returns_empty_result_on_failure() {
        let runner = Arc::new(ScriptedAgentRunner::new());
        runner.push_failure("a1", "boom");
        let coordinator = Coordinator::with_options(
            "swarm-1",
            vec![(Agent::new("a1", "x"), AgentMetadata::default())],
            runner,
            Budget::default(),
            None,
            FailurePolicy::Skip,
        );
        let result = coordinator.run_agent("a1", "hi", None).await.unwrap();
        assert_eq!(result.output, "");
        assert_eq!(result.usage.total_tokens, 0);
    }

    #[tokio::test]
    async fn failover_redirects_to_backup_agent() {
        let runner = Arc::new(ScriptedAgentRunner::new());
        runner.push_failure("primary", "boom");
        runner.push("backup", "rescued");
        let coordinator = Coordinator::with_options(
            "swarm-1",
            vec![
                (Agent::new("primary", "x"), AgentMetadata::default()),
                (Agent::new("backup", "x"), AgentMetadata::default()),
            ],
            runner,
            Budget::default(),
            None,
            FailurePolicy::Failover { backup_agent: "backup".to_string() },
        );
        let result = coordinator.run_agent("primary", "hi", None).await.unwrap();
        assert_eq!(result.output, "rescued");
    }

    #[tokio::test]
    async fn retry_exhausts_then_surfaces_error() {
        let runner = Arc::new(ScriptedAgentRunner::new());
        runner.push_failure("a1", "e1");
        runner.push_failure("a1", "e2");
        let coordinator = Coordinator::with_options(
            "swarm-1",
            vec![(Agent::new("a1", "x"), AgentMetadata::default())],
            runner,
            Budget::default(),
            None,
            FailurePolicy::Retry {
                max_retries: 1,
                backoff: Backoff::Constant,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
            },
        );
        let err = coordinator.run_agent("a1", "hi", None).await.unwrap_err();
        assert!(matches!(err, SwarmError::AgentRun(_)));
    }

    #[tokio::test]
    async fn run_agents_parallel_windows_by_max_concurrency() {
        let (coordinator, runner) = make_coordinator(&["a1", "a2", "a3"]);
        runner.push("a1", "r1");
        runner.push("a2", "r2");
        runner.push("a3", "r3");
        let items = vec![
            ("a1".to_string(), "x".to_string()),
            ("a2".to_string(), "x".to_string()),
            ("a3".to_string(), "x".to_string()),
        ];
        let results = coordinator.run_agents_parallel(items, Some(2), ParallelFailurePolicy::Skip).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results["a1"].output, "r1");
    }

    #[tokio::test]
    async fn run_agents_parallel_skip_omits_failed_items() {
        let runner = Arc::new(ScriptedAgentRunner::new());
        runner.push("a1", "ok");
        runner.push_failure("a2", "nope");
        let coordinator = Coordinator::new(
            "swarm-1",
            vec![
                (Agent::new("a1", "x"), AgentMetadata::default()),
                (Agent::new("a2", "x"), AgentMetadata::default()),
            ],
            runner,
        );
        let items = vec![("a1".to_string(), "x".to_string()), ("a2".to_string(), "x".to_string())];
        let results =
            coordinator.run_agents_parallel(items, None, ParallelFailurePolicy::Skip).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.contains_key("a1"));
    }

    #[tokio::test]
    async fn reset_on_fresh_coordinator_is_a_no_op() {
        let (coordinator, _runner) = make_coordinator(&["a1"]);
        coordinator.reset();
        assert!(!coordinator.is_paused());
        assert!(!coordinator.is_aborted());
        assert_eq!(coordinator.agent("a1").unwrap().state(), AgentState::Idle);
    }
}
