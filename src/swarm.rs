//! Thin wrapper exposing `run`, pause/resume/abort/reset, and forwarding
//! event/message-bus/blackboard access.
//!
//! The single entry point that owns the sub-services and forwards to
//! them: this facade owns a `Coordinator` and a chosen `StrategyKind`,
//! validates the strategy's preconditions at construction (never at `run`
//! time), and emits the `swarm:*` lifecycle events around every
//! invocation.

use serde_json::json;

use crate::blackboard::Blackboard;
use crate::coordinator::Coordinator;
use crate::error::SwarmError;
use crate::events::{names, EventEmitter};
use crate::message_bus::MessageBus;
use crate::strategy::{StrategyKind, StrategyResult};

/// The swarm facade: a coordinator paired with one chosen strategy.
pub struct Swarm {
    coordinator: Coordinator,
    strategy: StrategyKind,
}

/// What a real `run` with this input would do, computed without invoking
/// any agent.
#[derive(Debug, Clone)]
pub struct DryRunReport {
    pub strategy: String,
    pub agents: Vec<String>,
    pub input: String,
}

impl Swarm {
    /// `strategy` must already have passed its own precondition checks
    /// (each `<Strategy>::new` raises a `ConfigError` synchronously before
    /// this point, per `spec.md` §7's propagation policy).
    pub fn new(coordinator: Coordinator, strategy: StrategyKind) -> Self {
        Self { coordinator, strategy }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn events(&self) -> &EventEmitter {
        &self.coordinator.events
    }

    pub fn bus(&self) -> &MessageBus {
        &self.coordinator.bus
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.coordinator.blackboard
    }

    /// Run the chosen strategy against `input`, emitting `swarm:start` and
    /// either `swarm:complete` or `swarm:error`.
    pub async fn run(&self, input: &str) -> Result<StrategyResult, SwarmError> {
        self.coordinator.events.emit(
            names::SWARM_START,
            json!({"swarmId": self.coordinator.swarm_id.to_string(), "strategy": self.strategy.name()}),
            None,
        );

        match self.strategy.execute(&self.coordinator, input).await {
            Ok(result) => {
                self.coordinator.events.emit(
                    names::SWARM_COMPLETE,
                    json!({"swarmId": self.coordinator.swarm_id.to_string(), "output": result.output}),
                    None,
                );
                Ok(result)
            }
            Err(err) => {
                self.coordinator.events.emit(
                    names::SWARM_ERROR,
                    json!({"swarmId": self.coordinator.swarm_id.to_string(), "error": err.to_string()}),
                    None,
                );
                Err(err)
            }
        }
    }

    /// Report which agents and strategy this run would use, without
    /// invoking any agent, sending any message, or spending any budget.
    /// The chosen strategy already passed its precondition checks at
    /// construction time (see [`Swarm::new`]), so this never fails; it
    /// exists for callers that want to fail fast or preview a run before
    /// committing to it.
    pub fn dry_run(&self, input: &str) -> DryRunReport {
        DryRunReport {
            strategy: self.strategy.name().to_string(),
            agents: self.coordinator.agent_names().to_vec(),
            input: input.to_string(),
        }
    }

    pub fn pause(&self) {
        self.coordinator.pause();
        self.coordinator.events.emit(names::SWARM_PAUSED, json!({}), None);
    }

    pub fn resume(&self) {
        self.coordinator.resume();
        self.coordinator.events.emit(names::SWARM_RESUMED, json!({}), None);
    }

    pub fn abort(&self) {
        self.coordinator.abort();
        self.coordinator.events.emit(names::SWARM_ABORTED, json!({}), None);
    }

    pub fn reset(&self) {
        self.coordinator.reset();
        self.coordinator.events.emit(names::SWARM_RESET, json!({}), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runner::ScriptedAgentRunner;
    use crate::strategy::{RoundRobinConfig, RoundRobinStrategy};
    use crate::types::{Agent, AgentMetadata};
    use std::sync::Arc;

    #[tokio::test]
    async fn run_emits_start_and_complete() {
        let runner = Arc::new(ScriptedAgentRunner::new());
        runner.push("a1", "done");
        let coordinator =
            Coordinator::new("swarm-1", vec![(Agent::new("a1", "x"), AgentMetadata::default())], runner);
        let strategy = StrategyKind::RoundRobin(
            RoundRobinStrategy::new(&coordinator, RoundRobinConfig::default()).unwrap(),
        );
        let swarm = Swarm::new(coordinator, strategy);

        let result = swarm.run("hi").await.unwrap();
        assert_eq!(result.output, "done");

        assert_eq!(swarm.events().get_events_by_type(names::SWARM_START).len(), 1);
        assert_eq!(swarm.events().get_events_by_type(names::SWARM_COMPLETE).len(), 1);
    }

    #[tokio::test]
    async fn dry_run_reports_without_invoking_agents() {
        let runner = Arc::new(ScriptedAgentRunner::new());
        let coordinator =
            Coordinator::new("swarm-1", vec![(Agent::new("a1", "x"), AgentMetadata::default())], runner.clone());
        let strategy = StrategyKind::RoundRobin(
            RoundRobinStrategy::new(&coordinator, RoundRobinConfig::default()).unwrap(),
        );
        let swarm = Swarm::new(coordinator, strategy);

        let report = swarm.dry_run("hi");
        assert_eq!(report.agents, vec!["a1".to_string()]);
        assert_eq!(report.strategy, "round-robin");
        assert_eq!(report.input, "hi");

        assert!(runner.calls().is_empty());
        assert_eq!(swarm.events().get_events_by_type(names::SWARM_START).len(), 0);
        assert_eq!(swarm.coordinator().resources.total_tokens(), 0);
    }

    #[test]
    fn pause_resume_abort_reset_toggle_flags_and_emit() {
        let runner = Arc::new(ScriptedAgentRunner::new());
        let coordinator =
            Coordinator::new("swarm-1", vec![(Agent::new("a1", "x"), AgentMetadata::default())], runner);
        let strategy = StrategyKind::RoundRobin(
            RoundRobinStrategy::new(&coordinator, RoundRobinConfig::default()).unwrap(),
        );
        let swarm = Swarm::new(coordinator, strategy);

        swarm.pause();
        assert!(swarm.coordinator().is_paused());
        swarm.resume();
        assert!(!swarm.coordinator().is_paused());
        swarm.abort();
        assert!(swarm.coordinator().is_aborted());
        swarm.reset();
        assert!(!swarm.coordinator().is_aborted());

        assert_eq!(swarm.events().get_events_by_type(names::SWARM_RESET).len(), 1);
    }
}
