//! Hierarchical: a single supervisor delegates to workers through its own
//! tools; this strategy never calls a worker directly.

use serde_json::{json, Value};

use crate::agent_runner::RunContext;
use crate::blackboard::Writer;
use crate::coordinator::Coordinator;
use crate::error::{ConfigError, MissingRoleKind, SwarmError};
use crate::types::AgentRole;

use super::StrategyResult;

/// Extra configuration beyond the required supervisor/worker roles.
#[derive(Debug, Clone, Default)]
pub struct HierarchicalConfig {
    pub max_delegation_depth: Option<u32>,
    pub worker_communication: bool,
}

impl HierarchicalConfig {
    fn max_delegation_depth_or_default(&self) -> u32 {
        self.max_delegation_depth.unwrap_or(3)
    }
}

/// No byproducts beyond `agent_results`; delegation happens through the
/// supervisor's own tool calls, which this strategy does not observe.
#[derive(Debug, Clone, Default)]
pub struct HierarchicalByproducts;

/// A single supervisor agent orchestrating worker agents through tools.
pub struct HierarchicalStrategy {
    config: HierarchicalConfig,
}

impl HierarchicalStrategy {
    /// Validates the supervisor precondition synchronously at construction,
    /// per the "configuration errors raised synchronously" propagation
    /// policy (`spec.md` §7).
    pub fn new(coordinator: &Coordinator, config: HierarchicalConfig) -> Result<Self, SwarmError> {
        let supervisors = coordinator.agents_with_role(AgentRole::Supervisor);
        if supervisors.len() != 1 {
            return Err(ConfigError::MissingRoleAgent(MissingRoleKind::NoSupervisor).into());
        }
        Ok(Self { config })
    }

    pub async fn execute(&self, coordinator: &Coordinator, input: &str) -> Result<StrategyResult, SwarmError> {
        let supervisor = coordinator
            .agents_with_role(AgentRole::Supervisor)
            .into_iter()
            .next()
            .ok_or(ConfigError::MissingRoleAgent(MissingRoleKind::NoSupervisor))?
            .clone();
        let workers = coordinator.agents_with_role(AgentRole::Worker);

        coordinator.blackboard.write("tasks", json!([]), Writer::System);
        coordinator.blackboard.write("workerResults", json!({}), Writer::System);

        let available_workers: Vec<Value> = workers
            .iter()
            .map(|w| {
                json!({
                    "name": w.name(),
                    "description": w.agent.description,
                    "expertise": w.metadata.expertise,
                })
            })
            .collect();

        let context = RunContext::new()
            .with("availableWorkers", Value::Array(available_workers))
            .with(
                "delegationInstructions",
                json!({
                    "operations": ["delegate_task", "check_progress", "request_revision"],
                    "maxDelegationDepth": self.config.max_delegation_depth_or_default(),
                    "workerCommunication": self.config.worker_communication,
                }),
            );

        let result = coordinator.run_agent(supervisor.name(), input, Some(context)).await?;

        let mut agent_results = std::collections::HashMap::new();
        agent_results.insert(supervisor.name().to_string(), result.clone());
        for worker in &workers {
            if let Some(last) = worker.last_result() {
                agent_results.insert(worker.name().to_string(), last);
            }
        }

        Ok(StrategyResult {
            output: result.output,
            agent_results,
            structured: None,
            byproducts: super::StrategyByproducts::Hierarchical(HierarchicalByproducts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runner::ScriptedAgentRunner;
    use crate::coordinator::Coordinator;
    use crate::types::{Agent, AgentMetadata};
    use std::sync::Arc;

    fn coordinator_with(roles: &[(&str, AgentRole)]) -> (Coordinator, Arc<ScriptedAgentRunner>) {
        let runner = Arc::new(ScriptedAgentRunner::new());
        let agents = roles
            .iter()
            .map(|(name, role)| (Agent::new(*name, "x"), AgentMetadata { role: *role, ..Default::default() }))
            .collect();
        (Coordinator::new("s", agents, runner.clone()), runner)
    }

    #[test]
    fn construction_fails_without_exactly_one_supervisor() {
        let (coordinator, _runner) = coordinator_with(&[("w1", AgentRole::Worker)]);
        let err = HierarchicalStrategy::new(&coordinator, HierarchicalConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            SwarmError::Config(ConfigError::MissingRoleAgent(MissingRoleKind::NoSupervisor))
        ));
    }

    #[test]
    fn construction_fails_with_two_supervisors() {
        let (coordinator, _runner) =
            coordinator_with(&[("s1", AgentRole::Supervisor), ("s2", AgentRole::Supervisor)]);
        assert!(HierarchicalStrategy::new(&coordinator, HierarchicalConfig::default()).is_err());
    }

    #[tokio::test]
    async fn supervisor_output_is_final_answer_and_workers_never_invoked() {
        let (coordinator, runner) =
            coordinator_with(&[("sup", AgentRole::Supervisor), ("w1", AgentRole::Worker), ("w2", AgentRole::Worker)]);
        runner.push("sup", "Supervisor completed the task");

        let strategy = HierarchicalStrategy::new(&coordinator, HierarchicalConfig::default()).unwrap();
        let result = strategy.execute(&coordinator, "do the thing").await.unwrap();

        assert_eq!(result.output, "Supervisor completed the task");
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(coordinator.blackboard.read("tasks").unwrap(), json!([]));
        assert_eq!(coordinator.blackboard.read("workerResults").unwrap(), json!({}));
    }
}
