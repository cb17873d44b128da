//! Debate: advocates and critics argue over several rounds; a moderator (if
//! present) synthesizes a final answer, otherwise a grouped transcript
//! summary stands in for one.

use std::collections::HashMap;

use serde_json::json;

use crate::agent_runner::RunContext;
use crate::coordinator::Coordinator;
use crate::error::{ConfigError, MissingRoleKind, SwarmError};
use crate::events::names;
use crate::message_bus::{MessageType, OutgoingMessage, SwarmMessage};
use crate::types::AgentRole;

use super::StrategyResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebateFormat {
    #[default]
    FreeForm,
    Structured,
}

pub struct DebateConfig {
    pub rounds: u32,
    pub format: DebateFormat,
}

#[derive(Debug, Clone, Default)]
pub struct DebateByproducts {
    pub transcript: Vec<SwarmMessage>,
}

pub struct DebateStrategy {
    config: DebateConfig,
}

fn debaters(coordinator: &Coordinator) -> Vec<std::sync::Arc<crate::types::SwarmAgent>> {
    let advocates = coordinator.agents_with_role(AgentRole::Advocate);
    let critics = coordinator.agents_with_role(AgentRole::Critic);
    if !advocates.is_empty() || !critics.is_empty() {
        advocates.into_iter().chain(critics).cloned().collect()
    } else {
        coordinator
            .agent_names()
            .iter()
            .filter_map(|name| coordinator.agent(name))
            .filter(|a| a.metadata.role != AgentRole::Moderator)
            .cloned()
            .collect()
    }
}

impl DebateStrategy {
    /// Requires at least two non-moderator agents.
    pub fn new(coordinator: &Coordinator, config: DebateConfig) -> Result<Self, SwarmError> {
        if debaters(coordinator).len() < 2 {
            return Err(ConfigError::MissingRoleAgent(MissingRoleKind::NoDebaters).into());
        }
        Ok(Self { config })
    }

    pub async fn execute(&self, coordinator: &Coordinator, input: &str) -> Result<StrategyResult, SwarmError> {
        let debaters = debaters(coordinator);
        let mut transcript: Vec<SwarmMessage> = Vec::new();
        let mut agent_results = HashMap::new();

        for round in 1..=self.config.rounds {
            coordinator.events.emit(names::DEBATE_ROUND, json!({"round": round}), None);

            for debater in &debaters {
                coordinator
                    .events
                    .emit(names::DEBATE_TURN, json!({"round": round, "agent": debater.name()}), Some(debater.name().to_string()));

                let prompt = if round == 1 {
                    input.to_string()
                } else {
                    let prior = transcript
                        .iter()
                        .map(|m| format!("{}: {}", m.from, m.content))
                        .collect::<Vec<_>>()
                        .join("\n");
                    format!("Continue the debate on: {input}\n\nTranscript so far:\n{prior}")
                };

                let previous_arguments: Vec<_> =
                    transcript.iter().map(|m| json!({"agent": m.from, "content": m.content})).collect();
                let context = RunContext::new().with(
                    "debateContext",
                    json!({
                        "round": round,
                        "totalRounds": self.config.rounds,
                        "role": debater.metadata.role.as_str(),
                        "previousArguments": previous_arguments,
                        "format": match self.config.format { DebateFormat::Structured => "structured", DebateFormat::FreeForm => "free-form" },
                    }),
                );

                let result = coordinator.run_agent(debater.name(), &prompt, Some(context)).await?;
                agent_results.insert(debater.name().to_string(), result.clone());

                let mut outgoing = OutgoingMessage::new(debater.name(), crate::message_bus::BROADCAST, result.output)
                    .with_type(MessageType::Notification)
                    .with_round(round);
                outgoing.metadata.insert("role".to_string(), json!(debater.metadata.role.as_str()));
                let message = coordinator.bus.send(outgoing);
                transcript.push(message);
            }
        }

        let moderator = coordinator.agents_with_role(AgentRole::Moderator).into_iter().next().cloned();
        let output = match moderator {
            Some(moderator) => {
                let summary = transcript.iter().map(|m| format!("{}: {}", m.from, m.content)).collect::<Vec<_>>().join("\n");
                let prompt = format!("Synthesize the final answer to: {input}\n\nDebate transcript:\n{summary}");
                let result = coordinator.run_agent(moderator.name(), &prompt, None).await?;
                agent_results.insert(moderator.name().to_string(), result.clone());
                result.output
            }
            None => format_grouped_summary(&debaters, &transcript),
        };

        Ok(StrategyResult {
            output,
            agent_results,
            structured: None,
            byproducts: super::StrategyByproducts::Debate(DebateByproducts { transcript }),
        })
    }
}

fn format_grouped_summary(debaters: &[std::sync::Arc<crate::types::SwarmAgent>], transcript: &[SwarmMessage]) -> String {
    let mut sections = Vec::new();
    for debater in debaters {
        let arguments: Vec<&str> =
            transcript.iter().filter(|m| m.from == debater.name()).map(|m| m.content.as_str()).collect();
        if !arguments.is_empty() {
            sections.push(format!("## {}\n{}", debater.name(), arguments.join("\n\n")));
        }
    }
    sections.join("\n\n")
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
    fn construction_requires_two_debaters() {
        let (coordinator, _runner) = coordinator_with(&[("a1", AgentRole::Unspecified)]);
        assert!(DebateStrategy::new(&coordinator, DebateConfig { rounds: 1, format: DebateFormat::FreeForm }).is_err());
    }

    #[tokio::test]
    async fn without_moderator_produces_grouped_summary() {
        let (coordinator, runner) =
            coordinator_with(&[("advocate", AgentRole::Advocate), ("critic", AgentRole::Critic)]);
        runner.push("advocate", "we should do X");
        runner.push("critic", "X is risky");

        let strategy =
            DebateStrategy::new(&coordinator, DebateConfig { rounds: 1, format: DebateFormat::FreeForm }).unwrap();
        let result = strategy.execute(&coordinator, "should we do X?").await.unwrap();

        assert!(result.output.contains("advocate"));
        assert!(result.output.contains("critic"));
        assert!(result.output.contains("we should do X"));
    }

    #[tokio::test]
    async fn with_moderator_uses_its_synthesis() {
        let (coordinator, runner) = coordinator_with(&[
            ("advocate", AgentRole::Advocate),
            ("critic", AgentRole::Critic),
            ("mod", AgentRole::Moderator),
        ]);
        runner.push("advocate", "for");
        runner.push("critic", "against");
        runner.push("mod", "final synthesis");

        let strategy =
            DebateStrategy::new(&coordinator, DebateConfig { rounds: 1, format: DebateFormat::FreeForm }).unwrap();
        let result = strategy.execute(&coordinator, "topic").await.unwrap();

        assert_eq!(result.output, "final synthesis");
    }

    #[tokio::test]
    async fn second_round_prompt_includes_transcript() {
        let (coordinator, runner) =
            coordinator_with(&[("advocate", AgentRole::Advocate), ("critic", AgentRole::Critic)]);
        runner.push("advocate", "round1 for");
        runner.push("critic", "round1 against");
        runner.push("advocate", "round2 for");
        runner.push("critic", "round2 against");

        let strategy =
            DebateStrategy::new(&coordinator, DebateConfig { rounds: 2, format: DebateFormat::FreeForm }).unwrap();
        strategy.execute(&coordinator, "topic").await.unwrap();

        let calls = runner.calls();
        // third call is advocate's round-2 turn; it should reference round 1.
        assert!(calls[2].1.contains("round1 for"));
    }
}
