//! Consensus: repeated voting rounds among non-supervisor agents until a
//! resolution rule is satisfied or the round budget is exhausted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::agent_runner::RunContext;
use crate::coordinator::Coordinator;
use crate::error::{ConfigError, MissingRoleKind, StrategyError, SwarmError};
use crate::events::names;
use crate::types::AgentRole;

use super::StrategyResult;

/// How a round's votes are aggregated into a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Majority,
    Unanimous,
    Weighted,
}

/// What to do if no round reaches consensus before `max_rounds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnNoConsensus {
    Fail,
    Escalate,
    SupervisorDecides,
    MajorityRules,
    Arbitrate,
}

#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    pub threshold: f64,
    pub max_rounds: u32,
    pub resolution: Resolution,
    pub on_no_consensus: OnNoConsensus,
    pub weights: Option<HashMap<String, f64>>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            max_rounds: 3,
            resolution: Resolution::Majority,
            on_no_consensus: OnNoConsensus::Fail,
            weights: None,
        }
    }
}

/// One agent's parsed vote in a single round.
#[derive(Debug, Clone)]
pub struct Vote {
    pub agent: String,
    pub round: u32,
    pub decision: Option<String>,
    pub raw: String,
    pub weight: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ConsensusByproducts {
    pub rounds_run: u32,
    pub votes: Vec<Vote>,
    pub reached: bool,
}

static VOTE_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)vote:\s*(.+)").unwrap());
static DECISION_LABELS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:decision|choose|select):\s*(.+)").unwrap());

fn extract_vote(raw: &str) -> Option<String> {
    let first_line = |caps: regex::Captures| caps.get(1).map(|m| m.as_str().trim().lines().next().unwrap_or("").trim().to_string());
    if let Some(caps) = VOTE_LABEL.captures(raw) {
        if let Some(decision) = first_line(caps) {
            if !decision.is_empty() {
                return Some(decision);
            }
        }
    }
    if let Some(caps) = DECISION_LABELS.captures(raw) {
        if let Some(decision) = first_line(caps) {
            if !decision.is_empty() {
                return Some(decision);
            }
        }
    }
    None
}

struct Tally {
    display: String,
    count: usize,
    weighted_sum: f64,
    first_seen: DateTime<Utc>,
}

fn tally_votes(votes: &[&Vote]) -> Vec<Tally> {
    let mut by_key: HashMap<String, Tally> = HashMap::new();
    for vote in votes {
        let Some(decision) = &vote.decision else { continue };
        let key = decision.trim().to_lowercase();
        let entry = by_key.entry(key).or_insert_with(|| Tally {
            display: decision.clone(),
            count: 0,
            weighted_sum: 0.0,
            first_seen: vote.timestamp,
        });
        entry.count += 1;
        entry.weighted_sum += vote.weight;
        if vote.timestamp < entry.first_seen {
            entry.first_seen = vote.timestamp;
        }
    }
    let mut tallies: Vec<Tally> = by_key.into_values().collect();
    tallies.sort_by(|a, b| b.count.cmp(&a.count).then(a.first_seen.cmp(&b.first_seen)));
    tallies
}

pub struct ConsensusStrategy {
    config: ConsensusConfig,
}

impl ConsensusStrategy {
    /// Requires at least two non-supervisor agents.
    pub fn new(coordinator: &Coordinator, config: ConsensusConfig) -> Result<Self, SwarmError> {
        let voters = voters(coordinator);
        if voters.len() < 2 {
            return Err(ConfigError::MissingRoleAgent(MissingRoleKind::NoVoters).into());
        }
        Ok(Self { config })
    }

    fn voter_weight(&self, coordinator: &Coordinator, name: &str) -> f64 {
        if let Some(weights) = &self.config.weights {
            if let Some(w) = weights.get(name) {
                return *w;
            }
        }
        coordinator.agent(name).and_then(|a| a.metadata.weight).unwrap_or(1.0)
    }

    fn check_resolution(&self, votes_so_far: &[Vote], eligible_voters: usize) -> Option<(String, Vec<Tally>)> {
        let last_round = votes_so_far.iter().map(|v| v.round).max()?;
        let round_votes: Vec<&Vote> = votes_so_far.iter().filter(|v| v.round == last_round).collect();
        let tallies = tally_votes(&round_votes);
        let Some(top) = tallies.first() else { return None };

        let total_votes: usize = round_votes.iter().filter(|v| v.decision.is_some()).count();
        let total_weight: f64 = round_votes.iter().filter(|v| v.decision.is_some()).map(|v| v.weight).sum();

        let reached = match self.config.resolution {
            Resolution::Majority => {
                total_votes > 0 && (top.count as f64 / total_votes as f64) >= self.config.threshold
            }
            Resolution::Unanimous => tallies.len() == 1 && top.count == eligible_voters,
            Resolution::Weighted => total_weight > 0.0 && (top.weighted_sum / total_weight) >= self.config.threshold,
        };

        if reached {
            Some((top.display.clone(), tallies))
        } else {
            None
        }
    }

    pub async fn execute(&self, coordinator: &Coordinator, input: &str) -> Result<StrategyResult, SwarmError> {
        let voters = voters(coordinator);
        let mut all_votes: Vec<Vote> = Vec::new();
        let mut agent_results = HashMap::new();

        for round in 1..=self.config.max_rounds {
            coordinator.events.emit(names::CONSENSUS_ROUND, json!({"round": round}), None);

            let prior_rounds: Vec<&Vote> =
                all_votes.iter().filter(|v| v.round + 4 >= round).collect();
            let discussion = prior_rounds
                .iter()
                .map(|v| format!("[round {}] {}: {}", v.round, v.agent, v.raw))
                .collect::<Vec<_>>()
                .join("\n");

            for voter in &voters {
                let prompt = if discussion.is_empty() {
                    input.to_string()
                } else {
                    format!("{input}\n\nPrior votes and discussion:\n{discussion}")
                };
                let context = RunContext::new().with("round", json!(round));
                let result = coordinator.run_agent(voter.name(), &prompt, Some(context)).await?;
                agent_results.insert(voter.name().to_string(), result.clone());

                let decision = extract_vote(&result.output);
                coordinator.events.emit(
                    names::CONSENSUS_TURN,
                    json!({"round": round, "agent": voter.name(), "decision": decision}),
                    Some(voter.name().to_string()),
                );

                all_votes.push(Vote {
                    agent: voter.name().to_string(),
                    round,
                    decision: decision.clone(),
                    raw: result.output,
                    weight: self.voter_weight(coordinator, voter.name()),
                    timestamp: Utc::now(),
                });
                coordinator.events.emit(
                    names::CONSENSUS_VOTE,
                    json!({"round": round, "agent": voter.name(), "decision": decision}),
                    Some(voter.name().to_string()),
                );
            }

            if let Some((decision, _tallies)) = self.check_resolution(&all_votes, voters.len()) {
                coordinator.events.emit(names::CONSENSUS_REACHED, json!({"round": round, "decision": decision}), None);
                return Ok(StrategyResult {
                    output: format!("CONSENSUS REACHED: {decision}"),
                    agent_results,
                    structured: Some(json!({"decision": decision, "round": round})),
                    byproducts: super::StrategyByproducts::Consensus(ConsensusByproducts {
                        rounds_run: round,
                        votes: all_votes,
                        reached: true,
                    }),
                });
            }
        }

        self.resolve_no_consensus(coordinator, input, all_votes, agent_results, voters.len()).await
    }

    async fn resolve_no_consensus(
        &self,
        coordinator: &Coordinator,
        input: &str,
        all_votes: Vec<Vote>,
        mut agent_results: HashMap<String, crate::types::RunResult>,
        eligible_voters: usize,
    ) -> Result<StrategyResult, SwarmError> {
        let last_round = all_votes.iter().map(|v| v.round).max().unwrap_or(0);
        let last_round_votes: Vec<&Vote> = all_votes.iter().filter(|v| v.round == last_round).collect();
        let tallies = tally_votes(&last_round_votes);

        match self.config.on_no_consensus {
            OnNoConsensus::Fail => Err(StrategyError::ConsensusNotReached.into()),
            OnNoConsensus::Escalate => Ok(StrategyResult {
                output: "ESCALATED: consensus was not reached within the configured round budget".to_string(),
                agent_results,
                structured: None,
                byproducts: super::StrategyByproducts::Consensus(ConsensusByproducts {
                    rounds_run: self.config.max_rounds,
                    votes: all_votes,
                    reached: false,
                }),
            }),
            OnNoConsensus::SupervisorDecides => {
                let supervisor = coordinator
                    .agents_with_role(AgentRole::Supervisor)
                    .into_iter()
                    .next()
                    .ok_or(ConfigError::MissingRoleAgent(MissingRoleKind::NoSupervisor))?
                    .clone();
                let summary = last_round_votes
                    .iter()
                    .map(|v| format!("{}: {}", v.agent, v.raw))
                    .collect::<Vec<_>>()
                    .join("\n");
                let prompt = format!(
                    "{input}\n\nThe voting agents could not reach consensus. Votes:\n{summary}\n\nDecide the final outcome."
                );
                let result = coordinator.run_agent(supervisor.name(), &prompt, None).await?;
                agent_results.insert(supervisor.name().to_string(), result.clone());
                Ok(StrategyResult {
                    output: result.output,
                    agent_results,
                    structured: None,
                    byproducts: super::StrategyByproducts::Consensus(ConsensusByproducts {
                        rounds_run: self.config.max_rounds,
                        votes: all_votes,
                        reached: false,
                    }),
                })
            }
            OnNoConsensus::MajorityRules => {
                let decision = tallies.first().map(|t| t.display.clone()).unwrap_or_default();
                Ok(StrategyResult {
                    output: format!("MAJORITY RULES: {decision}"),
                    agent_results,
                    structured: Some(json!({"decision": decision})),
                    byproducts: super::StrategyByproducts::Consensus(ConsensusByproducts {
                        rounds_run: self.config.max_rounds,
                        votes: all_votes,
                        reached: false,
                    }),
                })
            }
            OnNoConsensus::Arbitrate => {
                let numeric_votes: Vec<f64> =
                    last_round_votes.iter().filter_map(|v| v.decision.as_ref()?.trim().parse::<f64>().ok()).collect();
                let output = if !numeric_votes.is_empty() {
                    let weighted_total: f64 = last_round_votes
                        .iter()
                        .filter_map(|v| v.decision.as_ref()?.trim().parse::<f64>().ok().map(|n| n * v.weight))
                        .sum();
                    let total_weight: f64 = last_round_votes.iter().map(|v| v.weight).sum();
                    let average = if total_weight > 0.0 { weighted_total / total_weight } else { 0.0 };
                    format!("ARBITRATED: {average}")
                } else {
                    format!("ARBITRATED: {}", tallies.first().map(|t| t.display.clone()).unwrap_or_default())
                };
                Ok(StrategyResult {
                    output,
                    agent_results,
                    structured: None,
                    byproducts: super::StrategyByproducts::Consensus(ConsensusByproducts {
                        rounds_run: self.config.max_rounds,
                        votes: all_votes,
                        reached: false,
                    }),
                })
            }
        }
    }
}

fn voters(coordinator: &Coordinator) -> Vec<std::sync::Arc<crate::types::SwarmAgent>> {
    coordinator
        .agent_names()
        .iter()
        .filter_map(|name| coordinator.agent(name))
        .filter(|a| a.metadata.role != AgentRole::Supervisor)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runner::ScriptedAgentRunner;
    use crate::coordinator::Coordinator;
    use crate::types::{Agent, AgentMetadata};
    use std::sync::Arc;

    fn coordinator_with(names: &[&str]) -> (Coordinator, Arc<ScriptedAgentRunner>) {
        let runner = Arc::new(ScriptedAgentRunner::new());
        let agents = names.iter().map(|n| (Agent::new(*n, "x"), AgentMetadata::default())).collect();
        (Coordinator::new("s", agents, runner.clone()), runner)
    }

    #[test]
    fn extract_vote_prefers_vote_label() {
        assert_eq!(extract_vote("I think VOTE: yes because reasons"), Some("yes because reasons".to_string()));
    }

    #[test]
    fn extract_vote_falls_back_to_decision_label() {
        assert_eq!(extract_vote("decision: no"), Some("no".to_string()));
        assert_eq!(extract_vote("choose: option-b"), Some("option-b".to_string()));
    }

    #[test]
    fn extract_vote_returns_none_without_a_label() {
        assert_eq!(extract_vote("I am not sure"), None);
    }

    #[test]
    fn construction_requires_two_voters() {
        let (coordinator, _runner) = coordinator_with(&["a1"]);
        assert!(ConsensusStrategy::new(&coordinator, ConsensusConfig::default()).is_err());
    }

    #[tokio::test]
    async fn majority_reaches_consensus_on_round_one() {
        let (coordinator, runner) = coordinator_with(&["a1", "a2", "a3"]);
        runner.push("a1", "VOTE: yes");
        runner.push("a2", "VOTE: yes");
        runner.push("a3", "VOTE: no");

        let strategy = ConsensusStrategy::new(
            &coordinator,
            ConsensusConfig { threshold: 0.5, max_rounds: 3, resolution: Resolution::Majority, ..Default::default() },
        )
        .unwrap();
        let result = strategy.execute(&coordinator, "should we ship?").await.unwrap();

        assert!(result.output.contains("CONSENSUS REACHED"));
        assert!(result.output.to_lowercase().contains("yes"));
        let reached_events = coordinator.events.get_events_by_type(names::CONSENSUS_REACHED);
        assert_eq!(reached_events.len(), 1);
        assert_eq!(reached_events[0].data["round"], json!(1));
    }

    #[tokio::test]
    async fn fail_policy_raises_after_exhausting_rounds() {
        let (coordinator, runner) = coordinator_with(&["a1", "a2"]);
        for _ in 0..2 {
            runner.push("a1", "VOTE: a");
            runner.push("a2", "VOTE: b");
        }

        let strategy = ConsensusStrategy::new(
            &coordinator,
            ConsensusConfig {
                threshold: 0.9,
                max_rounds: 2,
                resolution: Resolution::Majority,
                on_no_consensus: OnNoConsensus::Fail,
                weights: None,
            },
        )
        .unwrap();
        let err = strategy.execute(&coordinator, "t").await.unwrap_err();
        assert!(matches!(err, SwarmError::Strategy(StrategyError::ConsensusNotReached)));
    }

    #[tokio::test]
    async fn majority_rules_picks_top_without_threshold_check() {
        let (coordinator, runner) = coordinator_with(&["a1", "a2", "a3"]);
        for _ in 0..2 {
            runner.push("a1", "VOTE: a");
            runner.push("a2", "VOTE: a");
            runner.push("a3", "VOTE: b");
        }

        let strategy = ConsensusStrategy::new(
            &coordinator,
            ConsensusConfig {
                threshold: 0.99,
                max_rounds: 2,
                resolution: Resolution::Majority,
                on_no_consensus: OnNoConsensus::MajorityRules,
                weights: None,
            },
        )
        .unwrap();
        let result = strategy.execute(&coordinator, "t").await.unwrap();
        assert!(result.output.contains('a'));
    }
}
