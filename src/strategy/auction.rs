//! Auction: agents bid a self-assessed score on the task; the highest (or
//! a weighted-random) bidder is invoked to actually do the work.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde_json::json;

use crate::agent_runner::RunContext;
use crate::blackboard::Writer;
use crate::coordinator::Coordinator;
use crate::error::{ConfigError, StrategyError, SwarmError};
use crate::events::names;
use crate::types::SwarmAgent;

use super::StrategyResult;

/// A function producing a custom bid for an agent, used when
/// `bidding = Custom`. Errors are treated as a bid of `0.0`.
pub type BidFn = dyn Fn(&SwarmAgent, &str) -> Result<f64, String> + Send + Sync;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    HighestBid,
    WeightedRandom,
}

pub enum Bidding {
    CapabilityMatch,
    Custom(Box<BidFn>),
}

pub struct AuctionConfig {
    pub bidding: Bidding,
    pub selection: Selection,
    pub min_bid: f64,
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self { bidding: Bidding::CapabilityMatch, selection: Selection::HighestBid, min_bid: 0.0 }
    }
}

/// One agent's parsed bid.
#[derive(Debug, Clone)]
pub struct Bid {
    pub agent: String,
    pub score: f64,
    pub capabilities: Vec<String>,
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AuctionByproducts {
    pub bids: Vec<Bid>,
    pub winner: String,
    pub winning_score: f64,
}

static SCORE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)SCORE:\s*([0-9]*\.?[0-9]+)").unwrap());
static CAPABILITIES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)CAPABILITIES:\s*(.+)").unwrap());
static REASONING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)REASONING:\s*(.+)").unwrap());

fn parse_capability_bid(agent_name: &str, raw: &str) -> Bid {
    let score = SCORE_RE
        .captures(raw)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|s| s.clamp(0.0, 1.0))
        .filter(|s| !s.is_nan())
        .unwrap_or(0.5);

    let capabilities = CAPABILITIES_RE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().lines().next().unwrap_or("").split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();

    let reasoning =
        REASONING_RE.captures(raw).and_then(|c| c.get(1)).map(|m| m.as_str().lines().next().unwrap_or("").trim().to_string());

    Bid { agent: agent_name.to_string(), score, capabilities, reasoning }
}

pub struct AuctionStrategy {
    config: AuctionConfig,
}

impl AuctionStrategy {
    /// Requires at least one registered agent.
    pub fn new(coordinator: &Coordinator, config: AuctionConfig) -> Result<Self, SwarmError> {
        if coordinator.agent_names().is_empty() {
            return Err(ConfigError::MissingStrategyConfig("auction requires at least one agent").into());
        }
        Ok(Self { config })
    }

    pub async fn execute(&self, coordinator: &Coordinator, input: &str) -> Result<StrategyResult, SwarmError> {
        coordinator.blackboard.write("auction", json!({"state": "bidding"}), Writer::System);
        coordinator.events.emit(names::AUCTION_START, json!({"input": input}), None);

        let agent_names: Vec<String> = coordinator.agent_names().to_vec();
        let mut bids = self.collect_bids(coordinator, &agent_names, input).await?;
        bids.sort_by(|a, b| a.agent.cmp(&b.agent));

        for bid in &bids {
            coordinator.events.emit(
                names::AUCTION_BID,
                json!({"agent": bid.agent, "score": bid.score, "capabilities": bid.capabilities}),
                Some(bid.agent.clone()),
            );
        }

        let valid_bids: Vec<&Bid> = bids.iter().filter(|b| b.score >= self.config.min_bid).collect();
        if valid_bids.is_empty() {
            return Err(StrategyError::NoValidBids.into());
        }

        coordinator.blackboard.write("auction", json!({"state": "selecting"}), Writer::System);
        let winner = self.select_winner(&valid_bids);

        coordinator.events.emit(
            names::AUCTION_WINNER,
            json!({"agent": winner.agent, "score": winner.score}),
            Some(winner.agent.clone()),
        );

        coordinator.blackboard.write("auction", json!({"state": "executing"}), Writer::System);

        let competing_bids: Vec<_> = valid_bids
            .iter()
            .filter(|b| b.agent != winner.agent)
            .map(|b| json!({"agent": b.agent, "score": b.score}))
            .collect();
        let context = RunContext::new().with(
            "auctionContext",
            json!({
                "wonBid": true,
                "bidScore": winner.score,
                "totalParticipants": bids.len(),
                "competingBids": competing_bids,
            }),
        );

        let result = coordinator.run_agent(&winner.agent, input, Some(context)).await?;

        coordinator.blackboard.write("auction", json!({"state": "completed"}), Writer::System);
        coordinator.events.emit(
            names::AUCTION_COMPLETE,
            json!({"winner": winner.agent, "score": winner.score}),
            None,
        );

        let mut agent_results = HashMap::new();
        agent_results.insert(winner.agent.clone(), result.clone());

        Ok(StrategyResult {
            output: result.output,
            agent_results,
            structured: None,
            byproducts: super::StrategyByproducts::Auction(AuctionByproducts {
                bids,
                winner: winner.agent.clone(),
                winning_score: winner.score,
            }),
        })
    }

    async fn collect_bids(
        &self,
        coordinator: &Coordinator,
        agent_names: &[String],
        input: &str,
    ) -> Result<Vec<Bid>, SwarmError> {
        match &self.config.bidding {
            Bidding::Custom(bid_fn) => {
                let mut bids = Vec::with_capacity(agent_names.len());
                for name in agent_names {
                    let Some(agent) = coordinator.agent(name) else { continue };
                    let score = bid_fn(agent, input).unwrap_or(0.0);
                    bids.push(Bid { agent: name.clone(), score, capabilities: Vec::new(), reasoning: None });
                }
                Ok(bids)
            }
            Bidding::CapabilityMatch => {
                let prompt = format!(
                    "{input}\n\nRespond with exactly these lines:\nSCORE: <0.0-1.0>\nCAPABILITIES: <comma-separated>\nREASONING: <one line>"
                );
                let futures = agent_names.iter().map(|name| {
                    let prompt = prompt.clone();
                    async move { (name.clone(), coordinator.run_agent(name, &prompt, None).await) }
                });
                let outcomes = futures::future::join_all(futures).await;
                let bids = outcomes
                    .into_iter()
                    .map(|(name, outcome)| match outcome {
                        Ok(result) => parse_capability_bid(&name, &result.output),
                        Err(_) => Bid { agent: name, score: 0.0, capabilities: Vec::new(), reasoning: None },
                    })
                    .collect();
                Ok(bids)
            }
        }
    }

    fn select_winner<'a>(&self, valid_bids: &[&'a Bid]) -> &'a Bid {
        match self.config.selection {
            Selection::HighestBid => valid_bids
                .iter()
                .copied()
                .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
                .expect("valid_bids is non-empty"),
            Selection::WeightedRandom => {
                let total: f64 = valid_bids.iter().map(|b| b.score).sum();
                if total <= 0.0 {
                    let idx = rand::thread_rng().gen_range(0..valid_bids.len());
                    return valid_bids[idx];
                }
                let mut target = rand::thread_rng().gen_range(0.0..total);
                for bid in valid_bids {
                    if target < bid.score {
                        return bid;
                    }
                    target -= bid.score;
                }
                valid_bids[valid_bids.len() - 1]
            }
        }
    }
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
    fn parse_capability_bid_reads_all_three_lines() {
        let bid = parse_capability_bid("a1", "SCORE: 0.8\nCAPABILITIES: rust, testing\nREASONING: strong fit");
        assert_eq!(bid.score, 0.8);
        assert_eq!(bid.capabilities, vec!["rust", "testing"]);
        assert_eq!(bid.reasoning.as_deref(), Some("strong fit"));
    }

    #[test]
    fn parse_capability_bid_defaults_missing_score_to_half() {
        let bid = parse_capability_bid("a1", "no score here");
        assert_eq!(bid.score, 0.5);
    }

    #[test]
    fn parse_capability_bid_clamps_out_of_range_score() {
        let bid = parse_capability_bid("a1", "SCORE: 4.2");
        assert_eq!(bid.score, 1.0);
    }

    #[tokio::test]
    async fn highest_bid_selects_and_runs_winner() {
        let (coordinator, runner) = coordinator_with(&["first", "second", "third"]);
        runner.push("first", "SCORE: 0.3");
        runner.push("second", "SCORE: 0.5");
        runner.push("third", "SCORE: 0.9");
        runner.push("third", "done");

        let strategy = AuctionStrategy::new(&coordinator, AuctionConfig::default()).unwrap();
        let result = strategy.execute(&coordinator, "do the task").await.unwrap();

        assert_eq!(result.output, "done");
        let super::StrategyByproducts::Auction(byproducts) = result.byproducts else { panic!("expected auction byproducts") };
        assert_eq!(byproducts.winner, "third");
    }

    #[tokio::test]
    async fn no_valid_bids_when_all_below_min_bid() {
        let (coordinator, runner) = coordinator_with(&["a1", "a2"]);
        runner.push("a1", "SCORE: 0.1");
        runner.push("a2", "SCORE: 0.2");

        let strategy =
            AuctionStrategy::new(&coordinator, AuctionConfig { min_bid: 0.5, ..Default::default() }).unwrap();
        let err = strategy.execute(&coordinator, "t").await.unwrap_err();
        assert!(matches!(err, SwarmError::Strategy(StrategyError::NoValidBids)));
    }

    #[tokio::test]
    async fn weighted_random_with_all_zero_bids_still_picks_a_winner() {
        let (coordinator, runner) = coordinator_with(&["a1", "a2"]);
        runner.push("a1", "SCORE: 0");
        runner.push("a2", "SCORE: 0");
        runner.push("a1", "ran");
        runner.push("a2", "ran");

        let strategy = AuctionStrategy::new(
            &coordinator,
            AuctionConfig { selection: Selection::WeightedRandom, ..Default::default() },
        )
        .unwrap();
        let result = strategy.execute(&coordinator, "t").await.unwrap();
        assert_eq!(result.output, "ran");
    }
}
