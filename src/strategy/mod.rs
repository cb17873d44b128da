//! The six structured multi-agent orchestration algorithms, dispatched by
//! tag rather than by a class hierarchy: each strategy is a record of its
//! own immutable configuration (built once at construction, per the
//! "mutable global default config objects" redesign note in `spec.md` §9)
//! plus whatever mutable run-state it genuinely needs, held behind the
//! same lock discipline as `SwarmAgent::state`.
//!
//! Structured as one file per execution mode with a shared module for
//! config/event/result structs and windowed-parallel dispatch over a task
//! set, generalized from "DAG of tasks" to "fixed strategy algorithm over
//! a fixed agent set" as this spec requires.

pub mod auction;
pub mod consensus;
pub mod debate;
pub mod hierarchical;
pub mod pipeline;
pub mod round_robin;

use std::collections::HashMap;

use serde_json::Value;

use crate::coordinator::Coordinator;
use crate::error::SwarmError;
use crate::types::RunResult;

pub use auction::{AuctionByproducts, AuctionStrategy};
pub use consensus::{ConsensusByproducts, ConsensusStrategy};
pub use debate::{DebateByproducts, DebateStrategy};
pub use hierarchical::{HierarchicalByproducts, HierarchicalStrategy};
pub use pipeline::{PipelineByproducts, PipelineStrategy};
pub use round_robin::{RoundRobinByproducts, RoundRobinStrategy};

/// The outcome of one `execute` call: a final answer plus per-agent
/// results and whatever byproducts are specific to the strategy that
/// produced it.
#[derive(Debug, Clone, Default)]
pub struct StrategyResult {
    pub output: String,
    pub agent_results: HashMap<String, RunResult>,
    pub structured: Option<Value>,
    pub byproducts: StrategyByproducts,
}

impl StrategyResult {
    pub fn new(output: impl Into<String>) -> Self {
        Self { output: output.into(), ..Default::default() }
    }
}

/// Strategy-specific extra data beyond the common `output`/`agent_results`
/// shape (bids, votes, pipeline stage outputs, a debate transcript, ...).
#[derive(Debug, Clone, Default)]
pub enum StrategyByproducts {
    #[default]
    None,
    Auction(AuctionByproducts),
    Consensus(ConsensusByproducts),
    Pipeline(PipelineByproducts),
    Debate(DebateByproducts),
    RoundRobin(RoundRobinByproducts),
    Hierarchical(HierarchicalByproducts),
}

/// Tagged variant over the six strategies. Dispatch is a plain `match` in
/// `execute`, not a virtual call through a trait object — there is a fixed,
/// closed set of strategies and each owns a genuinely different shape of
/// config and run-state.
pub enum StrategyKind {
    Hierarchical(HierarchicalStrategy),
    RoundRobin(RoundRobinStrategy),
    Consensus(ConsensusStrategy),
    Auction(AuctionStrategy),
    Pipeline(PipelineStrategy),
    Debate(DebateStrategy),
}

impl StrategyKind {
    pub async fn execute(&self, coordinator: &Coordinator, input: &str) -> Result<StrategyResult, SwarmError> {
        match self {
            Self::Hierarchical(s) => s.execute(coordinator, input).await,
            Self::RoundRobin(s) => s.execute(coordinator, input).await,
            Self::Consensus(s) => s.execute(coordinator, input).await,
            Self::Auction(s) => s.execute(coordinator, input).await,
            Self::Pipeline(s) => s.execute(coordinator, input).await,
            Self::Debate(s) => s.execute(coordinator, input).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Hierarchical(_) => "hierarchical",
            Self::RoundRobin(_) => "round-robin",
            Self::Consensus(_) => "consensus",
            Self::Auction(_) => "auction",
            Self::Pipeline(_) => "pipeline",
            Self::Debate(_) => "debate",
        }
    }
}

/// Sort `(decision, count)`-shaped tallies deterministically: highest count
/// first, ties broken by earlier first-seen timestamp (the redesign note
/// in `spec.md` §9 on non-deterministic map/set iteration where tally
/// ordering matters).
pub(crate) fn sort_by_count_then_first_seen<T>(
    mut entries: Vec<(T, usize, chrono::DateTime<chrono::Utc>)>,
) -> Vec<(T, usize, chrono::DateTime<chrono::Utc>)> {
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    entries
}
