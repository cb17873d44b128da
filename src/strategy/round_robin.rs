//! Round-robin: rotates a single invocation across all registered agents,
//! with optional input-keyed sticky assignment.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::Rng;
use serde_json::json;

use crate::coordinator::Coordinator;
use crate::error::{ConfigError, SwarmError};
use crate::events::names;

use super::StrategyResult;

/// How the next agent is chosen when no sticky assignment applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Sequential,
    Random,
}

/// Computes a sticky key from the raw input string; calls sharing a key
/// are routed to the same agent for as long as that agent remains
/// registered.
pub type StickyKeyFn = dyn Fn(&str) -> String + Send + Sync;

/// Strategy-specific byproducts: the agent chosen for this call and the
/// index it was assigned at.
#[derive(Debug, Clone)]
pub struct RoundRobinByproducts {
    pub assigned_agent: String,
    pub index: usize,
}

struct State {
    current_index: usize,
    sticky_assignments: HashMap<String, String>,
}

/// Configuration, fixed at construction.
pub struct RoundRobinConfig {
    pub sticky: bool,
    pub sticky_key: Option<Box<StickyKeyFn>>,
    pub rotation: Rotation,
}

impl Default for RoundRobinConfig {
    fn default() -> Self {
        Self { sticky: false, sticky_key: None, rotation: Rotation::default() }
    }
}

pub struct RoundRobinStrategy {
    config: RoundRobinConfig,
    state: Mutex<State>,
}

impl RoundRobinStrategy {
    /// Requires at least one registered agent.
    pub fn new(coordinator: &Coordinator, config: RoundRobinConfig) -> Result<Self, SwarmError> {
        if coordinator.agent_names().is_empty() {
            return Err(ConfigError::MissingStrategyConfig("round-robin requires at least one agent").into());
        }
        Ok(Self { config, state: Mutex::new(State { current_index: 0, sticky_assignments: HashMap::new() }) })
    }

    /// Peek the agent rotation would currently select, without mutating
    /// state.
    fn peek(&self, coordinator: &Coordinator, state: &State) -> String {
        let names = coordinator.agent_names();
        match self.config.rotation {
            Rotation::Sequential => names[state.current_index % names.len()].clone(),
            Rotation::Random => {
                let idx = rand::thread_rng().gen_range(0..names.len());
                names[idx].clone()
            }
        }
    }

    pub async fn execute(&self, coordinator: &Coordinator, input: &str) -> Result<StrategyResult, SwarmError> {
        let (chosen, index) = {
            let mut state = self.state.lock().expect("round-robin state lock poisoned");

            if self.config.sticky {
                if let Some(key_fn) = &self.config.sticky_key {
                    let key = key_fn(input);
                    let existing_hit = state
                        .sticky_assignments
                        .get(&key)
                        .filter(|name| coordinator.agent(name).is_some())
                        .cloned();
                    match existing_hit {
                        Some(existing) => (existing, state.current_index),
                        None => {
                            // New key: pick without advancing the index (pinned
                            // open question — the index only moves on
                            // non-sticky calls).
                            let chosen = self.peek(coordinator, &state);
                            let index = state.current_index;
                            state.sticky_assignments.insert(key, chosen.clone());
                            (chosen, index)
                        }
                    }
                } else {
                    self.advance(coordinator, &mut state)
                }
            } else {
                self.advance(coordinator, &mut state)
            }
        };

        coordinator.events.emit(
            names::ROUND_ROBIN_ASSIGNED,
            json!({"agent": chosen, "index": index}),
            None,
        );

        let result = coordinator.run_agent(&chosen, input, None).await?;
        let mut agent_results = HashMap::new();
        agent_results.insert(chosen.clone(), result.clone());

        Ok(StrategyResult {
            output: result.output,
            agent_results,
            structured: None,
            byproducts: super::StrategyByproducts::RoundRobin(RoundRobinByproducts {
                assigned_agent: chosen,
                index,
            }),
        })
    }

    fn advance(&self, coordinator: &Coordinator, state: &mut State) -> (String, usize) {
        let names = coordinator.agent_names();
        match self.config.rotation {
            Rotation::Sequential => {
                let index = state.current_index % names.len();
                let chosen = names[index].clone();
                state.current_index = (state.current_index + 1) % names.len();
                (chosen, index)
            }
            Rotation::Random => {
                let index = rand::thread_rng().gen_range(0..names.len());
                (names[index].clone(), index)
            }
        }
    }

    /// Zero the index and clear all sticky assignments.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("round-robin state lock poisoned");
        state.current_index = 0;
        state.sticky_assignments.clear();
    }
}
