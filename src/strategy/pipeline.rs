//! Pipeline: a single forward sweep of stages with indexed jumps, each
//! stage optionally acting as a quality gate on its agent's output.

use std::collections::HashMap;

use serde_json::json;

use crate::agent_runner::RunContext;
use crate::coordinator::Coordinator;
use crate::error::{ConfigError, StrategyError, SwarmError};
use crate::events::names;

use super::StrategyResult;

/// A function computing the next stage's input from the previous stage's
/// output, the stage about to run, and the run so far.
pub type StageInputFn = dyn Fn(&str, &PipelineStage, &[(String, String)]) -> String + Send + Sync;

/// A gate condition: true means the stage's output passed.
pub type GateConditionFn = dyn Fn(&str) -> bool + Send + Sync;

/// What a pipeline does when a gate's condition fails.
pub enum GateFailAction {
    Abort,
    Skip,
    RetryPrevious,
    Goto(String),
}

pub struct GateConfig {
    pub condition: Option<Box<GateConditionFn>>,
    pub on_fail: GateFailAction,
    /// Defaults to 3 when unset (this crate's pinned default, since the
    /// spec leaves the bound itself unspecified for `retry-previous`).
    pub max_retries: Option<u32>,
}

impl GateConfig {
    fn max_retries_or_default(&self) -> u32 {
        self.max_retries.unwrap_or(3)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineStage {
    pub name: String,
    pub agent: String,
    pub gate: bool,
}

impl PipelineStage {
    pub fn new(name: impl Into<String>, agent: impl Into<String>) -> Self {
        Self { name: name.into(), agent: agent.into(), gate: false }
    }

    pub fn as_gate(mut self) -> Self {
        self.gate = true;
        self
    }
}

#[derive(Default)]
pub struct PipelineConfig {
    pub stages: Vec<PipelineStage>,
    pub gates: HashMap<String, GateConfig>,
    pub stage_input: Option<Box<StageInputFn>>,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineByproducts {
    /// Ordered `(key, output)` pairs; a retried stage's earlier attempts
    /// appear as `"<stage-name>#<attempt>"` keys.
    pub stage_outputs: Vec<(String, String)>,
}

pub struct PipelineStrategy {
    config: PipelineConfig,
}

fn default_gate_condition(output: &str) -> bool {
    let lower = output.to_lowercase();
    !["error", "failed", "cannot"].iter().any(|needle| lower.contains(needle))
}

fn default_stage_input(previous_output: &str, stage: &PipelineStage) -> String {
    format!("{previous_output}\n\nNow perform the `{}` stage.", stage.name)
}

impl PipelineStrategy {
    /// Requires at least one stage.
    pub fn new(config: PipelineConfig) -> Result<Self, SwarmError> {
        if config.stages.is_empty() {
            return Err(ConfigError::EmptyStages.into());
        }
        Ok(Self { config })
    }

    fn stage_input(&self, previous_output: &str, stage: &PipelineStage, is_first: bool, original_input: &str, outputs: &[(String, String)]) -> String {
        if let Some(f) = &self.config.stage_input {
            return f(previous_output, stage, outputs);
        }
        if is_first {
            original_input.to_string()
        } else {
            default_stage_input(previous_output, stage)
        }
    }

    pub async fn execute(&self, coordinator: &Coordinator, input: &str) -> Result<StrategyResult, SwarmError> {
        let stages = &self.config.stages;
        let mut index = 0usize;
        let mut current_input = input.to_string();
        let mut outputs: Vec<(String, String)> = Vec::new();
        let mut agent_results = HashMap::new();
        let mut last_output = String::new();

        while index < stages.len() {
            let stage = &stages[index];
            let is_first = index == 0;
            let is_last = index == stages.len() - 1;

            let stage_input =
                self.stage_input(&current_input, stage, is_first, input, &outputs);

            coordinator.events.emit(
                names::PIPELINE_STAGE,
                json!({"stageIndex": index, "stageName": stage.name}),
                None,
            );

            let context = RunContext::new()
                .with(
                    "pipelineContext",
                    json!({
                        "stageIndex": index,
                        "stageName": stage.name,
                        "totalStages": stages.len(),
                        "isFirstStage": is_first,
                        "isLastStage": is_last,
                        "previousOutputs": outputs,
                    }),
                )
                .with("stageInstructions", json!(format!("Execute stage `{}`.", stage.name)));

            let result = coordinator.run_agent(&stage.agent, &stage_input, Some(context)).await?;
            agent_results.insert(stage.agent.clone(), result.clone());

            coordinator.events.emit(
                names::PIPELINE_STAGE_COMPLETE,
                json!({"stageIndex": index, "stageName": stage.name}),
                None,
            );

            let attempt_count = outputs.iter().filter(|(name, _)| name.starts_with(stage.name.as_str())).count();
            let key = if attempt_count == 0 { stage.name.clone() } else { format!("{}#{}", stage.name, attempt_count + 1) };
            outputs.push((key, result.output.clone()));
            current_input = result.output.clone();
            last_output = result.output.clone();

            if !stage.gate {
                index += 1;
                continue;
            }

            let gate_config = self.config.gates.get(&stage.name);
            let passed = match gate_config.and_then(|g| g.condition.as_ref()) {
                Some(condition) => condition(&result.output),
                None => default_gate_condition(&result.output),
            };

            if passed {
                coordinator.events.emit(names::PIPELINE_GATE_PASS, json!({"stageName": stage.name}), None);
                index += 1;
                continue;
            }

            coordinator.events.emit(names::PIPELINE_GATE_FAIL, json!({"stageName": stage.name}), None);

            let default_action = GateFailAction::Abort;
            let on_fail = gate_config.map(|g| &g.on_fail).unwrap_or(&default_action);
            match on_fail {
                GateFailAction::Abort => {
                    return Err(StrategyError::PipelineAborted {
                        stage: stage.name.clone(),
                        reason: "gate condition failed".to_string(),
                    }
                    .into());
                }
                GateFailAction::Skip => {
                    index += 1;
                }
                GateFailAction::RetryPrevious => {
                    let retry_count = outputs.iter().filter(|(name, _)| name.starts_with(stage.name.as_str())).count();
                    let max_retries = gate_config.map_or(3, GateConfig::max_retries_or_default);
                    if retry_count as u32 > max_retries {
                        return Err(StrategyError::MaxRetriesExceeded { stage: stage.name.clone() }.into());
                    }
                    index = index.saturating_sub(1);
                }
                GateFailAction::Goto(target) => {
                    index = stages
                        .iter()
                        .position(|s| &s.name == target)
                        .ok_or_else(|| StrategyError::TargetStageNotFound(target.clone()))?;
                }
            }
        }

        Ok(StrategyResult {
            output: last_output,
            agent_results,
            structured: None,
            byproducts: super::StrategyByproducts::Pipeline(PipelineByproducts { stage_outputs: outputs }),
        })
    }
}
