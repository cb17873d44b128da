//! Programmatic defaults merged with environment overrides for the handful
//! of coordinator/strategy fields that make sense as env-tunable knobs.
//!
//! Follows `ConfigLoader::load`'s layering approach:
//! `figment::Serialized::defaults` merged with `Env::prefixed`, minus the
//! project-directory YAML layer (this crate has no project directory to
//! read from the way the CLI app did — dropped, noted in DESIGN.md).
//!
//! These settings structs hold only plain, `Deserialize`-able data; the
//! strategy config structs themselves (e.g. `RoundRobinConfig`,
//! `AuctionConfig`) carry closures and are built from a `*Settings` value
//! with the `to_*_config` conversions below, not loaded directly.

use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::coordinator::{Backoff, FailurePolicy};
use crate::resource::Budget;
use crate::strategy::consensus::{ConsensusConfig, OnNoConsensus, Resolution};
use crate::strategy::debate::{DebateConfig, DebateFormat};

/// Environment variable prefix recognized by [`SwarmSettings::load`]
/// (e.g. `SWARM_CONSENSUS__THRESHOLD=0.75`).
pub const ENV_PREFIX: &str = "SWARM_";

/// Budget ceilings as plain, env-overridable fields. `None` means no
/// ceiling, matching [`Budget`]'s vacuous-if-unset semantics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BudgetSettings {
    pub max_tokens: Option<u64>,
    pub max_cost: Option<f64>,
    pub max_duration_ms: Option<u64>,
}

impl From<BudgetSettings> for Budget {
    fn from(settings: BudgetSettings) -> Self {
        Self {
            max_tokens: settings.max_tokens,
            max_cost: settings.max_cost,
            max_duration: settings.max_duration_ms.map(std::time::Duration::from_millis),
        }
    }
}

/// Circuit breaker thresholds. Present with `enabled = false` means the
/// coordinator runs without a breaker at all, matching `Coordinator`'s
/// `Option<CircuitBreaker>`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    pub threshold: u32,
    pub reset_timeout_ms: u64,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            enabled: true,
            threshold: defaults.threshold,
            reset_timeout_ms: defaults.reset_timeout.as_millis() as u64,
            success_threshold: defaults.success_threshold,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_config(self) -> Option<CircuitBreakerConfig> {
        self.enabled.then_some(CircuitBreakerConfig {
            threshold: self.threshold,
            reset_timeout: std::time::Duration::from_millis(self.reset_timeout_ms),
            success_threshold: self.success_threshold,
        })
    }
}

/// The `onAgentFailure` retry shape, as plain data. Only meaningful when
/// `policy = "retry"`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub backoff: BackoffKind,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_retries: 2, backoff: BackoffKind::Exponential, initial_delay_ms: 200, max_delay_ms: 5_000 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Constant,
    Linear,
    #[default]
    Exponential,
}

impl From<BackoffKind> for Backoff {
    fn from(kind: BackoffKind) -> Self {
        match kind {
            BackoffKind::Constant => Self::Constant,
            BackoffKind::Linear => Self::Linear,
            BackoffKind::Exponential => Self::Exponential,
        }
    }
}

/// Which `FailurePolicy` variant `run_agent` applies to a failed
/// invocation. `failover`'s backup agent name is not env-tunable (it names
/// a specific registered agent) and is left to programmatic construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicyKind {
    #[default]
    Abort,
    Skip,
    Retry,
}

/// Coordinator-wide settings: concurrency default, budget, circuit
/// breaker, and the non-failover failure policies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    pub max_concurrency: usize,
    pub budget: BudgetSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub failure_policy: FailurePolicyKind,
    pub retry: RetrySettings,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_concurrency: crate::coordinator::DEFAULT_MAX_CONCURRENCY,
            budget: BudgetSettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            failure_policy: FailurePolicyKind::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl CoordinatorSettings {
    /// `Failover` is excluded: its backup agent name has no sensible
    /// environment-variable representation, so callers who want it build
    /// a `FailurePolicy::Failover` directly instead of through settings.
    pub fn to_failure_policy(self) -> FailurePolicy {
        match self.failure_policy {
            FailurePolicyKind::Abort => FailurePolicy::Abort,
            FailurePolicyKind::Skip => FailurePolicy::Skip,
            FailurePolicyKind::Retry => FailurePolicy::Retry {
                max_retries: self.retry.max_retries,
                backoff: self.retry.backoff.into(),
                initial_delay: std::time::Duration::from_millis(self.retry.initial_delay_ms),
                max_delay: std::time::Duration::from_millis(self.retry.max_delay_ms),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    #[default]
    Majority,
    Unanimous,
    Weighted,
}

impl From<ResolutionKind> for Resolution {
    fn from(kind: ResolutionKind) -> Self {
        match kind {
            ResolutionKind::Majority => Self::Majority,
            ResolutionKind::Unanimous => Self::Unanimous,
            ResolutionKind::Weighted => Self::Weighted,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OnNoConsensusKind {
    #[default]
    Fail,
    Escalate,
    SupervisorDecides,
    MajorityRules,
    Arbitrate,
}

impl From<OnNoConsensusKind> for OnNoConsensus {
    fn from(kind: OnNoConsensusKind) -> Self {
        match kind {
            OnNoConsensusKind::Fail => Self::Fail,
            OnNoConsensusKind::Escalate => Self::Escalate,
            OnNoConsensusKind::SupervisorDecides => Self::SupervisorDecides,
            OnNoConsensusKind::MajorityRules => Self::MajorityRules,
            OnNoConsensusKind::Arbitrate => Self::Arbitrate,
        }
    }
}

/// `threshold`, `maxRounds`, `resolution`, `onNoConsensus` from
/// `spec.md` §6's consensus config row. `weights` is not env-tunable (a
/// per-agent map) and stays programmatic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSettings {
    pub threshold: f64,
    pub max_rounds: u32,
    pub resolution: ResolutionKind,
    pub on_no_consensus: OnNoConsensusKind,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self { threshold: 0.5, max_rounds: 3, resolution: ResolutionKind::default(), on_no_consensus: OnNoConsensusKind::default() }
    }
}

impl From<ConsensusSettings> for ConsensusConfig {
    fn from(settings: ConsensusSettings) -> Self {
        Self {
            threshold: settings.threshold,
            max_rounds: settings.max_rounds,
            resolution: settings.resolution.into(),
            on_no_consensus: settings.on_no_consensus.into(),
            weights: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DebateFormatKind {
    #[default]
    FreeForm,
    Structured,
}

impl From<DebateFormatKind> for DebateFormat {
    fn from(kind: DebateFormatKind) -> Self {
        match kind {
            DebateFormatKind::FreeForm => Self::FreeForm,
            DebateFormatKind::Structured => Self::Structured,
        }
    }
}

/// `rounds`, `format` from `spec.md` §6's debate config row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateSettings {
    pub rounds: u32,
    pub format: DebateFormatKind,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self { rounds: 3, format: DebateFormatKind::default() }
    }
}

impl From<DebateSettings> for DebateConfig {
    fn from(settings: DebateSettings) -> Self {
        Self { rounds: settings.rounds, format: settings.format.into() }
    }
}

/// Top-level settings bundle: coordinator-wide knobs plus the env-tunable
/// subset of each strategy's configuration. Built once per swarm, never
/// merged with anything else afterward (the "immutable per-swarm
/// configuration record" redesign note in `spec.md` §9).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SwarmSettings {
    pub coordinator: CoordinatorSettings,
    pub consensus: ConsensusSettings,
    pub debate: DebateSettings,
}

impl SwarmSettings {
    /// Programmatic defaults merged with `SWARM_`-prefixed environment
    /// variables (double-underscore-separated for nested fields, e.g.
    /// `SWARM_CONSENSUS__THRESHOLD=0.75`).
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_environment_overrides() {
        let settings = SwarmSettings::load().expect("defaults alone must parse");
        assert_eq!(settings.coordinator.max_concurrency, crate::coordinator::DEFAULT_MAX_CONCURRENCY);
        assert_eq!(settings.consensus.threshold, 0.5);
        assert_eq!(settings.debate.rounds, 3);
    }

    #[test]
    fn env_override_wins_over_default() {
        std::env::set_var("SWARM_CONSENSUS__THRESHOLD", "0.9");
        std::env::set_var("SWARM_DEBATE__ROUNDS", "5");
        let settings = SwarmSettings::load().expect("env override must parse");
        std::env::remove_var("SWARM_CONSENSUS__THRESHOLD");
        std::env::remove_var("SWARM_DEBATE__ROUNDS");

        assert_eq!(settings.consensus.threshold, 0.9);
        assert_eq!(settings.debate.rounds, 5);
    }

    #[test]
    fn circuit_breaker_disabled_yields_no_config() {
        let settings = CircuitBreakerSettings { enabled: false, ..CircuitBreakerSettings::default() };
        assert!(settings.to_config().is_none());
    }

    #[test]
    fn coordinator_settings_build_retry_failure_policy() {
        let settings = CoordinatorSettings { failure_policy: FailurePolicyKind::Retry, ..CoordinatorSettings::default() };
        let policy = settings.to_failure_policy();
        assert!(matches!(policy, FailurePolicy::Retry { .. }));
    }
}
