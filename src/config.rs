//! Configuration types and loading.
//!
//! Every knob named in the capability-bundle design notes is enumerated
//! here with a `#[serde(default)]` and, where the value has a documented
//! valid range, a clamping validator invoked from [`Config::validated`].
//! File-loading follows the same project-local/user/default fallback chain
//! the crate has always used.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration for a wheel session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub cycle: CycleConfig,
    pub scout: ScoutConfig,
    pub drill: DrillConfig,
    pub git: GitConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration with the project-local/user/default fallback
    /// chain, then apply [`Config::validated`].
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let loaded = if let Some(path) = config_path {
            Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()))?
        } else {
            let local_config = PathBuf::from(".promptwheel.yml");
            if local_config.exists() {
                match Self::load_from_file(&local_config) {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                        Self::from_user_config_or_default()?
                    }
                }
            } else {
                Self::from_user_config_or_default()?
            }
        };
        Ok(loaded.validated())
    }

    fn from_user_config_or_default() -> Result<Self> {
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("promptwheel").join("promptwheel.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Clamp every bounded knob into its documented valid range.
    pub fn validated(mut self) -> Self {
        self.drill = self.drill.validated();
        self.cycle = self.cycle.validated();
        self
    }
}

/// Configuration for the LLM-backed `Surveyor`/`TrajectoryGenerator`
/// implementations in [`crate::runtime`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    #[serde(rename = "base-url")]
    pub base_url: String,
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            max_tokens: 4096,
            timeout_ms: 120_000,
        }
    }
}

/// Pre/post-cycle scheduling knobs (§4.6, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    #[serde(rename = "max-idle-cycles")]
    pub max_idle_cycles: u32,
    #[serde(rename = "max-low-yield-cycles")]
    pub max_low_yield_cycles: u32,
    #[serde(rename = "pull-interval")]
    pub pull_interval: u32,
    #[serde(rename = "pull-policy")]
    pub pull_policy: PullPolicy,
    #[serde(rename = "guidelines-refresh-interval")]
    pub guidelines_refresh_interval: u32,
    #[serde(rename = "min-confidence")]
    pub min_confidence: u32,
    #[serde(rename = "max-pending-reviews")]
    pub max_pending_reviews: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    #[default]
    Halt,
    Warn,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_idle_cycles: 15,
            max_low_yield_cycles: 3,
            pull_interval: 10,
            pull_policy: PullPolicy::Halt,
            guidelines_refresh_interval: 20,
            min_confidence: 40,
            max_pending_reviews: 20,
        }
    }
}

impl CycleConfig {
    fn validated(mut self) -> Self {
        self.min_confidence = self.min_confidence.clamp(0, 80);
        self.max_pending_reviews = self.max_pending_reviews.max(1);
        self
    }
}

/// Survey/scout knobs (§6, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoutConfig {
    #[serde(rename = "batch-token-budget")]
    pub batch_token_budget: u32,
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
    #[serde(rename = "max-scout-files")]
    pub max_scout_files: u32,
    #[serde(rename = "concurrency")]
    pub concurrency: u32,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            batch_token_budget: 50_000,
            timeout_ms: 120_000,
            max_scout_files: 500,
            concurrency: 4,
        }
    }
}

/// Ambition-level thresholds (§4.4, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbitionThresholds {
    #[serde(rename = "step1-critical")]
    pub step1_critical: f64,
    #[serde(rename = "step1-fail")]
    pub step1_fail: f64,
    #[serde(rename = "step1-ambitious-max")]
    pub step1_ambitious_max: f64,
    pub conservative: f64,
    pub ambitious: f64,
}

impl Default for AmbitionThresholds {
    fn default() -> Self {
        Self {
            step1_critical: 0.4,
            step1_fail: 0.25,
            step1_ambitious_max: 0.15,
            conservative: 0.3,
            ambitious: 0.7,
        }
    }
}

/// Drill-mode knobs (§4.4, §9): cooldown, proposal thresholds, trajectory
/// budget, and the ambition thresholds nested within.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrillConfig {
    pub enabled: bool,
    #[serde(rename = "min-proposals")]
    pub min_proposals: u32,
    #[serde(rename = "max-proposals")]
    pub max_proposals: u32,
    #[serde(rename = "cooldown-completed")]
    pub cooldown_completed: f64,
    #[serde(rename = "cooldown-stalled")]
    pub cooldown_stalled: f64,
    #[serde(rename = "history-cap")]
    pub history_cap: usize,
    #[serde(rename = "confidence-discount")]
    pub confidence_discount: u32,
    #[serde(rename = "min-avg-confidence")]
    pub min_avg_confidence: f64,
    #[serde(rename = "min-avg-impact")]
    pub min_avg_impact: f64,
    #[serde(rename = "max-consecutive-insufficient")]
    pub max_consecutive_insufficient: u32,
    #[serde(rename = "max-cycles-per-trajectory")]
    pub max_cycles_per_trajectory: u32,
    #[serde(rename = "sigmoid-k")]
    pub sigmoid_k: f64,
    #[serde(rename = "sigmoid-center")]
    pub sigmoid_center: f64,
    #[serde(rename = "staleness-log-base")]
    pub staleness_log_base: f64,
    #[serde(rename = "causal-window")]
    pub causal_window: u32,
    #[serde(rename = "ambition-thresholds")]
    pub ambition_thresholds: AmbitionThresholds,
    #[serde(rename = "step-count-slack")]
    pub step_count_slack: u32,
}

impl Default for DrillConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_proposals: 3,
            max_proposals: 10,
            cooldown_completed: 0.0,
            cooldown_stalled: 5.0,
            history_cap: 100,
            confidence_discount: 15,
            min_avg_confidence: 40.0,
            min_avg_impact: 3.0,
            max_consecutive_insufficient: 3,
            max_cycles_per_trajectory: 15,
            sigmoid_k: 6.0,
            sigmoid_center: 0.5,
            staleness_log_base: 2.0,
            causal_window: 5,
            ambition_thresholds: AmbitionThresholds::default(),
            step_count_slack: 2,
        }
    }
}

impl DrillConfig {
    fn validated(mut self) -> Self {
        self.confidence_discount = self.confidence_discount.min(30);
        self.sigmoid_k = self.sigmoid_k.clamp(1.0, 20.0);
        self.sigmoid_center = self.sigmoid_center.clamp(0.0, 1.0);
        self.history_cap = crate::domain::clamp_history_cap(self.history_cap);
        self
    }
}

/// Git repository configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    #[serde(rename = "worktree-dir")]
    pub worktree_dir: PathBuf,
    #[serde(rename = "disk-quota-gb")]
    pub disk_quota_gb: u32,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            worktree_dir: PathBuf::from("/tmp/promptwheel/worktrees"),
            disk_quota_gb: 100,
        }
    }
}

/// On-disk persisted-state directory configuration (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "promptwheel-dir")]
    pub promptwheel_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            promptwheel_dir: ".promptwheel".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.drill.min_proposals, 3);
        assert_eq!(config.cycle.max_idle_cycles, 15);
    }

    #[test]
    fn validated_clamps_out_of_range_knobs() {
        let mut config = Config::default();
        config.drill.confidence_discount = 90;
        config.drill.sigmoid_k = 0.0;
        config.drill.history_cap = 1;
        config.cycle.min_confidence = 200;
        let config = config.validated();
        assert_eq!(config.drill.confidence_discount, 30);
        assert_eq!(config.drill.sigmoid_k, 1.0);
        assert_eq!(config.drill.history_cap, 10);
        assert_eq!(config.cycle.min_confidence, 80);
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let yaml = "drill:\n  min-proposals: 5\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.drill.min_proposals, 5);
        assert_eq!(config.drill.max_proposals, 10);
    }
}
