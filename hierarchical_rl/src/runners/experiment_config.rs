//! Configuration of a hierarchical training experiment.
//!
//! Flat so it reads and writes as one JSON object:
//!
//! ```json
//! {
//!   "num_workers": 2,
//!   "num_levels": 2,
//!   "time_skip": 10,
//!   "top_level_period": null,
//!   "observation_key": "observation",
//!   "max_path_length": 1000,
//!   "max_num_steps": 10000,
//!   "num_warm_up_steps": 10000,
//!   "num_steps_per_epoch": 1000,
//!   "num_steps_per_eval": 10000,
//!   "num_epochs_per_eval": 1,
//!   "num_epochs": 10000,
//!   "train_workers": 1,
//!   "reward_scale": 1.0
//! }
//! ```

use crate::actors::WorkerPoolConfig;
use crate::core::observation::DEFAULT_OBSERVATION_KEY;
use crate::hierarchy::{ConfigError, HierarchyConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Epoch schedule, hierarchy shape and store sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Rollout worker threads.
    pub num_workers: usize,
    /// Levels in the control hierarchy.
    pub num_levels: usize,
    /// Branching factor between adjacent decision frequencies.
    pub time_skip: usize,
    /// Top-level decision period override (`None`: `time_skip^(num_levels-1)`).
    pub top_level_period: Option<usize>,
    /// Observation field the levels read and relabeling scores.
    pub observation_key: String,
    /// Maximum primitive steps per episode.
    pub max_path_length: usize,
    /// Replay capacity per level, in transitions.
    pub max_num_steps: usize,
    /// Steps collected before the first epoch.
    pub num_warm_up_steps: usize,
    /// Training steps collected per epoch.
    pub num_steps_per_epoch: usize,
    /// Steps collected per evaluation.
    pub num_steps_per_eval: usize,
    /// Evaluate every this many epochs (starting with epoch 0).
    pub num_epochs_per_eval: usize,
    pub num_epochs: usize,
    /// Workers used for training collection.
    pub train_workers: usize,
    /// Scale of the environment reward seen by the base level.
    pub reward_scale: f32,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            num_workers: 2,
            num_levels: 2,
            time_skip: 10,
            top_level_period: None,
            observation_key: DEFAULT_OBSERVATION_KEY.to_string(),
            max_path_length: 1000,
            max_num_steps: 10_000,
            num_warm_up_steps: 10_000,
            num_steps_per_epoch: 1000,
            num_steps_per_eval: 10_000,
            num_epochs_per_eval: 1,
            num_epochs: 10_000,
            train_workers: 1,
            reward_scale: 1.0,
        }
    }
}

impl ExperimentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Parse from JSON and validate.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.build()
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Hierarchy shape implied by this experiment. Every worker's
    /// controller must run exactly this configuration.
    pub fn hierarchy_config(&self) -> HierarchyConfig {
        HierarchyConfig::new()
            .with_num_levels(self.num_levels)
            .with_time_skip(self.time_skip)
            .with_max_path_length(self.max_path_length)
            .with_observation_key(self.observation_key.clone())
            .with_top_level_period(self.top_level_period)
    }

    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.num_workers).with_hierarchy(self.hierarchy_config())
    }

    /// Validate all configuration parameters.
    ///
    /// # Validation Rules
    /// - worker, replay and eval-interval counts must be > 0
    /// - `train_workers` must be in `1..=num_workers`
    /// - `reward_scale` must be finite
    /// - the implied hierarchy must be valid
    ///
    /// Step counts may be zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("num_workers", self.num_workers),
            ("max_num_steps", self.max_num_steps),
            ("num_epochs_per_eval", self.num_epochs_per_eval),
            ("train_workers", self.train_workers),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidCount { field, value });
            }
        }

        if self.train_workers > self.num_workers {
            return Err(ConfigError::OutOfRange {
                field: "train_workers",
                value: self.train_workers as f64,
                min: 1.0,
                max: self.num_workers as f64,
            });
        }
        if !self.reward_scale.is_finite() {
            return Err(ConfigError::OutOfRange {
                field: "reward_scale",
                value: self.reward_scale as f64,
                min: f32::MIN as f64,
                max: f32::MAX as f64,
            });
        }

        self.hierarchy_config().validate()
    }

    pub fn build(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    /// Whether `epoch` starts with an evaluation.
    pub fn is_eval_epoch(&self, epoch: usize) -> bool {
        self.num_epochs_per_eval > 0 && epoch % self.num_epochs_per_eval == 0
    }

    pub fn with_num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn with_hierarchy(mut self, num_levels: usize, time_skip: usize) -> Self {
        self.num_levels = num_levels;
        self.time_skip = time_skip;
        self
    }

    /// Override the top level's decision period.
    pub fn with_top_level_period(mut self, period: Option<usize>) -> Self {
        self.top_level_period = period;
        self
    }

    pub fn with_observation_key(mut self, key: impl Into<String>) -> Self {
        self.observation_key = key.into();
        self
    }

    pub fn with_max_path_length(mut self, max_path_length: usize) -> Self {
        self.max_path_length = max_path_length;
        self
    }

    pub fn with_max_num_steps(mut self, max_num_steps: usize) -> Self {
        self.max_num_steps = max_num_steps;
        self
    }

    pub fn with_warm_up_steps(mut self, steps: usize) -> Self {
        self.num_warm_up_steps = steps;
        self
    }

    pub fn with_steps_per_epoch(mut self, steps: usize) -> Self {
        self.num_steps_per_epoch = steps;
        self
    }

    /// Set evaluation size and interval.
    pub fn with_eval(mut self, steps: usize, every_epochs: usize) -> Self {
        self.num_steps_per_eval = steps;
        self.num_epochs_per_eval = every_epochs;
        self
    }

    pub fn with_num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    pub fn with_train_workers(mut self, n: usize) -> Self {
        self.train_workers = n;
        self
    }

    pub fn with_reward_scale(mut self, reward_scale: f32) -> Self {
        self.reward_scale = reward_scale;
        self
    }
}
