//! Configuration of the control hierarchy.

use crate::core::observation::DEFAULT_OBSERVATION_KEY;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration validation error.
///
/// Returned at construction time; none of these are recoverable at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A count parameter must be positive.
    InvalidCount {
        field: &'static str,
        value: usize,
    },
    /// A parameter is outside its valid range.
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    /// `time_skip^level` does not fit in `usize`.
    PeriodOverflow { level: usize },
    /// The top-level period override does not line up with the level below.
    TopLevelPeriod { period: usize, below: usize },
    /// Number of policy levels differs from `num_levels`.
    LevelCount { expected: usize, got: usize },
    /// A level's declared dimensionality does not match its role.
    LevelDim {
        level: usize,
        what: &'static str,
        expected: usize,
        got: usize,
    },
    /// The observation space lacks the primary field.
    MissingField { key: String },
    /// A config file could not be parsed.
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidCount { field, value } => {
                write!(f, "{} must be > 0, got {}", field, value)
            }
            ConfigError::OutOfRange { field, value, min, max } => {
                write!(f, "{} must be in [{}, {}], got {}", field, min, max, value)
            }
            ConfigError::PeriodOverflow { level } => {
                write!(f, "decision period of level {} overflows", level)
            }
            ConfigError::TopLevelPeriod { period, below } => write!(
                f,
                "top_level_period ({}) must be a positive multiple of the period below it ({})",
                period, below
            ),
            ConfigError::LevelCount { expected, got } => {
                write!(f, "hierarchy expects {} levels, got {}", expected, got)
            }
            ConfigError::LevelDim { level, what, expected, got } => write!(
                f,
                "level {} declares {} of {} dims, expected {}",
                level, what, got, expected
            ),
            ConfigError::MissingField { key } => {
                write!(f, "observation space has no field '{}'", key)
            }
            ConfigError::Parse(msg) => write!(f, "failed to parse config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

/// Shape of the multi-rate control hierarchy.
///
/// Level `i` decides every `time_skip^i` primitive steps; level 0 acts on
/// every step. The top level may override its period, e.g. with
/// `max_path_length` to decide once per episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyConfig {
    /// Number of levels (1 = flat policy).
    pub num_levels: usize,
    /// Branching factor between adjacent decision frequencies.
    pub time_skip: usize,
    /// Maximum primitive steps per episode.
    pub max_path_length: usize,
    /// Observation field every level reads.
    pub observation_key: String,
    /// Explicit decision period for the top level.
    pub top_level_period: Option<usize>,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            num_levels: 2,
            time_skip: 10,
            max_path_length: 1000,
            observation_key: DEFAULT_OBSERVATION_KEY.to_string(),
            top_level_period: None,
        }
    }
}

impl HierarchyConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the top level.
    pub fn top_level(&self) -> usize {
        self.num_levels.saturating_sub(1)
    }

    /// Decision period of `level` in primitive steps.
    ///
    /// Saturates at `usize::MAX` on overflow, which
    /// [`validate`](Self::validate) rules out.
    ///
    /// # Panics
    /// Panics if `level >= num_levels`.
    pub fn period(&self, level: usize) -> usize {
        assert!(level < self.num_levels, "level {} out of range", level);
        if level > 0 && level == self.top_level() {
            if let Some(period) = self.top_level_period {
                return period;
            }
        }
        self.time_skip
            .checked_pow(level as u32)
            .unwrap_or(usize::MAX)
    }

    /// Decision period of every level, base level first.
    pub fn periods(&self) -> Vec<usize> {
        (0..self.num_levels).map(|level| self.period(level)).collect()
    }

    /// Refresh period of the goal `level` is conditioned on, on the episode
    /// clock.
    ///
    /// Below the top this is the period of the level above, so it follows a
    /// top-level override. The top level is unconditioned; its (absent) goal
    /// is constant for the whole episode, so it reports `max_path_length`.
    /// Derived data for callers and logs; decision timing uses
    /// [`period`](Self::period). `None` for a level out of range.
    pub fn goal_skip(&self, level: usize) -> Option<usize> {
        if level >= self.num_levels {
            return None;
        }
        if level == self.top_level() {
            return Some(self.max_path_length);
        }
        Some(self.period(level + 1))
    }

    /// Number of decisions `level` makes over an episode of `length` steps.
    pub fn decisions_per_episode(&self, level: usize, length: usize) -> usize {
        let period = self.period(level);
        length.div_ceil(period)
    }

    /// Validate all configuration parameters.
    ///
    /// # Validation Rules
    /// - `num_levels`, `time_skip` and `max_path_length` must be > 0
    /// - every `time_skip^i` must fit in `usize`
    /// - a top-level override needs at least two levels and must be a
    ///   positive multiple of the period of the level below
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_levels == 0 {
            return Err(ConfigError::InvalidCount {
                field: "num_levels",
                value: 0,
            });
        }
        if self.time_skip == 0 {
            return Err(ConfigError::InvalidCount {
                field: "time_skip",
                value: 0,
            });
        }
        if self.max_path_length == 0 {
            return Err(ConfigError::InvalidCount {
                field: "max_path_length",
                value: 0,
            });
        }
        for level in 0..self.num_levels {
            if self.time_skip.checked_pow(level as u32).is_none() {
                return Err(ConfigError::PeriodOverflow { level });
            }
        }

        if let Some(period) = self.top_level_period {
            let below = if self.num_levels > 1 {
                self.time_skip.pow((self.num_levels - 2) as u32)
            } else {
                0
            };
            if below == 0 || period == 0 || period % below != 0 {
                return Err(ConfigError::TopLevelPeriod { period, below });
            }
        }

        Ok(())
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    /// Set number of levels.
    pub fn with_num_levels(mut self, num_levels: usize) -> Self {
        self.num_levels = num_levels;
        self
    }

    /// Set the branching factor.
    pub fn with_time_skip(mut self, time_skip: usize) -> Self {
        self.time_skip = time_skip;
        self
    }

    /// Set maximum episode length.
    pub fn with_max_path_length(mut self, max_path_length: usize) -> Self {
        self.max_path_length = max_path_length;
        self
    }

    /// Set the observation field all levels read.
    pub fn with_observation_key(mut self, key: impl Into<String>) -> Self {
        self.observation_key = key.into();
        self
    }

    /// Override the top level's decision period.
    pub fn with_top_level_period(mut self, period: Option<usize>) -> Self {
        self.top_level_period = period;
        self
    }
}
