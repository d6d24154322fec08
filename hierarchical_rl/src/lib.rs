//! # Hierarchical RL: Parallel Rollouts for Multi-Rate Control Hierarchies
//!
//! Rollout collection for hierarchies of goal-conditioned policies. Level 0
//! emits primitive actions every step; level `i` emits a goal for level
//! `i - 1` every `time_skip^i` steps.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              Experiment                              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Thread 1              Thread 2              Thread N                │
//! │  ┌──────────────┐      ┌──────────────┐      ┌──────────────┐        │
//! │  │RolloutWorker0│      │RolloutWorker1│      │RolloutWorkerN│        │
//! │  │ Environment  │      │ Environment  │      │ Environment  │        │
//! │  │ Controller   │      │ Controller   │      │ Controller   │        │
//! │  └──────┬───────┘      └──────┬───────┘      └──────┬───────┘        │
//! │         │  WorkerMsg / WorkerReply (bounded crossbeam channels)      │
//! │         └─────────────────────┼─────────────────────┘                │
//! │                               ▼                                      │
//! │                     ┌──────────────────┐                             │
//! │                     │    WorkerPool    │  two-phase set_weights      │
//! │                     │ (fan-out/fan-in) │  ordered collect            │
//! │                     └────────┬─────────┘                             │
//! │                              ▼                                       │
//! │                     ┌──────────────────┐      ┌──────────────┐       │
//! │                     │ Relabeler (rayon)│ ───> │ Per-level    │       │
//! │                     └──────────────────┘      │ replay rings │       │
//! │                                               └──────────────┘       │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hierarchical_rl::{Experiment, ExperimentConfig, NullRecorder};
//!
//! let config = ExperimentConfig::new()
//!     .with_num_workers(4)
//!     .with_hierarchy(2, 10)
//!     .with_max_path_length(1000);
//!
//! let mut experiment = Experiment::new(config, env_factory, controller_factory, trainer, recorder)?;
//! let history = experiment.run()?;
//! ```

pub mod actors;
pub mod buffers;
pub mod core;
pub mod environment;
pub mod hierarchy;
pub mod messages;
pub mod metrics;
pub mod policy;
pub mod relabel;
pub mod runners;

#[cfg(test)]
mod test_utils;

// Data model
pub use crate::core::{
    BoxSpace, LevelTrajectory, LevelWeights, Observation, ObservationSpace, ParameterSnapshot,
    RunningScalarStats, Step, Trajectory, DEFAULT_OBSERVATION_KEY,
};

// Environment and policies
pub use environment::{EnvError, EnvStep, Environment, PointMassEnv};
pub use policy::{LeveledPolicy, LinearGaussianPolicy, LinearParams, PolicyError};

// Hierarchy
pub use hierarchy::{ConfigError, ControllerError, Decision, HierarchyConfig, HierarchyController};

// Workers and pool
pub use actors::{
    CollectRequest, ControllerFactory, EnvFactory, PoolCollect, PoolError, Rollout, RolloutError,
    RolloutWorker, WorkerBuildError, WorkerPool, WorkerPoolConfig,
};
pub use messages::{WorkerMsg, WorkerReply, WorkerStats};

// Relabeling and storage
pub use buffers::{
    ExperienceStore, HierarchicalReplay, ReplayTransition, StepReplayBuffer, StoreError,
};
pub use relabel::{LevelRelabel, RelabelError, Relabeler};

// Metrics
pub use metrics::{
    CsvRecorder, LogRecorder, MemoryRecorder, MetricsRecorder, MultiRecorder, NullRecorder,
    SharedRecorder,
};

// Experiment driver
pub use runners::{EpochStats, Experiment, ExperimentConfig, ExperimentError, Trainer, TrainerError};
