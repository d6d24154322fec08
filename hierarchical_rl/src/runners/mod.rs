//! Experiment drivers.
//!
//! - [`ExperimentConfig`]: epoch schedule, hierarchy shape, replay size
//! - [`Experiment`]: worker pool + per-level replay + external [`Trainer`]
//!
//! # Architecture
//!
//! ```text
//!              set_weights / collect
//! Experiment ────────────────────────> WorkerPool ──> N rollout workers
//!     │  ^                                  │
//!     │  └──────── PoolCollect ─────────────┘
//!     │
//!     ├──> HierarchicalReplay (relabel + insert)
//!     └──> Trainer::train_step x steps collected
//! ```

pub mod experiment;
pub mod experiment_config;

#[cfg(test)]
mod tests;

pub use experiment::{EpochStats, Experiment, ExperimentError, Trainer, TrainerError};
pub use experiment_config::ExperimentConfig;
