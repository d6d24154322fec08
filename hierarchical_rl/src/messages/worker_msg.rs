//! Messages exchanged between the worker pool and rollout worker threads.
//!
//! # Data Integrity
//!
//! Worker statistics filter non-finite episode returns (NaN, Inf) out of the
//! running average so one diverged episode cannot poison the lifetime mean.

use crate::actors::worker::{CollectRequest, Rollout, RolloutError};
use crate::core::weights::ParameterSnapshot;
use crate::hierarchy::ControllerError;

/// Commands sent from the pool to a worker thread.
///
/// Every command is answered with exactly one [`WorkerReply`] except
/// `Shutdown`.
#[derive(Debug, Clone)]
pub enum WorkerMsg {
    /// Decode and check a snapshot into the staging slot without using it.
    Stage(ParameterSnapshot),

    /// Switch to the staged snapshot carrying this version.
    Commit(u64),

    /// Drop the staged snapshot.
    Abort,

    /// Undo the commit of this version.
    Rollback(u64),

    /// Run the rollout loop.
    Collect(CollectRequest),

    /// Exit the thread.
    Shutdown,
}

/// Replies sent from a worker thread back to the pool.
#[derive(Debug)]
pub enum WorkerReply {
    /// Outcome of `Stage`.
    Staged(Result<(), ControllerError>),

    /// Outcome of `Commit`: the weights version now in use.
    Committed(Result<u64, RolloutError>),

    /// Staging slot cleared.
    Aborted,

    /// Outcome of `Rollback`: the weights version now in use.
    RolledBack(Result<Option<u64>, RolloutError>),

    /// Outcome of `Collect`, with the worker's lifetime statistics.
    Collected(Result<Rollout, RolloutError>, WorkerStats),
}

/// Lifetime statistics of one rollout worker.
///
/// Uses numerically stable running averages so very long runs do not lose
/// precision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerStats {
    /// Worker identifier.
    pub worker_id: usize,

    /// Total primitive steps taken.
    pub steps: usize,

    /// Total episodes completed (including those with non-finite returns).
    pub episodes: usize,

    /// Episodes whose return entered the average.
    pub valid_episodes: usize,

    /// Episodes with a NaN/Inf return.
    pub filtered_episodes: usize,

    /// Lifetime mean episode return over valid episodes.
    pub avg_episode_return: f32,

    /// Most recent episode return (may be non-finite).
    pub recent_episode_return: f32,

    /// Number of collect calls served.
    pub collects: usize,

    /// Weights version in use, `None` until the first commit.
    pub weights_version: Option<u64>,
}

impl WorkerStats {
    /// Create empty stats for `worker_id`.
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            ..Default::default()
        }
    }

    /// Record a completed episode.
    ///
    /// Non-finite returns are counted in `filtered_episodes` and kept in
    /// `recent_episode_return` but never enter the average.
    pub fn record_episode(&mut self, episode_return: f32) {
        self.episodes += 1;
        self.recent_episode_return = episode_return;

        if !episode_return.is_finite() {
            self.filtered_episodes += 1;
            return;
        }

        // Welford mean: avg += (x - avg) / n
        self.valid_episodes += 1;
        let delta = episode_return - self.avg_episode_return;
        self.avg_episode_return += delta / self.valid_episodes as f32;
    }

    /// Add primitive steps (saturating).
    pub fn add_steps(&mut self, n: usize) {
        self.steps = self.steps.saturating_add(n);
    }

    /// Fraction of episodes filtered for non-finite returns.
    pub fn filtered_fraction(&self) -> f32 {
        if self.episodes == 0 {
            0.0
        } else {
            self.filtered_episodes as f32 / self.episodes as f32
        }
    }
}
