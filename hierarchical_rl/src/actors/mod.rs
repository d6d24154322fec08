//! Rollout workers and the pool that drives them.
//!
//! - `RolloutWorker`: one environment + one controller replica, sequential
//! - `WorkerPool`: thread-per-worker pool with two-phase weight broadcast and
//!   deterministic fan-in

pub mod worker;
pub mod worker_pool;

#[cfg(test)]
mod tests;

pub use worker::{
    CollectRequest, ControllerFactory, EnvFactory, Rollout, RolloutError, RolloutWorker,
    WorkerBuildError, DEFAULT_METRICS_PREFIX,
};
pub use worker_pool::{PoolCollect, PoolError, WorkerPool, WorkerPoolConfig};

// Re-export from messages for convenience
pub use crate::messages::{WorkerMsg, WorkerReply, WorkerStats};
