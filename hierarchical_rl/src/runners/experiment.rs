//! Epoch driver: alternates collection, evaluation and training.
//!
//! ```text
//! set_weights ─> collect(warm_up, all workers, stochastic) ─> insert
//!
//! for epoch in 0..num_epochs:
//!     if epoch % num_epochs_per_eval == 0:
//!         set_weights ─> collect(eval, all workers, deterministic, no keep)
//!                     ─> record eval_mean_return
//!     set_weights ─> collect(epoch, train_workers, stochastic)
//!                 ─> record train_mean_return ─> insert
//!     train_step x steps collected
//! ```
//!
//! Collection failures end the run with the pool's error; retrying an
//! epoch is left to the caller.

use super::experiment_config::ExperimentConfig;
use crate::actors::{ControllerFactory, EnvFactory, PoolCollect, PoolError, WorkerPool};
use crate::buffers::{HierarchicalReplay, StoreError};
use crate::core::weights::LevelWeights;
use crate::hierarchy::ConfigError;
use crate::metrics::SharedRecorder;
use crate::relabel::Relabeler;
use std::error::Error;
use std::fmt;

/// Boxed error from an external learning step.
pub type TrainerError = Box<dyn Error + Send + Sync>;

/// External learning step driven once per collected training step.
pub trait Trainer {
    /// One gradient step on the replay contents.
    fn train_step(&mut self, replay: &HierarchicalReplay) -> Result<(), TrainerError>;

    /// Current weights of every level, base level first.
    fn snapshot(&self) -> Vec<LevelWeights>;
}

/// Error ending an experiment.
#[derive(Debug)]
pub enum ExperimentError {
    Config(ConfigError),
    Pool(PoolError),
    Store(StoreError),
    /// The trainer failed at `epoch`.
    Trainer { epoch: usize, source: TrainerError },
}

impl fmt::Display for ExperimentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExperimentError::Config(e) => write!(f, "invalid experiment config: {}", e),
            ExperimentError::Pool(e) => write!(f, "worker pool error: {}", e),
            ExperimentError::Store(e) => write!(f, "replay insert failed: {}", e),
            ExperimentError::Trainer { epoch, source } => {
                write!(f, "train step failed in epoch {}: {}", epoch, source)
            }
        }
    }
}

impl Error for ExperimentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExperimentError::Config(e) => Some(e),
            ExperimentError::Pool(e) => Some(e),
            ExperimentError::Store(e) => Some(e),
            ExperimentError::Trainer { source, .. } => Some(source.as_ref()),
        }
    }
}

impl From<ConfigError> for ExperimentError {
    fn from(e: ConfigError) -> Self {
        ExperimentError::Config(e)
    }
}

impl From<PoolError> for ExperimentError {
    fn from(e: PoolError) -> Self {
        ExperimentError::Pool(e)
    }
}

impl From<StoreError> for ExperimentError {
    fn from(e: StoreError) -> Self {
        ExperimentError::Store(e)
    }
}

/// Outcome of one epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    /// Mean deterministic return, when this epoch evaluated.
    pub eval_mean_return: Option<f64>,
    /// Mean return of the training episodes (`None` if none completed).
    pub train_mean_return: Option<f64>,
    /// Primitive steps collected for training (= train steps run).
    pub train_steps: usize,
    /// Weights version used for the training collect.
    pub weights_version: u64,
}

/// Worker pool, replay and trainer wired to an epoch schedule.
pub struct Experiment<T: Trainer> {
    config: ExperimentConfig,
    pool: WorkerPool,
    replay: HierarchicalReplay,
    trainer: T,
    recorder: SharedRecorder,
    total_train_steps: usize,
}

impl<T: Trainer> Experiment<T> {
    /// Validate `config`, spawn the pool and allocate the per-level replay.
    pub fn new(
        config: ExperimentConfig,
        env_factory: EnvFactory,
        controller_factory: ControllerFactory,
        trainer: T,
        recorder: SharedRecorder,
    ) -> Result<Self, ExperimentError> {
        config.validate()?;

        let relabeler = Relabeler::for_hierarchy(config.num_levels, config.reward_scale)
            .with_observation_key(config.observation_key.clone());
        let replay =
            HierarchicalReplay::new(&config.hierarchy_config(), config.max_num_steps, relabeler)?;
        let pool = WorkerPool::spawn(
            config.pool_config(),
            env_factory,
            controller_factory,
            recorder.clone(),
        )?;

        Ok(Self {
            config,
            pool,
            replay,
            trainer,
            recorder,
            total_train_steps: 0,
        })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn replay(&self) -> &HierarchicalReplay {
        &self.replay
    }

    pub fn trainer(&self) -> &T {
        &self.trainer
    }

    /// Train steps run so far.
    pub fn total_train_steps(&self) -> usize {
        self.total_train_steps
    }

    /// Run warm-up and every epoch.
    pub fn run(&mut self) -> Result<Vec<EpochStats>, ExperimentError> {
        let warm_up = self.warm_up()?;
        log::info!(
            "warm-up collected {} steps, replay sizes {:?}",
            warm_up,
            self.replay.sizes()
        );

        let mut history = Vec::with_capacity(self.config.num_epochs);
        for epoch in 0..self.config.num_epochs {
            history.push(self.run_epoch(epoch)?);
        }
        Ok(history)
    }

    /// Collect `num_warm_up_steps` with every worker and insert them.
    pub fn warm_up(&mut self) -> Result<usize, ExperimentError> {
        self.broadcast()?;
        let collected = self.pool.collect(
            self.config.num_warm_up_steps,
            false,
            true,
            self.config.num_workers,
        )?;
        self.replay.insert_paths(&collected.trajectories)?;
        Ok(collected.total_steps)
    }

    /// One epoch: optional evaluation, training collect, train steps.
    pub fn run_epoch(&mut self, epoch: usize) -> Result<EpochStats, ExperimentError> {
        let eval_mean_return = if self.config.is_eval_epoch(epoch) {
            self.broadcast()?;
            let eval = self.pool.collect(
                self.config.num_steps_per_eval,
                true,
                false,
                self.config.num_workers,
            )?;
            self.record_mean("eval_mean_return", &eval)
        } else {
            None
        };

        let weights_version = self.broadcast()?;
        let train = self.pool.collect(
            self.config.num_steps_per_epoch,
            false,
            true,
            self.config.train_workers,
        )?;
        let train_mean_return = self.record_mean("train_mean_return", &train);
        self.replay.insert_paths(&train.trajectories)?;

        for _ in 0..train.total_steps {
            self.trainer
                .train_step(&self.replay)
                .map_err(|source| ExperimentError::Trainer { epoch, source })?;
        }
        self.total_train_steps += train.total_steps;
        self.recorder.flush();

        log::info!(
            "epoch {}: eval {:?}, train {:?}, {} train steps, weights v{}",
            epoch,
            eval_mean_return,
            train_mean_return,
            train.total_steps,
            weights_version
        );

        Ok(EpochStats {
            epoch,
            eval_mean_return,
            train_mean_return,
            train_steps: train.total_steps,
            weights_version,
        })
    }

    /// Stop the worker threads and hand back the trainer.
    pub fn into_trainer(mut self) -> T {
        self.pool.shutdown();
        self.trainer
    }

    /// Push the trainer's current weights to every worker.
    fn broadcast(&mut self) -> Result<u64, ExperimentError> {
        Ok(self.pool.set_weights(self.trainer.snapshot())?)
    }

    fn record_mean(&self, name: &str, collected: &PoolCollect) -> Option<f64> {
        if collected.returns.is_empty() {
            log::warn!("{}: no episode completed", name);
            return None;
        }
        let mean = collected.mean_return();
        self.recorder.record(name, mean);
        Some(mean)
    }
}
