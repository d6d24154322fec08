//! Single-environment rollout worker.
//!
//! A worker owns one environment and one hierarchy controller replica and
//! drives them strictly sequentially. It never shares state with another
//! worker; parameters arrive by value through [`WorkerMsg::Stage`].
//!
//! # Weight lifecycle
//!
//! ```text
//!   Stage(snapshot) ──check──▶ staged ──Commit(v)──▶ active (version v)
//!                                 │                        │
//!                               Abort                 Rollback(v)
//!                                 ▼                        ▼
//!                              dropped          previous weights and version
//! ```
//!
//! A commit keeps the weights it replaced until the next commit, so the
//! pool can undo a broadcast that some other worker failed to apply.

use crate::core::observation::Observation;
use crate::core::running_stats::RunningScalarStats;
use crate::core::trajectory::Trajectory;
use crate::core::weights::{LevelWeights, ParameterSnapshot};
use crate::environment::{EnvError, Environment};
use crate::hierarchy::{ConfigError, ControllerError, HierarchyConfig, HierarchyController};
use crate::messages::{WorkerMsg, WorkerReply, WorkerStats};
use crate::metrics::{NullRecorder, SharedRecorder};
use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::sync::Arc;

/// Default metric name prefix for rollout statistics.
pub const DEFAULT_METRICS_PREFIX: &str = "sampler/";

/// Builds the environment for a worker id.
pub type EnvFactory = Arc<dyn Fn(usize) -> Result<Box<dyn Environment>, EnvError> + Send + Sync>;

/// Builds the controller for a worker id, given that worker's environment.
pub type ControllerFactory =
    Arc<dyn Fn(usize, &dyn Environment) -> Result<HierarchyController, ConfigError> + Send + Sync>;

/// One collection request.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectRequest {
    /// Minimum number of primitive steps to collect.
    pub min_steps: usize,
    /// Use the mode of each level's action distribution.
    pub deterministic: bool,
    /// Retain per-step data; otherwise only returns are reported.
    pub keep_trajectories: bool,
    /// Call `Environment::render` after every step.
    pub render: bool,
    /// Weights version the caller expects the worker to act with.
    pub version: Option<u64>,
}

impl CollectRequest {
    /// Stochastic, trajectory-keeping request for `min_steps`.
    pub fn new(min_steps: usize) -> Self {
        Self {
            min_steps,
            deterministic: false,
            keep_trajectories: true,
            render: false,
            version: None,
        }
    }

    pub fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    pub fn with_keep_trajectories(mut self, keep: bool) -> Self {
        self.keep_trajectories = keep;
        self
    }

    pub fn with_render(mut self, render: bool) -> Self {
        self.render = render;
        self
    }

    pub fn with_version(mut self, version: Option<u64>) -> Self {
        self.version = version;
        self
    }
}

/// Result of one collect call on one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Rollout {
    /// Producing worker.
    pub worker_id: usize,
    /// Completed episodes (empty unless trajectories were kept).
    pub trajectories: Vec<Trajectory>,
    /// Return of every completed episode, in completion order.
    pub returns: Vec<f32>,
    /// Primitive steps taken.
    pub total_steps: usize,
}

impl Rollout {
    /// A rollout with no episodes.
    pub fn empty(worker_id: usize) -> Self {
        Self {
            worker_id,
            trajectories: Vec::new(),
            returns: Vec::new(),
            total_steps: 0,
        }
    }

    /// Number of completed episodes.
    pub fn num_episodes(&self) -> usize {
        self.returns.len()
    }

    /// Mean and standard deviation of the returns.
    pub fn return_stats(&self) -> RunningScalarStats {
        RunningScalarStats::from_values(&self.returns)
    }
}

/// Failure of a worker operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RolloutError {
    /// The environment failed during reset, step or render.
    Env(EnvError),
    /// The controller failed to decide or to apply weights.
    Controller(ControllerError),
    /// The request expects a different weights version than the active one.
    StaleWeights {
        expected: Option<u64>,
        active: Option<u64>,
    },
    /// `Commit` named a version that was never staged.
    NotStaged { version: u64 },
    /// `Rollback` named the active version but no earlier weights are kept.
    NothingToRollBack { version: u64 },
}

impl fmt::Display for RolloutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RolloutError::Env(e) => write!(f, "environment error: {}", e),
            RolloutError::Controller(e) => write!(f, "controller error: {}", e),
            RolloutError::StaleWeights { expected, active } => write!(
                f,
                "stale weights: request expects version {:?}, worker has {:?}",
                expected, active
            ),
            RolloutError::NotStaged { version } => {
                write!(f, "cannot commit version {}: nothing staged", version)
            }
            RolloutError::NothingToRollBack { version } => {
                write!(f, "cannot roll back version {}: no previous weights", version)
            }
        }
    }
}

impl std::error::Error for RolloutError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RolloutError::Env(e) => Some(e),
            RolloutError::Controller(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EnvError> for RolloutError {
    fn from(e: EnvError) -> Self {
        RolloutError::Env(e)
    }
}

impl From<ControllerError> for RolloutError {
    fn from(e: ControllerError) -> Self {
        RolloutError::Controller(e)
    }
}

/// Failure to construct a worker from its factories.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerBuildError {
    Env(EnvError),
    Config(ConfigError),
    /// The controller runs a different hierarchy than the pool expects.
    Hierarchy {
        expected: HierarchyConfig,
        got: HierarchyConfig,
    },
}

impl fmt::Display for WorkerBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerBuildError::Env(e) => write!(f, "failed to build environment: {}", e),
            WorkerBuildError::Config(e) => write!(f, "failed to build controller: {}", e),
            WorkerBuildError::Hierarchy { expected, got } => write!(
                f,
                "controller runs periods {:?} on '{}', expected periods {:?} on '{}'",
                got.periods(),
                got.observation_key,
                expected.periods(),
                expected.observation_key
            ),
        }
    }
}

impl std::error::Error for WorkerBuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerBuildError::Env(e) => Some(e),
            WorkerBuildError::Config(e) => Some(e),
            WorkerBuildError::Hierarchy { .. } => None,
        }
    }
}

/// Environment + controller rollout loop.
pub struct RolloutWorker {
    worker_id: usize,
    env: Box<dyn Environment>,
    controller: HierarchyController,
    max_path_length: usize,
    recorder: SharedRecorder,
    metrics_prefix: String,
    staged: Option<ParameterSnapshot>,
    active_version: Option<u64>,
    replaced: Option<(Option<u64>, Vec<LevelWeights>)>,
    stats: WorkerStats,
}

impl RolloutWorker {
    /// Create a worker; episodes are capped at the controller's
    /// `max_path_length`.
    pub fn new(worker_id: usize, env: Box<dyn Environment>, controller: HierarchyController) -> Self {
        let max_path_length = controller.config().max_path_length;
        Self {
            worker_id,
            env,
            controller,
            max_path_length,
            recorder: Arc::new(NullRecorder),
            metrics_prefix: DEFAULT_METRICS_PREFIX.to_string(),
            staged: None,
            active_version: None,
            replaced: None,
            stats: WorkerStats::new(worker_id),
        }
    }

    /// Build a worker from factories.
    pub fn build(
        worker_id: usize,
        env_factory: &EnvFactory,
        controller_factory: &ControllerFactory,
    ) -> Result<Self, WorkerBuildError> {
        let env = env_factory(worker_id).map_err(WorkerBuildError::Env)?;
        let controller =
            controller_factory(worker_id, env.as_ref()).map_err(WorkerBuildError::Config)?;
        Ok(Self::new(worker_id, env, controller))
    }

    /// Fail unless the controller runs exactly `expected`.
    pub fn check_hierarchy(&self, expected: &HierarchyConfig) -> Result<(), WorkerBuildError> {
        let got = self.controller.config();
        if got != expected {
            return Err(WorkerBuildError::Hierarchy {
                expected: expected.clone(),
                got: got.clone(),
            });
        }
        Ok(())
    }

    /// Report return statistics to `recorder`.
    pub fn with_recorder(mut self, recorder: SharedRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    /// Prefix for recorded metric names.
    pub fn with_metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metrics_prefix = prefix.into();
        self
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Weights version in use.
    pub fn active_version(&self) -> Option<u64> {
        self.active_version
    }

    /// Lifetime statistics.
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn controller(&self) -> &HierarchyController {
        &self.controller
    }

    /// Check a snapshot and hold it for a later commit.
    pub fn stage(&mut self, snapshot: ParameterSnapshot) -> Result<(), ControllerError> {
        self.staged = None;
        self.controller.check_weights(&snapshot.levels)?;
        self.staged = Some(snapshot);
        Ok(())
    }

    /// Switch to the staged snapshot if it carries `version`.
    pub fn commit(&mut self, version: u64) -> Result<u64, RolloutError> {
        let snapshot = match self.staged.take() {
            Some(s) if s.version == version => s,
            _ => return Err(RolloutError::NotStaged { version }),
        };
        let previous = self.controller.get_weights()?;
        self.controller.set_weights(&snapshot.levels)?;
        self.replaced = Some((self.active_version, previous));
        self.active_version = Some(version);
        self.stats.weights_version = Some(version);
        Ok(version)
    }

    /// Undo the commit of `version`, returning to the weights and version it
    /// replaced. A worker not running `version` keeps what it has.
    pub fn rollback(&mut self, version: u64) -> Result<Option<u64>, RolloutError> {
        if self.active_version != Some(version) {
            return Ok(self.active_version);
        }
        let (previous_version, weights) = self
            .replaced
            .take()
            .ok_or(RolloutError::NothingToRollBack { version })?;
        self.controller.set_weights(&weights)?;
        self.active_version = previous_version;
        self.stats.weights_version = previous_version;
        Ok(previous_version)
    }

    /// Drop any staged snapshot.
    pub fn abort(&mut self) {
        self.staged = None;
    }

    /// Serve a request after checking its weights version.
    pub fn serve(&mut self, request: &CollectRequest) -> Result<Rollout, RolloutError> {
        if request.version != self.active_version {
            return Err(RolloutError::StaleWeights {
                expected: request.version,
                active: self.active_version,
            });
        }
        self.collect(
            request.min_steps,
            request.deterministic,
            request.keep_trajectories,
            request.render,
        )
    }

    /// Run whole episodes until at least `min_steps` primitive steps were
    /// taken.
    ///
    /// The episode in progress when the quota is reached always runs to
    /// `done` or `max_path_length`, so `total_steps` may overshoot.
    pub fn collect(
        &mut self,
        min_steps: usize,
        deterministic: bool,
        keep_trajectories: bool,
        render: bool,
    ) -> Result<Rollout, RolloutError> {
        self.stats.collects += 1;
        let mut rollout = Rollout::empty(self.worker_id);

        while rollout.total_steps < min_steps {
            let (trajectory, episode_return, steps) =
                self.run_episode(deterministic, keep_trajectories, render)?;
            rollout.total_steps += steps;
            rollout.returns.push(episode_return);
            rollout.trajectories.extend(trajectory);
            self.stats.record_episode(episode_return);
        }

        if !rollout.returns.is_empty() {
            let returns = rollout.return_stats();
            self.recorder
                .record(&format!("{}return_mean", self.metrics_prefix), returns.mean());
            self.recorder
                .record(&format!("{}return_std", self.metrics_prefix), returns.std());
        }

        log::debug!(
            "worker {} collected {} steps over {} episodes",
            self.worker_id,
            rollout.total_steps,
            rollout.num_episodes()
        );
        Ok(rollout)
    }

    fn run_episode(
        &mut self,
        deterministic: bool,
        keep: bool,
        render: bool,
    ) -> Result<(Option<Trajectory>, f32, usize), RolloutError> {
        let mut observation: Observation = self.env.reset()?;
        self.controller.reset();

        let mut trajectory = keep.then(|| Trajectory::with_capacity(self.worker_id, self.max_path_length));
        let mut episode_return = 0.0f32;
        let mut steps = 0usize;
        let mut terminal = false;

        for t in 0..self.max_path_length {
            let decision = self.controller.decide(&observation, t, deterministic)?;
            let result = self.env.step(&decision.primitive_action)?;
            if render {
                self.env.render()?;
            }

            episode_return += result.reward;
            steps += 1;
            self.stats.add_steps(1);
            if let Some(trajectory) = trajectory.as_mut() {
                trajectory.push(decision.into_step(&observation, result.reward));
            }

            observation = result.observation;
            if result.done {
                terminal = true;
                break;
            }
        }

        if let Some(trajectory) = trajectory.as_mut() {
            trajectory.finish(observation, terminal);
        }
        Ok((trajectory, episode_return, steps))
    }

    /// Serve pool commands until `Shutdown` or a closed channel.
    pub fn run(mut self, cmd_rx: Receiver<WorkerMsg>, reply_tx: Sender<WorkerReply>) {
        while let Ok(msg) = cmd_rx.recv() {
            let reply = match msg {
                WorkerMsg::Stage(snapshot) => WorkerReply::Staged(self.stage(snapshot)),
                WorkerMsg::Commit(version) => WorkerReply::Committed(self.commit(version)),
                WorkerMsg::Rollback(version) => WorkerReply::RolledBack(self.rollback(version)),
                WorkerMsg::Abort => {
                    self.abort();
                    WorkerReply::Aborted
                }
                WorkerMsg::Collect(request) => {
                    let result = self.serve(&request);
                    if let Err(e) = &result {
                        log::warn!("worker {} collect failed: {}", self.worker_id, e);
                    }
                    WorkerReply::Collected(result, self.stats.clone())
                }
                WorkerMsg::Shutdown => break,
            };
            if reply_tx.send(reply).is_err() {
                break;
            }
        }
        log::debug!("worker {} exiting", self.worker_id);
    }
}
