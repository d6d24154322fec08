//! Fixed-size pool of rollout worker threads.
//!
//! # Architecture
//!
//! The pool owns N worker threads, each with its own environment and
//! controller replica. It is the only sender on every request channel and
//! the only receiver on every reply channel, so all coordination is
//! pool-mediated.
//!
//! ```text
//!   set_weights(levels)                     collect(min, .., k)
//!   ───────────────────                     ───────────────────
//!   Stage ──▶ all workers                   Collect(ceil(min/k)) ──▶ workers 0..k
//!   ◀── Staged (all ok?)                    ◀── Collected, read in worker order
//!   yes: Commit(v) ──▶ all / ◀── Committed  concat trajectories, sum steps
//!   no:  Abort     ──▶ all / ◀── Aborted
//! ```

use super::worker::{
    CollectRequest, ControllerFactory, EnvFactory, Rollout, RolloutError, RolloutWorker,
    WorkerBuildError, DEFAULT_METRICS_PREFIX,
};
use crate::core::model_version::{broadcast_versions, SharedBroadcastVersions};
use crate::core::running_stats::RunningScalarStats;
use crate::core::trajectory::Trajectory;
use crate::core::weights::{LevelWeights, ParameterSnapshot};
use crate::hierarchy::{ConfigError, ControllerError, HierarchyConfig};
use crate::messages::{WorkerMsg, WorkerReply, WorkerStats};
use crate::metrics::SharedRecorder;
use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::thread::JoinHandle;

/// Worker pool failure.
#[derive(Debug)]
pub enum PoolError {
    /// Invalid pool configuration.
    Config(ConfigError),
    /// `workers_to_use` outside `1..=pool size`.
    InvalidWorkers { requested: usize, available: usize },
    /// No worker with this id.
    NoSuchWorker { worker_id: usize },
    /// A worker's environment or controller could not be built.
    Build {
        worker_id: usize,
        source: WorkerBuildError,
    },
    /// The OS refused to start a worker thread.
    Spawn { worker_id: usize, message: String },
    /// A worker thread is gone (it panicked or exited).
    Disconnected { worker_id: usize },
    /// A worker rejected a weight snapshot; no worker switched.
    Stage {
        worker_id: usize,
        source: ControllerError,
    },
    /// A worker failed to switch to a staged snapshot.
    Commit {
        worker_id: usize,
        source: RolloutError,
    },
    /// A worker failed during collection; the whole collect is discarded.
    Worker {
        worker_id: usize,
        source: RolloutError,
    },
    /// A worker answered with the wrong reply kind.
    UnexpectedReply { worker_id: usize },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Config(e) => write!(f, "invalid pool config: {}", e),
            PoolError::InvalidWorkers { requested, available } => write!(
                f,
                "workers_to_use must be in 1..={}, got {}",
                available, requested
            ),
            PoolError::NoSuchWorker { worker_id } => write!(f, "no worker {}", worker_id),
            PoolError::Build { worker_id, source } => {
                write!(f, "worker {}: {}", worker_id, source)
            }
            PoolError::Spawn { worker_id, message } => {
                write!(f, "failed to spawn worker {}: {}", worker_id, message)
            }
            PoolError::Disconnected { worker_id } => {
                write!(f, "worker {} disconnected", worker_id)
            }
            PoolError::Stage { worker_id, source } => {
                write!(f, "worker {} rejected weights: {}", worker_id, source)
            }
            PoolError::Commit { worker_id, source } => {
                write!(f, "worker {} failed to commit weights: {}", worker_id, source)
            }
            PoolError::Worker { worker_id, source } => {
                write!(f, "worker {} failed: {}", worker_id, source)
            }
            PoolError::UnexpectedReply { worker_id } => {
                write!(f, "worker {} sent an unexpected reply", worker_id)
            }
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::Config(e) => Some(e),
            PoolError::Build { source, .. } => Some(source),
            PoolError::Stage { source, .. } => Some(source),
            PoolError::Commit { source, .. } => Some(source),
            PoolError::Worker { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for PoolError {
    fn from(e: ConfigError) -> Self {
        PoolError::Config(e)
    }
}

/// Configuration for a worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads.
    pub num_workers: usize,
    /// Render every primitive step.
    pub render: bool,
    /// Prefix for the per-worker return metrics.
    pub metrics_prefix: String,
    /// Hierarchy every worker's controller must run, when set.
    pub hierarchy: Option<HierarchyConfig>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            render: false,
            metrics_prefix: DEFAULT_METRICS_PREFIX.to_string(),
            hierarchy: None,
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    pub fn with_render(mut self, render: bool) -> Self {
        self.render = render;
        self
    }

    pub fn with_metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metrics_prefix = prefix.into();
        self
    }

    /// Reject workers whose controller runs any other hierarchy.
    pub fn with_hierarchy(mut self, hierarchy: HierarchyConfig) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::InvalidCount {
                field: "num_workers",
                value: 0,
            });
        }
        if let Some(hierarchy) = &self.hierarchy {
            hierarchy.validate()?;
        }
        Ok(())
    }
}

/// Merged result of one pool-wide collect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolCollect {
    /// Trajectories in worker-index order, then completion order.
    pub trajectories: Vec<Trajectory>,
    /// Episode returns in the same order.
    pub returns: Vec<f32>,
    /// Primitive steps across all used workers.
    pub total_steps: usize,
    /// Steps taken by each used worker.
    pub worker_steps: Vec<usize>,
    /// Return statistics merged across the used workers.
    pub return_stats: RunningScalarStats,
}

impl PoolCollect {
    fn merge(rollouts: Vec<Rollout>) -> Self {
        let mut merged = Self::default();
        for rollout in rollouts {
            merged.total_steps += rollout.total_steps;
            merged.worker_steps.push(rollout.total_steps);
            merged.return_stats.merge(&rollout.return_stats());
            merged.trajectories.extend(rollout.trajectories);
            merged.returns.extend(rollout.returns);
        }
        merged
    }

    /// Mean episode return (0 when no episode completed).
    pub fn mean_return(&self) -> f64 {
        self.return_stats.mean()
    }
}

/// Handle to one worker thread.
struct WorkerHandle {
    worker_id: usize,
    cmd_tx: Sender<WorkerMsg>,
    reply_rx: Receiver<WorkerReply>,
    thread: Option<JoinHandle<()>>,
    stats: WorkerStats,
}

impl WorkerHandle {
    fn spawn(
        worker_id: usize,
        config: &WorkerPoolConfig,
        env_factory: EnvFactory,
        controller_factory: ControllerFactory,
        recorder: SharedRecorder,
    ) -> Result<Self, PoolError> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::bounded(1);
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let prefix = config.metrics_prefix.clone();
        let expected = config.hierarchy.clone();

        let thread = std::thread::Builder::new()
            .name(format!("rollout-worker-{}", worker_id))
            .spawn(move || {
                let built = RolloutWorker::build(worker_id, &env_factory, &controller_factory)
                    .and_then(|worker| match &expected {
                        Some(hierarchy) => worker.check_hierarchy(hierarchy).map(|()| worker),
                        None => Ok(worker),
                    });
                match built {
                    Ok(worker) => {
                        let _ = ready_tx.send(Ok(()));
                        worker
                            .with_recorder(recorder)
                            .with_metrics_prefix(prefix)
                            .run(cmd_rx, reply_tx);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| PoolError::Spawn {
                worker_id,
                message: e.to_string(),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                let _ = thread.join();
                return Err(PoolError::Build { worker_id, source });
            }
            Err(_) => {
                let _ = thread.join();
                return Err(PoolError::Disconnected { worker_id });
            }
        }

        log::debug!("spawned rollout worker {}", worker_id);
        Ok(Self {
            worker_id,
            cmd_tx,
            reply_rx,
            thread: Some(thread),
            stats: WorkerStats::new(worker_id),
        })
    }

    fn send(&self, msg: WorkerMsg) -> Result<(), PoolError> {
        self.cmd_tx.send(msg).map_err(|_| PoolError::Disconnected {
            worker_id: self.worker_id,
        })
    }

    fn recv(&self) -> Result<WorkerReply, PoolError> {
        self.reply_rx.recv().map_err(|_| PoolError::Disconnected {
            worker_id: self.worker_id,
        })
    }

    fn request_stop(&self) {
        let _ = self.cmd_tx.try_send(WorkerMsg::Shutdown);
    }

    fn shutdown(&mut self) {
        self.request_stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("rollout worker {} panicked", self.worker_id);
            }
        }
    }
}

/// Pool of rollout workers with synchronous broadcast and collect.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    workers: Vec<WorkerHandle>,
    env_factory: EnvFactory,
    controller_factory: ControllerFactory,
    recorder: SharedRecorder,
    versions: SharedBroadcastVersions,
    committed: Option<ParameterSnapshot>,
}

impl WorkerPool {
    /// Start `config.num_workers` threads and wait until every worker has
    /// built its environment and controller.
    pub fn spawn(
        config: WorkerPoolConfig,
        env_factory: EnvFactory,
        controller_factory: ControllerFactory,
        recorder: SharedRecorder,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let mut pool = Self {
            workers: Vec::with_capacity(config.num_workers),
            config,
            env_factory,
            controller_factory,
            recorder,
            versions: broadcast_versions(),
            committed: None,
        };
        for worker_id in 0..pool.config.num_workers {
            let handle = pool.spawn_worker(worker_id)?;
            pool.workers.push(handle);
        }
        log::info!("worker pool started with {} workers", pool.workers.len());
        Ok(pool)
    }

    fn spawn_worker(&self, worker_id: usize) -> Result<WorkerHandle, PoolError> {
        WorkerHandle::spawn(
            worker_id,
            &self.config,
            self.env_factory.clone(),
            self.controller_factory.clone(),
            self.recorder.clone(),
        )
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Version of the last committed broadcast.
    pub fn committed_version(&self) -> Option<u64> {
        self.versions.last_committed()
    }

    /// Version of the last broadcast attempt, committed or aborted.
    pub fn issued_version(&self) -> Option<u64> {
        self.versions.last_issued()
    }

    /// Worker statistics as of each worker's last collect reply.
    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        self.workers.iter().map(|w| w.stats.clone()).collect()
    }

    /// Broadcast a full weight snapshot to every worker.
    ///
    /// Two-phase: every worker first checks and stages a private copy; only
    /// when all succeed is the switch committed. On a rejection at staging
    /// nobody switches; on a failure at commit the workers that did switch
    /// are rolled back. Either way every worker ends on the previously
    /// committed version and the call fails.
    pub fn set_weights(&mut self, levels: Vec<LevelWeights>) -> Result<u64, PoolError> {
        let version = self.versions.issue();
        let snapshot = ParameterSnapshot::new(version, levels);

        let mut errors = Vec::new();
        let mut staged = Vec::with_capacity(self.workers.len());
        let mut sent = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            match worker.send(WorkerMsg::Stage(snapshot.clone())) {
                Ok(()) => sent.push(worker.worker_id),
                Err(e) => errors.push(e),
            }
        }
        for &id in &sent {
            let worker = &self.workers[id];
            match worker.recv() {
                Ok(WorkerReply::Staged(Ok(()))) => staged.push(id),
                Ok(WorkerReply::Staged(Err(source))) => {
                    errors.push(PoolError::Stage { worker_id: id, source })
                }
                Ok(_) => errors.push(PoolError::UnexpectedReply { worker_id: id }),
                Err(e) => errors.push(e),
            }
        }

        if let Some(error) = lowest_worker_error(errors) {
            for &id in &staged {
                let worker = &self.workers[id];
                if worker.send(WorkerMsg::Abort).is_ok() {
                    let _ = worker.recv();
                }
            }
            log::warn!("weights version {} aborted: {}", version, error);
            return Err(error);
        }

        let mut errors = Vec::new();
        let mut sent = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            match worker.send(WorkerMsg::Commit(version)) {
                Ok(()) => sent.push(worker.worker_id),
                Err(e) => errors.push(e),
            }
        }
        let mut switched = Vec::with_capacity(sent.len());
        for &id in &sent {
            match self.workers[id].recv() {
                Ok(WorkerReply::Committed(Ok(_))) => switched.push(id),
                Ok(WorkerReply::Committed(Err(source))) => {
                    errors.push(PoolError::Commit { worker_id: id, source })
                }
                Ok(_) => errors.push(PoolError::UnexpectedReply { worker_id: id }),
                Err(e) => errors.push(e),
            }
        }

        if let Some(error) = lowest_worker_error(errors) {
            self.roll_back(version, &switched);
            log::warn!("weights version {} rolled back: {}", version, error);
            return Err(error);
        }

        for worker in &mut self.workers {
            worker.stats.weights_version = Some(version);
        }
        log::debug!(
            "committed weights version {} ({} bytes)",
            version,
            snapshot.total_bytes()
        );
        self.versions.mark_committed(version);
        self.committed = Some(snapshot);
        Ok(version)
    }

    /// Return the workers in `switched` to the weights they ran before
    /// `version`. Every reply is drained so the channels stay in step.
    fn roll_back(&self, version: u64, switched: &[usize]) {
        let mut sent = Vec::with_capacity(switched.len());
        for &id in switched {
            match self.workers[id].send(WorkerMsg::Rollback(version)) {
                Ok(()) => sent.push(id),
                Err(e) => log::error!("rollback of version {}: {}", version, e),
            }
        }
        for id in sent {
            match self.workers[id].recv() {
                Ok(WorkerReply::RolledBack(Ok(_))) => {}
                Ok(WorkerReply::RolledBack(Err(e))) => {
                    log::error!("worker {} failed to roll back version {}: {}", id, version, e)
                }
                Ok(_) => log::error!("worker {} sent an unexpected reply to rollback", id),
                Err(e) => log::error!("rollback of version {}: {}", version, e),
            }
        }
    }

    /// Collect at least `min_steps_total` primitive steps from workers
    /// `0..workers_to_use`.
    ///
    /// Each used worker gets a quota of `ceil(min_steps_total / workers_to_use)`.
    /// Replies are read in worker-index order; all of them are drained even
    /// after a failure, and any failure fails the whole call.
    pub fn collect(
        &mut self,
        min_steps_total: usize,
        deterministic: bool,
        keep_trajectories: bool,
        workers_to_use: usize,
    ) -> Result<PoolCollect, PoolError> {
        if workers_to_use == 0 || workers_to_use > self.workers.len() {
            return Err(PoolError::InvalidWorkers {
                requested: workers_to_use,
                available: self.workers.len(),
            });
        }

        let per_worker = min_steps_total.div_ceil(workers_to_use);
        let request = CollectRequest::new(per_worker)
            .with_deterministic(deterministic)
            .with_keep_trajectories(keep_trajectories)
            .with_render(self.config.render)
            .with_version(self.committed_version());

        let mut errors = Vec::new();
        let mut sent = Vec::with_capacity(workers_to_use);
        for worker in &self.workers[..workers_to_use] {
            match worker.send(WorkerMsg::Collect(request.clone())) {
                Ok(()) => sent.push(worker.worker_id),
                Err(e) => errors.push(e),
            }
        }

        let mut rollouts = Vec::with_capacity(workers_to_use);
        for id in sent {
            let worker = &mut self.workers[id];
            match worker.recv() {
                Ok(WorkerReply::Collected(result, stats)) => {
                    worker.stats = stats;
                    match result {
                        Ok(rollout) => rollouts.push(rollout),
                        Err(source) => errors.push(PoolError::Worker { worker_id: id, source }),
                    }
                }
                Ok(_) => errors.push(PoolError::UnexpectedReply { worker_id: id }),
                Err(e) => errors.push(e),
            }
        }

        if let Some(error) = lowest_worker_error(errors) {
            log::warn!("collect failed: {}", error);
            return Err(error);
        }

        let merged = PoolCollect::merge(rollouts);
        log::debug!(
            "collected {} steps, {} episodes from {} workers",
            merged.total_steps,
            merged.returns.len(),
            workers_to_use
        );
        Ok(merged)
    }

    /// Replace a worker with a freshly built one running the last committed
    /// weights.
    pub fn respawn(&mut self, worker_id: usize) -> Result<(), PoolError> {
        if worker_id >= self.workers.len() {
            return Err(PoolError::NoSuchWorker { worker_id });
        }
        self.workers[worker_id].shutdown();

        let mut handle = self.spawn_worker(worker_id)?;
        if let Some(snapshot) = &self.committed {
            handle.send(WorkerMsg::Stage(snapshot.clone()))?;
            match handle.recv()? {
                WorkerReply::Staged(Ok(())) => {}
                WorkerReply::Staged(Err(source)) => {
                    return Err(PoolError::Stage { worker_id, source })
                }
                _ => return Err(PoolError::UnexpectedReply { worker_id }),
            }
            handle.send(WorkerMsg::Commit(snapshot.version))?;
            match handle.recv()? {
                WorkerReply::Committed(Ok(version)) => handle.stats.weights_version = Some(version),
                WorkerReply::Committed(Err(source)) => {
                    return Err(PoolError::Commit { worker_id, source })
                }
                _ => return Err(PoolError::UnexpectedReply { worker_id }),
            }
        }

        log::info!("respawned rollout worker {}", worker_id);
        self.workers[worker_id] = handle;
        Ok(())
    }

    /// Stop and join every worker thread.
    pub fn shutdown(&mut self) {
        for worker in &self.workers {
            worker.request_stop();
        }
        for worker in &mut self.workers {
            worker.shutdown();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lowest_worker_error(errors: Vec<PoolError>) -> Option<PoolError> {
    errors.into_iter().min_by_key(|e| match e {
        PoolError::Disconnected { worker_id }
        | PoolError::Stage { worker_id, .. }
        | PoolError::Commit { worker_id, .. }
        | PoolError::Worker { worker_id, .. }
        | PoolError::UnexpectedReply { worker_id } => *worker_id,
        _ => usize::MAX,
    })
}
