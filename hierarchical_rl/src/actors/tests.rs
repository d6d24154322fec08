//! Behavioral tests for the worker pool.
//!
//! # Test Organization
//!
//! - `collect_tests`: quota split, fan-in order, step accounting
//! - `failure_tests`: a failing or crashed worker fails the whole call
//! - `weights_tests`: two-phase broadcast, staleness, respawn

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::*;
use crate::environment::{EnvError, Environment};
use crate::core::weights::LevelWeights;
use crate::hierarchy::{ConfigError, ControllerError, HierarchyController};
use crate::metrics::{MemoryRecorder, NullRecorder, SharedRecorder};
use crate::test_utils::{
    controller_with_top, counting_controller, offset_weights, CounterEnv, CountingPolicy,
};

fn env_factory<F>(make: F) -> EnvFactory
where
    F: Fn(usize) -> CounterEnv + Send + Sync + 'static,
{
    Arc::new(move |id: usize| -> Result<Box<dyn Environment>, EnvError> {
        Ok(Box::new(make(id)))
    })
}

fn controller_factory(num_levels: usize, time_skip: usize, max_len: usize) -> ControllerFactory {
    Arc::new(
        move |_: usize, _: &dyn Environment| -> Result<HierarchyController, ConfigError> {
            Ok(counting_controller(num_levels, time_skip, max_len))
        },
    )
}

fn pool_with(
    num_workers: usize,
    env: EnvFactory,
    controller: ControllerFactory,
    recorder: SharedRecorder,
) -> WorkerPool {
    match WorkerPool::spawn(WorkerPoolConfig::new(num_workers), env, controller, recorder) {
        Ok(pool) => pool,
        Err(e) => panic!("pool failed to start: {}", e),
    }
}

fn pool(num_workers: usize, num_levels: usize) -> WorkerPool {
    pool_with(
        num_workers,
        env_factory(|_| CounterEnv::new()),
        controller_factory(num_levels, 10, 20),
        Arc::new(NullRecorder),
    )
}

mod collect_tests {
    use super::*;

    #[test]
    fn test_two_of_four_workers_ordered_by_worker_id() {
        let mut pool = pool(4, 1);
        let result = pool.collect(100, false, true, 2).unwrap();

        // Quota 50 per worker, episodes of 20 steps: 3 episodes each.
        assert_eq!(result.worker_steps, vec![60, 60]);
        assert_eq!(result.total_steps, 120);
        assert!(result.total_steps >= 100);
        let ids: Vec<usize> = result.trajectories.iter().map(|t| t.worker_id).collect();
        assert_eq!(ids, vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(result.returns.len(), 6);

        let stats = pool.worker_stats();
        assert_eq!(stats[0].steps, 60);
        assert_eq!(stats[1].steps, 60);
        assert_eq!(stats[2].steps, 0);
        assert_eq!(stats[3].collects, 0);
    }

    #[test]
    fn test_quota_rounds_up() {
        let mut pool = pool_with(
            3,
            env_factory(|_| CounterEnv::new().with_episode_len(1)),
            controller_factory(1, 10, 20),
            Arc::new(NullRecorder),
        );
        let result = pool.collect(10, false, true, 3).unwrap();
        // ceil(10 / 3) = 4 one-step episodes per worker.
        assert_eq!(result.worker_steps, vec![4, 4, 4]);
        assert_eq!(result.trajectories.len(), 12);
    }

    #[test]
    fn test_without_keep_returns_only_returns() {
        let mut pool = pool(4, 2);
        let result = pool.collect(40, true, false, 4).unwrap();
        assert!(result.trajectories.is_empty());
        assert_eq!(result.returns, vec![20.0; 4]);
        assert_eq!(result.total_steps, 80);
        assert_eq!(result.mean_return(), 20.0);
    }

    #[test]
    fn test_return_stats_merged_across_workers() {
        let mut pool = pool_with(
            2,
            env_factory(|id| CounterEnv::new().with_episode_len(if id == 0 { 5 } else { 10 })),
            controller_factory(1, 10, 20),
            Arc::new(NullRecorder),
        );
        let result = pool.collect(40, false, true, 2).unwrap();
        assert_eq!(result.returns, vec![5.0, 5.0, 5.0, 5.0, 10.0, 10.0]);

        let stats = &result.return_stats;
        assert_eq!(stats.count(), 6);
        assert!((result.mean_return() - 40.0 / 6.0).abs() < 1e-9);
        let variance = (4.0 * (5.0 - 40.0 / 6.0_f64).powi(2)
            + 2.0 * (10.0 - 40.0 / 6.0_f64).powi(2))
            / 6.0;
        assert!((stats.std() - variance.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_zero_steps() {
        let mut pool = pool(2, 1);
        let result = pool.collect(0, false, true, 2).unwrap();
        assert_eq!(result.total_steps, 0);
        assert!(result.returns.is_empty());
        assert_eq!(result.mean_return(), 0.0);
    }

    #[test]
    fn test_invalid_workers_to_use() {
        let mut pool = pool(4, 1);
        assert!(matches!(
            pool.collect(10, false, true, 0),
            Err(PoolError::InvalidWorkers { requested: 0, available: 4 })
        ));
        assert!(matches!(
            pool.collect(10, false, true, 5),
            Err(PoolError::InvalidWorkers { requested: 5, available: 4 })
        ));
    }

    #[test]
    fn test_workers_record_return_metrics() {
        let recorder = Arc::new(MemoryRecorder::new());
        let mut pool = pool_with(
            3,
            env_factory(|_| CounterEnv::new()),
            controller_factory(1, 10, 20),
            recorder.clone(),
        );
        pool.collect(30, false, false, 3).unwrap();
        assert_eq!(recorder.values("sampler/return_mean"), vec![20.0; 3]);
        assert_eq!(recorder.values("sampler/return_std").len(), 3);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = WorkerPool::spawn(
            WorkerPoolConfig::new(0),
            env_factory(|_| CounterEnv::new()),
            controller_factory(1, 10, 20),
            Arc::new(NullRecorder),
        );
        assert!(matches!(result.err(), Some(PoolError::Config(_))));
    }
}

mod failure_tests {
    use super::*;

    #[test]
    fn test_failing_worker_fails_whole_collect() {
        let mut pool = pool_with(
            4,
            env_factory(|id| {
                let env = CounterEnv::new();
                if id == 2 {
                    env.failing_on_step(5)
                } else {
                    env
                }
            }),
            controller_factory(1, 10, 20),
            Arc::new(NullRecorder),
        );

        let err = pool.collect(100, false, true, 4).unwrap_err();
        assert!(matches!(
            err,
            PoolError::Worker {
                worker_id: 2,
                source: RolloutError::Env(EnvError::Backend(_))
            }
        ));

        // Every reply was drained, so the pool stays usable.
        let result = pool.collect(40, false, true, 2).unwrap();
        assert_eq!(result.total_steps, 40);
    }

    #[test]
    fn test_lowest_failing_worker_reported() {
        let mut pool = pool_with(
            4,
            env_factory(|id| {
                let env = CounterEnv::new();
                if id == 1 || id == 3 {
                    env.failing_on_step(0)
                } else {
                    env
                }
            }),
            controller_factory(1, 10, 20),
            Arc::new(NullRecorder),
        );
        assert!(matches!(
            pool.collect(8, false, true, 4),
            Err(PoolError::Worker { worker_id: 1, .. })
        ));
    }

    #[test]
    fn test_build_failure_reported() {
        let env: EnvFactory = Arc::new(|id: usize| -> Result<Box<dyn Environment>, EnvError> {
            if id == 1 {
                Err(EnvError::Backend("no display".to_string()))
            } else {
                Ok(Box::new(CounterEnv::new()))
            }
        });
        let result = WorkerPool::spawn(
            WorkerPoolConfig::new(2),
            env,
            controller_factory(1, 10, 20),
            Arc::new(NullRecorder),
        );
        assert!(matches!(
            result.err(),
            Some(PoolError::Build {
                worker_id: 1,
                source: WorkerBuildError::Env(_)
            })
        ));
    }

    #[test]
    fn test_crashed_worker_respawned() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let mut pool = pool_with(
            2,
            env_factory(move |id| {
                let env = CounterEnv::new();
                if id == 1 && counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    env.panicking_on_step(0)
                } else {
                    env
                }
            }),
            controller_factory(1, 10, 20),
            Arc::new(NullRecorder),
        );

        assert!(matches!(
            pool.collect(4, false, true, 2),
            Err(PoolError::Disconnected { worker_id: 1 })
        ));

        pool.respawn(1).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        let result = pool.collect(4, false, true, 2).unwrap();
        assert_eq!(result.worker_steps, vec![20, 20]);
    }
}

mod weights_tests {
    use super::*;

    fn first_actions(result: &PoolCollect) -> Vec<f32> {
        result
            .trajectories
            .iter()
            .flat_map(|t| t.primitive_actions().into_iter().map(|a| a[0]))
            .collect()
    }

    #[test]
    fn test_no_staleness_after_set_weights() {
        let mut pool = pool(4, 2);

        let v1 = pool.set_weights(offset_weights(2, 100.0)).unwrap();
        assert_eq!(pool.committed_version(), Some(v1));
        let result = pool.collect(40, true, true, 4).unwrap();
        assert!(first_actions(&result).iter().all(|&a| a > 100.0 && a < 1000.0));

        let v2 = pool.set_weights(offset_weights(2, 1000.0)).unwrap();
        assert!(v2 > v1);
        let result = pool.collect(40, true, true, 4).unwrap();
        assert!(first_actions(&result).iter().all(|&a| a > 1000.0));
        assert!(pool
            .worker_stats()
            .iter()
            .all(|s| s.weights_version == Some(v2)));
    }

    #[test]
    fn test_one_rejecting_worker_aborts_broadcast() {
        let mut pool = pool_with(
            3,
            env_factory(|_| CounterEnv::new()),
            Arc::new(
                |id: usize, _: &dyn Environment| -> Result<HierarchyController, ConfigError> {
                    Ok(counting_controller(if id == 1 { 1 } else { 2 }, 10, 20))
                },
            ),
            Arc::new(NullRecorder),
        );

        let err = pool.set_weights(offset_weights(2, 5.0)).unwrap_err();
        assert!(matches!(
            err,
            PoolError::Stage {
                worker_id: 1,
                source: ControllerError::LevelCount { expected: 1, got: 2 }
            }
        ));
        assert_eq!(pool.committed_version(), None);

        // Nobody switched: requests for the initial weights still succeed and
        // the first action comes from the zero offset.
        let result = pool.collect(3, true, true, 3).unwrap();
        for traj in &result.trajectories {
            assert_eq!(traj.primitive_actions()[0], &[1.0][..]);
        }
    }

    /// Worker `failing` accepts the snapshot at staging but fails to load it.
    fn pool_failing_commit(failing: usize, panic: bool) -> WorkerPool {
        pool_with(
            3,
            env_factory(|_| CounterEnv::new()),
            Arc::new(
                move |id: usize, _: &dyn Environment| -> Result<HierarchyController, ConfigError> {
                    if id != failing {
                        return Ok(counting_controller(2, 10, 20));
                    }
                    let top = CountingPolicy::new(1, 0, 1);
                    let top = if panic {
                        top.panicking_on_set_weights()
                    } else {
                        top.rejecting_set_weights()
                    };
                    Ok(controller_with_top(top, 10, 20))
                },
            ),
            Arc::new(NullRecorder),
        )
    }

    #[test]
    fn test_failed_commit_rolls_back_every_worker() {
        let mut pool = pool_failing_commit(1, false);

        let err = pool.set_weights(offset_weights(2, 100.0)).unwrap_err();
        assert!(matches!(err, PoolError::Commit { worker_id: 1, .. }));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(pool.committed_version(), None);
        assert_eq!(pool.issued_version(), Some(1));

        // Every worker is back on its initial weights and serves requests
        // for them.
        let result = pool.collect(3, true, true, 3).unwrap();
        assert_eq!(result.trajectories.len(), 3);
        assert!(first_actions(&result).iter().all(|&a| a < 100.0));
        assert!(pool.worker_stats().iter().all(|s| s.weights_version.is_none()));
    }

    #[test]
    fn test_worker_lost_during_commit_leaves_channels_in_step() {
        let mut pool = pool_failing_commit(2, true);

        let err = pool.set_weights(offset_weights(2, 100.0)).unwrap_err();
        assert!(matches!(err, PoolError::Disconnected { worker_id: 2 }));
        assert_eq!(pool.committed_version(), None);

        // The surviving workers answer the next request with a fresh reply,
        // not a leftover from the broadcast.
        let result = pool.collect(2, true, true, 2).unwrap();
        assert_eq!(result.worker_steps, vec![20, 20]);
        assert!(first_actions(&result).iter().all(|&a| a < 100.0));
    }

    #[test]
    fn test_undecodable_blob_keeps_previous_version() {
        let mut pool = pool(2, 2);
        let v1 = pool.set_weights(offset_weights(2, 10.0)).unwrap();

        let mut bad = offset_weights(2, 10_000.0);
        bad[0] = LevelWeights::from_bytes(vec![0xff]);
        assert!(matches!(
            pool.set_weights(bad),
            Err(PoolError::Stage { worker_id: 0, .. })
        ));
        assert_eq!(pool.committed_version(), Some(v1));
        // The aborted broadcast spent its version.
        assert_eq!(pool.issued_version(), Some(v1 + 1));

        let result = pool.collect(2, true, true, 2).unwrap();
        assert!(first_actions(&result).iter().all(|&a| a > 10.0 && a < 10_000.0));
        assert!(pool.worker_stats().iter().all(|s| s.weights_version == Some(v1)));

        assert_eq!(pool.set_weights(offset_weights(2, 10.0)).unwrap(), v1 + 2);
    }

    #[test]
    fn test_respawn_restores_committed_weights() {
        let mut pool = pool(3, 2);
        let version = pool.set_weights(offset_weights(2, 500.0)).unwrap();

        pool.respawn(2).unwrap();
        assert_eq!(pool.worker_stats()[2].weights_version, Some(version));

        let result = pool.collect(3, true, true, 3).unwrap();
        assert!(first_actions(&result).iter().all(|&a| a > 500.0));
        assert!(matches!(pool.respawn(9), Err(PoolError::NoSuchWorker { worker_id: 9 })));
    }
}
