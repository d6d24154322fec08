//! Behavioral tests for the experience stores.
//!
//! # Test Organization
//!
//! - `step_replay_tests`: ring eviction, sampling, path layout checks
//! - `hierarchical_replay_tests`: per-level relabeling on insert
//! - `concurrency_tests`: concurrent inserts and thread bounds

use std::sync::Arc;
use std::thread;

use proptest::prelude::*;

use super::*;
use crate::core::observation::Observation;
use crate::core::trajectory::{Step, Trajectory};
use crate::hierarchy::HierarchyConfig;
use crate::relabel::{RelabelError, Relabeler};

fn obs(x: f32) -> Observation {
    Observation::with_field("observation", vec![x])
}

/// Path over states `start, start+1, ...` with `n` steps.
fn line_path(start: f32, n: usize) -> (Vec<Observation>, Vec<Vec<f32>>, Vec<f32>) {
    let observations = (0..=n).map(|t| obs(start + t as f32)).collect();
    let actions = (0..n).map(|t| vec![t as f32]).collect();
    let rewards = (0..n).map(|t| start + t as f32).collect();
    (observations, actions, rewards)
}

fn buffer(capacity: usize) -> StepReplayBuffer {
    match StepReplayBuffer::new(capacity) {
        Ok(buffer) => buffer,
        Err(e) => panic!("buffer: {}", e),
    }
}

/// Two-level trajectory over states `0, 1, 2, ...`; the top level emits
/// `goals[t]`, the base level acts `0.5`, every reward is 1.
fn two_level_path(goals: &[f32]) -> Trajectory {
    let mut traj = Trajectory::new(0);
    for (t, goal) in goals.iter().enumerate() {
        traj.push(Step {
            observation: obs(t as f32).with_goal(Some(vec![*goal])),
            level_actions: vec![vec![0.5], vec![*goal]],
            level_goals: vec![Some(vec![*goal]), None],
            reward: 1.0,
        });
    }
    traj.finish(obs(goals.len() as f32), false);
    traj
}

fn two_level_config() -> HierarchyConfig {
    HierarchyConfig::new()
        .with_num_levels(2)
        .with_time_skip(2)
        .with_max_path_length(10)
}

mod step_replay_tests {
    use super::*;

    #[test]
    fn test_insert_builds_transitions() {
        let buf = buffer(10);
        let (o, a, r) = line_path(0.0, 3);
        assert_eq!(buf.insert_trajectory(&o, &a, &r), Ok(3));

        let contents = buf.to_vec();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1].observation, obs(1.0));
        assert_eq!(contents[1].next_observation, obs(2.0));
        assert_eq!(contents[2].action, vec![2.0]);
        assert_eq!(contents[2].reward, 2.0);
        assert_eq!(buf.total_inserted(), 3);
    }

    #[test]
    fn test_oldest_evicted_first() {
        let buf = buffer(4);
        let (o, a, r) = line_path(0.0, 3);
        buf.insert_trajectory(&o, &a, &r).unwrap();
        let (o, a, r) = line_path(100.0, 3);
        buf.insert_trajectory(&o, &a, &r).unwrap();

        assert_eq!(buf.len(), 4);
        assert_eq!(buf.total_inserted(), 6);
        let rewards: Vec<f32> = buf.to_vec().iter().map(|t| t.reward).collect();
        assert_eq!(rewards, vec![2.0, 100.0, 101.0, 102.0]);
        assert_eq!(buf.utilization(), 1.0);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let buf = buffer(4);
        let (o, a, r) = line_path(0.0, 3);
        assert_eq!(
            buf.insert_trajectory(&o[..3], &a, &r),
            Err(StoreError::LengthMismatch {
                observations: 3,
                actions: 3,
                rewards: 3
            })
        );
        assert!(buf.insert_trajectory(&o, &a[..2], &r).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            StepReplayBuffer::new(0),
            Err(StoreError::ZeroCapacity)
        ));
    }

    #[test]
    fn test_sample_from_contents() {
        let buf = buffer(8);
        assert!(buf.sample(4).is_none());

        let (o, a, r) = line_path(10.0, 5);
        buf.insert_trajectory(&o, &a, &r).unwrap();
        assert!(buf.sample(0).is_none());

        let batch = buf.sample(32).unwrap();
        assert_eq!(batch.len(), 32);
        assert!(batch.iter().all(|t| t.reward >= 10.0 && t.reward < 15.0));
    }

    #[test]
    fn test_clear() {
        let buf = buffer(8);
        let (o, a, r) = line_path(0.0, 5);
        buf.insert_trajectory(&o, &a, &r).unwrap();
        buf.clear();
        assert!(buf.is_empty());
        assert!(buf.to_vec().is_empty());
        assert_eq!(buf.total_inserted(), 5);
    }

    #[test]
    fn test_insert_empty_path() {
        let buf = buffer(2);
        assert_eq!(buf.insert_trajectory(&[obs(0.0)], &[], &[]), Ok(0));
        assert!(buf.is_empty());
    }

    proptest! {
        #[test]
        fn prop_ring_never_exceeds_capacity(
            capacity in 1usize..32,
            lengths in proptest::collection::vec(0usize..20, 1..10),
        ) {
            let buf = buffer(capacity);
            let mut total = 0;
            for (i, n) in lengths.iter().enumerate() {
                let (o, a, r) = line_path(i as f32 * 100.0, *n);
                buf.insert_trajectory(&o, &a, &r).unwrap();
                total += n;
                prop_assert!(buf.len() <= capacity);
                prop_assert_eq!(buf.len(), total.min(capacity));
            }
            prop_assert_eq!(buf.to_vec().len(), buf.len());
        }
    }
}

mod hierarchical_replay_tests {
    use super::*;

    #[test]
    fn test_insert_path_relabels_each_level() {
        let replay =
            HierarchicalReplay::new(&two_level_config(), 100, Relabeler::for_hierarchy(2, 2.0))
                .unwrap();
        assert_eq!(replay.insert_path(&two_level_path(&[3.0, 3.0, 4.0])), Ok(3));
        assert_eq!(replay.sizes(), vec![3, 3]);

        let base = replay.level(0).unwrap().to_vec();
        assert!(base.iter().all(|t| t.reward == 2.0));
        assert!(base.iter().all(|t| t.action == vec![0.5]));
        assert_eq!(base[0].observation.goal, Some(vec![3.0]));

        // Period 2: goal 3 anchored at state 0 for t=0,1; goal 4 at state 2.
        let top = replay.level(1).unwrap().to_vec();
        let rewards: Vec<f32> = top.iter().map(|t| t.reward).collect();
        assert_eq!(rewards, vec![-2.0, -1.0, -3.0]);
        assert!(top.iter().all(|t| t.observation.goal.is_none()));
        assert_eq!(top[2].next_observation.field("observation"), Some(&[3.0][..]));
    }

    #[test]
    fn test_insert_paths_counts_steps() {
        let replay =
            HierarchicalReplay::new(&two_level_config(), 4, Relabeler::for_hierarchy(2, 1.0))
                .unwrap();
        let paths = vec![two_level_path(&[1.0; 3]), two_level_path(&[1.0; 3])];
        assert_eq!(replay.insert_paths(&paths), Ok(6));
        assert_eq!(replay.sizes(), vec![4, 4]);
        assert_eq!(replay.level(1).unwrap().total_inserted(), 6);
    }

    #[test]
    fn test_empty_path_ignored() {
        let replay =
            HierarchicalReplay::new(&two_level_config(), 4, Relabeler::for_hierarchy(2, 1.0))
                .unwrap();
        assert_eq!(replay.insert_path(&Trajectory::new(0)), Ok(0));
        assert_eq!(replay.sizes(), vec![0, 0]);
    }

    #[test]
    fn test_level_count_mismatch() {
        assert!(matches!(
            HierarchicalReplay::new(&two_level_config(), 4, Relabeler::for_hierarchy(3, 1.0)),
            Err(StoreError::LevelCount { expected: 2, got: 3 })
        ));

        let flat = HierarchyConfig::new().with_num_levels(1);
        let replay = HierarchicalReplay::new(&flat, 4, Relabeler::for_hierarchy(1, 1.0)).unwrap();
        assert_eq!(
            replay.insert_path(&two_level_path(&[1.0])),
            Err(StoreError::LevelCount {
                expected: 1,
                got: 2
            })
        );
    }

    #[test]
    fn test_relabel_failure_inserts_nothing() {
        let replay = HierarchicalReplay::new(
            &two_level_config(),
            4,
            Relabeler::for_hierarchy(2, 1.0).with_observation_key("position"),
        )
        .unwrap();
        let err = replay.insert_path(&two_level_path(&[1.0])).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Relabel(RelabelError::MissingField { .. })
        ));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(replay.sizes(), vec![0, 0]);
    }
}

mod concurrency_tests {
    use super::*;

    #[test]
    fn test_concurrent_inserts() {
        let buf = Arc::new(buffer(1000));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let buf = Arc::clone(&buf);
                thread::spawn(move || {
                    for _ in 0..10 {
                        let (o, a, r) = line_path(i as f32, 5);
                        buf.insert_trajectory(&o, &a, &r).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(buf.len(), 200);
        assert_eq!(buf.total_inserted(), 200);
    }

    #[test]
    fn test_bounds() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StepReplayBuffer>();
        assert_send_sync::<HierarchicalReplay>();
    }
}
