//! Rollout-to-learner flow: write an episode timestep by timestep,
//! insert it into the replay buffer, then sample a minibatch.
use epibatch_core::{
    compile, Dtype, EpisodeBatch, EpisodeReplayBuffer, FieldSpec, OneHot, Preprocess,
    ReplayBufferConfig, Value,
};
use ndarray::{arr1, arr2};
use std::collections::BTreeMap;
use std::sync::Arc;

const HORIZON: usize = 5;
const CAPACITY: usize = 4;

fn scheme() -> Arc<epibatch_core::CompiledScheme> {
    let fields = vec![
        FieldSpec::new("state", &[3]),
        FieldSpec::new("actions", &[1]).group("agents").dtype(Dtype::I64),
    ];
    let mut groups = BTreeMap::new();
    groups.insert("agents".to_string(), 2);
    let preprocess = vec![Preprocess::new(
        "actions",
        "actions_onehot",
        Box::new(OneHot::new(2)),
    )];
    Arc::new(compile(&fields, &groups, preprocess).unwrap())
}

/// One rollout: three filled timesteps of states and per-agent actions.
fn rollout(scheme: &Arc<epibatch_core::CompiledScheme>) -> EpisodeBatch {
    let mut episode = EpisodeBatch::new(Arc::clone(scheme), 1, HORIZON);
    for t in 0..3 {
        let state = Value::F32(arr1(&[(t + 1) as f32; 3]).into_dyn());
        let actions = Value::I64(arr2(&[[0], [1]]).into_dyn());
        episode
            .update(&[("state", state), ("actions", actions)], t)
            .unwrap();
    }
    episode
}

#[test]
fn rollout_buffer_sample_round_trip() {
    let scheme = scheme();
    let config = ReplayBufferConfig::default().capacity(CAPACITY).seed(1);
    let mut buffer = EpisodeReplayBuffer::build(Arc::clone(&scheme), HORIZON, &config);

    buffer.insert_episode_batch(&rollout(&scheme)).unwrap();
    assert_eq!(buffer.len(), 1);
    assert_eq!(buffer.store().slice(0..1, 0..HORIZON).unwrap().max_t_filled(), 3);
    assert!(!buffer.can_sample(2));

    for _ in 0..3 {
        buffer.insert_episode_batch(&rollout(&scheme)).unwrap();
    }
    assert!(buffer.can_sample(2));

    let sample = buffer.sample(2).unwrap();
    assert_eq!(sample.batch_size(), 2);

    // Truncate to the longest filled sequence among the sampled episodes.
    let max_t = sample.max_t_filled();
    assert_eq!(max_t, 3);
    let view = sample.slice(0..2, 0..max_t).unwrap();

    // Original state and action values are intact.
    let states = view.read("state", 0..2, 0..max_t).unwrap();
    let states = states.as_f32().unwrap();
    for b in 0..2 {
        for t in 0..max_t {
            for d in 0..3 {
                assert_eq!(states[[b, t, d]], (t + 1) as f32);
            }
        }
    }

    let actions = view.read("actions", 0..2, 0..max_t).unwrap();
    let actions = actions.as_i64().unwrap();
    for b in 0..2 {
        for t in 0..max_t {
            assert_eq!(actions[[b, t, 0, 0]], 0);
            assert_eq!(actions[[b, t, 1, 0]], 1);
        }
    }

    // The derived one-hot field rides along with its source.
    let onehot = view.read("actions_onehot", 0..2, 0..max_t).unwrap();
    let onehot = onehot.as_f32().unwrap();
    for b in 0..2 {
        for t in 0..max_t {
            assert_eq!(onehot[[b, t, 0, 0]], 1.0);
            assert_eq!(onehot[[b, t, 0, 1]], 0.0);
            assert_eq!(onehot[[b, t, 1, 0]], 0.0);
            assert_eq!(onehot[[b, t, 1, 1]], 1.0);
        }
    }
}

#[test]
fn overfilling_the_buffer_keeps_capacity_episodes() {
    let scheme = scheme();
    let config = ReplayBufferConfig::default().capacity(CAPACITY).seed(1);
    let mut buffer = EpisodeReplayBuffer::build(Arc::clone(&scheme), HORIZON, &config);

    for _ in 0..CAPACITY + 3 {
        buffer.insert_episode_batch(&rollout(&scheme)).unwrap();
    }
    assert_eq!(buffer.len(), CAPACITY);
    assert!(buffer.can_sample(CAPACITY));
    assert!(!buffer.can_sample(CAPACITY + 1));
}
