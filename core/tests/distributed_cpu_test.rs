use flex_model::distributed::{
    CollectiveBackend, CpuBackend, DistributedTensorBroker, ParallelConfig,
};
use flex_model::hooks::{ActivationStore, HookFunction};
use flex_model::models::{MlpConfig, ParallelMlp};
use flex_model::nn::{Activation, ForwardContext, Linear, Module};
use flex_model::tensor::Tensor;
use flex_model::{FlexError, FlexModel};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::thread;

/// Runs `f` once per rank of a ring of `world_size`, each on its own thread, and returns the
/// results in rank order.
fn spmd<R, F>(world_size: usize, f: F) -> Vec<R>
where
    R: Send + 'static,
    F: Fn(CpuBackend) -> R + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handles: Vec<_> = CpuBackend::ring(world_size)
        .into_iter()
        .map(|backend| {
            let f = Arc::clone(&f);
            thread::spawn(move || f(backend))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

fn full_tensor() -> Tensor<f32> {
    Tensor::from_fn(vec![4, 8, 12], |i| i as f32 * 0.5)
}

#[test]
fn test_ring_all_reduce_cpu() {
    for world_size in [1, 2, 3, 4] {
        let results = spmd(world_size, |backend| {
            // Rank 0 has 1s, Rank 1 has 2s, etc.
            let tensor = Tensor::<f32>::full(vec![2, 5], (backend.rank() + 1) as f32);
            backend.all_reduce_sum(&tensor).unwrap()
        });

        let expected = (world_size * (world_size + 1) / 2) as f32;
        for result in results {
            assert_eq!(result.shape(), &[2, 5]);
            assert!(result.data().iter().all(|&v| (v - expected).abs() < 1e-5));
        }
    }
}

#[test]
fn test_gather_then_scatter_round_trip() {
    for world_size in [1, 2, 4] {
        for dim in 0..3 {
            let results = spmd(world_size, move |backend| {
                let rank = backend.rank();
                let broker = DistributedTensorBroker::new(Arc::new(backend));
                let shard = full_tensor().chunk(world_size, dim).unwrap().remove(rank);

                let gathered = broker.gather(shard.clone(), dim).unwrap();
                let scattered = broker.scatter(gathered.clone(), dim).unwrap();
                (shard, gathered, scattered)
            });

            for (shard, gathered, scattered) in results {
                assert_eq!(gathered, full_tensor(), "world {world_size}, dim {dim}");
                assert_eq!(scattered, shard, "world {world_size}, dim {dim}");
            }
        }
    }
}

#[test]
fn test_uneven_shards_rejected() {
    // Size 10 along dim 0 split across 3 ranks as 4 + 3 + 3.
    let results = spmd(3, |backend| {
        let rank = backend.rank();
        let broker = DistributedTensorBroker::new(Arc::new(backend));
        let len = if rank == 0 { 4 } else { 3 };
        let gathered = broker.gather(Tensor::<f32>::zeros(vec![len, 2]), 0);
        let scattered = broker.scatter(Tensor::<f32>::zeros(vec![10, 2]), 0);
        (gathered, scattered)
    });

    for (gathered, scattered) in results {
        for err in [gathered.unwrap_err(), scattered.unwrap_err()] {
            assert!(matches!(
                err,
                FlexError::Sharding {
                    dim: 0,
                    size: 10,
                    world_size: 3
                }
            ));
        }
    }
}

const SEED: u64 = 42;

fn mlp_config() -> MlpConfig {
    MlpConfig::new(4, 8)
}

fn mlp_input() -> Tensor<f32> {
    Tensor::from_fn(vec![2, 3, 4], |i| (i as f32 * 0.21).cos())
}

/// The unsharded layers every rank's shards are cut from.
fn full_layers() -> (Linear<f32>, Linear<f32>) {
    let config = mlp_config();
    let mut rng = StdRng::seed_from_u64(SEED);
    let up = Linear::init(config.hidden_size, config.intermediate_size, config.bias, &mut rng);
    let down = Linear::init(config.intermediate_size, config.hidden_size, config.bias, &mut rng);
    (up, down)
}

#[test]
fn test_sharded_mlp_matches_unsharded_reference() {
    let (up, down) = full_layers();
    let x = mlp_input();
    let expected = down.apply(&Activation::Gelu.apply(&up.apply(&x).unwrap())).unwrap();

    for world_size in [1, 2, 4] {
        let outputs = spmd(world_size, |backend| {
            let mlp = ParallelMlp::<f32, _>::init(&mlp_config(), &mut StdRng::seed_from_u64(SEED), Arc::new(backend))
                .unwrap();
            mlp.forward(&mlp_input(), &mut ForwardContext::new()).unwrap()
        });
        for y in outputs {
            assert!(y.allclose(&expected, 1e-4), "world {world_size}");
        }
    }
}

#[test]
fn test_hooked_sharded_mlp_captures_full_activations() {
    let (up, down) = full_layers();
    let x = mlp_input();
    let up_full = up.apply(&x).unwrap();
    let expected = down
        .apply(&Activation::Gelu.apply(&up_full.scale(2.0)))
        .unwrap();

    for world_size in [1, 2, 4] {
        let results = spmd(world_size, |backend| {
            let backend = Arc::new(backend);
            let mlp = ParallelMlp::<f32, _>::init(&mlp_config(), &mut StdRng::seed_from_u64(SEED), Arc::clone(&backend))
                .unwrap();

            let store = ActivationStore::new();
            let mut flex = FlexModel::distributed(Arc::new(mlp), store.clone(), backend);
            flex.register_hook_function(
                HookFunction::<f32>::new("up_proj", &[None, None, Some(8)])
                    .with_shard_dim(2)
                    .with_editing_function(|x, _| Ok(x.scale(2.0))),
            )
            .unwrap();
            flex.register_hook_function(HookFunction::<f32>::new("act", &[None, None, None]).with_shard_dim(2))
                .unwrap();
            flex.register_hook_function(HookFunction::<f32>::new("down_proj", &[None, None, Some(4)]))
                .unwrap();

            let y = flex.run_forward(&mlp_input()).unwrap();
            (y, store.get("up_proj").unwrap(), store.get("act").unwrap(), store.get("down_proj").unwrap())
        });

        for (y, up_captured, act_captured, down_captured) in results {
            assert!(y.allclose(&expected, 1e-4), "world {world_size}");
            assert_eq!(up_captured.shape(), &[2, 3, 8]);
            assert!(up_captured.allclose(&up_full.scale(2.0), 1e-4));
            assert!(act_captured.allclose(&Activation::Gelu.apply(&up_full.scale(2.0)), 1e-4));
            assert!(down_captured.allclose(&expected, 1e-4));
        }
    }
}

#[test]
fn test_distributed_shape_mismatch() {
    // up_proj really produces 8 features; every rank holds 8 / 2 = 4 and the gather yields 8.
    let errors = spmd(2, |backend| {
        let backend = Arc::new(backend);
        let mlp = ParallelMlp::<f32, _>::init(&mlp_config(), &mut StdRng::seed_from_u64(SEED), Arc::clone(&backend))
            .unwrap();
        let mut flex = FlexModel::distributed(Arc::new(mlp), ActivationStore::new(), backend);
        flex.register_hook_function(HookFunction::<f32>::new("up_proj", &[None, None, Some(16)]).with_shard_dim(2))
            .unwrap();
        flex.run_forward(&mlp_input()).unwrap_err()
    });

    for err in errors {
        assert!(matches!(
            err,
            FlexError::ShapeMismatch { ref observed, .. } if observed == &vec![2, 3, 8]
        ));
    }
}

#[test]
fn test_replicated_wrong_size_fails_on_every_rank() {
    // down_proj is replicated with 4 features. Declaring 8 = 4 * world_size must not
    // be mistaken for a sharded axis.
    let results = spmd(2, |backend| {
        let backend = Arc::new(backend);
        let mlp = ParallelMlp::<f32, _>::init(&mlp_config(), &mut StdRng::seed_from_u64(SEED), Arc::clone(&backend))
            .unwrap();
        let store = ActivationStore::new();
        let mut flex = FlexModel::distributed(Arc::new(mlp), store.clone(), backend);
        flex.register_hook_function(HookFunction::<f32>::new("down_proj", &[None, None, Some(8)]))
            .unwrap();
        (flex.run_forward(&mlp_input()).unwrap_err(), store.is_empty())
    });

    assert_eq!(results.len(), 2);
    for (err, store_empty) in results {
        assert!(matches!(
            err,
            FlexError::ShapeMismatch { ref observed, .. } if observed == &vec![2, 3, 4]
        ));
        assert!(store_empty);
    }
}

#[test]
fn test_config_must_match_world_size() {
    let backend = Arc::new(CpuBackend::ring(2).remove(0));
    let mlp = ParallelMlp::<f32, _>::init(&mlp_config(), &mut StdRng::seed_from_u64(SEED), Arc::clone(&backend))
        .unwrap();
    let mlp = Arc::new(mlp);

    let err = FlexModel::with_config(
        Arc::clone(&mlp),
        ActivationStore::new(),
        Arc::clone(&backend),
        ParallelConfig::tensor_parallel(4),
    )
    .err()
    .unwrap();
    assert!(matches!(err, FlexError::Config(_)));

    let flex = FlexModel::with_config(mlp, ActivationStore::new(), backend, ParallelConfig::tensor_parallel(2))
        .unwrap();
    assert_eq!(flex.broker().world_size(), 2);
    assert_eq!(flex.config().world_size(), 2);
}

#[test]
fn test_config_from_json() {
    let config: ParallelConfig = serde_json::from_str(
        r#"{"tensor_parallel_size": 2, "pipeline_parallel_size": 2, "data_parallel_size": 1}"#,
    )
    .unwrap();
    assert_eq!(config.world_size(), 4);
    assert!(config.validate().is_ok());

    let json = serde_json::to_string(&ParallelConfig::tensor_parallel(8)).unwrap();
    assert!(json.contains("\"tensor_parallel_size\":8"));
}
