use flex_model::hooks::{ActivationStore, HookFunction, HookType, ParameterSet};
use flex_model::nn::{Activation, ForwardContext, Linear, Module, Sequential};
use flex_model::tensor::Tensor;
use flex_model::{FlexError, FlexModel, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;

/// `0: Linear(4 -> 8)`, `1: GELU`, `2: Linear(8 -> 4)`, plus the raw layers for reference runs.
fn mlp() -> (Arc<Sequential<f32>>, Linear<f32>, Linear<f32>) {
    let mut rng = StdRng::seed_from_u64(42);
    let fc1 = Linear::<f32>::init(4, 8, true, &mut rng);
    let fc2 = Linear::<f32>::init(8, 4, true, &mut rng);
    let model = Sequential::default()
        .push(fc1.clone())
        .push(Activation::Gelu)
        .push(fc2.clone());
    (Arc::new(model), fc1, fc2)
}

fn input() -> Tensor<f32> {
    Tensor::from_fn(vec![2, 3, 4], |i| (i as f32 * 0.37).sin())
}

fn pristine<M: Module<f32>>(model: &M, x: &Tensor<f32>) -> Tensor<f32> {
    model.forward(x, &mut ForwardContext::new()).unwrap()
}

#[derive(Debug)]
struct Gated {
    open: bool,
    main: Linear<f32>,
    side: Linear<f32>,
}

impl Module<f32> for Gated {
    fn forward(&self, input: &Tensor<f32>, ctx: &mut ForwardContext<'_, f32>) -> Result<Tensor<f32>> {
        let x = ctx.call("main", &self.main, input)?;
        if self.open {
            return ctx.call("side", &self.side, &x);
        }
        Ok(x)
    }

    fn named_children(&self) -> Vec<(String, &dyn Module<f32>)> {
        vec![
            ("main".to_string(), &self.main as &dyn Module<f32>),
            ("side".to_string(), &self.side as &dyn Module<f32>),
        ]
    }
}

#[test]
fn test_noop_hooks_do_not_change_output() {
    let (model, _, _) = mlp();
    let x = input();
    let store = ActivationStore::new();
    let mut flex = FlexModel::new(Arc::clone(&model), store.clone());
    for (name, width) in [("0", 8), ("1", 8), ("2", 4)] {
        flex.register_hook_function(HookFunction::<f32>::new(name, &[None, None, Some(width)]))
            .unwrap();
    }

    let y = flex.run_forward(&x).unwrap();
    assert_eq!(y, pristine(&*model, &x));
    assert_eq!(store.keys(), vec!["0", "1", "2"]);
    assert_eq!(store.get("2").unwrap(), y);
}

#[test]
fn test_edit_applied_once_and_seen_downstream() {
    let (model, fc1, fc2) = mlp();
    let x = input();

    let plain_store = ActivationStore::new();
    let mut plain = FlexModel::new(Arc::clone(&model), plain_store.clone());
    plain
        .register_hook_function(HookFunction::<f32>::new("0", &[None, None, Some(8)]))
        .unwrap();
    plain.run_forward(&x).unwrap();

    let store = ActivationStore::new();
    let mut flex = FlexModel::new(Arc::clone(&model), store.clone());
    flex.register_hook_function(
        HookFunction::<f32>::new("0", &[None, None, Some(8)]).with_editing_function(|x, _| Ok(x.scale(2.0))),
    )
    .unwrap();
    let y = flex.run_forward(&x).unwrap();

    let captured = store.get("0").unwrap();
    assert!(captured.allclose(&plain_store.get("0").unwrap().scale(2.0), 1e-6));

    // By hand: fc2(gelu(2 * fc1(x)))
    let h = fc1.apply(&x).unwrap().scale(2.0);
    let expected = fc2.apply(&Activation::Gelu.apply(&h)).unwrap();
    assert!(y.allclose(&expected, 1e-5));
    assert!(!y.allclose(&pristine(&*model, &x), 1e-3));
}

#[test]
fn test_shape_mismatch_aborts_forward() {
    let model = Arc::new(
        Sequential::<f32>::default()
            .push(Linear::new(Tensor::ones(vec![2048, 8]), None).unwrap())
            .push(Activation::Relu),
    );
    let store = ActivationStore::new();
    let mut flex = FlexModel::new(model, store.clone());
    flex.register_hook_function(HookFunction::<f32>::new("0", &[None, None, Some(4096)]))
        .unwrap();

    let err = flex.run_forward(&Tensor::ones(vec![1, 2, 8])).unwrap_err();
    match err {
        FlexError::ShapeMismatch {
            module, observed, ..
        } => {
            assert_eq!(module, "0");
            assert_eq!(observed, vec![1, 2, 2048]);
        }
        other => panic!("expected a shape mismatch, got {other}"),
    }
    assert!(store.is_empty());
}

#[test]
fn test_unregister_restores_pristine_behavior() {
    let (model, _, _) = mlp();
    let x = input();
    let store = ActivationStore::new();
    let mut flex = FlexModel::new(Arc::clone(&model), store.clone());
    flex.register_hook_function(
        HookFunction::<f32>::new("1", &[None, None, Some(8)]).with_editing_function(|x, _| Ok(x.scale(0.0))),
    )
    .unwrap();
    assert_ne!(flex.run_forward(&x).unwrap(), pristine(&*model, &x));

    assert!(flex.unregister_hook_function("1").is_some());
    assert!(flex.unregister_hook_function("1").is_none());
    store.clear();

    assert_eq!(flex.run_forward(&x).unwrap(), pristine(&*model, &x));
    assert!(!store.contains("1"));
    assert!(flex.hook_names().is_empty());
}

#[test]
fn test_unreached_module_records_nothing() {
    let mut rng = StdRng::seed_from_u64(3);
    let model = Arc::new(Gated {
        open: false,
        main: Linear::init(4, 4, true, &mut rng),
        side: Linear::init(4, 4, true, &mut rng),
    });
    let store = ActivationStore::new();
    let mut flex = FlexModel::new(model, store.clone());
    flex.register_hook_function(HookFunction::<f32>::new("main", &[None, Some(4)]))
        .unwrap();
    flex.register_hook_function(HookFunction::<f32>::new("side", &[None, Some(4)]))
        .unwrap();

    flex.run_forward(&Tensor::ones(vec![1, 4])).unwrap();
    assert!(store.contains("main"));
    assert!(!store.contains("side"));
}

#[test]
fn test_registration_errors_fail_fast() {
    let (model, _, _) = mlp();
    let mut flex = FlexModel::new(model, ActivationStore::new());

    let err = flex
        .register_hook_function(HookFunction::<f32>::new("layers.7", &[None]))
        .unwrap_err();
    assert!(matches!(err, FlexError::ModuleNotFound { ref module } if module == "layers.7"));
    assert!(err.is_registration_error());

    let err = flex
        .register_hook_function(HookFunction::<f32>::new("0", &[None, Some(0)]))
        .unwrap_err();
    assert!(matches!(err, FlexError::InvalidShapeSpec { .. }));

    let err = flex
        .register_hook_function(HookFunction::<f32>::new("0", &[None, Some(8)]).with_shard_dim(5))
        .unwrap_err();
    assert!(err.is_registration_error());

    assert!(flex.hook_names().is_empty());
    assert_eq!(flex.module_names(), vec!["0", "1", "2"]);
}

#[test]
fn test_reregistration_replaces_hook() {
    let (model, _, _) = mlp();
    let x = input();
    let store = ActivationStore::new();
    let mut flex = FlexModel::new(model, store.clone());
    flex.register_hook_function(
        HookFunction::<f32>::new("0", &[None, None, Some(8)]).with_editing_function(|x, _| Ok(x.scale(0.0))),
    )
    .unwrap();
    flex.register_hook_function(HookFunction::<f32>::new("0", &[None, None, Some(8)]))
        .unwrap();

    assert_eq!(flex.hook_names(), vec!["0"]);
    assert!(!flex.hook("0").unwrap().has_editing_function());
    flex.run_forward(&x).unwrap();
    assert!(store.get("0").unwrap().data().iter().any(|&v| v != 0.0));
}

#[test]
fn test_forward_pre_hook_edits_input() {
    let (model, fc1, fc2) = mlp();
    let x = input();
    let store = ActivationStore::new();
    let mut flex = FlexModel::new(Arc::clone(&model), store.clone());
    flex.register_hook_function(
        HookFunction::<f32>::new("2", &[None, None, Some(8)])
            .with_hook_type(HookType::ForwardPre)
            .with_editing_function(|x, _| Ok(x.scale(0.0))),
    )
    .unwrap();

    let y = flex.run_forward(&x).unwrap();
    // Zero input leaves only the bias of the last layer.
    let bias = fc2.bias.clone().unwrap();
    for row in y.data().chunks(4) {
        assert_eq!(row, bias.data());
    }
    assert!(store.get("2").unwrap().data().iter().all(|&v| v == 0.0));
    assert_eq!(store.get("2").unwrap().shape(), fc1.apply(&x).unwrap().shape());
}

#[test]
fn test_edit_shape_error_propagates() {
    let (model, _, _) = mlp();
    let mut flex = FlexModel::new(model, ActivationStore::new());
    flex.register_hook_function(
        HookFunction::<f32>::new("0", &[None, None, Some(8)])
            .with_editing_function(|x, _| Ok(x.narrow(2, 0, 4)?)),
    )
    .unwrap();

    let err = flex.run_forward(&input()).unwrap_err();
    assert!(matches!(err, FlexError::EditShape { ref module, .. } if module == "0"));
}

#[test]
fn test_parameters_and_save_ctx() {
    let (model, _, _) = mlp();
    let x = input();
    let mut steering = ParameterSet::new();
    steering.insert("vector", Tensor::zeros(vec![2, 3, 8]));
    let steering = steering.into_handle();

    let store = ActivationStore::new();
    let mut flex = FlexModel::new(Arc::clone(&model), store.clone());
    flex.register_hook_function(
        HookFunction::<f32>::new("1", &[None, None, Some(8)])
            .with_parameters(Arc::clone(&steering))
            .with_editing_function(|x, ctx| {
                ctx.save_ctx().save("before_steering", x.clone());
                match ctx.parameter("vector") {
                    Some(v) => Ok((&x + v)?),
                    None => Ok(x),
                }
            }),
    )
    .unwrap();

    let y0 = flex.run_forward(&x).unwrap();
    assert_eq!(y0, pristine(&*model, &x));
    let saved = flex.save_ctx().get("before_steering").unwrap().clone();
    assert_eq!(saved, store.get("1").unwrap());

    if let Some(v) = steering.write().get_mut("vector") {
        *v = Tensor::ones(vec![2, 3, 8]);
    }
    let y1 = flex.run_forward(&x).unwrap();
    assert!(!y1.allclose(&y0, 1e-4));
    assert!(store.get("1").unwrap().allclose(&saved.map(|v| v + 1.0), 1e-6));
}

#[test]
fn test_teardown_returns_pristine_model() {
    let (model, _, _) = mlp();
    let x = input();
    let mut flex = FlexModel::new(Arc::clone(&model), ActivationStore::new());
    flex.register_hook_function(
        HookFunction::<f32>::new("0", &[None, None, Some(8)]).with_editing_function(|x, _| Ok(x.scale(-1.0))),
    )
    .unwrap();
    let edited = flex.run_forward(&x).unwrap();

    let returned = flex.teardown();
    assert!(Arc::ptr_eq(&returned, &model));
    assert_ne!(pristine(&*returned, &x), edited);

    // A fresh wrapper around the same model starts with no hooks.
    let mut again = FlexModel::new(returned, ActivationStore::new());
    assert_eq!(again.run_forward(&x).unwrap(), pristine(&*model, &x));
}

#[test]
fn test_dropped_wrapper_leaves_model_pristine() {
    let (model, _, _) = mlp();
    let x = input();
    let before = pristine(&*model, &x);
    {
        let mut flex = FlexModel::new(Arc::clone(&model), ActivationStore::new());
        flex.register_hook_function(
            HookFunction::<f32>::new("1", &[None, None, Some(8)]).with_editing_function(|x, _| Ok(x.scale(0.0))),
        )
        .unwrap();
        assert_ne!(flex.run_forward(&x).unwrap(), before);
        // Direct calls bypass the hooks while the wrapper is alive.
        assert_eq!(pristine(&*model, &x), before);
    }
    assert_eq!(Arc::strong_count(&model), 1);
    assert_eq!(pristine(&*model, &x), before);
}

#[test]
fn test_store_keeps_entries_across_passes() {
    let (model, _, _) = mlp();
    let store = ActivationStore::new();
    let mut flex = FlexModel::new(model, store.clone());
    flex.register_hook_function(HookFunction::<f32>::new("0", &[None, Some(8)]))
        .unwrap();

    flex.run_forward(&Tensor::ones(vec![1, 4])).unwrap();
    flex.run_forward(&Tensor::ones(vec![5, 4])).unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(store.get("0").unwrap().shape(), &[5, 8]);
}
