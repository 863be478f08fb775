use std::borrow::Cow;

use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2, ArrayD, ArrayViewD, IxDyn};
use ratecast_source::internal::*;
use ratecast_source::layers::*;

fn setup_test_logger() {
    let _ = env_logger::Builder::from_env("RATECAST_LOG").try_init();
}

#[derive(Debug, Clone)]
struct Square;

impl LayerOp for Square {
    fn type_name(&self) -> Cow<'_, str> {
        "Square".into()
    }

    fn output_shapes(&self, inputs: &[&ShapeFact]) -> CastResult<TVec<ShapeFact>> {
        Ok(tvec!(inputs[0].clone()))
    }

    fn forward(&self, inputs: &[ArrayViewD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        Ok(tvec!(inputs[0].mapv(|x| x * x)))
    }
}

impl CustomLayer for Square {}

fn ones(shape: &[usize]) -> ArrayD<f32> {
    ArrayD::ones(IxDyn(shape))
}

#[test]
fn nested_model_predicts_like_flat_model() {
    setup_test_logger();
    let mut g = SourceGraph::default();
    let x = g.input("inner_x", &[3]).unwrap();
    let bias = Array1::from_vec(vec![1.0, -4.0]);
    let d = Dense::new(Array2::from_elem((3, 2), 0.5), Some(bias), Activation::Relu);
    let y = g.wire("inner_dense", d, &[x]).unwrap();
    let inner = g.model("inner", &[x], &[y]).unwrap();

    let outer_x = g.input("x", &[3]).unwrap();
    let z = g.call(inner, &[outer_x]).unwrap()[0];
    let w = g.wire("square", Box::new(Square), &[z]).unwrap();
    let outer = g.model("outer", &[outer_x], &[w]).unwrap();

    let out = g.predict(outer, &[ones(&[2, 3])]).unwrap();
    assert_eq!(out[0].shape(), &[2, 2]);
    assert_abs_diff_eq!(out[0][[0, 0]], 6.25);
    assert_abs_diff_eq!(out[0][[1, 1]], 0.0);
}

#[test]
fn shared_layers_count_once() {
    let mut g = SourceGraph::default();
    let a = g.input("a", &[2]).unwrap();
    let b = g.input("b", &[2]).unwrap();
    let dense = Dense::new(Array2::eye(2), Some(Array1::zeros(2)), Activation::Linear);
    let dense = g.add_layer("shared", dense);
    let da = g.apply(dense, &[a]).unwrap()[0];
    let db = g.apply(dense, &[b]).unwrap()[0];
    let sum = g.wire("sum", Merge::add(), &[da, db]).unwrap();
    let model = g.model("m", &[a, b], &[sum]).unwrap();
    assert_eq!(g.trainable_parameter_count(model).unwrap(), 6);
    g.set_trainable(dense, false).unwrap();
    assert_eq!(g.trainable_parameter_count(model).unwrap(), 0);
}

#[test]
fn conv_pool_stack() {
    let mut g = SourceGraph::default();
    let x = g.input("x", &[4, 4, 1]).unwrap();
    let kernel = ArrayD::from_elem(IxDyn(&[2, 2, 1, 2]), 0.25);
    let conv = Conv::new(kernel, Some(Array1::zeros(2)), Activation::Linear)
        .unwrap()
        .with_padding(PaddingSpec::Same);
    let c = g.wire("conv", conv, &[x]).unwrap();
    let p = g.wire("pool", Pool::new(PoolKind::Avg, &[2, 2], None), &[c]).unwrap();
    let f = g.wire("flatten", Flatten, &[p]).unwrap();
    let model = g.model("m", &[x], &[f]).unwrap();
    assert_eq!(g.tensor(f).unwrap().shape, ShapeFact::batched(&[8]));
    let out = g.predict(model, &[ones(&[1, 4, 4, 1])]).unwrap();
    assert_eq!(out[0].shape(), &[1, 8]);
    // the lower-right window sees padded zeros on two edges
    assert_abs_diff_eq!(out[0][[0, 0]], 1.0);
    assert_abs_diff_eq!(out[0][[0, 7]], 0.5625);
}

#[test]
fn detached_tensors_cannot_be_evaluated() {
    let mut g = SourceGraph::default();
    let x = g.input("x", &[2]).unwrap();
    let k = g.detached(ShapeFact::batched(&[2]));
    let y = g.wire("add", Merge::add(), &[x, k]).unwrap();
    assert!(g.model("m", &[x], &[y]).is_err());
}

#[test]
fn custom_layers_clone_deeply() {
    let kind: LayerKind = Box::new(Square).into();
    let copy = kind.clone();
    assert_eq!(copy.type_name(), "Square");
    match copy {
        LayerKind::Custom(op) => assert!(op.downcast_ref::<Square>().is_some()),
        _ => panic!("expected a custom layer"),
    }
}
