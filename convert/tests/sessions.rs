use std::borrow::Cow;

use maplit::hashmap;
use ndarray::{Array1, Array2, ArrayD, ArrayViewD, IxDyn};
use proptest::prelude::*;
use ratecast::history::resolve_history;
use ratecast::prelude::*;
use ratecast_source::layers::*;

fn setup_test_logger() {
    let _ = env_logger::Builder::from_env("RATECAST_LOG").try_init();
}

fn no_fallback() -> ConverterConfig {
    ConverterConfig::default().with_allow_fallback(false)
}

fn convert_error(err: &anyhow::Error) -> &ConvertError {
    err.downcast_ref::<ConvertError>().unwrap_or_else(|| panic!("not a conversion error: {err:#}"))
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

fn shared_dense() -> (SourceGraph, LayerId, LayerId) {
    let mut g = SourceGraph::default();
    let a = g.input("a", &[2]).unwrap();
    let b = g.input("b", &[2]).unwrap();
    let w = Array2::from_shape_vec((2, 3), vec![0.5, -0.25, 1.0, 0.75, 0.5, -1.0]).unwrap();
    let dense = Dense::new(w, Some(Array1::from_elem(3, 0.125)), Activation::Relu);
    let dense = g.add_layer("shared", dense);
    let da = g.apply(dense, &[a]).unwrap()[0];
    let db = g.apply(dense, &[b]).unwrap()[0];
    let sum = g.wire("sum", Merge::add(), &[da, db]).unwrap();
    let model = g.model("m", &[a, b], &[sum]).unwrap();
    (g, model, dense)
}

#[test]
fn shared_weights_need_splitting() {
    setup_test_logger();
    let (g, model, dense) = shared_dense();
    let err = Converter::new(&g, model, ConverterConfig::default()).unwrap_err();
    let expected = ConvertError::DuplicateLayerApplication { layer: "shared".into() };
    assert_eq!(convert_error(&err), &expected);

    let split = ConverterConfig::default().with_split_shared_weights(true);
    let c = Converter::new(&g, model, split).unwrap();
    c.verify(&VerifyOptions::default()).unwrap();
    let objs: Vec<ObjId> = (0..2).map(|ix| c.layer_map()[&dense][&ix][0].obj).collect();
    assert_ne!(objs[0], objs[1]);
    let ensembles: Vec<&Ensemble> =
        objs.iter().map(|o| c.network().object(*o).unwrap().kind.as_ensemble().unwrap()).collect();
    assert_eq!(ensembles[0].bias, ensembles[1].bias);
    let weights: Vec<&Transform> =
        objs.iter().map(|o| &c.network().connections_into(*o).next().unwrap().transform).collect();
    assert_eq!(weights[0], weights[1]);
}

#[test]
fn converting_twice_reuses_objects() {
    let mut g = SourceGraph::default();
    let x = g.input("x", &[3]).unwrap();
    let y = g.wire("act", ActivationLayer::new(Activation::Relu), &[x]).unwrap();
    let model = g.model("m", &[x], &[y]).unwrap();
    let mut c = Converter::new(&g, model, ConverterConfig::default()).unwrap();
    let act = g.layer_by_name("act").unwrap();
    let objects = c.network().objects().len();
    let first = c.convert_invocation(act, 0).unwrap();
    let second = c.convert_invocation(act, 0).unwrap();
    assert_eq!(first, second);
    assert_eq!(&first[0], c.layers().get(y).unwrap());
    assert_eq!(c.network().objects().len(), objects);
}

#[test]
fn nested_models_convert_their_layers_once() {
    setup_test_logger();
    let mut g = SourceGraph::default();
    let ix = g.input("inner_x", &[3]).unwrap();
    let w = Array2::from_shape_vec((3, 2), vec![0.5, 1.0, -0.5, 0.25, 1.0, 0.0]).unwrap();
    let iy = g.wire("inner_dense", Dense::new(w, None, Activation::Relu), &[ix]).unwrap();
    let inner = g.model("inner", &[ix], &[iy]).unwrap();

    let x = g.input("x", &[3]).unwrap();
    let z = g.call(inner, &[x]).unwrap()[0];
    let y = g.wire("square", Box::new(Square), &[z]).unwrap();
    let outer = g.model("outer", &[x], &[y]).unwrap();

    let c = Converter::new(&g, outer, ConverterConfig::default()).unwrap();
    c.verify(&VerifyOptions::default()).unwrap();
    assert!(!c.layer_map().contains_key(&inner));
    assert!(!c.layer_map().contains_key(&outer));
    let dense = g.layer_by_name("inner_dense").unwrap();
    assert_eq!(c.layer_map()[&dense].keys().copied().collect::<Vec<_>>(), vec![1]);
    // the nested model output stands for the replayed dense layer
    let replayed = g.tensor(z).unwrap().alias.unwrap();
    assert_eq!(c.layers().get(replayed).unwrap(), &c.layer_map()[&dense][&1][0]);
    assert!(c.warnings().iter().any(|w| w.contains("Square does not have a registered converter")));
}

#[test]
fn unregistered_layers_need_fallback() {
    let mut g = SourceGraph::default();
    let x = g.input("x", &[2]).unwrap();
    let y = g.wire("square", Box::new(Square), &[x]).unwrap();
    let model = g.model("m", &[x], &[y]).unwrap();

    let err = Converter::new(&g, model, no_fallback()).unwrap_err();
    match convert_error(&err) {
        ConvertError::UnconvertibleLayer { layer, reason } => {
            assert_eq!(layer, "square");
            assert_eq!(reason, "Layer type Square does not have a registered converter");
        }
        other => panic!("unexpected {other:?}"),
    }

    let c = Converter::new(&g, model, ConverterConfig::default()).unwrap();
    let obj = c.layers().get(y).unwrap().obj;
    assert!(c.network().object(obj).unwrap().kind.as_tensor_node().is_some());
    let expected =
        "Layer type Square does not have a registered converter. Falling back to tensor node.";
    assert_eq!(c.warnings(), &[expected]);
    c.verify(&VerifyOptions::default()).unwrap();
}

#[derive(Debug)]
struct SquareAsRelu {
    layer: LayerId,
}

impl LayerConverter for SquareAsRelu {
    fn layer(&self) -> LayerId {
        self.layer
    }

    fn convert(&self, session: &mut Converter, invocation: usize) -> CastResult<Option<ObjView>> {
        let relu = Some(Activation::Relu.into());
        let output = session.build_target(self.layer, invocation, None, relu)?;
        session.wire_input(self.layer, invocation, output.clone(), 0, false, Transform::Identity)?;
        Ok(Some(output))
    }
}

fn square_as_relu(layer: &Layer) -> CastResult<Box<dyn LayerConverter>> {
    Ok(Box::new(SquareAsRelu { layer: layer.id }))
}

#[test]
fn custom_layers_can_register_converters() {
    let mut g = SourceGraph::default();
    let x = g.input("x", &[2]).unwrap();
    let y = g.wire("square", Box::new(Square), &[x]).unwrap();
    let model = g.model("m", &[x], &[y]).unwrap();
    let mut registry = Registry::default();
    registry.insert(Some("Square"), square_as_relu);
    assert!(registry.warnings().is_empty());
    registry.insert(Some("Square"), square_as_relu);
    let c = Converter::with_registry(&g, model, no_fallback(), registry).unwrap();
    assert_eq!(c.warnings(), &["Layer 'Square' already has a converter. Overwriting."]);
    let obj = c.layers().get(y).unwrap().obj;
    assert!(c.network().object(obj).unwrap().kind.as_ensemble().is_some());
    // ones squared equal ones rectified
    c.verify(&VerifyOptions::default()).unwrap();
}

#[test]
fn softmax_without_fallback_is_fatal() {
    let mut g = SourceGraph::default();
    let x = g.input("x", &[3]).unwrap();
    let y = g.wire("probs", ActivationLayer::new(Activation::Softmax), &[x]).unwrap();
    let model = g.model("m", &[x], &[y]).unwrap();
    let err = Converter::new(&g, model, no_fallback()).unwrap_err();
    assert_eq!(
        convert_error(&err),
        &ConvertError::UnsupportedActivation { layer: "probs".into(), activation: "softmax".into() }
    );
}

#[test]
fn lookups_by_layer_must_be_unambiguous() {
    let mut g = SourceGraph::default();
    let x = g.input("x", &[2]).unwrap();
    let act = g.add_layer("act", ActivationLayer::new(Activation::Tanh));
    let a = g.apply(act, &[x]).unwrap()[0];
    let b = g.apply(act, &[a]).unwrap()[0];
    let model = g.model("m", &[x], &[b]).unwrap();
    let c = Converter::new(&g, model, ConverterConfig::default()).unwrap();
    let err = c.layers().get(act).unwrap_err();
    assert_eq!(convert_error(&err), &ConvertError::AmbiguousKey { layer: "act".into() });
    assert!(c.layers().get(a).is_ok());
    let input = g.layer_by_name("x").unwrap();
    assert_eq!(c.inputs().get(input).unwrap(), c.inputs().get(x).unwrap());
    c.verify(&VerifyOptions::default()).unwrap();
}

#[test]
fn detached_tensors_have_no_history() {
    let mut g = SourceGraph::default();
    let k = g.detached(ShapeFact::batched(&[2]));
    let err = resolve_history(&g, k).unwrap_err();
    assert_eq!(convert_error(&err), &ConvertError::UnresolvedProvenance { tensor: k });
}

#[test]
fn invalid_configs_are_rejected() {
    let mut g = SourceGraph::default();
    let x = g.input("x", &[2]).unwrap();
    let model = g.model("m", &[x], &[x]).unwrap();
    let config = ConverterConfig::default().with_scale_firing_rates(FiringRateScale::Global(0.0));
    let err = Converter::new(&g, model, config).unwrap_err();
    assert!(matches!(convert_error(&err), ConvertError::InvalidConfig(_)));
    let config = ConverterConfig::default().with_synapse(Some(Synapse::lowpass(-1.0)));
    assert!(Converter::new(&g, model, config).is_err());
}

#[test]
fn sequential_models_warn() {
    let mut g = SourceGraph::default();
    let model = g
        .sequential(
            "seq",
            &[4],
            vec![
                ("flat".to_string(), Flatten.into()),
                ("relu".to_string(), ActivationLayer::new(Activation::Relu).into()),
            ],
        )
        .unwrap();
    let c = Converter::new(&g, model, ConverterConfig::default()).unwrap();
    assert_eq!(c.warnings(), &["Converting sequential model to functional model"]);
    c.verify(&VerifyOptions::default()).unwrap();
}

#[test]
fn swapped_activations() {
    let mut g = SourceGraph::default();
    let x = g.input("x", &[3]).unwrap();
    let w =
        Array2::from_shape_vec((3, 3), vec![1.0, 0.5, 0.0, 0.0, 1.0, 0.5, 0.5, 0.0, 1.0]).unwrap();
    let y = g.wire("d", Dense::new(w, None, Activation::Relu), &[x]).unwrap();
    let model = g.model("m", &[x], &[y]).unwrap();

    let config =
        ConverterConfig::default().with_swap(NeuronType::relu(), NeuronType::spiking_relu());
    let c = Converter::new(&g, model, config).unwrap();
    let obj = c.layers().get(y).unwrap().obj;
    let ens = c.network().object(obj).unwrap().kind.as_ensemble().unwrap();
    assert_eq!(ens.neuron_type, NeuronType::spiking_relu());
    c.verify(&VerifyOptions::default()).unwrap();

    let config = ConverterConfig::default().with_swap(Activation::Relu, NeuronType::lif_rate());
    let c = Converter::new(&g, model, config).unwrap();
    let obj = c.layers().get(y).unwrap().obj;
    let ens = c.network().object(obj).unwrap().kind.as_ensemble().unwrap();
    assert_eq!(ens.neuron_type, NeuronType::lif_rate());
    assert!(c.verify(&VerifyOptions::default()).is_err());
}

#[test]
fn synapses_only_leave_neurons() {
    let mut g = SourceGraph::default();
    let x = g.input("x", &[2]).unwrap();
    let h = g.wire("h", ActivationLayer::new(Activation::Relu), &[x]).unwrap();
    let y = g.wire("y", Flatten, &[h]).unwrap();
    let model = g.model("m", &[x], &[y]).unwrap();
    let synapse = Synapse::lowpass(0.005);
    let config = ConverterConfig::default().with_synapse(Some(synapse));
    let c = Converter::new(&g, model, config).unwrap();
    let h_obj = c.layers().get(h).unwrap().obj;
    let into = c.network().connections_into(h_obj).next().unwrap();
    assert_eq!(into.synapse, None);
    let probe = c.network().probe_info(*c.outputs().get(y).unwrap()).unwrap();
    assert_eq!(probe.synapse, Some(synapse));
    c.verify(&VerifyOptions::default()).unwrap();
}

#[test]
fn firing_rate_scaling_without_amplitude_warns() {
    let mut g = SourceGraph::default();
    let x = g.input("x", &[2]).unwrap();
    let y = g.wire("s", ActivationLayer::new(Activation::Sigmoid), &[x]).unwrap();
    let model = g.model("m", &[x], &[y]).unwrap();
    let s = g.layer_by_name("s").unwrap();
    let scale = FiringRateScale::PerLayer(hashmap! { s => 10.0 });
    let config = ConverterConfig::default().with_scale_firing_rates(scale);
    let c = Converter::new(&g, model, config).unwrap();
    assert_eq!(c.warnings().len(), 1);
    assert!(c.warnings()[0].contains("does not support amplitude (Sigmoid)"));
    assert!(c.verify(&VerifyOptions::default()).is_err());
}

proptest! {
    #[test]
    fn firing_rate_scaling_keeps_rates(k in 0.05f32..50.0, bias in -0.5f32..2.0) {
        let mut g = SourceGraph::default();
        let x = g.input("x", &[3]).unwrap();
        let w = Array2::from_shape_vec((3, 2), vec![0.5, -0.25, 0.25, 0.5, 0.125, 1.0]).unwrap();
        let dense = Dense::new(w, Some(Array1::from_elem(2, bias)), Activation::Relu);
        let y = g.wire("d", dense, &[x]).unwrap();
        let model = g.model("m", &[x], &[y]).unwrap();
        let config = ConverterConfig::default().with_scale_firing_rates(FiringRateScale::Global(k));
        let c = Converter::new(&g, model, config).unwrap();
        let obj = c.layers().get(y).unwrap().obj;
        let ens = c.network().object(obj).unwrap().kind.as_ensemble().unwrap();
        prop_assert_eq!(ens.neuron_type.amplitude(), Some(1.0 / k));
        prop_assert!(c.warnings().is_empty());
        let inputs = vec![ArrayD::ones(IxDyn(&[2, 3]))];
        let reference = SourceRunner::new(&g, model).predict(&inputs).unwrap();
        let scaled = c.network_runner().unwrap().predict(&inputs).unwrap();
        for (a, b) in reference[0].iter().zip(scaled[0].iter()) {
            prop_assert!((a - b).abs() <= 1e-5 * a.abs().max(1.0));
        }
    }
}

/// A runner that records training calls and returns fixed outputs.
struct Recording {
    outputs: TVec<ArrayD<f32>>,
    parameters: usize,
    fitted: Option<usize>,
}

impl Recording {
    fn new(outputs: TVec<ArrayD<f32>>, parameters: usize) -> Recording {
        Recording { outputs, parameters, fitted: None }
    }
}

impl Runner for Recording {
    fn predict(&mut self, _inputs: &[ArrayD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        Ok(self.outputs.clone())
    }

    fn fit(
        &mut self,
        inputs: &[ArrayD<f32>],
        targets: &[ArrayD<f32>],
        epochs: usize,
    ) -> CastResult<()> {
        assert_eq!(inputs[0].shape(), &[2, 2]);
        assert_eq!(targets[0].shape(), &[2, 3]);
        self.fitted = Some(epochs);
        Ok(())
    }

    fn trainable_parameter_count(&self) -> CastResult<usize> {
        Ok(self.parameters)
    }
}

fn dense_model(g: &mut SourceGraph) -> LayerId {
    let x = g.input("x", &[2]).unwrap();
    let kernel = Array2::eye(2).dot(&Array2::ones((2, 3)));
    let y = g.wire("d", Dense::new(kernel, None, Activation::Relu), &[x]).unwrap();
    g.model("m", &[x], &[y]).unwrap()
}

#[test]
fn training_verification_compares_parameter_counts() {
    let mut g = SourceGraph::default();
    let model = dense_model(&mut g);
    let c = Converter::new(&g, model, ConverterConfig::default()).unwrap();
    assert_eq!(c.network().trainable_parameter_count().unwrap(), 6);
    assert_eq!(g.trainable_parameter_count(model).unwrap(), 6);

    let out = tvec!(ArrayD::ones(IxDyn(&[2, 3])));
    let mut source = Recording::new(out.clone(), 6);
    let mut target = Recording::new(out.clone(), 8);
    let options = VerifyOptions::default().with_training(true);
    let err = c.verify_with(&mut source, &mut target, &options).unwrap_err();
    assert_eq!(convert_error(&err), &ConvertError::ParameterCountMismatch { network: 8, model: 6 });
    assert_eq!(source.fitted, None);

    let mut target = Recording::new(out, 6);
    c.verify_with(&mut source, &mut target, &options).unwrap();
    assert_eq!(source.fitted, Some(3));
    assert_eq!(target.fitted, Some(3));
}

#[test]
fn mismatches_report_the_largest_difference() {
    let mut g = SourceGraph::default();
    let model = dense_model(&mut g);
    let c = Converter::new(&g, model, ConverterConfig::default()).unwrap();
    let mut source = Recording::new(tvec!(ArrayD::zeros(IxDyn(&[2, 3]))), 6);
    let mut target = Recording::new(tvec!(ArrayD::from_elem(IxDyn(&[2, 3]), 0.5)), 6);
    let err = c.verify_with(&mut source, &mut target, &VerifyOptions::default()).unwrap_err();
    let expected = ConvertError::VerificationMismatch { output: 0, max_difference: 0.5 };
    assert_eq!(convert_error(&err), &expected);
    assert!(err.to_string().contains("max difference=5.00E-1"));

    // reference runners cannot train
    assert!(c.verify(&VerifyOptions::default().with_training(true)).is_err());
}

fn outputs(values: &[f32]) -> TVec<ArrayD<f32>> {
    tvec!(ArrayD::from_shape_vec(IxDyn(&[2, 3]), values.to_vec()).unwrap())
}

#[test]
fn only_failing_values_count_toward_the_difference() {
    let mut g = SourceGraph::default();
    let model = dense_model(&mut g);
    let c = Converter::new(&g, model, ConverterConfig::default()).unwrap();
    // 5.0 off on 1e6 is within rtol, 1e-3 off on zero is not
    let source_values = [1e6 + 5.0, 0.0, 1.0, 1.0, 1.0, 1.0];
    let network_values = [1e6, 1e-3, 1.0, 1.0, 1.0, 1.0];
    let mut source = Recording::new(outputs(&source_values), 6);
    let mut target = Recording::new(outputs(&network_values), 6);
    let err = c.verify_with(&mut source, &mut target, &VerifyOptions::default()).unwrap_err();
    let expected = ConvertError::VerificationMismatch { output: 0, max_difference: 1e-3 };
    assert_eq!(convert_error(&err), &expected);

    let mut source = Recording::new(outputs(&[f32::NAN; 6]), 6);
    let mut target = Recording::new(outputs(&[1.0; 6]), 6);
    let err = c.verify_with(&mut source, &mut target, &VerifyOptions::default()).unwrap_err();
    match convert_error(&err) {
        ConvertError::VerificationMismatch { output: 0, max_difference } => {
            assert!(max_difference.is_nan())
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn inputs_without_batch_axis_are_rejected() {
    let mut g = SourceGraph::default();
    let model = dense_model(&mut g);
    let c = Converter::new(&g, model, ConverterConfig::default()).unwrap();
    let options = VerifyOptions::default().with_inputs(vec![ArrayD::zeros(IxDyn(&[]))]);
    let err = c.verify(&options).unwrap_err();
    assert!(format!("{err:#}").contains("leading batch axis"));
}

#[test]
fn ineligible_layers_fail_without_fallback() {
    let mut g = SourceGraph::default();
    let a = g.input("a", &[2]).unwrap();
    let b = g.input("b", &[2]).unwrap();
    let cat = g.wire("cat", Concatenate::new(0), &[a, b]).unwrap();
    let model = g.model("m", &[a, b], &[cat]).unwrap();
    let err = Converter::new(&g, model, no_fallback()).unwrap_err();
    match convert_error(&err) {
        ConvertError::UnconvertibleLayer { layer, reason } => {
            assert_eq!(layer, "cat");
            assert!(reason.contains("batch dimension"));
        }
        other => panic!("unexpected {other:?}"),
    }

    let mut g = SourceGraph::default();
    let x = g.input("x", &[4, 4, 1]).unwrap();
    let pool = Pool::new(PoolKind::Avg, &[3, 3], Some(&[1, 1][..])).with_padding(PaddingSpec::Same);
    let y = g.wire("pool", pool, &[x]).unwrap();
    let model = g.model("m", &[x], &[y]).unwrap();
    let err = Converter::new(&g, model, no_fallback()).unwrap_err();
    assert!(matches!(
        convert_error(&err),
        ConvertError::UnconvertibleLayer { layer, .. } if layer == "pool"
    ));
    let c = Converter::new(&g, model, ConverterConfig::default()).unwrap();
    let obj = c.layers().get(y).unwrap().obj;
    assert!(c.network().object(obj).unwrap().kind.as_tensor_node().is_some());
    c.verify(&VerifyOptions::default()).unwrap();
}
