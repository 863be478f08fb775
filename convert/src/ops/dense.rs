use ndarray::{Array1, Array2};

use super::{LayerConverter, REGULARIZERS, UnsupportedArg, kind_mismatch};
use crate::config::ConverterConfig;
use crate::errors::ConvertError;
use crate::internal::*;
use crate::registry::Registry;
use crate::session::Converter;

pub fn register_all_ops(reg: &mut Registry) {
    reg.insert(Some("Dense"), build);
}

fn build(layer: &Layer) -> CastResult<Box<dyn LayerConverter>> {
    match &layer.kind {
        LayerKind::Dense(op) => Ok(Box::new(DenseConverter::new(
            layer.id,
            op.kernel.clone(),
            op.bias.clone(),
            op.activation,
        ))),
        _ => Err(kind_mismatch(layer, "Dense")),
    }
}

/// Affine layer: the bias goes into the target object, the kernel onto the
/// incoming connection.
#[derive(Debug, Clone, new)]
pub struct DenseConverter {
    layer: LayerId,
    /// `(features, units)`.
    kernel: Array2<f32>,
    bias: Option<Array1<f32>>,
    activation: Activation,
}

impl LayerConverter for DenseConverter {
    fn layer(&self) -> LayerId {
        self.layer
    }

    fn unsupported_training_args(&self) -> Vec<UnsupportedArg> {
        REGULARIZERS.into_iter().map(UnsupportedArg::none).collect()
    }

    fn has_weights(&self) -> bool {
        true
    }

    fn convertible(
        &self,
        layer: &Layer,
        graph: &SourceGraph,
        config: &ConverterConfig,
    ) -> Result<(), ConvertError> {
        for invocation in &layer.invocations {
            let input = invocation.inputs.first().and_then(|t| graph.tensor(*t).ok());
            let Some(shape) = input.map(|t| &t.shape) else {
                continue;
            };
            if shape.rank() != 2 {
                return Err(ConvertError::Ineligible {
                    layer: layer.name.clone(),
                    reason: format!(
                        "Dense layer {} is applied on {}, only inputs with a single \
                         non-batch dimension can be converted",
                        layer.name, shape
                    ),
                });
            }
        }
        super::check_options(self, layer, config)
    }

    fn convert(&self, session: &mut Converter, invocation: usize) -> CastResult<Option<ObjView>> {
        let activation = Some(self.activation.into());
        let output = session.build_target(self.layer, invocation, self.bias.clone(), activation)?;
        let weights = self.kernel.t().to_owned();
        let weights = Transform::Dense(weights);
        session.wire_input(self.layer, invocation, output.clone(), 0, true, weights)?;
        Ok(Some(output))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;
    use ratecast_source::layers::{Dense, Regularization};

    fn dense_model(g: &mut SourceGraph, dense: Dense) -> (LayerId, TensorId) {
        let x = g.input("x", &[2]).unwrap();
        let y = g.wire("dense", dense, &[x]).unwrap();
        (g.model("m", &[x], &[y]).unwrap(), y)
    }

    #[test]
    fn bias_lands_in_the_ensemble() {
        let mut g = SourceGraph::default();
        let kernel = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let dense = Dense::new(kernel, Some(array![0.1, 0.2, 0.3]), Activation::Relu);
        let (model, y) = dense_model(&mut g, dense);
        let c = Converter::new(&g, model, ConverterConfig::default()).unwrap();
        let obj = c.layers().get(y).unwrap().obj;
        let ens = c.network().object(obj).unwrap().kind.as_ensemble().unwrap();
        assert_eq!(ens.bias, array![0.1, 0.2, 0.3]);
        let conn = c.network().connections_into(obj).next().unwrap();
        assert_eq!(conn.transform, Transform::Dense(array![[1.0, 4.0], [2.0, 5.0], [3.0, 6.0]]));
        assert!(c.network().is_trainable(conn.id).unwrap());
        assert!(c.network().is_trainable(obj).unwrap());
    }

    #[test]
    fn linear_dense_gets_a_bias_node() {
        let mut g = SourceGraph::default();
        let dense = Dense::new(Array2::eye(2), Some(array![1.0, -1.0]), Activation::Linear);
        let (model, y) = dense_model(&mut g, dense);
        let c = Converter::new(&g, model, ConverterConfig::default()).unwrap();
        let obj = c.layers().get(y).unwrap().obj;
        assert!(c.network().object(obj).unwrap().kind.as_node().unwrap().is_passthrough());
        assert_eq!(c.network().connections_into(obj).count(), 2);
    }

    #[test]
    fn regularizers_block_training() {
        let regularization =
            Regularization { kernel_regularizer: Some("l2".into()), ..Regularization::default() };
        let mut g = SourceGraph::default();
        let dense =
            Dense::new(Array2::eye(2), None, Activation::Relu).with_regularization(regularization);
        let (model, _) = dense_model(&mut g, dense);
        let strict = ConverterConfig::default().with_allow_fallback(false);
        let err = Converter::new(&g, model, strict.clone()).unwrap_err();
        assert!(format!("{err:#}").contains("(unless inference_only is enabled)"), "{err}");
        assert!(Converter::new(&g, model, strict.with_inference_only(true)).is_ok());
    }

    #[test]
    fn rank_3_inputs_fall_back() {
        let mut g = SourceGraph::default();
        let x = g.input("x", &[2, 2]).unwrap();
        let y = g.wire("dense", Dense::new(Array2::eye(2), None, Activation::Relu), &[x]).unwrap();
        let model = g.model("m", &[x], &[y]).unwrap();
        let c = Converter::new(&g, model, ConverterConfig::default()).unwrap();
        let obj = c.layers().get(y).unwrap().obj;
        assert!(c.network().object(obj).unwrap().kind.as_tensor_node().is_some());
        assert!(c.warnings().iter().any(|w| w.ends_with("Falling back to tensor node.")));
    }
}
