use ndarray::{Array1, ArrayD, IxDyn};

use super::{LayerConverter, kind_mismatch};
use crate::config::ConverterConfig;
use crate::errors::ConvertError;
use crate::internal::*;
use crate::registry::Registry;
use crate::session::Converter;

pub fn register_all_ops(reg: &mut Registry) {
    reg.insert(Some("BatchNormalization"), build);
}

fn build(layer: &Layer) -> CastResult<Box<dyn LayerConverter>> {
    match &layer.kind {
        LayerKind::BatchNorm(op) => {
            let (scale, offset) = op.affine();
            let axis = op.axis.clone();
            Ok(Box::new(BatchNormConverter { layer: layer.id, axis, scale, offset }))
        }
        _ => Err(kind_mismatch(layer, "BatchNormalization")),
    }
}

/// Frozen batch normalization is a per-channel affine map: a constant node
/// supplies the offsets and the input arrives through a diagonal scale.
#[derive(Debug, Clone)]
pub struct BatchNormConverter {
    layer: LayerId,
    axis: TVec<isize>,
    scale: Array1<f32>,
    offset: Array1<f32>,
}

impl BatchNormConverter {
    /// Repeats per-channel values over every position of `shape`.
    fn broadcast(values: &Array1<f32>, shape: &[usize], axis: usize) -> Array1<f32> {
        let full = ArrayD::from_shape_fn(IxDyn(shape), |ix| values[ix[axis]]);
        full.into_iter().collect()
    }
}

impl LayerConverter for BatchNormConverter {
    fn layer(&self) -> LayerId {
        self.layer
    }

    fn convertible(
        &self,
        layer: &Layer,
        _graph: &SourceGraph,
        config: &ConverterConfig,
    ) -> Result<(), ConvertError> {
        if !config.inference_only {
            return Err(ConvertError::Ineligible {
                layer: layer.name.clone(),
                reason: "Cannot convert BatchNormalization layer to native objects \
                         unless inference_only is enabled"
                    .to_string(),
            });
        }
        if self.axis.len() != 1 {
            return Err(ConvertError::Ineligible {
                layer: layer.name.clone(),
                reason: format!(
                    "Can only convert BatchNormalization over a single axis, got {:?}",
                    self.axis
                ),
            });
        }
        super::check_options(self, layer, config)
    }

    fn convert(&self, session: &mut Converter, invocation: usize) -> CastResult<Option<ObjView>> {
        let shape = session.input_shape(self.layer, invocation)?;
        let axis = axis_index(self.axis[0], shape.len() + 1)?;
        ensure!(axis > 0, "Cannot normalize over the batch axis");
        let scale = Self::broadcast(&self.scale, &shape, axis - 1);
        let offset = Self::broadcast(&self.offset, &shape, axis - 1);

        let output = session.build_target(self.layer, invocation, None, None)?;
        let name = format!("{}.{}.bias", session.graph().layer(self.layer)?.name, invocation);
        let bias_node = session.network_mut().add_node(Node::constant(offset.to_vec()), name);
        session.connect(bias_node.into(), output.clone(), Transform::Identity, Some(false))?;
        let weights = Transform::Diagonal(scale);
        session.wire_input(self.layer, invocation, output.clone(), 0, false, weights)?;
        Ok(Some(output))
    }
}
