use std::borrow::Cow;
use std::sync::Arc;

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Slice};

use super::LayerConverter;
use crate::internal::*;
use crate::registry::Registry;
use crate::session::Converter;

pub fn register_all_ops(reg: &mut Registry) {
    reg.insert(None, build);
}

fn build(layer: &Layer) -> CastResult<Box<dyn LayerConverter>> {
    ensure!(!layer.is_model(), "Model {} cannot be wrapped in a tensor node", layer);
    Ok(Box::new(FallbackConverter::new(layer.id)))
}

/// Wraps an invocation in a tensor node running the layer itself.
#[derive(Debug, Clone, new)]
pub struct FallbackConverter {
    layer: LayerId,
}

impl LayerConverter for FallbackConverter {
    fn layer(&self) -> LayerId {
        self.layer
    }

    fn convert(&self, session: &mut Converter, invocation: usize) -> CastResult<Option<ObjView>> {
        let graph = session.graph();
        let layer = graph.layer(self.layer)?;
        let outputs = layer.invocation(invocation)?.outputs.len();
        ensure!(outputs == 1, "Cannot wrap {} with {} outputs in a tensor node", layer, outputs);

        let input_shapes = session.input_shapes(self.layer, invocation)?;
        let output_shape = session.output_shape(self.layer, invocation)?;
        let sizes: TVec<usize> = input_shapes.iter().map(|s| s.iter().product()).collect();
        let shape_in: TVec<usize> = match input_shapes.as_slice() {
            [single] => single.clone(),
            _ => tvec!(sizes.iter().sum()),
        };
        let function =
            LayerFunction::new(
                layer.name.clone(),
                layer.kind.clone(),
                layer.trainable,
                input_shapes,
            );
        let node = TensorNode::new(shape_in, output_shape.iter().product(), Arc::new(function));
        let label = format!("{}.{}", layer.name, invocation);
        let output: ObjView = session.network_mut().add_tensor_node(node, label).into();
        info!("Wrapped {} node {} in tensor node {}", layer, invocation, output);

        let mut offset = 0;
        for (ix, size) in sizes.iter().enumerate() {
            let post = if sizes.len() == 1 {
                output.clone()
            } else {
                output.slice(&(offset..offset + size).collect::<Vec<_>>())?
            };
            session.wire_input(self.layer, invocation, post, ix, false, Transform::Identity)?;
            offset += size;
        }
        Ok(Some(output))
    }
}

/// A snapshot of a layer, evaluated on the batched inputs of a tensor node.
///
/// Several inputs arrive concatenated on one flat axis and are split back
/// into their own shapes.
#[derive(Debug, Clone, new)]
pub struct LayerFunction {
    name: String,
    kind: LayerKind,
    trainable: bool,
    input_shapes: TVec<TVec<usize>>,
}

impl LayerFunction {
    fn split(&self, input: &ArrayViewD<f32>) -> CastResult<TVec<ArrayD<f32>>> {
        if self.input_shapes.len() == 1 {
            return Ok(tvec!(input.to_owned()));
        }
        let batch = input.shape()[0];
        let mut offset = 0;
        let mut parts = tvec!();
        for shape in &self.input_shapes {
            let size: usize = shape.iter().product();
            let part = input.slice_axis(Axis(1), Slice::from(offset..offset + size));
            let full: TVec<usize> = std::iter::once(batch).chain(shape.iter().copied()).collect();
            parts.push(part.to_shape(IxDyn(&full))?.into_owned());
            offset += size;
        }
        Ok(parts)
    }
}

impl TensorFunction for LayerFunction {
    fn name(&self) -> Cow<'_, str> {
        self.name.as_str().into()
    }

    fn eval(&self, input: ArrayViewD<f32>) -> CastResult<ArrayD<f32>> {
        let op =
            self.kind.as_op().with_context(|| format!("{} is not a primitive layer", self.name))?;
        let parts = self.split(&input)?;
        let inputs: TVec<ArrayViewD<f32>> = parts.iter().map(|p| p.view()).collect();
        let mut outputs = op
            .forward(&inputs)
            .with_context(|| format!("Evaluating {} in a tensor node", self.name))?;
        ensure!(!outputs.is_empty(), "{} produced no output", self.name);
        Ok(outputs.swap_remove(0))
    }

    fn trainable_parameter_count(&self) -> usize {
        if !self.trainable {
            return 0;
        }
        self.kind.as_op().map(|op| op.trainable_parameter_count()).unwrap_or(0)
    }
}

/// An activation without neuron counterpart.
#[derive(Debug, Clone, new)]
pub struct ActivationFunction {
    activation: Activation,
}

impl TensorFunction for ActivationFunction {
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.activation.name())
    }

    fn eval(&self, input: ArrayViewD<f32>) -> CastResult<ArrayD<f32>> {
        Ok(self.activation.apply(input.to_owned()))
    }
}
