use ndarray::{Array1, ArrayD, Axis};

use super::{LayerConverter, REGULARIZERS, UnsupportedArg, kind_mismatch};
use crate::internal::*;
use crate::registry::Registry;
use crate::session::Converter;

pub fn register_all_ops(reg: &mut Registry) {
    for rank in 1..=3 {
        reg.insert(Some(&format!("Conv{rank}D")), build);
    }
}

fn build(layer: &Layer) -> CastResult<Box<dyn LayerConverter>> {
    match &layer.kind {
        LayerKind::Conv(op) => Ok(Box::new(ConvConverter {
            layer: layer.id,
            kernel: op.kernel.clone(),
            bias: op.bias.clone(),
            strides: op.strides.clone(),
            padding: op.padding,
            data_format: op.data_format,
            activation: op.activation,
        })),
        _ => Err(kind_mismatch(layer, "Conv")),
    }
}

#[derive(Debug, Clone)]
pub struct ConvConverter {
    layer: LayerId,
    /// `(kernel_size.., channels_in, filters)`.
    kernel: ArrayD<f32>,
    bias: Option<Array1<f32>>,
    strides: TVec<usize>,
    padding: PaddingSpec,
    data_format: DataFormat,
    activation: Activation,
}

impl ConvConverter {
    fn rank(&self) -> usize {
        self.kernel.ndim() - 2
    }

    fn filters(&self) -> usize {
        self.kernel.shape()[self.rank() + 1]
    }

    /// Per-channel biases: a constant feeds one relay unit per filter, and
    /// every output position reads the relay of its channel.
    fn wire_biases(
        &self,
        session: &mut Converter,
        invocation: usize,
        output: &ObjView,
        bias: &Array1<f32>,
    ) -> CastResult<()> {
        let name = format!("{}.{}", session.graph().layer(self.layer)?.name, invocation);
        let shape = session.output_shape(self.layer, invocation)?;
        let filters = self.filters();
        let network = session.network_mut();
        let bias_node = network.add_node(Node::constant(vec![1.0]), format!("{name}.bias"));
        let relay = network.add_node(Node::passthrough(filters), format!("{name}.channel_bias"));
        let weights = Transform::Dense(bias.clone().insert_axis(Axis(1)));
        session.connect(bias_node.into(), relay.into(), weights, None)?;

        let c_axis = self.data_format.c_axis(shape.len());
        let indices: Vec<(usize, usize)> = ndarray::indices(&*shape)
            .into_iter()
            .enumerate()
            .map(|(flat, ix)| (flat, ix[c_axis]))
            .collect();
        let size_out = indices.len();
        let sparse = SparseTransform::new((size_out, filters), indices, Array1::ones(size_out));
        session.connect(relay.into(), output.clone(), Transform::Sparse(sparse), Some(false))?;
        Ok(())
    }
}

impl LayerConverter for ConvConverter {
    fn layer(&self) -> LayerId {
        self.layer
    }

    fn unsupported_args(&self) -> Vec<UnsupportedArg> {
        let ones: TVec<usize> = tvec![1; self.rank()];
        vec![UnsupportedArg::with_default("dilation_rate", ones.as_slice())]
    }

    fn unsupported_training_args(&self) -> Vec<UnsupportedArg> {
        REGULARIZERS.into_iter().map(UnsupportedArg::none).collect()
    }

    fn has_weights(&self) -> bool {
        true
    }

    fn convert(&self, session: &mut Converter, invocation: usize) -> CastResult<Option<ObjView>> {
        let activation = Some(self.activation.into());
        let output = session.build_target(self.layer, invocation, None, activation)?;
        if let Some(bias) = &self.bias {
            self.wire_biases(session, invocation, &output, bias)?;
        }
        let input_shape = session.input_shape(self.layer, invocation)?;
        let kernel_size: TVec<usize> = self.kernel.shape()[..self.rank()].into();
        let transform = ConvolutionTransform::new(
            self.filters(),
            &input_shape,
            &kernel_size,
            &self.strides,
            self.padding,
            self.data_format.is_channels_last(),
            self.kernel.clone(),
        )?;
        let weights = Transform::Convolution(transform);
        session.wire_input(self.layer, invocation, output.clone(), 0, true, weights)?;
        Ok(Some(output))
    }
}
