use ndarray::{Array2, ArrayD, IxDyn};
use ratecast_source::layers::PoolKind;

use super::{LayerConverter, UnsupportedArg, kind_mismatch};
use crate::config::ConverterConfig;
use crate::errors::ConvertError;
use crate::internal::*;
use crate::registry::Registry;
use crate::session::Converter;

pub fn register_all_ops(reg: &mut Registry) {
    for rank in 1..=3 {
        for kind in ["Average", "Max"] {
            reg.insert(Some(&format!("{kind}Pooling{rank}D")), build);
            reg.insert(Some(&format!("Global{kind}Pooling{rank}D")), build);
        }
    }
}

fn build(layer: &Layer) -> CastResult<Box<dyn LayerConverter>> {
    match &layer.kind {
        LayerKind::Pool(op) => Ok(Box::new(PoolConverter {
            layer: layer.id,
            kind: op.kind,
            global: op.global,
            pool_size: op.pool_size.clone(),
            strides: op.strides.clone(),
            data_format: op.data_format,
        })),
        _ => Err(kind_mismatch(layer, "pooling")),
    }
}

/// Average pooling as a fixed convolution whose taps average each channel
/// over the window. Max pooling only converts when it may be approximated by
/// averaging.
#[derive(Debug, Clone)]
pub struct PoolConverter {
    layer: LayerId,
    kind: PoolKind,
    global: bool,
    pool_size: TVec<usize>,
    strides: TVec<usize>,
    data_format: DataFormat,
}

impl LayerConverter for PoolConverter {
    fn layer(&self) -> LayerId {
        self.layer
    }

    fn unsupported_args(&self) -> Vec<UnsupportedArg> {
        if self.global { vec![] } else { vec![UnsupportedArg::with_default("padding", "valid")] }
    }

    fn convertible(
        &self,
        layer: &Layer,
        _graph: &SourceGraph,
        config: &ConverterConfig,
    ) -> Result<(), ConvertError> {
        if self.kind == PoolKind::Max && !config.max_to_avg_pool {
            return Err(ConvertError::Ineligible {
                layer: layer.name.clone(),
                reason: "Cannot convert max pooling layers to native objects; consider setting \
                         max_to_avg_pool to use average pooling instead"
                    .to_string(),
            });
        }
        super::check_options(self, layer, config)
    }

    fn convert(&self, session: &mut Converter, invocation: usize) -> CastResult<Option<ObjView>> {
        let data_format = self.data_format;
        let input_shape = session.input_shape(self.layer, invocation)?;
        let input = data_format.shape(&input_shape);
        let channels = input.c_dim();
        let (pool_size, strides): (TVec<usize>, TVec<usize>) = if self.global {
            (input.hw_dims().into(), tvec![1; input.hw_rank()])
        } else {
            (self.pool_size.clone(), self.strides.clone())
        };
        let taps: usize = pool_size.iter().product();
        ensure!(taps > 0, "Empty pooling window {:?}", pool_size);

        let eye = Array2::<f32>::eye(channels) / taps as f32;
        let kernel_shape: TVec<usize> =
            pool_size.iter().copied().chain([channels, channels]).collect();
        let n = kernel_shape.len();
        let kernel = ArrayD::from_shape_fn(IxDyn(&kernel_shape), |ix| eye[[ix[n - 2], ix[n - 1]]]);
        let transform = ConvolutionTransform::new(
            channels,
            &input_shape,
            &pool_size,
            &strides,
            PaddingSpec::Valid,
            data_format.is_channels_last(),
            kernel,
        )?;

        let output = session.build_target(self.layer, invocation, None, None)?;
        let weights = Transform::Convolution(transform);
        session.wire_input(self.layer, invocation, output.clone(), 0, false, weights)?;
        Ok(Some(output))
    }
}
