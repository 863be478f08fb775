use std::ops::Range;

use ndarray::{ArrayD, IxDyn};

use super::{LayerConverter, UnsupportedArg, kind_mismatch};
use crate::internal::*;
use crate::registry::Registry;
use crate::session::Converter;

pub fn register_all_ops(reg: &mut Registry) {
    for rank in 1..=3 {
        reg.insert(Some(&format!("UpSampling{rank}D")), upsampling);
        reg.insert(Some(&format!("ZeroPadding{rank}D")), zero_padding);
    }
}

fn upsampling(layer: &Layer) -> CastResult<Box<dyn LayerConverter>> {
    match &layer.kind {
        LayerKind::UpSampling(op) => {
            Ok(Box::new(UpSamplingConverter::new(layer.id, op.size.clone(), op.data_format)))
        }
        _ => Err(kind_mismatch(layer, "UpSampling")),
    }
}

fn zero_padding(layer: &Layer) -> CastResult<Box<dyn LayerConverter>> {
    match &layer.kind {
        LayerKind::ZeroPadding(op) => {
            Ok(Box::new(ZeroPaddingConverter::new(layer.id, op.padding.clone(), op.data_format)))
        }
        _ => Err(kind_mismatch(layer, "ZeroPadding")),
    }
}

/// Nearest-neighbour up-sampling: every output position reads the input
/// position it was repeated from.
#[derive(Debug, Clone, new)]
pub struct UpSamplingConverter {
    layer: LayerId,
    size: TVec<usize>,
    data_format: DataFormat,
}

impl UpSamplingConverter {
    /// Flat input index read by each output position, in output order.
    pub fn gather_indices(&self, input_shape: &[usize]) -> CastResult<Vec<usize>> {
        let axes = self.data_format.hw_axes(input_shape.len());
        ensure!(
            axes.len() == self.size.len(),
            "UpSampling{}D got input {:?}",
            self.size.len(),
            input_shape
        );
        let mut output_shape: TVec<usize> = input_shape.into();
        for (i, ax) in axes.clone().enumerate() {
            output_shape[ax] *= self.size[i];
        }
        let grid = index_grid(input_shape);
        let gathered = ArrayD::from_shape_fn(IxDyn(&output_shape), |mut ix| {
            for (i, ax) in axes.clone().enumerate() {
                ix[ax] /= self.size[i];
            }
            grid[ix]
        });
        Ok(gathered.into_iter().collect())
    }
}

impl LayerConverter for UpSamplingConverter {
    fn layer(&self) -> LayerId {
        self.layer
    }

    fn unsupported_args(&self) -> Vec<UnsupportedArg> {
        if self.size.len() == 2 {
            vec![UnsupportedArg::with_default("interpolation", "nearest")]
        } else {
            vec![]
        }
    }

    fn convert(&self, session: &mut Converter, invocation: usize) -> CastResult<Option<ObjView>> {
        let input_shape = session.input_shape(self.layer, invocation)?;
        let gather = self.gather_indices(&input_shape)?;
        let output = session.build_target(self.layer, invocation, None, None)?;
        let input = session.input_obj(self.layer, invocation, 0)?.slice(&gather)?;
        session.connect(input, output.clone(), Transform::Identity, Some(false))?;
        Ok(Some(output))
    }
}

/// Zero padding: the input fills the interior of a passthrough node, the
/// border receives nothing and stays at zero.
#[derive(Debug, Clone, new)]
pub struct ZeroPaddingConverter {
    layer: LayerId,
    padding: TVec<(usize, usize)>,
    data_format: DataFormat,
}

impl ZeroPaddingConverter {
    /// Flat output indices of the unpadded region.
    pub fn interior_indices(&self, output_shape: &[usize]) -> CastResult<Vec<usize>> {
        let axes = self.data_format.hw_axes(output_shape.len());
        ensure!(
            axes.len() == self.padding.len(),
            "ZeroPadding{}D got output {:?}",
            self.padding.len(),
            output_shape
        );
        let mut ranges: TVec<Range<usize>> = output_shape.iter().map(|d| 0..*d).collect();
        for (i, ax) in axes.enumerate() {
            let (before, after) = self.padding[i];
            ensure!(before + after <= output_shape[ax], "Padding exceeds output on axis {}", ax);
            ranges[ax] = before..output_shape[ax] - after;
        }
        select(output_shape, &ranges)
    }
}

impl LayerConverter for ZeroPaddingConverter {
    fn layer(&self) -> LayerId {
        self.layer
    }

    fn convert(&self, session: &mut Converter, invocation: usize) -> CastResult<Option<ObjView>> {
        let output_shape = session.output_shape(self.layer, invocation)?;
        let interior = self.interior_indices(&output_shape)?;
        let output = session.build_target(self.layer, invocation, None, None)?;
        let interior = output.slice(&interior)?;
        session.wire_input(self.layer, invocation, interior, 0, false, Transform::Identity)?;
        Ok(Some(output))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn interior_of_padded_row() {
        let padding = ZeroPaddingConverter::new(LayerId(0), tvec!((1, 2)), DataFormat::HWC);
        assert_eq!(padding.interior_indices(&[5, 2]).unwrap(), vec![2, 3, 4, 5]);
        let chw = ZeroPaddingConverter::new(LayerId(0), tvec!((1, 1), (0, 1)), DataFormat::CHW);
        assert_eq!(chw.interior_indices(&[1, 3, 3]).unwrap(), vec![3, 4]);
    }

    #[test]
    fn upsampling_repeats_channels_last() {
        let up = UpSamplingConverter::new(LayerId(0), tvec!(2), DataFormat::HWC);
        assert_eq!(up.gather_indices(&[2, 2]).unwrap(), vec![0, 1, 0, 1, 2, 3, 2, 3]);
    }

    proptest! {
        #[test]
        fn upsampling_is_block_repetition(
            h in 1usize..4,
            w in 1usize..4,
            sh in 1usize..4,
            sw in 1usize..4,
        ) {
            let up = UpSamplingConverter::new(LayerId(0), tvec!(sh, sw), DataFormat::CHW);
            let gather = up.gather_indices(&[1, h, w]).unwrap();
            prop_assert_eq!(gather.len(), h * sh * w * sw);
            for (flat, src) in gather.iter().enumerate() {
                let (oy, ox) = (flat / (w * sw), flat % (w * sw));
                prop_assert_eq!(*src, (oy / sh) * w + ox / sw);
            }
        }
    }
}
