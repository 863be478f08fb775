use std::borrow::Cow;

use ndarray::{ArrayD, ArrayViewD, Dimension, IxDyn, Slice};

use super::conv::data_format_name;
use super::{LayerOp, check_arity, join_channels, one_output, per_sample, split_channels};
use crate::internal::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Interpolation {
    #[default]
    Nearest,
    Bilinear,
}

impl Interpolation {
    pub fn name(&self) -> &'static str {
        match self {
            Interpolation::Nearest => "nearest",
            Interpolation::Bilinear => "bilinear",
        }
    }
}

/// Repeats every spatial position `size` times along each spatial axis.
#[derive(Debug, Clone, PartialEq)]
pub struct UpSampling {
    pub size: TVec<usize>,
    pub data_format: DataFormat,
    pub interpolation: Interpolation,
}

impl UpSampling {
    pub fn new(size: &[usize]) -> UpSampling {
        UpSampling {
            size: size.into(),
            data_format: DataFormat::HWC,
            interpolation: Interpolation::Nearest,
        }
    }

    pub fn with_data_format(self, data_format: DataFormat) -> UpSampling {
        UpSampling { data_format, ..self }
    }

    pub fn with_interpolation(self, interpolation: Interpolation) -> UpSampling {
        UpSampling { interpolation, ..self }
    }

    pub fn rank(&self) -> usize {
        self.size.len()
    }

    fn upsample(&self, x: ArrayViewD<f32>) -> CastResult<ArrayD<f32>> {
        let axes = self.data_format.hw_axes(x.ndim());
        ensure!(
            axes.len() == self.rank(),
            "UpSampling{}D got a rank {} sample",
            self.rank(),
            x.ndim()
        );
        let mut shape = x.shape().to_vec();
        for (i, ax) in axes.clone().enumerate() {
            shape[ax] *= self.size[i];
        }
        Ok(match self.interpolation {
            Interpolation::Nearest => ArrayD::from_shape_fn(IxDyn(&shape), |mut ix| {
                for (i, ax) in axes.clone().enumerate() {
                    ix[ax] /= self.size[i];
                }
                x[ix.slice()]
            }),
            Interpolation::Bilinear => ArrayD::from_shape_fn(IxDyn(&shape), |ix| {
                // half-pixel centres, clamped at the borders
                let taps: TVec<(usize, usize, f32)> = axes
                    .clone()
                    .enumerate()
                    .map(|(i, ax)| {
                        let len = x.shape()[ax];
                        let src = ((ix[ax] as f32 + 0.5) / self.size[i] as f32 - 0.5).max(0.0);
                        let lo = (src.floor() as usize).min(len - 1);
                        let hi = (lo + 1).min(len - 1);
                        (lo, hi, src - lo as f32)
                    })
                    .collect();
                let mut acc = 0.0;
                for corner in 0..(1usize << taps.len()) {
                    let mut src = ix.clone();
                    let mut weight = 1.0;
                    for (bit, (ax, (lo, hi, frac))) in axes.clone().zip(taps.iter()).enumerate() {
                        if corner & (1 << bit) == 0 {
                            src[ax] = *lo;
                            weight *= 1.0 - frac;
                        } else {
                            src[ax] = *hi;
                            weight *= frac;
                        }
                    }
                    acc += weight * x[src.slice()];
                }
                acc
            }),
        })
    }
}

impl LayerOp for UpSampling {
    fn type_name(&self) -> Cow<'_, str> {
        format!("UpSampling{}D", self.rank()).into()
    }

    fn option(&self, name: &str) -> Option<ArgValue> {
        match name {
            "size" => Some(self.size.as_slice().into()),
            "data_format" if self.rank() > 1 => Some(data_format_name(self.data_format).into()),
            "interpolation" if self.rank() == 2 => Some(self.interpolation.name().into()),
            _ => None,
        }
    }

    fn output_shapes(&self, inputs: &[&ShapeFact]) -> CastResult<TVec<ShapeFact>> {
        check_arity(inputs, 1, "UpSampling")?;
        let (spatial, c) = split_channels(inputs[0], self.data_format)?;
        ensure!(spatial.len() == self.rank(), "{} got input {}", self.type_name(), inputs[0]);
        let out: TVec<Option<usize>> =
            spatial.iter().zip(self.size.iter()).map(|(d, s)| d.map(|d| d * s)).collect();
        Ok(tvec!(join_channels(inputs[0].dims()[0], &out, c, self.data_format)))
    }

    fn forward(&self, inputs: &[ArrayViewD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        check_arity(inputs, 1, "UpSampling")?;
        one_output(per_sample(&inputs[0], |x| self.upsample(x))?)
    }
}

/// Pads spatial axes with zeros, `(before, after)` per axis.
#[derive(Debug, Clone, PartialEq)]
pub struct ZeroPadding {
    pub padding: TVec<(usize, usize)>,
    pub data_format: DataFormat,
}

impl ZeroPadding {
    pub fn new(padding: &[(usize, usize)]) -> ZeroPadding {
        ZeroPadding { padding: padding.into(), data_format: DataFormat::HWC }
    }

    pub fn with_data_format(self, data_format: DataFormat) -> ZeroPadding {
        ZeroPadding { data_format, ..self }
    }

    pub fn rank(&self) -> usize {
        self.padding.len()
    }
}

impl LayerOp for ZeroPadding {
    fn type_name(&self) -> Cow<'_, str> {
        format!("ZeroPadding{}D", self.rank()).into()
    }

    fn option(&self, name: &str) -> Option<ArgValue> {
        match name {
            "padding" => Some(ArgValue::Ints(
                self.padding.iter().flat_map(|(a, b)| [*a as i64, *b as i64]).collect(),
            )),
            "data_format" if self.rank() > 1 => Some(data_format_name(self.data_format).into()),
            _ => None,
        }
    }

    fn output_shapes(&self, inputs: &[&ShapeFact]) -> CastResult<TVec<ShapeFact>> {
        check_arity(inputs, 1, "ZeroPadding")?;
        let (spatial, c) = split_channels(inputs[0], self.data_format)?;
        ensure!(spatial.len() == self.rank(), "{} got input {}", self.type_name(), inputs[0]);
        let out: TVec<Option<usize>> = spatial
            .iter()
            .zip(self.padding.iter())
            .map(|(d, (a, b))| d.map(|d| d + a + b))
            .collect();
        Ok(tvec!(join_channels(inputs[0].dims()[0], &out, c, self.data_format)))
    }

    fn forward(&self, inputs: &[ArrayViewD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        check_arity(inputs, 1, "ZeroPadding")?;
        let x = &inputs[0];
        // batched: spatial axes are shifted by one
        let axes = self.data_format.hw_axes(x.ndim() - 1);
        let mut shape = x.shape().to_vec();
        let mut ranges: Vec<Slice> = x.shape().iter().map(|d| Slice::from(0..*d)).collect();
        for (i, ax) in axes.enumerate() {
            let (before, after) = self.padding[i];
            shape[ax + 1] += before + after;
            ranges[ax + 1] = Slice::from(before..before + x.shape()[ax + 1]);
        }
        let mut y = ArrayD::zeros(IxDyn(&shape));
        y.slice_each_axis_mut(|ax| ranges[ax.axis.index()]).assign(x);
        one_output(y)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nearest_repeats_blocks() {
        let up = UpSampling::new(&[2]);
        let x = ArrayD::from_shape_vec(IxDyn(&[1, 2, 1]), vec![1.0, 2.0]).unwrap();
        let y = up.forward(&[x.view()]).unwrap().remove(0);
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), vec![1.0, 1.0, 2.0, 2.0]);
        assert_eq!(up.option("interpolation"), None);
    }

    #[test]
    fn bilinear_midpoints() {
        let up = UpSampling::new(&[2, 1]).with_interpolation(Interpolation::Bilinear);
        let x = ArrayD::from_shape_vec(IxDyn(&[1, 2, 1, 1]), vec![0.0, 4.0]).unwrap();
        let y = up.forward(&[x.view()]).unwrap().remove(0);
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), vec![0.0, 1.0, 3.0, 4.0]);
    }

    #[test]
    fn zero_padding_channels_first() {
        let pad = ZeroPadding::new(&[(1, 0), (0, 1)]).with_data_format(DataFormat::CHW);
        let x = ArrayD::from_elem(IxDyn(&[1, 1, 1, 1]), 5.0f32);
        let y = pad.forward(&[x.view()]).unwrap().remove(0);
        assert_eq!(y.shape(), &[1, 1, 2, 2]);
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0, 5.0, 0.0]);
        let input = ShapeFact::from_dims([None, Some(1), Some(1), Some(1)]);
        let shape = pad.output_shapes(&[&input]).unwrap();
        assert_eq!(shape[0], ShapeFact::from_dims([None, Some(1), Some(2), Some(2)]));
    }
}
