//! Linear maps carried by connections.

use ndarray::{Array1, Array2, ArrayD, ArrayView2, IxDyn};
use ratecast_data::kernels::{self, Geometry};

use crate::internal::*;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Transform {
    /// Plain copy, carries no parameters.
    #[default]
    Identity,
    Scalar(f32),
    Diagonal(Array1<f32>),
    /// `(size_out, size_in)` weights.
    Dense(Array2<f32>),
    Sparse(SparseTransform),
    Convolution(ConvolutionTransform),
}

/// Weights at explicit `(output, input)` positions of a `shape` matrix.
#[derive(Debug, Clone, PartialEq, new)]
pub struct SparseTransform {
    pub shape: (usize, usize),
    pub indices: Vec<(usize, usize)>,
    pub init: Array1<f32>,
}

/// Convolution over a flattened input of `input_shape` (no batch axis).
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionTransform {
    pub n_filters: usize,
    pub input_shape: TVec<usize>,
    pub kernel_size: TVec<usize>,
    pub strides: TVec<usize>,
    pub padding: PaddingSpec,
    pub channels_last: bool,
    /// `(kernel_size.., channels_in, n_filters)`.
    pub init: ArrayD<f32>,
}

impl ConvolutionTransform {
    pub fn new(
        n_filters: usize,
        input_shape: &[usize],
        kernel_size: &[usize],
        strides: &[usize],
        padding: PaddingSpec,
        channels_last: bool,
        init: ArrayD<f32>,
    ) -> CastResult<ConvolutionTransform> {
        let t = ConvolutionTransform {
            n_filters,
            input_shape: input_shape.into(),
            kernel_size: kernel_size.into(),
            strides: strides.into(),
            padding,
            channels_last,
            init,
        };
        ensure!(
            t.input_shape.len() == t.kernel_size.len() + 1
                && t.strides.len() == t.kernel_size.len(),
            "Convolution over {:?} needs {} kernel and stride dims",
            t.input_shape,
            t.input_shape.len().saturating_sub(1)
        );
        let c_dim = t.input_shape_data().c_dim();
        let expected: TVec<usize> =
            t.kernel_size.iter().copied().chain([c_dim, n_filters]).collect();
        ensure!(
            t.init.shape() == &*expected,
            "Convolution kernel has shape {:?}, expected {:?}",
            t.init.shape(),
            expected
        );
        Ok(t)
    }

    pub fn data_format(&self) -> DataFormat {
        if self.channels_last { DataFormat::HWC } else { DataFormat::CHW }
    }

    fn input_shape_data(&self) -> DataShape {
        self.data_format().shape(&self.input_shape)
    }

    fn geometry(&self) -> Geometry {
        Geometry::new(
            self.kernel_size.clone(),
            self.strides.clone(),
            tvec![1; self.kernel_size.len()],
            self.padding,
        )
    }

    pub fn output_shape(&self) -> TVec<usize> {
        let input = self.input_shape_data();
        let dilations = tvec![1; self.kernel_size.len()];
        let dims =
            self.padding.compute(input.hw_dims(), &self.kernel_size, &dilations, &self.strides);
        let hw: TVec<usize> = dims.iter().map(|d| d.output).collect();
        self.data_format().from_c_hw(self.n_filters, &hw).shape
    }

    pub fn size_in(&self) -> usize {
        self.input_shape.iter().product()
    }

    pub fn size_out(&self) -> usize {
        self.output_shape().iter().product()
    }
}

impl Transform {
    /// Input size fixed by the transform itself, if any.
    pub fn size_in(&self) -> Option<usize> {
        match self {
            Transform::Identity | Transform::Scalar(_) => None,
            Transform::Diagonal(d) => Some(d.len()),
            Transform::Dense(w) => Some(w.ncols()),
            Transform::Sparse(s) => Some(s.shape.1),
            Transform::Convolution(c) => Some(c.size_in()),
        }
    }

    pub fn size_out(&self) -> Option<usize> {
        match self {
            Transform::Identity | Transform::Scalar(_) => None,
            Transform::Diagonal(d) => Some(d.len()),
            Transform::Dense(w) => Some(w.nrows()),
            Transform::Sparse(s) => Some(s.shape.0),
            Transform::Convolution(c) => Some(c.size_out()),
        }
    }

    /// Checks the transform maps `size_in` values onto `size_out` values.
    pub fn check(&self, size_in: usize, size_out: usize) -> CastResult<()> {
        let expected_in = self.size_in().unwrap_or(size_in);
        let expected_out = self.size_out().unwrap_or(size_in);
        ensure!(
            expected_in == size_in && expected_out == size_out,
            "Transform maps {} to {} values, connection has {} to {}",
            expected_in,
            expected_out,
            size_in,
            size_out
        );
        if let Transform::Sparse(s) = self {
            ensure!(
                s.indices.len() == s.init.len(),
                "Sparse transform has {} indices and {} values",
                s.indices.len(),
                s.init.len()
            );
            ensure!(
                s.indices.iter().all(|(r, c)| *r < s.shape.0 && *c < s.shape.1),
                "Sparse transform index out of {:?}",
                s.shape
            );
        }
        Ok(())
    }

    pub fn parameter_count(&self) -> usize {
        match self {
            Transform::Identity => 0,
            Transform::Scalar(_) => 1,
            Transform::Diagonal(d) => d.len(),
            Transform::Dense(w) => w.len(),
            Transform::Sparse(s) => s.init.len(),
            Transform::Convolution(c) => c.init.len(),
        }
    }

    /// Applies the transform to a `(batch, size_in)` array.
    pub fn apply(&self, x: ArrayView2<f32>) -> CastResult<Array2<f32>> {
        let (batch, size_in) = x.dim();
        if let Some(expected) = self.size_in() {
            ensure!(expected == size_in, "Transform expects {} inputs, got {}", expected, size_in);
        }
        let y = match self {
            Transform::Identity => x.to_owned(),
            Transform::Scalar(s) => x.mapv(|v| v * s),
            Transform::Diagonal(d) => &x * d,
            Transform::Dense(w) => x.dot(&w.t()),
            Transform::Sparse(s) => {
                let mut y = Array2::zeros((batch, s.shape.0));
                for ((row, col), w) in s.indices.iter().zip(s.init.iter()) {
                    for b in 0..batch {
                        y[[b, *row]] += w * x[[b, *col]];
                    }
                }
                y
            }
            Transform::Convolution(c) => {
                let geometry = c.geometry();
                let mut y = Array2::zeros((batch, c.size_out()));
                for (b, sample) in x.outer_iter().enumerate() {
                    let sample = sample.to_owned().into_shape_with_order(IxDyn(&c.input_shape))?;
                    let out =
                        kernels::conv(sample.view(), c.init.view(), &geometry, c.data_format())?;
                    y.row_mut(b).iter_mut().zip(out.iter()).for_each(|(y, v)| *y = *v);
                }
                y
            }
        };
        Ok(y)
    }
}
