//! Direct (non-im2col) N-d convolution and pooling over batch-free arrays.
//!
//! Arrays are channel-last internally; the `DataFormat` aware entry points
//! permute channel-first arrays in and out.

use ndarray::{ArrayD, ArrayViewD, Axis, Dimension, IxDyn};

use crate::internal::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Avg,
    Max,
}

#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct Geometry {
    pub kernel: TVec<usize>,
    pub strides: TVec<usize>,
    pub dilations: TVec<usize>,
    pub padding: PaddingSpec,
}

impl Geometry {
    fn check(&self, spatial: usize) -> CastResult<()> {
        ensure!(
            self.kernel.len() == spatial
                && self.strides.len() == spatial
                && self.dilations.len() == spatial,
            "Geometry {:?} does not match {} spatial axes",
            self,
            spatial
        );
        ensure!(self.strides.iter().all(|s| *s > 0), "Strides must be positive");
        Ok(())
    }

    /// Visits every (output position, input position) pair inside the padded window.
    fn for_each_tap(
        &self,
        input_spatial: &[usize],
        mut f: impl FnMut(usize, &[usize], &[usize]),
    ) -> TVec<ComputedPaddedDim> {
        let dims =
            self.padding.compute(input_spatial, &self.kernel, &self.dilations, &self.strides);
        let out_spatial: TVec<usize> = dims.iter().map(|d| d.output).collect();
        let mut in_ix: TVec<usize> = tvec![0; input_spatial.len()];
        for (flat, o) in ndarray::indices(IxDyn(&out_spatial)).into_iter().enumerate() {
            'taps: for k in ndarray::indices(IxDyn(&self.kernel)) {
                for (ax, d) in dims.iter().enumerate() {
                    let pos = (o[ax] * self.strides[ax] + k[ax] * self.dilations[ax]) as isize
                        - d.pad_before as isize;
                    if pos < 0 || pos as usize >= d.input {
                        continue 'taps;
                    }
                    in_ix[ax] = pos as usize;
                }
                f(flat, &in_ix, k.slice());
            }
        }
        dims
    }
}

fn output_shape(dims: &[ComputedPaddedDim], channels: usize) -> Vec<usize> {
    dims.iter().map(|d| d.output).chain(std::iter::once(channels)).collect()
}

/// Convolution of a `(spatial.., c_in)` input with a `(kernel.., c_in, c_out)` kernel.
pub fn conv_hwc(
    input: ArrayViewD<f32>,
    kernel: ArrayViewD<f32>,
    geometry: &Geometry,
) -> CastResult<ArrayD<f32>> {
    let spatial = input.ndim().checked_sub(1).context("Convolution input needs a channel axis")?;
    geometry.check(spatial)?;
    ensure!(
        kernel.ndim() == spatial + 2 && kernel.shape()[..spatial] == geometry.kernel[..],
        "Kernel shape {:?} does not match geometry {:?}",
        kernel.shape(),
        geometry
    );
    let cin = input.shape()[spatial];
    ensure!(
        kernel.shape()[spatial] == cin,
        "Kernel expects {} input channels, input has {}",
        kernel.shape()[spatial],
        cin
    );
    let cout = kernel.shape()[spatial + 1];
    let mut acc = Vec::<f32>::new();
    let mut x_ix: TVec<usize> = tvec![0; spatial + 1];
    let mut w_ix: TVec<usize> = tvec![0; spatial + 2];
    let dims = geometry.for_each_tap(&input.shape()[..spatial], |flat, in_ix, k| {
        if acc.len() < (flat + 1) * cout {
            acc.resize((flat + 1) * cout, 0.0);
        }
        x_ix[..spatial].copy_from_slice(in_ix);
        w_ix[..spatial].copy_from_slice(k);
        for ci in 0..cin {
            x_ix[spatial] = ci;
            w_ix[spatial] = ci;
            let x = input[&*x_ix];
            for co in 0..cout {
                w_ix[spatial + 1] = co;
                acc[flat * cout + co] += x * kernel[&*w_ix];
            }
        }
    });
    let shape = output_shape(&dims, cout);
    acc.resize(shape.iter().product(), 0.0);
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), acc)?)
}

/// Pooling of a `(spatial.., c)` input; averages only count taps inside the input.
pub fn pool_hwc(
    input: ArrayViewD<f32>,
    geometry: &Geometry,
    kind: PoolKind,
) -> CastResult<ArrayD<f32>> {
    let spatial = input.ndim().checked_sub(1).context("Pooling input needs a channel axis")?;
    geometry.check(spatial)?;
    let c = input.shape()[spatial];
    let init = match kind {
        PoolKind::Avg => 0.0,
        PoolKind::Max => f32::NEG_INFINITY,
    };
    let mut acc = Vec::<f32>::new();
    let mut counts = Vec::<usize>::new();
    let mut x_ix: TVec<usize> = tvec![0; spatial + 1];
    let dims = geometry.for_each_tap(&input.shape()[..spatial], |flat, in_ix, _| {
        if counts.len() <= flat {
            counts.resize(flat + 1, 0);
            acc.resize((flat + 1) * c, init);
        }
        counts[flat] += 1;
        x_ix[..spatial].copy_from_slice(in_ix);
        for ch in 0..c {
            x_ix[spatial] = ch;
            let x = input[&*x_ix];
            let slot = &mut acc[flat * c + ch];
            match kind {
                PoolKind::Avg => *slot += x,
                PoolKind::Max => *slot = slot.max(x),
            }
        }
    });
    if kind == PoolKind::Avg {
        for (flat, n) in counts.iter().enumerate().filter(|(_, n)| **n > 0) {
            acc[flat * c..(flat + 1) * c].iter_mut().for_each(|v| *v /= *n as f32);
        }
    }
    let shape = output_shape(&dims, c);
    acc.resize(shape.iter().product(), init);
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), acc)?)
}

fn in_hwc(
    input: ArrayViewD<f32>,
    fmt: DataFormat,
    f: impl FnOnce(ArrayViewD<f32>) -> CastResult<ArrayD<f32>>,
) -> CastResult<ArrayD<f32>> {
    let rank = input.ndim();
    let hwc = input.permuted_axes(&*fmt.to_hwc_permutation(rank));
    let out = f(hwc)?;
    Ok(out.permuted_axes(&*fmt.from_hwc_permutation(rank)).as_standard_layout().into_owned())
}

pub fn conv(
    input: ArrayViewD<f32>,
    kernel: ArrayViewD<f32>,
    geometry: &Geometry,
    fmt: DataFormat,
) -> CastResult<ArrayD<f32>> {
    in_hwc(input, fmt, |x| conv_hwc(x, kernel, geometry))
}

pub fn pool(
    input: ArrayViewD<f32>,
    geometry: &Geometry,
    kind: PoolKind,
    fmt: DataFormat,
) -> CastResult<ArrayD<f32>> {
    in_hwc(input, fmt, |x| pool_hwc(x, geometry, kind))
}

/// Reduces every spatial axis, leaving one value per channel.
pub fn global_pool(
    input: ArrayViewD<f32>,
    kind: PoolKind,
    fmt: DataFormat,
) -> CastResult<ArrayD<f32>> {
    let rank = input.ndim();
    ensure!(rank >= 2, "Global pooling needs spatial axes, got rank {}", rank);
    let c_axis = fmt.c_axis(rank);
    let channels = input.shape()[c_axis];
    let values: Vec<f32> = input
        .axis_iter(Axis(c_axis))
        .map(|lane| match kind {
            PoolKind::Avg => lane.sum() / lane.len() as f32,
            PoolKind::Max => lane.fold(f32::NEG_INFINITY, |a, b| a.max(*b)),
        })
        .collect();
    Ok(ArrayD::from_shape_vec(IxDyn(&[channels]), values)?)
}
