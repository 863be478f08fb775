use std::borrow::Cow;

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};

use super::{LayerOp, check_arity, one_output};
use crate::internal::*;

#[derive(Debug, Clone, PartialEq, new)]
pub struct Concatenate {
    /// Counted on the batched shape.
    pub axis: isize,
}

impl Default for Concatenate {
    fn default() -> Concatenate {
        Concatenate { axis: -1 }
    }
}

impl LayerOp for Concatenate {
    fn type_name(&self) -> Cow<'_, str> {
        "Concatenate".into()
    }

    fn option(&self, name: &str) -> Option<ArgValue> {
        match name {
            "axis" => Some(self.axis.into()),
            _ => None,
        }
    }

    fn output_shapes(&self, inputs: &[&ShapeFact]) -> CastResult<TVec<ShapeFact>> {
        ensure!(inputs.len() >= 2, "Concatenate needs at least two inputs");
        let rank = inputs[0].rank();
        let axis = axis_index(self.axis, rank)?;
        let mut dims = inputs[0].0.clone();
        for input in &inputs[1..] {
            ensure!(input.rank() == rank, "Concatenate inputs have different ranks");
            for (ax, (d, other)) in dims.iter_mut().zip(input.dims()).enumerate() {
                if ax == axis {
                    *d = d.zip(*other).map(|(a, b)| a + b);
                } else if d.is_none() {
                    *d = *other;
                }
            }
        }
        Ok(tvec!(ShapeFact(dims)))
    }

    fn forward(&self, inputs: &[ArrayViewD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        ensure!(!inputs.is_empty(), "Concatenate needs inputs");
        let axis = axis_index(self.axis, inputs[0].ndim())?;
        one_output(ndarray::concatenate(Axis(axis), inputs)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flatten;

impl LayerOp for Flatten {
    fn type_name(&self) -> Cow<'_, str> {
        "Flatten".into()
    }

    fn output_shapes(&self, inputs: &[&ShapeFact]) -> CastResult<TVec<ShapeFact>> {
        check_arity(inputs, 1, "Flatten")?;
        let inner = inputs[0].without_batch();
        Ok(tvec!(ShapeFact::from_dims([inputs[0].dims()[0], inner.volume()])))
    }

    fn forward(&self, inputs: &[ArrayViewD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        check_arity(inputs, 1, "Flatten")?;
        let batch = inputs[0].shape()[0];
        let volume = inputs[0].len() / batch.max(1);
        one_output(inputs[0].to_shape(IxDyn(&[batch, volume]))?.into_owned())
    }
}

/// Reshape of the non-batch dimensions; at most one entry may be `-1`.
#[derive(Debug, Clone, PartialEq, new)]
pub struct Reshape {
    pub target_shape: TVec<isize>,
}

impl Reshape {
    fn resolve(&self, volume: usize) -> CastResult<TVec<usize>> {
        let known: isize = self.target_shape.iter().filter(|d| **d != -1).product();
        let wildcards = self.target_shape.iter().filter(|d| **d == -1).count();
        ensure!(wildcards <= 1, "Reshape target {:?} has more than one -1", self.target_shape);
        ensure!(
            known > 0 && volume % known as usize == 0,
            "Cannot reshape {} elements to {:?}",
            volume,
            self.target_shape
        );
        let fill = volume / known as usize;
        let dims: TVec<usize> =
            self.target_shape.iter().map(|d| if *d == -1 { fill } else { *d as usize }).collect();
        ensure!(
            dims.iter().product::<usize>() == volume,
            "Cannot reshape {} elements to {:?}",
            volume,
            self.target_shape
        );
        Ok(dims)
    }
}

impl LayerOp for Reshape {
    fn type_name(&self) -> Cow<'_, str> {
        "Reshape".into()
    }

    fn option(&self, name: &str) -> Option<ArgValue> {
        match name {
            "target_shape" => Some(self.target_shape.as_slice().into()),
            _ => None,
        }
    }

    fn output_shapes(&self, inputs: &[&ShapeFact]) -> CastResult<TVec<ShapeFact>> {
        check_arity(inputs, 1, "Reshape")?;
        let batch = inputs[0].dims()[0];
        let dims: TVec<Option<usize>> = match inputs[0].without_batch().volume() {
            Some(volume) => self.resolve(volume)?.into_iter().map(Some).collect(),
            None => self
                .target_shape
                .iter()
                .map(|d| if *d < 0 { None } else { Some(*d as usize) })
                .collect(),
        };
        Ok(tvec!(ShapeFact(dims).with_batch(batch)))
    }

    fn forward(&self, inputs: &[ArrayViewD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        check_arity(inputs, 1, "Reshape")?;
        let batch = inputs[0].shape()[0];
        let mut shape = vec![batch];
        shape.extend(self.resolve(inputs[0].len() / batch.max(1))?);
        one_output(inputs[0].to_shape(IxDyn(&shape))?.into_owned())
    }
}
