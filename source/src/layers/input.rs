use std::borrow::Cow;

use ndarray::{ArrayD, ArrayViewD};

use super::{LayerOp, one_output};
use crate::internal::*;

/// Entry point of a model. When a model is called on new tensors its input
/// layers get a passthrough invocation carrying the caller's tensor.
#[derive(Debug, Clone, PartialEq, new)]
pub struct InputLayer {
    /// Batched declared shape.
    pub shape: ShapeFact,
}

impl LayerOp for InputLayer {
    fn type_name(&self) -> Cow<'_, str> {
        "InputLayer".into()
    }

    fn output_shapes(&self, inputs: &[&ShapeFact]) -> CastResult<TVec<ShapeFact>> {
        ensure!(inputs.len() <= 1, "InputLayer takes at most one tensor");
        if let Some(fed) = inputs.first() {
            ensure!(
                fed.rank() == self.shape.rank(),
                "InputLayer declared {} but was called on {}",
                self.shape,
                fed
            );
        }
        Ok(tvec!(self.shape.clone()))
    }

    fn forward(&self, inputs: &[ArrayViewD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        let fed = inputs.first().context("No value fed to input layer")?;
        one_output(fed.to_owned())
    }
}
