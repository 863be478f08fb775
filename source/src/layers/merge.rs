use std::borrow::Cow;

use ndarray::{ArrayD, ArrayViewD};

use super::{LayerOp, one_output};
use crate::internal::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeOp {
    Add,
    Average,
}

/// Elementwise merge of same-shaped inputs.
#[derive(Debug, Clone, PartialEq, new)]
pub struct Merge {
    pub op: MergeOp,
}

impl Merge {
    pub fn add() -> Merge {
        Merge::new(MergeOp::Add)
    }

    pub fn average() -> Merge {
        Merge::new(MergeOp::Average)
    }
}

impl LayerOp for Merge {
    fn type_name(&self) -> Cow<'_, str> {
        match self.op {
            MergeOp::Add => "Add".into(),
            MergeOp::Average => "Average".into(),
        }
    }

    fn output_shapes(&self, inputs: &[&ShapeFact]) -> CastResult<TVec<ShapeFact>> {
        ensure!(inputs.len() >= 2, "{} needs at least two inputs", self.type_name());
        for input in &inputs[1..] {
            ensure!(
                input.without_batch() == inputs[0].without_batch(),
                "{} inputs have different shapes: {} and {}",
                self.type_name(),
                inputs[0],
                input
            );
        }
        Ok(tvec!(inputs[0].clone()))
    }

    fn forward(&self, inputs: &[ArrayViewD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        ensure!(!inputs.is_empty(), "{} needs inputs", self.type_name());
        let mut sum = inputs[0].to_owned();
        for input in &inputs[1..] {
            sum += input;
        }
        if self.op == MergeOp::Average {
            let n = inputs.len() as f32;
            sum.mapv_inplace(|v| v / n);
        }
        one_output(sum)
    }
}
