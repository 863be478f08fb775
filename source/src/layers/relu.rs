use std::borrow::Cow;

use ndarray::{ArrayD, ArrayViewD};

use super::{LayerOp, check_arity, one_output};
use crate::internal::*;

#[derive(Debug, Clone, PartialEq, new)]
pub struct ActivationLayer {
    pub activation: Activation,
}

impl LayerOp for ActivationLayer {
    fn type_name(&self) -> Cow<'_, str> {
        "Activation".into()
    }

    fn option(&self, name: &str) -> Option<ArgValue> {
        match name {
            "activation" => Some(self.activation.name().into()),
            _ => None,
        }
    }

    fn output_shapes(&self, inputs: &[&ShapeFact]) -> CastResult<TVec<ShapeFact>> {
        check_arity(inputs, 1, "Activation")?;
        Ok(tvec!(inputs[0].clone()))
    }

    fn forward(&self, inputs: &[ArrayViewD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        check_arity(inputs, 1, "Activation")?;
        one_output(self.activation.apply(inputs[0].to_owned()))
    }
}

/// `max_value` if `x >= max_value`, `x` if `threshold <= x`, else
/// `negative_slope * (x - threshold)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReLU {
    pub max_value: Option<f32>,
    pub negative_slope: f32,
    pub threshold: f32,
}

impl ReLU {
    pub fn new(max_value: Option<f32>, negative_slope: f32, threshold: f32) -> ReLU {
        ReLU { max_value, negative_slope, threshold }
    }

    fn eval(&self, x: f32) -> f32 {
        if let Some(max) = self.max_value {
            if x >= max {
                return max;
            }
        }
        if x >= self.threshold { x } else { self.negative_slope * (x - self.threshold) }
    }
}

impl LayerOp for ReLU {
    fn type_name(&self) -> Cow<'_, str> {
        "ReLU".into()
    }

    fn option(&self, name: &str) -> Option<ArgValue> {
        match name {
            "max_value" => Some(self.max_value.into()),
            "negative_slope" => Some(self.negative_slope.into()),
            "threshold" => Some(self.threshold.into()),
            _ => None,
        }
    }

    fn output_shapes(&self, inputs: &[&ShapeFact]) -> CastResult<TVec<ShapeFact>> {
        check_arity(inputs, 1, "ReLU")?;
        Ok(tvec!(inputs[0].clone()))
    }

    fn forward(&self, inputs: &[ArrayViewD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        check_arity(inputs, 1, "ReLU")?;
        one_output(inputs[0].mapv(|x| self.eval(x)))
    }
}

#[derive(Debug, Clone, PartialEq, new)]
pub struct LeakyReLU {
    pub alpha: f32,
}

impl Default for LeakyReLU {
    fn default() -> LeakyReLU {
        LeakyReLU { alpha: 0.3 }
    }
}

impl LayerOp for LeakyReLU {
    fn type_name(&self) -> Cow<'_, str> {
        "LeakyReLU".into()
    }

    fn option(&self, name: &str) -> Option<ArgValue> {
        match name {
            "alpha" => Some(self.alpha.into()),
            _ => None,
        }
    }

    fn output_shapes(&self, inputs: &[&ShapeFact]) -> CastResult<TVec<ShapeFact>> {
        check_arity(inputs, 1, "LeakyReLU")?;
        Ok(tvec!(inputs[0].clone()))
    }

    fn forward(&self, inputs: &[ArrayViewD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        check_arity(inputs, 1, "LeakyReLU")?;
        one_output(inputs[0].mapv(|x| if x > 0.0 { x } else { self.alpha * x }))
    }
}
