use std::fmt;
use std::str::FromStr;

use ndarray::{ArrayD, Axis};

use crate::internal::*;

/// Named elementwise nonlinearities, as they appear in layer configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Elu,
    Selu,
    Softplus,
    Softsign,
    Softmax,
    Swish,
    HardSigmoid,
    Exponential,
    Gelu,
}

impl Activation {
    pub fn name(&self) -> &'static str {
        use Activation::*;
        match self {
            Linear => "linear",
            Relu => "relu",
            Sigmoid => "sigmoid",
            Tanh => "tanh",
            Elu => "elu",
            Selu => "selu",
            Softplus => "softplus",
            Softsign => "softsign",
            Softmax => "softmax",
            Swish => "swish",
            HardSigmoid => "hard_sigmoid",
            Exponential => "exponential",
            Gelu => "gelu",
        }
    }

    pub fn is_elementwise(&self) -> bool {
        *self != Activation::Softmax
    }

    /// Scalar evaluation; softmax has no scalar form and is the identity here.
    pub fn eval_scalar(&self, x: f32) -> f32 {
        use Activation::*;
        match self {
            Linear | Softmax => x,
            Relu => x.max(0.0),
            Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Tanh => x.tanh(),
            Elu => {
                if x > 0.0 {
                    x
                } else {
                    x.exp_m1()
                }
            }
            Selu => {
                const ALPHA: f32 = 1.673_263_2;
                const SCALE: f32 = 1.050_701;
                if x > 0.0 { SCALE * x } else { SCALE * ALPHA * x.exp_m1() }
            }
            Softplus => x.exp().ln_1p(),
            Softsign => x / (1.0 + x.abs()),
            Swish => x / (1.0 + (-x).exp()),
            HardSigmoid => (0.2 * x + 0.5).clamp(0.0, 1.0),
            Exponential => x.exp(),
            Gelu => 0.5 * x * (1.0 + erf(x / std::f32::consts::SQRT_2)),
        }
    }

    /// Applies the activation to a batched array; softmax runs along the last axis.
    pub fn apply(&self, mut x: ArrayD<f32>) -> ArrayD<f32> {
        match self {
            Activation::Linear => x,
            Activation::Softmax => {
                let last = Axis(x.ndim().saturating_sub(1));
                for mut lane in x.lanes_mut(last) {
                    let max = lane.fold(f32::NEG_INFINITY, |a, b| a.max(*b));
                    lane.mapv_inplace(|v| (v - max).exp());
                    let sum = lane.sum();
                    lane.mapv_inplace(|v| v / sum);
                }
                x
            }
            other => {
                x.mapv_inplace(|v| other.eval_scalar(v));
                x
            }
        }
    }
}

// Abramowitz and Stegun 7.1.26
fn erf(x: f32) -> f32 {
    let t = 1.0 / (1.0 + 0.327_591_1 * x.abs());
    let poly = t
        * (0.254_829_6
                + t * (-0.284_496_74 + t * (1.421_413_8 + t * (-1.453_152_1 + t * 1.061_405_4))));
    let y = 1.0 - poly * (-x * x).exp();
    y.copysign(x)
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Activation {
    type Err = CastError;
    fn from_str(s: &str) -> CastResult<Activation> {
        use Activation::*;
        Ok(match s {
            "linear" => Linear,
            "relu" => Relu,
            "sigmoid" => Sigmoid,
            "tanh" => Tanh,
            "elu" => Elu,
            "selu" => Selu,
            "softplus" => Softplus,
            "softsign" => Softsign,
            "softmax" => Softmax,
            "swish" | "silu" => Swish,
            "hard_sigmoid" => HardSigmoid,
            "exponential" => Exponential,
            "gelu" => Gelu,
            _ => bail!("Unknown activation {}", s),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::IxDyn;

    #[test]
    fn parse_names() {
        for act in [Activation::Relu, Activation::HardSigmoid, Activation::Gelu] {
            assert_eq!(act.name().parse::<Activation>().unwrap(), act);
        }
        assert!("nope".parse::<Activation>().is_err());
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let x = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]).unwrap();
        let y = Activation::Softmax.apply(x);
        for row in y.lanes(Axis(1)) {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-6);
        }
        assert_abs_diff_eq!(y[[1, 0]], 1.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn scalar_values() {
        assert_eq!(Activation::Relu.eval_scalar(-2.0), 0.0);
        assert_abs_diff_eq!(Activation::Sigmoid.eval_scalar(0.0), 0.5);
        assert_abs_diff_eq!(Activation::Gelu.eval_scalar(1.0), 0.841_344_7, epsilon = 1e-4);
        assert_eq!(Activation::HardSigmoid.eval_scalar(10.0), 1.0);
    }
}
