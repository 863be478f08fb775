use std::borrow::Cow;

use ndarray::{Array1, ArrayD, ArrayViewD, Axis};

use super::{LayerOp, check_arity, one_output};
use crate::internal::*;

/// Batch normalization with frozen moving statistics.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    /// Normalised axes, counted on the batched shape (negative from the end).
    pub axis: TVec<isize>,
    pub epsilon: f32,
    pub gamma: Option<Array1<f32>>,
    pub beta: Option<Array1<f32>>,
    pub moving_mean: Array1<f32>,
    pub moving_variance: Array1<f32>,
}

impl BatchNorm {
    pub fn new(
        moving_mean: Array1<f32>,
        moving_variance: Array1<f32>,
        gamma: Option<Array1<f32>>,
        beta: Option<Array1<f32>>,
    ) -> BatchNorm {
        BatchNorm { axis: tvec!(-1), epsilon: 1e-3, gamma, beta, moving_mean, moving_variance }
    }

    pub fn with_axis(self, axis: &[isize]) -> BatchNorm {
        BatchNorm { axis: axis.into(), ..self }
    }

    pub fn with_epsilon(self, epsilon: f32) -> BatchNorm {
        BatchNorm { epsilon, ..self }
    }

    /// Per-channel `(scale, offset)` such that `y = scale * x + offset`.
    pub fn affine(&self) -> (Array1<f32>, Array1<f32>) {
        let stddev = self.moving_variance.mapv(|v| (v + self.epsilon).sqrt());
        let scale = match &self.gamma {
            Some(gamma) => gamma / &stddev,
            None => stddev.mapv(|s| 1.0 / s),
        };
        let offset = match &self.beta {
            Some(beta) => beta - &(&scale * &self.moving_mean),
            None => -(&scale * &self.moving_mean),
        };
        (scale, offset)
    }
}

impl LayerOp for BatchNorm {
    fn type_name(&self) -> Cow<'_, str> {
        "BatchNormalization".into()
    }

    fn option(&self, name: &str) -> Option<ArgValue> {
        match name {
            "axis" => Some(self.axis.as_slice().into()),
            "epsilon" => Some(self.epsilon.into()),
            "center" => Some(self.beta.is_some().into()),
            "scale" => Some(self.gamma.is_some().into()),
            _ => None,
        }
    }

    fn output_shapes(&self, inputs: &[&ShapeFact]) -> CastResult<TVec<ShapeFact>> {
        check_arity(inputs, 1, "BatchNormalization")?;
        for ax in &self.axis {
            let ax = axis_index(*ax, inputs[0].rank())?;
            if let Some(d) = inputs[0].dims()[ax] {
                let stats = self.moving_mean.len();
                ensure!(d == stats, "Axis {} has {} entries, statistics have {}", ax, d, stats);
            }
        }
        Ok(tvec!(inputs[0].clone()))
    }

    fn forward(&self, inputs: &[ArrayViewD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        check_arity(inputs, 1, "BatchNormalization")?;
        ensure!(
            self.axis.len() == 1,
            "Only single-axis normalization is evaluated, got {:?}",
            self.axis
        );
        let axis = axis_index(self.axis[0], inputs[0].ndim())?;
        let (scale, offset) = self.affine();
        let mut y = inputs[0].to_owned();
        for (ix, mut lane) in y.axis_iter_mut(Axis(axis)).enumerate() {
            let (s, o) = (scale[ix], offset[ix]);
            lane.mapv_inplace(|v| s * v + o);
        }
        one_output(y)
    }

    fn trainable_parameter_count(&self) -> usize {
        let gamma = self.gamma.as_ref().map(|g| g.len()).unwrap_or(0);
        gamma + self.beta.as_ref().map(|b| b.len()).unwrap_or(0)
    }
}
