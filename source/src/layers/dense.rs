use std::borrow::Cow;

use ndarray::{Array1, Array2, ArrayD, ArrayViewD, Axis, IxDyn};

use super::{LayerOp, check_arity, one_output};
use crate::internal::*;

/// Regularizers and constraints only matter while training; their names are
/// kept so that converters can refuse them outside inference-only mode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Regularization {
    pub kernel_regularizer: Option<String>,
    pub bias_regularizer: Option<String>,
    pub activity_regularizer: Option<String>,
    pub kernel_constraint: Option<String>,
    pub bias_constraint: Option<String>,
}

impl Regularization {
    pub fn option(&self, name: &str) -> Option<ArgValue> {
        let value = match name {
            "kernel_regularizer" => &self.kernel_regularizer,
            "bias_regularizer" => &self.bias_regularizer,
            "activity_regularizer" => &self.activity_regularizer,
            "kernel_constraint" => &self.kernel_constraint,
            "bias_constraint" => &self.bias_constraint,
            _ => return None,
        };
        Some(value.as_deref().into())
    }
}

/// Affine layer on the last axis: `activation(x . kernel + bias)`.
#[derive(Debug, Clone, new)]
pub struct Dense {
    /// `(input features, units)`
    pub kernel: Array2<f32>,
    pub bias: Option<Array1<f32>>,
    pub activation: Activation,
    #[new(default)]
    pub regularization: Regularization,
}

impl Dense {
    pub fn units(&self) -> usize {
        self.kernel.ncols()
    }

    pub fn with_regularization(self, regularization: Regularization) -> Dense {
        Dense { regularization, ..self }
    }
}

impl LayerOp for Dense {
    fn type_name(&self) -> Cow<'_, str> {
        "Dense".into()
    }

    fn option(&self, name: &str) -> Option<ArgValue> {
        match name {
            "units" => Some(self.units().into()),
            "activation" => Some(self.activation.name().into()),
            "use_bias" => Some(self.bias.is_some().into()),
            other => self.regularization.option(other),
        }
    }

    fn output_shapes(&self, inputs: &[&ShapeFact]) -> CastResult<TVec<ShapeFact>> {
        check_arity(inputs, 1, "Dense")?;
        let mut dims = inputs[0].0.clone();
        let last = dims.last_mut().context("Dense needs at least one axis")?;
        if let Some(features) = last {
            ensure!(
                *features == self.kernel.nrows(),
                "Dense kernel expects {} features, input has {}",
                self.kernel.nrows(),
                features
            );
        }
        *last = Some(self.units());
        Ok(tvec!(ShapeFact(dims)))
    }

    fn forward(&self, inputs: &[ArrayViewD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        check_arity(inputs, 1, "Dense")?;
        let x = &inputs[0];
        let features = self.kernel.nrows();
        let rows = x.len() / features.max(1);
        let flat = x.to_shape((rows, features))?;
        let mut y = flat.dot(&self.kernel);
        if let Some(bias) = &self.bias {
            y += &bias.view().insert_axis(Axis(0));
        }
        let mut shape = x.shape().to_vec();
        if let Some(last) = shape.last_mut() {
            *last = self.units();
        }
        let y = y.into_shape_with_order(IxDyn(&shape))?;
        one_output(self.activation.apply(y))
    }

    fn trainable_parameter_count(&self) -> usize {
        self.kernel.len() + self.bias.as_ref().map(|b| b.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    #[test]
    fn applies_on_last_axis() {
        let kernel = array![[1.0, 0.0], [0.0, 2.0]];
        let dense = Dense::new(kernel, Some(array![0.5, -10.0]), Activation::Relu);
        let x = ArrayD::from_shape_vec(IxDyn(&[1, 2, 2]), vec![1.0, 1.0, 3.0, 4.0]).unwrap();
        let y = dense.forward(&[x.view()]).unwrap().remove(0);
        assert_eq!(y.shape(), &[1, 2, 2]);
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), vec![1.5, 0.0, 3.5, 0.0]);
        assert_eq!(dense.trainable_parameter_count(), 6);
    }

    #[test]
    fn regularizers_are_options() {
        let dense = Dense::new(Array2::zeros((2, 2)), None, Activation::Linear).with_regularization(
            Regularization { kernel_regularizer: Some("l2".into()), ..Regularization::default() },
        );
        assert_eq!(dense.option("kernel_regularizer"), Some(ArgValue::Str("l2".into())));
        assert_eq!(dense.option("bias_constraint"), Some(ArgValue::None));
        assert_eq!(dense.option("dilation_rate"), None);
    }
}
