use std::borrow::Cow;

use ndarray::{Array1, ArrayD, ArrayViewD, Axis};
use ratecast_data::kernels::{self, Geometry};

use super::{
    LayerOp, Regularization, check_arity, join_channels, one_output, per_sample, split_channels,
};
use crate::internal::*;

/// 1, 2 or 3-d convolution. The kernel is laid out `(kernel.., c_in, filters)`.
#[derive(Debug, Clone)]
pub struct Conv {
    pub kernel: ArrayD<f32>,
    pub bias: Option<Array1<f32>>,
    pub strides: TVec<usize>,
    pub dilation_rate: TVec<usize>,
    pub padding: PaddingSpec,
    pub data_format: DataFormat,
    pub activation: Activation,
    pub regularization: Regularization,
}

impl Conv {
    pub fn new(
        kernel: ArrayD<f32>,
        bias: Option<Array1<f32>>,
        activation: Activation,
    ) -> CastResult<Conv> {
        ensure!(
            (3..=5).contains(&kernel.ndim()),
            "Convolution kernel must be (kernel.., c_in, filters) with 1 to 3 spatial axes, \
             got {:?}",
            kernel.shape()
        );
        let spatial = kernel.ndim() - 2;
        if let Some(bias) = &bias {
            ensure!(bias.len() == kernel.shape()[spatial + 1], "Bias does not match filter count");
        }
        Ok(Conv {
            kernel,
            bias,
            strides: tvec![1; spatial],
            dilation_rate: tvec![1; spatial],
            padding: PaddingSpec::Valid,
            data_format: DataFormat::HWC,
            activation,
            regularization: Regularization::default(),
        })
    }

    pub fn with_strides(self, strides: &[usize]) -> Conv {
        Conv { strides: strides.into(), ..self }
    }

    pub fn with_dilation_rate(self, dilation_rate: &[usize]) -> Conv {
        Conv { dilation_rate: dilation_rate.into(), ..self }
    }

    pub fn with_padding(self, padding: PaddingSpec) -> Conv {
        Conv { padding, ..self }
    }

    pub fn with_data_format(self, data_format: DataFormat) -> Conv {
        Conv { data_format, ..self }
    }

    pub fn with_regularization(self, regularization: Regularization) -> Conv {
        Conv { regularization, ..self }
    }

    pub fn rank(&self) -> usize {
        self.kernel.ndim() - 2
    }

    pub fn kernel_size(&self) -> &[usize] {
        &self.kernel.shape()[..self.rank()]
    }

    pub fn filters(&self) -> usize {
        self.kernel.shape()[self.rank() + 1]
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::new(
            self.kernel_size().into(),
            self.strides.clone(),
            self.dilation_rate.clone(),
            self.padding,
        )
    }
}

impl LayerOp for Conv {
    fn type_name(&self) -> Cow<'_, str> {
        format!("Conv{}D", self.rank()).into()
    }

    fn option(&self, name: &str) -> Option<ArgValue> {
        match name {
            "filters" => Some(self.filters().into()),
            "kernel_size" => Some(self.kernel_size().into()),
            "strides" => Some(self.strides.as_slice().into()),
            "dilation_rate" => Some(self.dilation_rate.as_slice().into()),
            "padding" => Some(self.padding.name().into()),
            "data_format" => Some(data_format_name(self.data_format).into()),
            "activation" => Some(self.activation.name().into()),
            "use_bias" => Some(self.bias.is_some().into()),
            other => self.regularization.option(other),
        }
    }

    fn output_shapes(&self, inputs: &[&ShapeFact]) -> CastResult<TVec<ShapeFact>> {
        check_arity(inputs, 1, "Conv")?;
        let (spatial, c) = split_channels(inputs[0], self.data_format)?;
        ensure!(spatial.len() == self.rank(), "Conv{}D got input {}", self.rank(), inputs[0]);
        if let Some(c) = c {
            let expected = self.kernel.shape()[self.rank()];
            ensure!(c == expected, "Kernel expects {} channels, input has {}", expected, c);
        }
        let out: TVec<Option<usize>> = spatial
            .iter()
            .enumerate()
            .map(|(ax, d)| {
                d.map(|d| {
                    let k = self.kernel_size()[ax];
                    self.padding.compute_one(d, k, self.dilation_rate[ax], self.strides[ax]).output
                })
            })
            .collect();
        Ok(tvec!(join_channels(inputs[0].dims()[0], &out, Some(self.filters()), self.data_format)))
    }

    fn forward(&self, inputs: &[ArrayViewD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        check_arity(inputs, 1, "Conv")?;
        let geometry = self.geometry();
        let y = per_sample(&inputs[0], |x| {
            let mut y = kernels::conv(x, self.kernel.view(), &geometry, self.data_format)?;
            if let Some(bias) = &self.bias {
                let c_axis = self.data_format.c_axis(y.ndim());
                for (mut lane, b) in y.axis_iter_mut(Axis(c_axis)).zip(bias.iter()) {
                    lane.mapv_inplace(|v| v + b);
                }
            }
            Ok(y)
        })?;
        one_output(self.activation.apply(y))
    }

    fn trainable_parameter_count(&self) -> usize {
        self.kernel.len() + self.bias.as_ref().map(|b| b.len()).unwrap_or(0)
    }
}

pub(crate) fn data_format_name(fmt: DataFormat) -> &'static str {
    match fmt {
        DataFormat::HWC => "channels_last",
        DataFormat::CHW => "channels_first",
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn shapes_follow_padding() {
        let conv = Conv::new(ArrayD::zeros(IxDyn(&[3, 3, 2, 4])), None, Activation::Linear)
            .unwrap()
            .with_strides(&[2, 2])
            .with_padding(PaddingSpec::Same);
        let out = conv.output_shapes(&[&ShapeFact::batched(&[7, 8, 2])]).unwrap();
        assert_eq!(out[0], ShapeFact::batched(&[4, 4, 4]));
        assert_eq!(conv.type_name(), "Conv2D");
        assert_eq!(conv.option("dilation_rate"), Some(ArgValue::Ints(tvec![1, 1])));
    }

    #[test]
    fn channels_first_bias() {
        let kernel = ArrayD::from_elem(IxDyn(&[1, 1, 2]), 1.0f32);
        let conv = Conv::new(kernel, Some(ndarray::array![1.0, -1.0]), Activation::Linear)
            .unwrap()
            .with_data_format(DataFormat::CHW);
        let x = ArrayD::from_shape_vec(IxDyn(&[1, 1, 3]), vec![1.0, 2.0, 3.0]).unwrap();
        let y = conv.forward(&[x.view()]).unwrap().remove(0);
        assert_eq!(y.shape(), &[1, 2, 3]);
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0, 0.0, 1.0, 2.0]);
    }
}
