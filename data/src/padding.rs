use crate::internal::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PaddingSpec {
    #[default]
    Valid,
    Same,
}

use PaddingSpec::*;

#[derive(Debug, Clone, new, PartialEq, Eq)]
pub struct ComputedPaddedDim {
    pub input: usize,
    pub output: usize,
    pub pad_before: usize,
    pub pad_after: usize,
}

impl PaddingSpec {
    pub fn name(&self) -> &'static str {
        match self {
            Valid => "valid",
            Same => "same",
        }
    }

    pub fn compute(
        &self,
        input_spatial_shape: &[usize],
        kernel_spatial_shape: &[usize],
        dilations: &[usize],
        strides: &[usize],
    ) -> TVec<ComputedPaddedDim> {
        (0..input_spatial_shape.len())
            .map(|d| {
                self.compute_one(
                    input_spatial_shape[d],
                    kernel_spatial_shape[d],
                    dilations[d],
                    strides[d],
                )
            })
            .collect()
    }

    pub fn compute_one(
        &self,
        input: usize,
        kernel: usize,
        dilation: usize,
        stride: usize,
    ) -> ComputedPaddedDim {
        match self {
            Valid => Self::valid(input, kernel, dilation, stride),
            Same => Self::same(input, kernel, dilation, stride),
        }
    }

    fn valid(input: usize, kernel: usize, dilation: usize, stride: usize) -> ComputedPaddedDim {
        let kernel_field = (kernel - 1) * dilation + 1;
        let output = (input + 1).saturating_sub(kernel_field).div_ceil(stride);
        ComputedPaddedDim::new(input, output, 0, 0)
    }

    // the odd padding cell goes after, as tensorflow does
    fn same(input: usize, kernel: usize, dilation: usize, stride: usize) -> ComputedPaddedDim {
        let output = input.div_ceil(stride);
        let kernel_field = (kernel - 1) * dilation + 1;
        let pad = ((output.max(1) - 1) * stride + kernel_field).saturating_sub(input);
        let lower_pad = pad / 2;
        let higher_pad = pad - lower_pad;
        ComputedPaddedDim::new(input, output, lower_pad, higher_pad)
    }
}
