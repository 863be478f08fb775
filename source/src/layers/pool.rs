use std::borrow::Cow;

use ndarray::{ArrayD, ArrayViewD};
use ratecast_data::kernels::{self, Geometry, PoolKind};

use super::conv::data_format_name;
use super::{LayerOp, check_arity, join_channels, one_output, per_sample, split_channels};
use crate::internal::*;

/// Average or max pooling. Global pooling reduces every spatial axis and
/// carries no pool size, strides or padding.
#[derive(Debug, Clone, PartialEq)]
pub struct Pool {
    pub kind: PoolKind,
    pub rank: usize,
    pub global: bool,
    pub pool_size: TVec<usize>,
    pub strides: TVec<usize>,
    pub padding: PaddingSpec,
    pub data_format: DataFormat,
}

impl Pool {
    /// Windowed pooling; strides default to the pool size.
    pub fn new(kind: PoolKind, pool_size: &[usize], strides: Option<&[usize]>) -> Pool {
        Pool {
            kind,
            rank: pool_size.len(),
            global: false,
            pool_size: pool_size.into(),
            strides: strides.unwrap_or(pool_size).into(),
            padding: PaddingSpec::Valid,
            data_format: DataFormat::HWC,
        }
    }

    pub fn global(kind: PoolKind, rank: usize) -> Pool {
        Pool {
            kind,
            rank,
            global: true,
            pool_size: tvec!(),
            strides: tvec!(),
            padding: PaddingSpec::Valid,
            data_format: DataFormat::HWC,
        }
    }

    pub fn with_padding(self, padding: PaddingSpec) -> Pool {
        Pool { padding, ..self }
    }

    pub fn with_data_format(self, data_format: DataFormat) -> Pool {
        Pool { data_format, ..self }
    }
}

impl LayerOp for Pool {
    fn type_name(&self) -> Cow<'_, str> {
        let kind = match self.kind {
            PoolKind::Avg => "Average",
            PoolKind::Max => "Max",
        };
        let global = if self.global { "Global" } else { "" };
        format!("{global}{kind}Pooling{}D", self.rank).into()
    }

    fn option(&self, name: &str) -> Option<ArgValue> {
        match name {
            "data_format" => Some(data_format_name(self.data_format).into()),
            "pool_size" if !self.global => Some(self.pool_size.as_slice().into()),
            "strides" if !self.global => Some(self.strides.as_slice().into()),
            "padding" if !self.global => Some(self.padding.name().into()),
            _ => None,
        }
    }

    fn output_shapes(&self, inputs: &[&ShapeFact]) -> CastResult<TVec<ShapeFact>> {
        check_arity(inputs, 1, "Pooling")?;
        let (spatial, c) = split_channels(inputs[0], self.data_format)?;
        ensure!(spatial.len() == self.rank, "{} got input {}", self.type_name(), inputs[0]);
        let batch = inputs[0].dims()[0];
        if self.global {
            return Ok(tvec!(ShapeFact::from_dims([batch, c])));
        }
        let out: TVec<Option<usize>> = spatial
            .iter()
            .enumerate()
            .map(|(ax, d)| {
                let (k, s) = (self.pool_size[ax], self.strides[ax]);
                d.map(|d| self.padding.compute_one(d, k, 1, s).output)
            })
            .collect();
        Ok(tvec!(join_channels(batch, &out, c, self.data_format)))
    }

    fn forward(&self, inputs: &[ArrayViewD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        check_arity(inputs, 1, "Pooling")?;
        let y = if self.global {
            per_sample(&inputs[0], |x| kernels::global_pool(x, self.kind, self.data_format))?
        } else {
            let dilations = tvec![1; self.rank];
            let (pool_size, strides) = (self.pool_size.clone(), self.strides.clone());
            let geometry = Geometry::new(pool_size, strides, dilations, self.padding);
            per_sample(&inputs[0], |x| kernels::pool(x, &geometry, self.kind, self.data_format))?
        };
        one_output(y)
    }
}
