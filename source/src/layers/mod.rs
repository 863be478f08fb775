//! Layer kinds and their shape inference and batched forward passes.

use std::borrow::Cow;
use std::fmt::Debug;

use downcast_rs::{Downcast, impl_downcast};
use ndarray::{ArrayD, ArrayViewD};

use crate::internal::*;
use crate::model::ModelDef;

mod array;
mod conv;
mod dense;
mod input;
mod merge;
mod norm;
mod pool;
mod relu;
mod resize;

pub use array::{Concatenate, Flatten, Reshape};
pub use conv::Conv;
pub use dense::{Dense, Regularization};
pub use input::InputLayer;
pub use merge::{Merge, MergeOp};
pub use norm::BatchNorm;
pub use pool::Pool;
pub use relu::{ActivationLayer, LeakyReLU, ReLU};
pub use resize::{Interpolation, UpSampling, ZeroPadding};

pub use ratecast_data::kernels::PoolKind;

/// Behaviour shared by every primitive (non-composite) layer.
///
/// Shapes include the leading batch dimension; forward passes take and
/// return batched arrays.
pub trait LayerOp: Debug + Send + Sync {
    fn type_name(&self) -> Cow<'_, str>;

    /// Reflective access to a configuration attribute, `None` if the layer has no such attribute.
    fn option(&self, _name: &str) -> Option<ArgValue> {
        None
    }

    fn output_shapes(&self, inputs: &[&ShapeFact]) -> CastResult<TVec<ShapeFact>>;

    fn forward(&self, inputs: &[ArrayViewD<f32>]) -> CastResult<TVec<ArrayD<f32>>>;

    fn trainable_parameter_count(&self) -> usize {
        0
    }
}

/// User-defined layer types. They have no built-in converter, so they take the
/// fallback path unless one is registered under their type name.
pub trait CustomLayer: LayerOp + Downcast + dyn_clone::DynClone {}

impl_downcast!(CustomLayer);
dyn_clone::clone_trait_object!(CustomLayer);

impl LayerOp for Box<dyn CustomLayer> {
    fn type_name(&self) -> Cow<'_, str> {
        (**self).type_name()
    }

    fn option(&self, name: &str) -> Option<ArgValue> {
        (**self).option(name)
    }

    fn output_shapes(&self, inputs: &[&ShapeFact]) -> CastResult<TVec<ShapeFact>> {
        (**self).output_shapes(inputs)
    }

    fn forward(&self, inputs: &[ArrayViewD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        (**self).forward(inputs)
    }

    fn trainable_parameter_count(&self) -> usize {
        (**self).trainable_parameter_count()
    }
}

#[derive(Debug, Clone)]
pub enum LayerKind {
    Input(InputLayer),
    Dense(Dense),
    Conv(Conv),
    Pool(Pool),
    Activation(ActivationLayer),
    Merge(Merge),
    BatchNorm(BatchNorm),
    Concatenate(Concatenate),
    Flatten(Flatten),
    Reshape(Reshape),
    ReLU(ReLU),
    LeakyReLU(LeakyReLU),
    UpSampling(UpSampling),
    ZeroPadding(ZeroPadding),
    Model(ModelDef),
    Custom(Box<dyn CustomLayer>),
}

impl LayerKind {
    /// The primitive view of this layer, `None` for composite models.
    pub fn as_op(&self) -> Option<&dyn LayerOp> {
        use LayerKind::*;
        let op: &dyn LayerOp = match self {
            Input(op) => op,
            Dense(op) => op,
            Conv(op) => op,
            Pool(op) => op,
            Activation(op) => op,
            Merge(op) => op,
            BatchNorm(op) => op,
            Concatenate(op) => op,
            Flatten(op) => op,
            Reshape(op) => op,
            ReLU(op) => op,
            LeakyReLU(op) => op,
            UpSampling(op) => op,
            ZeroPadding(op) => op,
            Custom(op) => op,
            Model(_) => return None,
        };
        Some(op)
    }

    pub fn type_name(&self) -> Cow<'_, str> {
        match self {
            LayerKind::Model(m) => {
                Cow::Borrowed(if m.sequential { "Sequential" } else { "Functional" })
            }
            other => other.as_op().map(|op| op.type_name()).unwrap_or(Cow::Borrowed("Unknown")),
        }
    }

    pub fn option(&self, name: &str) -> Option<ArgValue> {
        self.as_op().and_then(|op| op.option(name))
    }

    pub fn is_model(&self) -> bool {
        matches!(self, LayerKind::Model(_))
    }
}

macro_rules! impl_into_kind {
    ($($op:ident),*) => {
        $(impl From<$op> for LayerKind {
            fn from(op: $op) -> LayerKind {
                LayerKind::$op(op)
            }
        })*
    };
}

impl_into_kind!(
    Dense,
    Conv,
    Pool,
    Merge,
    BatchNorm,
    Concatenate,
    Flatten,
    Reshape,
    ReLU,
    LeakyReLU,
    UpSampling,
    ZeroPadding
);

impl From<InputLayer> for LayerKind {
    fn from(op: InputLayer) -> LayerKind {
        LayerKind::Input(op)
    }
}

impl From<ActivationLayer> for LayerKind {
    fn from(op: ActivationLayer) -> LayerKind {
        LayerKind::Activation(op)
    }
}

impl<C: CustomLayer> From<Box<C>> for LayerKind {
    fn from(op: Box<C>) -> LayerKind {
        LayerKind::Custom(op)
    }
}

pub(crate) fn check_arity<T>(inputs: &[T], expected: usize, layer: &str) -> CastResult<()> {
    ensure!(
        inputs.len() == expected,
        "{} expects {} input(s), got {}",
        layer,
        expected,
        inputs.len()
    );
    Ok(())
}

pub(crate) fn one_output(x: ArrayD<f32>) -> CastResult<TVec<ArrayD<f32>>> {
    Ok(tvec!(x))
}

/// Splits a batched shape into (spatial dims, channels) according to `fmt`.
pub(crate) fn split_channels(
    shape: &ShapeFact,
    fmt: DataFormat,
) -> CastResult<(TVec<Option<usize>>, Option<usize>)> {
    let inner = shape.without_batch();
    ensure!(inner.rank() >= 1, "Shape {} has no channel axis", shape);
    let c_axis = fmt.c_axis(inner.rank());
    let spatial = fmt.hw_axes(inner.rank()).map(|ax| inner.dims()[ax]).collect();
    Ok((spatial, inner.dims()[c_axis]))
}

pub(crate) fn join_channels(
    batch: Option<usize>,
    spatial: &[Option<usize>],
    c: Option<usize>,
    fmt: DataFormat,
) -> ShapeFact {
    let mut dims: TVec<Option<usize>> = tvec!(batch);
    if fmt == DataFormat::CHW {
        dims.push(c);
    }
    dims.extend(spatial.iter().copied());
    if fmt == DataFormat::HWC {
        dims.push(c);
    }
    ShapeFact(dims)
}

/// Runs a per-sample function over the batch axis and stacks the results.
pub(crate) fn per_sample(
    x: &ArrayViewD<f32>,
    f: impl Fn(ArrayViewD<f32>) -> CastResult<ArrayD<f32>>,
) -> CastResult<ArrayD<f32>> {
    let samples = x
        .outer_iter()
        .map(&f)
        .collect::<CastResult<Vec<_>>>()?;
    let views: Vec<ArrayViewD<f32>> = samples.iter().map(|s| s.view()).collect();
    ensure!(!views.is_empty(), "Empty batch");
    Ok(ndarray::stack(ndarray::Axis(0), &views)?)
}
