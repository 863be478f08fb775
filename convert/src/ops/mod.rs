//! One converter per layer category.

use std::fmt;

use crate::config::ConverterConfig;
use crate::errors::ConvertError;
use crate::internal::*;
use crate::registry::Registry;
use crate::session::Converter;

mod activation;
mod array;
mod conv;
mod dense;
mod fallback;
mod input;
mod merge;
mod model;
mod norm;
mod pool;
mod resize;

pub use activation::{ActivationConverter, LeakyReluConverter, ReluConverter};
pub use array::{ConcatenateConverter, PassthroughConverter};
pub use conv::ConvConverter;
pub use dense::DenseConverter;
pub use fallback::{ActivationFunction, FallbackConverter, LayerFunction};
pub use input::InputConverter;
pub use merge::MergeConverter;
pub use model::ModelConverter;
pub use norm::BatchNormConverter;
pub use pool::PoolConverter;
pub use resize::{UpSamplingConverter, ZeroPaddingConverter};

/// A layer option that must keep its default value for the layer to be
/// converted natively.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsupportedArg {
    pub name: &'static str,
    pub default: ArgValue,
}

impl UnsupportedArg {
    /// An option that must stay unset.
    pub fn none(name: &'static str) -> UnsupportedArg {
        UnsupportedArg { name, default: ArgValue::None }
    }

    pub fn with_default(name: &'static str, default: impl Into<ArgValue>) -> UnsupportedArg {
        UnsupportedArg { name, default: default.into() }
    }
}

/// Translates invocations of one source layer into network objects.
///
/// A converter is built once per layer and then asked to convert each of the
/// layer's invocations, with the session passed in explicitly.
pub trait LayerConverter: fmt::Debug {
    fn layer(&self) -> LayerId;

    /// Options whose non-default values prevent native conversion.
    fn unsupported_args(&self) -> Vec<UnsupportedArg> {
        vec![]
    }

    /// Options only supported when the network will never be trained.
    fn unsupported_training_args(&self) -> Vec<UnsupportedArg> {
        vec![]
    }

    /// Layers with weights cannot be shared between invocations unless the
    /// weights are split.
    fn has_weights(&self) -> bool {
        false
    }

    /// Whether this layer can be converted natively; the error is the reason
    /// it cannot.
    fn convertible(
        &self,
        layer: &Layer,
        _graph: &SourceGraph,
        config: &ConverterConfig,
    ) -> Result<(), ConvertError> {
        check_options(self, layer, config)
    }

    /// Builds the objects for one invocation and returns the object holding
    /// its output. Models populate the session and return nothing.
    fn convert(&self, session: &mut Converter, invocation: usize) -> CastResult<Option<ObjView>>;
}

/// Compares the declared unsupported options against the layer configuration.
pub fn check_options<C: LayerConverter + ?Sized>(
    converter: &C,
    layer: &Layer,
    config: &ConverterConfig,
) -> Result<(), ConvertError> {
    let training =
        if config.inference_only { vec![] } else { converter.unsupported_training_args() };
    let args = converter.unsupported_args().into_iter().map(|a| (a, false));
    for (arg, training_only) in args.chain(training.into_iter().map(|a| (a, true))) {
        let value = layer.option(arg.name).unwrap_or_default();
        if !value.matches(&arg.default) {
            return Err(ConvertError::UnsupportedOption {
                layer: layer.name.clone(),
                option: arg.name.to_string(),
                value: value.to_string(),
                default: arg.default.to_string(),
                training_only,
            });
        }
    }
    Ok(())
}

fn kind_mismatch(layer: &Layer, expected: &str) -> CastError {
    format_err!("Converter for {} layers cannot be built for {}", expected, layer)
}

pub(crate) const REGULARIZERS: [&str; 5] = [
    "kernel_regularizer",
    "bias_regularizer",
    "activity_regularizer",
    "kernel_constraint",
    "bias_constraint",
];

pub fn register_all(reg: &mut Registry) {
    activation::register_all_ops(reg);
    array::register_all_ops(reg);
    conv::register_all_ops(reg);
    dense::register_all_ops(reg);
    fallback::register_all_ops(reg);
    input::register_all_ops(reg);
    merge::register_all_ops(reg);
    model::register_all_ops(reg);
    norm::register_all_ops(reg);
    pool::register_all_ops(reg);
    resize::register_all_ops(reg);
}
