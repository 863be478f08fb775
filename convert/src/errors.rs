use ratecast_source::prelude::TensorId;
use thiserror::Error;

/// Conversion failures callers may want to tell apart.
///
/// They travel inside `anyhow::Error`; use `downcast_ref::<ConvertError>()`
/// to recover them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConvertError {
    #[error("Tensor {tensor} has no producing layer")]
    UnresolvedProvenance { tensor: TensorId },

    #[error(
        "Layer {layer} is ambiguous because it has multiple output tensors; \
         use a specific tensor as key instead"
    )]
    AmbiguousKey { layer: String },

    #[error(
        "{reason}. Unable to convert layer {layer} to native objects; enable allow_fallback \
         to use a tensor node instead, or register a converter for this layer type"
    )]
    UnconvertibleLayer { layer: String, reason: String },

    #[error(
        "{layer}.{option} has value {value} != {default}, which is not supported{}",
        inference_hint(.training_only)
    )]
    UnsupportedOption {
        layer: String,
        option: String,
        value: String,
        default: String,
        training_only: bool,
    },

    #[error("{reason}")]
    Ineligible { layer: String, reason: String },

    #[error("Unsupported activation type ({activation}) in layer {layer}")]
    UnsupportedActivation { layer: String, activation: String },

    #[error(
        "Multiple applications of layer {layer} detected; \
         this is not supported unless split_shared_weights is enabled"
    )]
    DuplicateLayerApplication { layer: String },

    #[error("Input shapes must be fully specified; got {shape}")]
    ShapeUnderspecified { shape: String },

    #[error(
        "Output {output} of the source model does not match output of the converted network \
         (max difference={max_difference:.2E}; set log level to INFO to see all failures)"
    )]
    VerificationMismatch { output: usize, max_difference: f32 },

    #[error(
        "Number of trainable parameters in converted network ({network}) does not match \
         number of trainable parameters in source model ({model})"
    )]
    ParameterCountMismatch { network: usize, model: usize },

    #[error("Invalid converter configuration: {0}")]
    InvalidConfig(String),
}

fn inference_hint(training_only: &bool) -> &'static str {
    if *training_only { " (unless inference_only is enabled)" } else { "" }
}
