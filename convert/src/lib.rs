//! # ratecast
//!
//! Converts a model of a layered source graph into a network of neuron
//! populations, nodes and weighted connections that computes the same
//! function at steady state.
//!
//! ```
//! use ndarray::{Array1, Array2};
//! use ratecast::prelude::*;
//! use ratecast_source::layers::Dense;
//!
//! let mut graph = SourceGraph::default();
//! let x = graph.input("x", &[4]).unwrap();
//! let kernel = Array2::from_elem((4, 3), 0.25);
//! let dense = Dense::new(kernel, Some(Array1::zeros(3)), Activation::Relu);
//! let y = graph.wire("dense", dense, &[x]).unwrap();
//! let model = graph.model("net", &[x], &[y]).unwrap();
//!
//! let converter = Converter::new(&graph, model, ConverterConfig::default()).unwrap();
//! converter.verify(&VerifyOptions::default()).unwrap();
//! ```
//!
//! Every source layer is handled by a `LayerConverter` found by type name in
//! a `Registry`. Layers no converter accepts are wrapped in tensor nodes when
//! `ConverterConfig::allow_fallback` is set.

#[macro_use]
extern crate derive_new;
#[macro_use]
extern crate log;

pub mod config;
pub mod errors;
pub mod history;
pub mod ops;
pub mod registry;
pub mod session;
pub mod tensor_map;
pub mod verify;

pub use ratecast_core;
pub use ratecast_source;

pub mod prelude {
    pub use crate::config::{ConverterConfig, FiringRateScale, Nonlinearity};
    pub use crate::errors::ConvertError;
    pub use crate::ops::LayerConverter;
    pub use crate::registry::Registry;
    pub use crate::session::Converter;
    pub use crate::tensor_map::{TensorKey, TensorMap};
    pub use crate::verify::{NetworkRunner, Runner, SourceRunner, VerifyOptions};
    pub use ratecast_core::prelude::*;
    pub use ratecast_source::prelude::*;
}

pub mod internal {
    pub use crate::prelude::*;
    pub use ratecast_data::internal::*;
}
