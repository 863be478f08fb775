//! # ratecast-source
//!
//! A layered computation graph in the functional style: layers are applied
//! to tensors, every application is recorded as an invocation, and every
//! tensor remembers the (layer, invocation, output) triple that produced it.
//!
//! ```
//! use ratecast_source::prelude::*;
//! use ratecast_source::layers::Dense;
//! use ndarray::{Array1, Array2};
//!
//! let mut graph = SourceGraph::default();
//! let x = graph.input("x", &[3]).unwrap();
//! let dense = Dense::new(Array2::ones((3, 2)), Some(Array1::zeros(2)), Activation::Relu);
//! let y = graph.wire("dense", dense, &[x]).unwrap();
//! let model = graph.model("net", &[x], &[y]).unwrap();
//!
//! let out = graph.predict(model, &[ndarray::ArrayD::ones(ndarray::IxDyn(&[1, 3]))]).unwrap();
//! assert_eq!(out[0].as_slice().unwrap(), &[3.0, 3.0]);
//! ```

#[macro_use]
extern crate derive_new;
#[macro_use]
extern crate log;

pub mod activation;
pub mod args;
pub mod eval;
pub mod graph;
pub mod layers;
pub mod model;

pub use ratecast_data;

pub mod prelude {
    pub use crate::activation::Activation;
    pub use crate::args::ArgValue;
    pub use crate::graph::{Invocation, Layer, LayerId, Provenance, SourceGraph, Tensor, TensorId};
    pub use crate::layers::{CustomLayer, LayerKind, LayerOp};
    pub use crate::model::ModelDef;
    pub use ratecast_data::prelude::*;
}

pub mod internal {
    pub use crate::prelude::*;
    pub use ratecast_data::internal::*;
}
