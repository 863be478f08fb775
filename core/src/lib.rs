//! # ratecast-core
//!
//! Networks of rate and spiking neuron populations: constant and passthrough
//! nodes, neuron ensembles, tensor nodes wrapping arbitrary batched
//! functions, connections carrying linear transforms, synapses and probes.
//!
//! `Simulator::predict` evaluates a feed-forward network at steady state,
//! where every synapse has unit gain and spiking neurons run at their rate.
//!
//! ```
//! use ratecast_core::prelude::*;
//! use std::collections::HashMap;
//!
//! let mut net = Network::new("demo");
//! let input = net.add_node(Node::constant(vec![1.0, -2.0]), "input");
//! let ens = net.add_ensemble(Ensemble::new(2, NeuronType::relu()), "relu");
//! net.connect(input, ens, Transform::Scalar(2.0), None).unwrap();
//! let probe = net.probe(ens, None).unwrap();
//!
//! let sim = Simulator::new(&net).unwrap();
//! let out = sim.predict(&HashMap::new(), 1).unwrap();
//! assert_eq!(out[&probe].as_slice().unwrap(), &[2.0, 0.0]);
//! ```

#[macro_use]
extern crate derive_new;
#[macro_use]
extern crate downcast_rs;
#[macro_use]
extern crate log;

pub mod network;
pub mod neurons;
pub mod objects;
pub mod simulator;
pub mod synapse;
pub mod transforms;

pub use ratecast_data;

pub mod prelude {
    pub use crate::network::{
        ConnId, Connection, Network, ObjId, ObjView, Object, Probe, ProbeId, TrainableKey,
    };
    pub use crate::neurons::NeuronType;
    pub use crate::objects::{Ensemble, Node, ObjectKind, TensorFunction, TensorNode};
    pub use crate::simulator::Simulator;
    pub use crate::synapse::Synapse;
    pub use crate::transforms::{ConvolutionTransform, SparseTransform, Transform};
    pub use ratecast_data::prelude::*;
}

pub mod internal {
    pub use crate::prelude::*;
    pub use ratecast_data::internal::*;
}
