//! The things a network is made of.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use downcast_rs::Downcast;
use ndarray::{Array1, ArrayD, ArrayViewD};

use crate::internal::*;

/// A node either relays its input (passthrough) or emits constant values
/// that may be overridden with fed data.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub size_in: usize,
    pub output: Option<Vec<f32>>,
}

impl Node {
    pub fn passthrough(size: usize) -> Node {
        Node { size_in: size, output: None }
    }

    pub fn constant(values: Vec<f32>) -> Node {
        Node { size_in: 0, output: Some(values) }
    }

    pub fn is_passthrough(&self) -> bool {
        self.output.is_none()
    }

    pub fn size_out(&self) -> usize {
        self.output.as_ref().map(|o| o.len()).unwrap_or(self.size_in)
    }
}

/// A population of neurons driven directly through its neurons.
#[derive(Debug, Clone, PartialEq)]
pub struct Ensemble {
    pub n_neurons: usize,
    pub neuron_type: NeuronType,
    pub gain: Array1<f32>,
    pub bias: Array1<f32>,
}

impl Ensemble {
    pub fn new(n_neurons: usize, neuron_type: NeuronType) -> Ensemble {
        let (gain, bias) = (Array1::ones(n_neurons), Array1::zeros(n_neurons));
        Ensemble { n_neurons, neuron_type, gain, bias }
    }

    pub fn with_gain(self, gain: Array1<f32>) -> Ensemble {
        Ensemble { gain, ..self }
    }

    pub fn with_bias(self, bias: Array1<f32>) -> Ensemble {
        Ensemble { bias, ..self }
    }
}

/// A batched computation embedded in a network.
///
/// `eval` takes `(batch, shape_in..)` and returns an array with `size_out`
/// values per sample, in any shape.
pub trait TensorFunction: fmt::Debug + Send + Sync + Downcast {
    fn name(&self) -> Cow<'_, str>;

    fn eval(&self, input: ArrayViewD<f32>) -> CastResult<ArrayD<f32>>;

    fn trainable_parameter_count(&self) -> usize {
        0
    }
}
impl_downcast!(TensorFunction);

#[derive(Debug, Clone, new)]
pub struct TensorNode {
    pub shape_in: TVec<usize>,
    pub size_out: usize,
    pub function: Arc<dyn TensorFunction>,
}

impl TensorNode {
    pub fn size_in(&self) -> usize {
        self.shape_in.iter().product()
    }
}

#[derive(Debug, Clone)]
pub enum ObjectKind {
    Node(Node),
    Neurons(Ensemble),
    TensorNode(TensorNode),
}

impl ObjectKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjectKind::Node(_) => "Node",
            ObjectKind::Neurons(_) => "Neurons",
            ObjectKind::TensorNode(_) => "TensorNode",
        }
    }

    pub fn size_in(&self) -> usize {
        match self {
            ObjectKind::Node(n) => n.size_in,
            ObjectKind::Neurons(e) => e.n_neurons,
            ObjectKind::TensorNode(t) => t.size_in(),
        }
    }

    pub fn size_out(&self) -> usize {
        match self {
            ObjectKind::Node(n) => n.size_out(),
            ObjectKind::Neurons(e) => e.n_neurons,
            ObjectKind::TensorNode(t) => t.size_out,
        }
    }

    pub fn is_neurons(&self) -> bool {
        matches!(self, ObjectKind::Neurons(_))
    }

    pub fn as_ensemble(&self) -> Option<&Ensemble> {
        match self {
            ObjectKind::Neurons(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            ObjectKind::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_tensor_node(&self) -> Option<&TensorNode> {
        match self {
            ObjectKind::TensorNode(t) => Some(t),
            _ => None,
        }
    }
}

impl From<Node> for ObjectKind {
    fn from(n: Node) -> ObjectKind {
        ObjectKind::Node(n)
    }
}

impl From<Ensemble> for ObjectKind {
    fn from(e: Ensemble) -> ObjectKind {
        ObjectKind::Neurons(e)
    }
}

impl From<TensorNode> for ObjectKind {
    fn from(t: TensorNode) -> ObjectKind {
        ObjectKind::TensorNode(t)
    }
}
