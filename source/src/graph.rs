use std::borrow::Cow;
use std::fmt;

use crate::internal::*;
use crate::layers::InputLayer;
use crate::model::ModelDef;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub usize);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tensor#{}", self.0)
    }
}

/// The (layer, invocation, output slot) triple that produced a tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, new)]
pub struct Provenance {
    pub layer: LayerId,
    pub invocation: usize,
    pub output: usize,
}

#[derive(Clone, Debug)]
pub struct Tensor {
    pub id: TensorId,
    /// Batched shape.
    pub shape: ShapeFact,
    pub provenance: Option<Provenance>,
    /// For outputs of a called model: the replayed internal tensor it stands for.
    pub alias: Option<TensorId>,
}

/// One application of a layer to a set of tensors.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Invocation {
    pub inputs: TVec<TensorId>,
    pub outputs: TVec<TensorId>,
}

#[derive(Clone, Debug)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    pub trainable: bool,
    pub invocations: Vec<Invocation>,
}

impl Layer {
    pub fn type_name(&self) -> Cow<'_, str> {
        self.kind.type_name()
    }

    pub fn option(&self, name: &str) -> Option<ArgValue> {
        self.kind.option(name)
    }

    pub fn invocation(&self, ix: usize) -> CastResult<&Invocation> {
        self.invocations
            .get(ix)
            .with_context(|| format!("Layer {} has no invocation {}", self.name, ix))
    }

    pub fn as_model(&self) -> Option<&ModelDef> {
        match &self.kind {
            LayerKind::Model(def) => Some(def),
            _ => None,
        }
    }

    pub fn is_model(&self) -> bool {
        self.kind.is_model()
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.type_name())
    }
}

/// Arena of layers and tensors. Ids are indices and stay valid for the
/// lifetime of the graph.
#[derive(Clone, Debug, Default)]
pub struct SourceGraph {
    layers: Vec<Layer>,
    tensors: Vec<Tensor>,
}

impl SourceGraph {
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, id: LayerId) -> CastResult<&Layer> {
        self.layers.get(id.0).with_context(|| format!("No layer {id}"))
    }

    pub fn layer_mut(&mut self, id: LayerId) -> CastResult<&mut Layer> {
        self.layers.get_mut(id.0).with_context(|| format!("No layer {id}"))
    }

    pub fn layer_by_name(&self, name: &str) -> CastResult<LayerId> {
        self.layers
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.id)
            .with_context(|| format!("No layer named {name}"))
    }

    pub fn tensor(&self, id: TensorId) -> CastResult<&Tensor> {
        self.tensors.get(id.0).with_context(|| format!("No tensor {id}"))
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    pub fn set_trainable(&mut self, layer: LayerId, trainable: bool) -> CastResult<()> {
        self.layer_mut(layer)?.trainable = trainable;
        Ok(())
    }

    pub fn add_layer(&mut self, name: impl Into<String>, kind: impl Into<LayerKind>) -> LayerId {
        let id = LayerId(self.layers.len());
        let (name, kind) = (name.into(), kind.into());
        self.layers.push(Layer { id, name, kind, trainable: true, invocations: vec![] });
        id
    }

    pub(crate) fn new_tensor(
        &mut self,
        shape: ShapeFact,
        provenance: Option<Provenance>,
        alias: Option<TensorId>,
    ) -> TensorId {
        let id = TensorId(self.tensors.len());
        self.tensors.push(Tensor { id, shape, provenance, alias });
        id
    }

    /// A tensor with no producing layer, standing for an external constant.
    pub fn detached(&mut self, shape: ShapeFact) -> TensorId {
        self.new_tensor(shape, None, None)
    }

    /// Declares a model input with an unresolved batch dimension.
    pub fn input(&mut self, name: impl Into<String>, shape: &[usize]) -> CastResult<TensorId> {
        self.input_fact(name, ShapeFact::batched(shape))
    }

    /// Declares a model input from a full batched shape (which may leave any
    /// dimension unresolved).
    pub fn input_fact(
        &mut self,
        name: impl Into<String>,
        shape: ShapeFact,
    ) -> CastResult<TensorId> {
        let layer = self.add_layer(name, InputLayer::new(shape));
        let outputs = self.apply(layer, &[])?;
        Ok(outputs[0])
    }

    /// Records a new invocation of `layer` on `inputs` and returns its output tensors.
    pub fn apply(&mut self, layer: LayerId, inputs: &[TensorId]) -> CastResult<TVec<TensorId>> {
        if self.layer(layer)?.is_model() {
            return self.call(layer, inputs);
        }
        let shapes = {
            let input_shapes: TVec<&ShapeFact> = inputs
                .iter()
                .map(|t| self.tensor(*t).map(|t| &t.shape))
                .collect::<CastResult<_>>()?;
            let l = self.layer(layer)?;
            let op = l.kind.as_op().with_context(|| format!("{l} is not a primitive layer"))?;
            op.output_shapes(&input_shapes).with_context(|| format!("Applying {l}"))?
        };
        let invocation = self.layer(layer)?.invocations.len();
        let outputs: TVec<TensorId> = shapes
            .into_iter()
            .enumerate()
            .map(|(ix, shape)| {
                self.new_tensor(shape, Some(Provenance::new(layer, invocation, ix)), None)
            })
            .collect();
        trace!("{} invocation {} -> {:?}", self.layer(layer)?, invocation, outputs);
        let applied = Invocation { inputs: inputs.into(), outputs: outputs.clone() };
        self.layer_mut(layer)?.invocations.push(applied);
        Ok(outputs)
    }

    /// Adds a single-output layer and applies it.
    pub fn wire(
        &mut self,
        name: impl Into<String>,
        kind: impl Into<LayerKind>,
        inputs: &[TensorId],
    ) -> CastResult<TensorId> {
        let layer = self.add_layer(name, kind);
        let outputs = self.apply(layer, inputs)?;
        ensure!(outputs.len() == 1, "Layer {} has {} outputs", self.layer(layer)?, outputs.len());
        Ok(outputs[0])
    }
}
