use std::collections::HashMap;
use std::fmt;

use crate::errors::ConvertError;
use crate::internal::*;

/// A tensor, or a layer standing for its only output tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TensorKey {
    Tensor(TensorId),
    Layer(LayerId),
}

impl From<TensorId> for TensorKey {
    fn from(t: TensorId) -> TensorKey {
        TensorKey::Tensor(t)
    }
}

impl From<LayerId> for TensorKey {
    fn from(l: LayerId) -> TensorKey {
        TensorKey::Layer(l)
    }
}

/// Values keyed by source tensor.
///
/// A layer is accepted as key when it has been applied once and has a single
/// output; otherwise its tensor must be named explicitly.
pub struct TensorMap<'g, V> {
    graph: &'g SourceGraph,
    entries: HashMap<TensorId, V>,
}

impl<'g, V> TensorMap<'g, V> {
    pub fn new(graph: &'g SourceGraph) -> TensorMap<'g, V> {
        TensorMap { graph, entries: HashMap::new() }
    }

    pub fn insert(&mut self, tensor: TensorId, value: V) -> Option<V> {
        self.entries.insert(tensor, value)
    }

    pub fn resolve(&self, key: impl Into<TensorKey>) -> CastResult<TensorId> {
        match key.into() {
            TensorKey::Tensor(t) => Ok(t),
            TensorKey::Layer(l) => {
                let layer = self.graph.layer(l)?;
                match layer.invocations.as_slice() {
                    [] => bail!("Layer {} has not been applied to any tensor", layer),
                    [single] if single.outputs.len() == 1 => Ok(single.outputs[0]),
                    _ => Err(ConvertError::AmbiguousKey { layer: layer.name.clone() }.into()),
                }
            }
        }
    }

    pub fn get(&self, key: impl Into<TensorKey>) -> CastResult<&V> {
        let tensor = self.resolve(key)?;
        self.entries.get(&tensor).with_context(|| format!("No entry for {tensor}"))
    }

    pub fn contains(&self, key: impl Into<TensorKey>) -> bool {
        self.resolve(key).is_ok_and(|t| self.entries.contains_key(&t))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TensorId, &V)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }
}

impl<V: fmt::Debug> fmt::Debug for TensorMap<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}
