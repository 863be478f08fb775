//! Composite models: construction, sequential stacks and calling a model on
//! new tensors.

use std::collections::{HashMap, HashSet};

use crate::internal::*;

/// A functional model over the graph's tensors.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelDef {
    pub inputs: TVec<TensorId>,
    pub outputs: TVec<TensorId>,
    /// Input layers first, then every layer in topological order.
    pub layers: Vec<LayerId>,
    pub sequential: bool,
}

impl SourceGraph {
    pub fn model_def(&self, model: LayerId) -> CastResult<&ModelDef> {
        let layer = self.layer(model)?;
        layer.as_model().with_context(|| format!("{layer} is not a model"))
    }

    /// Builds a model from input tensors (produced by input layers) to output tensors.
    pub fn model(
        &mut self,
        name: impl Into<String>,
        inputs: &[TensorId],
        outputs: &[TensorId],
    ) -> CastResult<LayerId> {
        let name = name.into();
        for input in inputs {
            let prov = self.tensor(*input)?.provenance;
            let prov = prov.with_context(|| format!("Model input {input} has no producing layer"))?;
            let layer = self.layer(prov.layer)?;
            ensure!(
                matches!(layer.kind, LayerKind::Input(_)),
                "Inputs of model {} must come from input layers, {} comes from {}",
                name,
                input,
                layer
            );
        }
        let mut def = ModelDef {
            inputs: inputs.into(),
            outputs: outputs.into(),
            layers: vec![],
            sequential: false,
        };
        for input in inputs {
            let layer = self.tensor(*input)?.provenance.map(|p| p.layer);
            def.layers.extend(layer);
        }
        for (layer, _) in self.internal_order(&def)? {
            if !def.layers.contains(&layer) {
                def.layers.push(layer);
            }
        }
        let id = self.add_layer(name, LayerKind::Model(def));
        let applied = Invocation { inputs: inputs.into(), outputs: outputs.into() };
        self.layer_mut(id)?.invocations.push(applied);
        debug!("Built model {}", self.layer(id)?);
        Ok(id)
    }

    /// A stack of single-input layers, built as the equivalent functional model.
    pub fn sequential(
        &mut self,
        name: impl Into<String>,
        input_shape: &[usize],
        layers: impl IntoIterator<Item = (String, LayerKind)>,
    ) -> CastResult<LayerId> {
        let name = name.into();
        let input = self.input(format!("{name}_input"), input_shape)?;
        let mut x = input;
        for (layer_name, kind) in layers {
            x = self.wire(layer_name, kind, &[x])?;
        }
        let model = self.model(name, &[input], &[x])?;
        if let LayerKind::Model(def) = &mut self.layer_mut(model)?.kind {
            def.sequential = true;
        }
        debug!("Built sequential model {} as a functional model", self.layer(model)?);
        Ok(model)
    }

    /// Invocations between the model inputs and outputs, producers first.
    pub fn internal_order(&self, def: &ModelDef) -> CastResult<Vec<(LayerId, usize)>> {
        let stop: HashSet<TensorId> = def.inputs.iter().copied().collect();
        let mut seen = HashSet::new();
        let mut order = vec![];
        // explicit stack: (tensor, children pushed)
        let mut stack: Vec<(TensorId, bool)> =
            def.outputs.iter().rev().map(|t| (*t, false)).collect();
        while let Some((tensor, expanded)) = stack.pop() {
            if stop.contains(&tensor) {
                continue;
            }
            let prov = self
                .tensor(tensor)?
                .provenance
                .with_context(|| format!("Tensor {tensor} has no producing layer"))?;
            let key = (prov.layer, prov.invocation);
            if seen.contains(&key) {
                continue;
            }
            let invocation = self.layer(prov.layer)?.invocation(prov.invocation)?;
            if expanded {
                seen.insert(key);
                order.push(key);
                continue;
            }
            if invocation.inputs.is_empty() {
                let layer = self.layer(prov.layer)?;
                bail!("Graph disconnected: {} is not one of the model inputs", layer);
            }
            stack.push((tensor, true));
            for input in invocation.inputs.iter().rev() {
                stack.push((*input, false));
            }
        }
        Ok(order)
    }

    /// Applies a model to new tensors by replaying its internal invocations.
    ///
    /// Internal layers get new invocations; the returned tensors belong to a new
    /// invocation of the model layer and alias the replayed internal outputs.
    pub fn call(&mut self, model: LayerId, inputs: &[TensorId]) -> CastResult<TVec<TensorId>> {
        let def = self.model_def(model)?.clone();
        ensure!(
            def.inputs.len() == inputs.len(),
            "Model {} takes {} inputs, got {}",
            self.layer(model)?,
            def.inputs.len(),
            inputs.len()
        );
        let mut mapping: HashMap<TensorId, TensorId> = HashMap::new();
        for (inner, outer) in def.inputs.iter().zip(inputs) {
            let prov = self.tensor(*inner)?.provenance;
            let prov = prov.with_context(|| format!("Model input {inner} has no producing layer"))?;
            let replayed = self.apply(prov.layer, &[*outer])?;
            mapping.insert(*inner, replayed[0]);
        }
        for (layer, ix) in self.internal_order(&def)? {
            let invocation = self.layer(layer)?.invocation(ix)?.clone();
            let fed = invocation
                .inputs
                .iter()
                .map(|t| mapping.get(t).copied().with_context(|| format!("{t} was not replayed")))
                .collect::<CastResult<TVec<_>>>()?;
            let replayed = self.apply(layer, &fed)?;
            for (old, new) in invocation.outputs.iter().zip(replayed) {
                mapping.insert(*old, new);
            }
        }
        let invocation = self.layer(model)?.invocations.len();
        let mut outputs = tvec!();
        for (ix, inner) in def.outputs.iter().enumerate() {
            let replayed = mapping.get(inner).copied();
            let replayed =
                replayed.with_context(|| format!("Model output {inner} was not replayed"))?;
            let shape = self.tensor(replayed)?.shape.clone();
            let provenance = Some(Provenance::new(model, invocation, ix));
            outputs.push(self.new_tensor(shape, provenance, Some(replayed)));
        }
        let applied = Invocation { inputs: inputs.into(), outputs: outputs.clone() };
        self.layer_mut(model)?.invocations.push(applied);
        debug!("Called {} as invocation {}", self.layer(model)?, invocation);
        Ok(outputs)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::layers::{ActivationLayer, Merge};

    fn inner(g: &mut SourceGraph) -> LayerId {
        let x = g.input("inner_in", &[2]).unwrap();
        let y = g.wire("inner_relu", ActivationLayer::new(Activation::Relu), &[x]).unwrap();
        g.model("inner", &[x], &[y]).unwrap()
    }

    #[test]
    fn call_replays_layers() {
        let mut g = SourceGraph::default();
        let model = inner(&mut g);
        let x = g.input("outer_in", &[2]).unwrap();
        let y = g.call(model, &[x]).unwrap()[0];
        let relu = g.layer_by_name("inner_relu").unwrap();
        assert_eq!(g.layer(relu).unwrap().invocations.len(), 2);
        let t = g.tensor(y).unwrap();
        assert_eq!(t.provenance, Some(Provenance::new(model, 1, 0)));
        let alias = g.tensor(t.alias.unwrap()).unwrap();
        assert_eq!(alias.provenance, Some(Provenance::new(relu, 1, 0)));
        let inner_input = g.layer_by_name("inner_in").unwrap();
        assert_eq!(g.layer(inner_input).unwrap().invocations[1].inputs.as_slice(), &[x]);
    }

    #[test]
    fn disconnected_graph_is_rejected() {
        let mut g = SourceGraph::default();
        let a = g.input("a", &[2]).unwrap();
        let b = g.input("b", &[2]).unwrap();
        let y = g.wire("add", Merge::add(), &[a, b]).unwrap();
        assert!(g.model("m", &[a], &[y]).is_err());
    }

    #[test]
    fn sequential_layers_are_ordered() {
        let mut g = SourceGraph::default();
        let model = g
            .sequential(
                "seq",
                &[3],
                vec![
                    ("first".to_string(), ActivationLayer::new(Activation::Relu).into()),
                    ("second".to_string(), ActivationLayer::new(Activation::Tanh).into()),
                ],
            )
            .unwrap();
        let def = g.model_def(model).unwrap();
        assert!(def.sequential);
        let names: Vec<_> = def.layers.iter().map(|l| g.layer(*l).unwrap().name.clone()).collect();
        assert_eq!(names, vec!["seq_input", "first", "second"]);
        assert_eq!(g.layer(model).unwrap().type_name(), "Sequential");
    }
}
