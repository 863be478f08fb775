//! Reference evaluation of a model on batched arrays.

use std::collections::{HashMap, HashSet};

use ndarray::{ArrayD, ArrayViewD};

use crate::internal::*;

impl SourceGraph {
    /// Runs `model` on one batched array per model input.
    pub fn predict(&self, model: LayerId, inputs: &[ArrayD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        let def = self.model_def(model)?;
        ensure!(
            def.inputs.len() == inputs.len(),
            "Model {} takes {} inputs, got {}",
            self.layer(model)?,
            def.inputs.len(),
            inputs.len()
        );
        let mut values: HashMap<TensorId, ArrayD<f32>> = HashMap::new();
        for (tensor, value) in def.inputs.iter().zip(inputs) {
            let shape = &self.tensor(*tensor)?.shape;
            ensure!(
                value.ndim() == shape.rank()
                    && shape
                            .dims()
                            .iter()
                            .zip(value.shape())
                            .all(|(d, v)| d.is_none_or(|d| d == *v)),
                "Input {} expects shape {}, got {:?}",
                tensor,
                shape,
                value.shape()
            );
            values.insert(*tensor, value.clone());
        }
        for (layer, ix) in self.internal_order(def)? {
            let layer = self.layer(layer)?;
            let invocation = layer.invocation(ix)?;
            let outputs = if layer.is_model() {
                // outputs of a called model are aliases of replayed internal tensors
                invocation
                    .outputs
                    .iter()
                    .map(|t| {
                        let alias = self.tensor(*t)?.alias;
                        let alias = alias.with_context(|| format!("{t} has no internal tensor"))?;
                        self.resolve_value(alias, &mut values)
                    })
                    .collect::<CastResult<TVec<_>>>()?
            } else {
                self.forward_invocation(layer, invocation, &values)?
            };
            for (t, v) in invocation.outputs.iter().zip(outputs) {
                values.insert(*t, v);
            }
        }
        def.outputs
            .iter()
            .map(|t| values.get(t).cloned().with_context(|| format!("Output {t} was not computed")))
            .collect()
    }

    fn forward_invocation(
        &self,
        layer: &Layer,
        invocation: &Invocation,
        values: &HashMap<TensorId, ArrayD<f32>>,
    ) -> CastResult<TVec<ArrayD<f32>>> {
        let op = layer.kind.as_op().with_context(|| format!("{layer} is not a primitive layer"))?;
        let inputs: TVec<ArrayViewD<f32>> = invocation
            .inputs
            .iter()
            .map(|t| values.get(t).map(|v| v.view()).with_context(|| format!("{t} has no value")))
            .collect::<CastResult<_>>()?;
        let outputs = op.forward(&inputs).with_context(|| format!("Evaluating {layer}"))?;
        ensure!(
            outputs.len() == invocation.outputs.len(),
            "{} produced {} outputs, expected {}",
            layer,
            outputs.len(),
            invocation.outputs.len()
        );
        Ok(outputs)
    }

    /// Value of a tensor inside a called model, evaluating producers on demand.
    fn resolve_value(
        &self,
        tensor: TensorId,
        values: &mut HashMap<TensorId, ArrayD<f32>>,
    ) -> CastResult<ArrayD<f32>> {
        if let Some(v) = values.get(&tensor) {
            return Ok(v.clone());
        }
        let t = self.tensor(tensor)?;
        let prov = t.provenance.with_context(|| format!("Tensor {tensor} has no producing layer"))?;
        let layer = self.layer(prov.layer)?;
        if layer.is_model() {
            let alias = t.alias.with_context(|| format!("{tensor} has no internal tensor"))?;
            let v = self.resolve_value(alias, values)?;
            values.insert(tensor, v.clone());
            return Ok(v);
        }
        let invocation = layer.invocation(prov.invocation)?;
        for input in &invocation.inputs {
            self.resolve_value(*input, values)?;
        }
        let outputs = self.forward_invocation(layer, invocation, values)?;
        for (t, v) in invocation.outputs.iter().zip(outputs) {
            values.insert(*t, v);
        }
        values.get(&tensor).cloned().with_context(|| format!("{tensor} was not produced"))
    }

    /// Trainable parameters over the unique layers of `model`, nested models included.
    pub fn trainable_parameter_count(&self, model: LayerId) -> CastResult<usize> {
        let mut seen = HashSet::new();
        self.count_unique(model, &mut seen)
    }

    fn count_unique(&self, model: LayerId, seen: &mut HashSet<LayerId>) -> CastResult<usize> {
        let def = self.model_def(model)?;
        let mut total = 0;
        for id in &def.layers {
            if !seen.insert(*id) {
                continue;
            }
            let layer = self.layer(*id)?;
            if !layer.trainable {
                continue;
            }
            total += match &layer.kind {
                LayerKind::Model(_) => self.count_unique(*id, seen)?,
                other => other.as_op().map(|op| op.trainable_parameter_count()).unwrap_or(0),
            };
        }
        Ok(total)
    }
}
