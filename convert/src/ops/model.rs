use std::collections::HashSet;

use super::{LayerConverter, kind_mismatch};
use crate::history::resolve_history;
use crate::internal::*;
use crate::registry::Registry;
use crate::session::Converter;

pub fn register_all_ops(reg: &mut Registry) {
    reg.insert(Some("Functional"), build);
    reg.insert(Some("Sequential"), build);
}

fn build(layer: &Layer) -> CastResult<Box<dyn LayerConverter>> {
    match &layer.kind {
        LayerKind::Model(_) => Ok(Box::new(ModelConverter::new(layer.id))),
        _ => Err(kind_mismatch(layer, "model")),
    }
}

/// Converts every invocation a model's outputs depend on, producers first.
///
/// Nested models are not converted as such: their outputs resolve to the
/// replayed internal invocations, which are converted in place.
#[derive(Debug, Clone, new)]
pub struct ModelConverter {
    layer: LayerId,
}

impl ModelConverter {
    /// Primitive invocations reachable from `tensors`, in depth-first
    /// post-order.
    pub fn trace_tensors(graph: &SourceGraph, tensors: &[TensorId]) -> CastResult<Vec<Provenance>> {
        let mut seen = HashSet::new();
        let mut order = vec![];
        let mut stack: Vec<(Provenance, bool)> = vec![];
        for tensor in tensors.iter().rev() {
            stack.push((resolve_history(graph, *tensor)?, false));
        }
        while let Some((prov, expanded)) = stack.pop() {
            let key = (prov.layer, prov.invocation);
            if seen.contains(&key) {
                continue;
            }
            if expanded {
                seen.insert(key);
                order.push(prov);
                continue;
            }
            stack.push((prov, true));
            let invocation = graph.layer(prov.layer)?.invocation(prov.invocation)?;
            for input in invocation.inputs.iter().rev() {
                let producer = resolve_history(graph, *input)?;
                trace!(
                    "{} node {} reads {} from {} node {}",
                    prov.layer,
                    prov.invocation,
                    input,
                    producer.layer,
                    producer.invocation
                );
                stack.push((producer, false));
            }
        }
        Ok(order)
    }
}

impl LayerConverter for ModelConverter {
    fn layer(&self) -> LayerId {
        self.layer
    }

    fn convert(&self, session: &mut Converter, invocation: usize) -> CastResult<Option<ObjView>> {
        let graph = session.graph();
        let layer = graph.layer(self.layer)?;
        let def = graph.model_def(self.layer)?;
        ensure!(invocation == 0, "Model {} can only be converted from its own inputs", layer);
        info!("{}", "=".repeat(30));
        info!("Converting model {}", layer.name);

        let roots: Vec<TensorId> = def.outputs.iter().chain(def.inputs.iter()).copied().collect();
        for prov in Self::trace_tensors(graph, &roots)? {
            if session.is_converted(prov.layer, prov.invocation) {
                continue;
            }
            info!("Converting layer {} node {}", graph.layer(prov.layer)?.name, prov.invocation);
            session.convert_invocation(prov.layer, prov.invocation)?;
        }
        Ok(None)
    }
}
