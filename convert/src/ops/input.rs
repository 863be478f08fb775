use super::{LayerConverter, kind_mismatch};
use crate::internal::*;
use crate::registry::Registry;
use crate::session::Converter;

pub fn register_all_ops(reg: &mut Registry) {
    reg.insert(Some("InputLayer"), build);
}

fn build(layer: &Layer) -> CastResult<Box<dyn LayerConverter>> {
    match &layer.kind {
        LayerKind::Input(_) => Ok(Box::new(InputConverter::new(layer.id))),
        _ => Err(kind_mismatch(layer, "InputLayer")),
    }
}

/// Model inputs become constant nodes the simulator can feed. Input layers
/// of a called model pass the caller's object through.
#[derive(Debug, Clone, new)]
pub struct InputConverter {
    layer: LayerId,
}

impl LayerConverter for InputConverter {
    fn layer(&self) -> LayerId {
        self.layer
    }

    fn convert(&self, session: &mut Converter, invocation: usize) -> CastResult<Option<ObjView>> {
        let graph = session.graph();
        let layer = graph.layer(self.layer)?;
        if !layer.invocation(invocation)?.inputs.is_empty() {
            return session.input_obj(self.layer, invocation, 0).map(Some);
        }
        let shape = session.output_shape(self.layer, invocation)?;
        let size = shape.iter().product();
        let node = Node::constant(vec![0.0; size]);
        let node = session.network_mut().add_node(node, layer.name.clone());
        info!("Created input node {} for shape {:?}", node, shape);
        Ok(Some(node.into()))
    }
}
