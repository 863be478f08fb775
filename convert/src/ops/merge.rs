use ratecast_source::layers::MergeOp;

use super::{LayerConverter, kind_mismatch};
use crate::internal::*;
use crate::registry::Registry;
use crate::session::Converter;

pub fn register_all_ops(reg: &mut Registry) {
    reg.insert(Some("Add"), build);
    reg.insert(Some("Average"), build);
}

fn build(layer: &Layer) -> CastResult<Box<dyn LayerConverter>> {
    match &layer.kind {
        LayerKind::Merge(op) => Ok(Box::new(MergeConverter::new(layer.id, op.op))),
        _ => Err(kind_mismatch(layer, "Add or Average")),
    }
}

/// Sums the inputs into a passthrough node, scaled by `1/n` for averages.
#[derive(Debug, Clone, new)]
pub struct MergeConverter {
    layer: LayerId,
    op: MergeOp,
}

impl LayerConverter for MergeConverter {
    fn layer(&self) -> LayerId {
        self.layer
    }

    fn convert(&self, session: &mut Converter, invocation: usize) -> CastResult<Option<ObjView>> {
        let inputs = session.graph().layer(self.layer)?.invocation(invocation)?.inputs.len();
        let scale = match self.op {
            MergeOp::Add => 1.0,
            MergeOp::Average => 1.0 / inputs as f32,
        };
        let output = session.build_target(self.layer, invocation, None, None)?;
        for ix in 0..inputs {
            let weights = Transform::Scalar(scale);
            session.wire_input(self.layer, invocation, output.clone(), ix, false, weights)?;
        }
        Ok(Some(output))
    }
}
