use super::{LayerConverter, kind_mismatch};
use crate::config::ConverterConfig;
use crate::errors::ConvertError;
use crate::internal::*;
use crate::registry::Registry;
use crate::session::Converter;

pub fn register_all_ops(reg: &mut Registry) {
    reg.insert(Some("Concatenate"), concatenate);
    reg.insert(Some("Flatten"), passthrough);
    reg.insert(Some("Reshape"), passthrough);
}

fn concatenate(layer: &Layer) -> CastResult<Box<dyn LayerConverter>> {
    match &layer.kind {
        LayerKind::Concatenate(op) => Ok(Box::new(ConcatenateConverter::new(layer.id, op.axis))),
        _ => Err(kind_mismatch(layer, "Concatenate")),
    }
}

fn passthrough(layer: &Layer) -> CastResult<Box<dyn LayerConverter>> {
    match &layer.kind {
        LayerKind::Flatten(_) | LayerKind::Reshape(_) => {
            Ok(Box::new(PassthroughConverter::new(layer.id)))
        }
        _ => Err(kind_mismatch(layer, "Flatten or Reshape")),
    }
}

/// Joins inputs along one non-batch axis, each input filling its slab of a
/// passthrough node.
#[derive(Debug, Clone, new)]
pub struct ConcatenateConverter {
    layer: LayerId,
    /// Counted on the batched shape.
    axis: isize,
}

impl ConcatenateConverter {
    fn batch_free_axis(&self, rank: usize) -> CastResult<usize> {
        let axis = axis_index(self.axis, rank + 1)?;
        ensure!(axis > 0, "Cannot concatenate along batch dimension (axis 0)");
        Ok(axis - 1)
    }
}

impl LayerConverter for ConcatenateConverter {
    fn layer(&self) -> LayerId {
        self.layer
    }

    fn convertible(
        &self,
        layer: &Layer,
        graph: &SourceGraph,
        _config: &ConverterConfig,
    ) -> Result<(), ConvertError> {
        let rank = layer
            .invocations
            .first()
            .and_then(|inv| inv.outputs.first())
            .and_then(|t| graph.tensor(*t).ok())
            .map(|t| t.shape.rank());
        let batch_axis = match rank {
            Some(rank) => axis_index(self.axis, rank).map(|ax| ax == 0).unwrap_or(false),
            None => self.axis == 0,
        };
        if batch_axis {
            return Err(ConvertError::Ineligible {
                layer: layer.name.clone(),
                reason: "Cannot concatenate along batch dimension (axis 0)".to_string(),
            });
        }
        Ok(())
    }

    fn convert(&self, session: &mut Converter, invocation: usize) -> CastResult<Option<ObjView>> {
        let output_shape = session.output_shape(self.layer, invocation)?;
        let axis = self.batch_free_axis(output_shape.len())?;
        let output = session.build_target(self.layer, invocation, None, None)?;
        let mut offset = 0;
        for (ix, shape) in session.input_shapes(self.layer, invocation)?.iter().enumerate() {
            let ranges: TVec<std::ops::Range<usize>> = output_shape
                .iter()
                .enumerate()
                .map(|(ax, dim)| if ax == axis { offset..offset + shape[ax] } else { 0..*dim })
                .collect();
            let slab = output.slice(&select(&output_shape, &ranges)?)?;
            session.wire_input(self.layer, invocation, slab, ix, false, Transform::Identity)?;
            offset += shape[axis];
        }
        Ok(Some(output))
    }
}

/// Layers that only reinterpret the shape: objects are flat, so the input
/// object is the output object.
#[derive(Debug, Clone, new)]
pub struct PassthroughConverter {
    layer: LayerId,
}

impl LayerConverter for PassthroughConverter {
    fn layer(&self) -> LayerId {
        self.layer
    }

    fn convert(&self, session: &mut Converter, invocation: usize) -> CastResult<Option<ObjView>> {
        session.input_obj(self.layer, invocation, 0).map(Some)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ratecast_source::layers::{Concatenate, Flatten};

    #[test]
    fn concatenate_last_axis() {
        let mut g = SourceGraph::default();
        let a = g.input("a", &[2, 1]).unwrap();
        let b = g.input("b", &[2, 2]).unwrap();
        let y = g.wire("concat", Concatenate::new(-1), &[a, b]).unwrap();
        let model = g.model("m", &[a, b], &[y]).unwrap();
        let c = Converter::new(&g, model, ConverterConfig::default()).unwrap();
        let out = c.layers().get(y).unwrap().obj;
        let posts: Vec<Vec<usize>> = c
            .network()
            .connections_into(out)
            .map(|conn| conn.post.indices.as_deref().unwrap().to_vec())
            .collect();
        assert_eq!(posts, vec![vec![0, 3], vec![1, 2, 4, 5]]);
    }

    #[test]
    fn batch_axis_is_ineligible() {
        let mut g = SourceGraph::default();
        let a = g.input("a", &[2]).unwrap();
        let b = g.input("b", &[2]).unwrap();
        let y = g.wire("concat", Concatenate::new(0), &[a, b]).unwrap();
        let model = g.model("m", &[a, b], &[y]).unwrap();
        let config = ConverterConfig::default().with_allow_fallback(false);
        let err = Converter::new(&g, model, config).unwrap_err();
        assert!(format!("{err:#}").contains("Cannot concatenate along batch dimension (axis 0)"));
    }

    #[test]
    fn flatten_reuses_input() {
        let mut g = SourceGraph::default();
        let x = g.input("x", &[2, 2]).unwrap();
        let y = g.wire("flat", Flatten, &[x]).unwrap();
        let model = g.model("m", &[x], &[y]).unwrap();
        let c = Converter::new(&g, model, ConverterConfig::default()).unwrap();
        assert_eq!(c.layers().get(y).unwrap(), c.inputs().get(x).unwrap());
    }
}
